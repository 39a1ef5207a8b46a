//! Utilities: error types, logging and formatting helpers

pub mod error;
pub mod logging;

pub use error::{MalariaError, Result};
pub use logging::init_logging;

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        let secs = seconds % 60.0;
        format!("{}m {:.0}s", minutes as u32, secs)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

/// Size of a file in megabytes (10^6 bytes), 0.0 when missing
pub fn file_size_mb(path: &std::path::Path) -> f64 {
    std::fs::metadata(path)
        .map(|m| m.len() as f64 / 1e6)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(27558), "27,558");
        assert_eq!(format_number(42), "42");
    }

    #[test]
    fn test_file_size_mb() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, vec![0u8; 2_000_000]).unwrap();

        assert!((file_size_mb(&path) - 2.0).abs() < 1e-9);
        assert_eq!(file_size_mb(&dir.path().join("missing.bin")), 0.0);
    }
}
