//! Logging setup and training progress messages
//!
//! The CLI installs one global `tracing` subscriber. `RUST_LOG` replaces the
//! configured filter when it is set.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use super::format_duration;

/// Target of this crate's log events in filter directives
const CRATE_TARGET: &str = "malaria_detect";

/// How much the CLI prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    #[default]
    Normal,
    /// Per-batch progress and dependency info
    Verbose,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub verbosity: Verbosity,
    /// Prefix each line with the emitting module
    pub include_target: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    pub fn verbose() -> Self {
        Self {
            verbosity: Verbosity::Verbose,
            include_target: true,
            ..Self::default()
        }
    }

    pub fn quiet() -> Self {
        Self {
            verbosity: Verbosity::Quiet,
            ..Self::default()
        }
    }

    /// `EnvFilter` directive: this crate at the chosen level, burn and the
    /// other dependencies one step quieter
    pub fn directive(&self) -> String {
        match self.verbosity {
            Verbosity::Quiet => "error".to_string(),
            Verbosity::Normal => format!("warn,{}=info", CRATE_TARGET),
            Verbosity::Verbose => format!("info,{}=debug", CRATE_TARGET),
        }
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber has already been installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Seconds left if every remaining epoch takes the average time so far
pub fn eta_seconds(epochs_done: usize, total_epochs: usize, elapsed_secs: f64) -> f64 {
    if epochs_done == 0 {
        return 0.0;
    }
    let remaining = total_epochs.saturating_sub(epochs_done);
    remaining as f64 * elapsed_secs / epochs_done as f64
}

/// Epoch-level progress of one `Trainer::fit` run
///
/// `label` prefixes every line so cross-validation folds stay apart.
pub struct TrainingLogger {
    label: String,
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    fit_start: Instant,
}

impl TrainingLogger {
    pub fn new(label: &str, total_epochs: usize) -> Self {
        Self {
            label: label.to_string(),
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            fit_start: Instant::now(),
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        debug!("[{}] epoch {}/{} started", self.label, epoch + 1, self.total_epochs);
    }

    pub fn end_epoch(&self, train_loss: f64, train_accuracy: f64, val_loss: f64, val_accuracy: f64) {
        let eta = eta_seconds(self.epoch + 1, self.total_epochs, self.fit_start.elapsed().as_secs_f64());
        info!(
            "[{}] epoch {}/{} ({:.1}s) train loss {:.4} acc {:.2}% | val loss {:.4} acc {:.2}% | at most {} left",
            self.label,
            self.epoch + 1,
            self.total_epochs,
            self.epoch_start.elapsed().as_secs_f64(),
            train_loss,
            train_accuracy * 100.0,
            val_loss,
            val_accuracy * 100.0,
            format_duration(eta)
        );
    }

    pub fn checkpoint_saved(&self, val_accuracy: f64, path: &Path) {
        info!(
            "[{}] val acc {:.2}% is the new best, checkpoint {:?}",
            self.label,
            val_accuracy * 100.0,
            path
        );
    }

    pub fn early_stop(&self, best_epoch: Option<usize>, patience: usize) {
        match best_epoch {
            Some(best) => warn!(
                "[{}] stopping: no improvement for {} epochs since epoch {}",
                self.label,
                patience,
                best + 1
            ),
            None => warn!("[{}] stopping: no epoch improved in {} tries", self.label, patience),
        }
    }

    pub fn complete(&self, epochs_run: usize, best_epoch: Option<usize>, best_val_accuracy: f64) {
        let elapsed = format_duration(self.fit_start.elapsed().as_secs_f64());
        match best_epoch {
            Some(best) => info!(
                "[{}] {} epochs in {}, restoring epoch {} (val acc {:.2}%)",
                self.label,
                epochs_run,
                elapsed,
                best + 1,
                best_val_accuracy * 100.0
            ),
            None => warn!(
                "[{}] {} epochs in {}, no epoch improved; keeping the final model",
                self.label, epochs_run, elapsed
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_parse() {
        for config in [LogConfig::default(), LogConfig::verbose(), LogConfig::quiet()] {
            assert!(EnvFilter::try_new(config.directive()).is_ok());
        }
        assert_eq!(LogConfig::quiet().directive(), "error");
        assert_eq!(LogConfig::verbose().directive(), "info,malaria_detect=debug");
    }

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::default().verbosity, Verbosity::Normal);
        assert!(LogConfig::verbose().include_target);
        assert_eq!(LogConfig::quiet().verbosity, Verbosity::Quiet);
    }

    #[test]
    fn test_eta_seconds() {
        assert_eq!(eta_seconds(0, 10, 5.0), 0.0);
        assert_eq!(eta_seconds(2, 10, 20.0), 80.0);
        assert_eq!(eta_seconds(10, 10, 50.0), 0.0);
        // early stopping can leave fewer epochs than configured
        assert_eq!(eta_seconds(12, 10, 60.0), 0.0);
    }
}
