//! Early stopping on validation accuracy

use serde::{Deserialize, Serialize};

/// Outcome of feeding one validation score to [`EarlyStopping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopDecision {
    /// New best score; the caller should checkpoint
    Improved,
    /// No improvement, patience not yet exhausted
    NoImprovement,
    /// Patience exhausted; terminal
    Stop,
}

/// Patience-based early stopping
///
/// A score counts as an improvement only when it beats the best score by
/// more than `min_delta`. Once `Stop` has been returned every later update
/// returns `Stop` as well.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: f64,
    wait: usize,
    stopped: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: 0.0,
            wait: 0,
            stopped: false,
        }
    }

    pub fn update(&mut self, score: f64) -> StopDecision {
        if self.stopped {
            return StopDecision::Stop;
        }

        if score > self.best + self.min_delta {
            self.best = score;
            self.wait = 0;
            return StopDecision::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped = true;
            StopDecision::Stop
        } else {
            StopDecision::NoImprovement
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Consecutive updates without improvement
    pub fn wait(&self) -> usize {
        self.wait
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_improvement_resets_wait() {
        let mut es = EarlyStopping::new(2, 1e-4);
        assert_eq!(es.update(0.80), StopDecision::Improved);
        assert_eq!(es.update(0.79), StopDecision::NoImprovement);
        assert_eq!(es.wait(), 1);
        assert_eq!(es.update(0.85), StopDecision::Improved);
        assert_eq!(es.wait(), 0);
        assert_eq!(es.best(), 0.85);
    }

    #[test]
    fn test_stops_after_patience() {
        let mut es = EarlyStopping::new(2, 1e-4);
        es.update(0.9);
        assert_eq!(es.update(0.9), StopDecision::NoImprovement);
        assert_eq!(es.update(0.85), StopDecision::Stop);
        assert!(es.is_stopped());
    }

    #[test]
    fn test_stop_is_terminal() {
        let mut es = EarlyStopping::new(1, 0.0);
        es.update(0.5);
        assert_eq!(es.update(0.4), StopDecision::Stop);
        assert_eq!(es.update(0.99), StopDecision::Stop);
        assert_eq!(es.best(), 0.5);
    }

    #[test]
    fn test_min_delta_ignores_tiny_gains() {
        let mut es = EarlyStopping::new(3, 1e-4);
        es.update(0.9);
        assert_eq!(es.update(0.90005), StopDecision::NoImprovement);
        assert_eq!(es.best(), 0.9);
    }

    #[test]
    fn test_zero_score_is_not_an_improvement() {
        let mut es = EarlyStopping::new(2, 1e-4);
        assert_eq!(es.update(0.0), StopDecision::NoImprovement);
    }
}
