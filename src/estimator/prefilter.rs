//! Optional smoothing of raw counter samples before conversion.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Prefilter selection.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrefilterConfig {
    /// Pass samples through.
    #[default]
    None,
    /// Mean of the last `window` samples.
    MovingAverage { window: usize },
    /// `y = alpha * x + (1 - alpha) * y_prev`, seeded with the first sample.
    Exponential { alpha: f64 },
}

impl PrefilterConfig {
    /// Check the smoothing constant.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            PrefilterConfig::MovingAverage { window: 0 } => {
                Err("moving average window must be at least 1".to_string())
            }
            PrefilterConfig::Exponential { alpha } if !(alpha > 0.0 && alpha <= 1.0) => {
                Err(format!("exponential alpha {} outside (0, 1]", alpha))
            }
            _ => Ok(()),
        }
    }
}

/// Stateful prefilter instance.
#[derive(Debug, Clone)]
pub struct Prefilter {
    config: PrefilterConfig,
    history: VecDeque<f64>,
    smoothed: Option<f64>,
}

impl Prefilter {
    pub fn new(config: PrefilterConfig) -> Self {
        let capacity = match config {
            PrefilterConfig::MovingAverage { window } => window,
            _ => 0,
        };
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            smoothed: None,
        }
    }

    /// Feed one sample and return the smoothed value.
    pub fn apply(&mut self, sample: f64) -> f64 {
        match self.config {
            PrefilterConfig::None => sample,
            PrefilterConfig::MovingAverage { window } => {
                if self.history.len() == window.max(1) {
                    self.history.pop_front();
                }
                self.history.push_back(sample);
                self.history.iter().sum::<f64>() / self.history.len() as f64
            }
            PrefilterConfig::Exponential { alpha } => {
                let next = match self.smoothed {
                    Some(prev) => alpha * sample + (1.0 - alpha) * prev,
                    None => sample,
                };
                self.smoothed = Some(next);
                next
            }
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.smoothed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_passthrough() {
        let mut p = Prefilter::new(PrefilterConfig::None);
        assert_eq!(p.apply(625_001.0), 625_001.0);
    }

    #[test]
    fn test_moving_average_window() {
        let mut p = Prefilter::new(PrefilterConfig::MovingAverage { window: 3 });
        assert_eq!(p.apply(3.0), 3.0);
        assert_eq!(p.apply(6.0), 4.5);
        assert_eq!(p.apply(9.0), 6.0);
        assert_eq!(p.apply(12.0), 9.0);
    }

    #[test]
    fn test_exponential_seeded_by_first_sample() {
        let mut p = Prefilter::new(PrefilterConfig::Exponential { alpha: 0.3 });
        assert_eq!(p.apply(100.0), 100.0);
        assert_relative_eq!(p.apply(110.0), 103.0, epsilon = 1e-12);
        p.reset();
        assert_eq!(p.apply(50.0), 50.0);
    }

    #[test]
    fn test_validate() {
        assert!(PrefilterConfig::MovingAverage { window: 0 }.validate().is_err());
        assert!(PrefilterConfig::Exponential { alpha: 0.0 }.validate().is_err());
        assert!(PrefilterConfig::Exponential { alpha: 1.5 }.validate().is_err());
        assert!(PrefilterConfig::Exponential { alpha: f64::NAN }.validate().is_err());
        assert!(PrefilterConfig::Exponential { alpha: 1.0 }.validate().is_ok());
    }
}
