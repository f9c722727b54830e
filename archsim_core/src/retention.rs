//! User-retention filter.
//!
//! A single scalar leaky integrator. Unhealthy ticks drain it faster than
//! healthy ticks refill it, and the value is fed back to the oracle on the
//! next evaluation.

use crate::config::RetentionConfig;
use serde::{Deserialize, Serialize};

/// Tracks simulated user retention across ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionFilter {
    rate: f64,
    config: RetentionConfig,
}

impl RetentionFilter {
    /// Creates a filter at the configured initial rate.
    pub fn new(config: RetentionConfig) -> Self {
        let rate = bounded(config.initial, &config);
        Self { rate, config }
    }

    /// Current retention rate, always within `[floor, ceiling]`.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Applies one tick worth of drift for the given total score.
    pub fn update(&mut self, total_score: f64) -> f64 {
        // NaN scores count as unhealthy
        let delta = if total_score >= self.config.healthy_score {
            self.config.recovery
        } else {
            -self.config.decay
        };
        self.rate = bounded(self.rate + delta, &self.config);
        self.rate
    }

    /// Returns to the initial rate.
    pub fn reset(&mut self) {
        self.rate = bounded(self.config.initial, &self.config);
    }
}

/// Like `f64::clamp`, but an unvalidated config (floor above ceiling, NaN
/// bounds) cannot panic; the ceiling wins.
fn bounded(rate: f64, config: &RetentionConfig) -> f64 {
    rate.max(config.floor).min(config.ceiling)
}

impl Default for RetentionFilter {
    fn default() -> Self {
        Self::new(RetentionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_decay_and_recovery_steps() {
        let mut filter = RetentionFilter::default();
        assert_eq!(filter.rate(), 1.0);

        filter.update(50.0);
        assert_relative_eq!(filter.rate(), 0.995, epsilon = 1e-12);

        filter.update(95.0);
        assert_relative_eq!(filter.rate(), 0.997, epsilon = 1e-12);

        // Healthy at the ceiling stays clamped
        filter.reset();
        filter.update(100.0);
        assert_eq!(filter.rate(), 1.0);
    }

    #[test]
    fn test_floor_clamp() {
        let mut filter = RetentionFilter::default();
        for _ in 0..1000 {
            filter.update(0.0);
        }
        assert_eq!(filter.rate(), 0.1);

        filter.update(100.0);
        assert_relative_eq!(filter.rate(), 0.102, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_score_is_unhealthy() {
        let mut filter = RetentionFilter::default();
        filter.update(f64::NAN);
        assert!(filter.rate() < 1.0);
    }

    #[test]
    fn test_inverted_bounds_do_not_panic() {
        let mut filter = RetentionFilter::new(RetentionConfig {
            floor: 0.9,
            ceiling: 0.5,
            ..RetentionConfig::default()
        });
        assert_eq!(filter.rate(), 0.5);
        filter.update(0.0);
        filter.reset();
        assert_eq!(filter.rate(), 0.5);
    }

    proptest! {
        #[test]
        fn prop_rate_stays_in_bounds(scores in prop::collection::vec(-50.0f64..150.0, 0..400)) {
            let mut filter = RetentionFilter::default();
            for score in scores {
                let before = filter.rate();
                let after = filter.update(score);

                prop_assert!((0.1..=1.0).contains(&after));
                if score < 95.0 {
                    prop_assert!(after < before || after == 0.1);
                } else {
                    prop_assert!(after > before || after == 1.0);
                }
            }
        }
    }
}
