use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff shape between retry attempts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// `initial_interval_secs * backoff_coefficient.powi(attempt - 1)`.
    Exponential { backoff_coefficient: f64 },
    /// `initial_interval_secs * attempt as f64`.
    Linear,
}

/// Computes the delay before the next attempt of a retried activity.
///
/// `RetryPolicy(initial=0.01, max_attempts=3, strategy=exponential,
/// jitter=0)` retries a flaky activity twice before it succeeds on the
/// third attempt.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    pub initial_interval_secs: f64,
    pub max_attempts: u32,
    pub max_interval_secs: Option<f64>,
    /// Fraction of the computed delay to randomly add or subtract, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Exponential {
                backoff_coefficient: 2.0,
            },
            initial_interval_secs: 1.0,
            max_attempts: 1,
            max_interval_secs: None,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Whether a given failed attempt number is still within budget, i.e.
    /// whether the engine should schedule attempt `attempt + 1`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay in seconds before retrying after `attempt` (1-indexed, the
    /// attempt that just failed).
    pub fn delay_secs(&self, attempt: u32) -> f64 {
        let base = match self.strategy {
            RetryStrategy::Exponential { backoff_coefficient } => {
                self.initial_interval_secs * backoff_coefficient.powi(attempt.saturating_sub(1) as i32)
            }
            RetryStrategy::Linear => self.initial_interval_secs * attempt as f64,
        };
        let capped = match self.max_interval_secs {
            Some(max) => base.min(max),
            None => base,
        };
        if self.jitter <= 0.0 {
            return capped;
        }
        let mut rng = rand::rng();
        let spread = capped * self.jitter;
        let offset = rng.random_range(-spread..=spread);
        (capped + offset).max(0.0)
    }
}
