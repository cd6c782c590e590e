use crate::config::LimiterConfig;

/// Fraction of the limit that must be in use for a success to grow it
const GROWTH_UTILIZATION: f64 = 0.9;

/// What a finished call tells the limiter about its host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The host handled the call; the limit may grow
    Success,
    /// The host is overloaded; the limit shrinks
    Dropped,
    /// The call says nothing about the host's capacity
    Ignore,
}

/// An additive-increase, multiplicative-decrease concurrency limit
#[derive(Debug, Clone, PartialEq)]
pub struct AimdLimit {
    limit: f64,
    min: f64,
    max: f64,
    backoff_ratio: f64,
}

impl AimdLimit {
    /// Create a limit from its configuration. The minimum is at least 1.
    #[must_use]
    pub fn new(config: &LimiterConfig) -> Self {
        let min = f64::from(config.min_limit.max(1));
        let max = f64::from(config.max_limit).max(min);
        Self {
            limit: f64::from(config.initial_limit).clamp(min, max),
            min,
            max,
            backoff_ratio: config.backoff_ratio.clamp(0.0, 1.0),
        }
    }

    /// The current, fractional limit
    #[must_use]
    pub const fn limit(&self) -> f64 {
        self.limit
    }

    /// Number of calls that may be in flight at once
    #[must_use]
    pub fn capacity(&self) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capacity = self.limit.floor() as usize;
        capacity
    }

    /// Adjust the limit after a call finished while `in_flight` calls,
    /// itself included, were running.
    pub fn update(&mut self, outcome: Outcome, in_flight: usize) {
        match outcome {
            Outcome::Success => {
                #[allow(clippy::cast_precision_loss)]
                let in_flight = in_flight as f64;
                if in_flight >= self.limit * GROWTH_UTILIZATION {
                    self.limit = (self.limit + 1.0 / self.limit).min(self.max);
                }
            }
            Outcome::Dropped => {
                self.limit = (self.limit * self.backoff_ratio).max(self.min);
            }
            Outcome::Ignore => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(initial: u32) -> AimdLimit {
        AimdLimit::new(&LimiterConfig {
            initial_limit: initial,
            min_limit: 1,
            max_limit: 12,
            backoff_ratio: 0.5,
        })
    }

    #[test]
    fn test_grows_only_when_utilized() {
        let mut aimd = limit(10);
        aimd.update(Outcome::Success, 2);
        assert!((aimd.limit() - 10.0).abs() < f64::EPSILON);

        aimd.update(Outcome::Success, 9);
        assert!((aimd.limit() - 10.1).abs() < 1e-9);
        assert_eq!(aimd.capacity(), 10);
    }

    #[test]
    fn test_growth_is_capped() {
        let mut aimd = limit(12);
        aimd.update(Outcome::Success, 12);
        assert!((aimd.limit() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dropped_backs_off_to_min() {
        let mut aimd = limit(4);
        aimd.update(Outcome::Dropped, 4);
        assert_eq!(aimd.capacity(), 2);
        aimd.update(Outcome::Dropped, 2);
        aimd.update(Outcome::Dropped, 1);
        assert_eq!(aimd.capacity(), 1);
    }

    #[test]
    fn test_ignore_keeps_limit() {
        let mut aimd = limit(4);
        aimd.update(Outcome::Ignore, 4);
        assert!((aimd.limit() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_min_is_at_least_one() {
        let aimd = AimdLimit::new(&LimiterConfig {
            initial_limit: 0,
            min_limit: 0,
            ..LimiterConfig::default()
        });
        assert_eq!(aimd.capacity(), 1);
    }
}
