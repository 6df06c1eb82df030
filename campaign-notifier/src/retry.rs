use std::time;

/// How the coordinator backs off between attempts at delivering a batch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff before the second attempt.
    initial_interval: time::Duration,
    /// The maximum possible backoff between attempts.
    maximum_interval: Option<time::Duration>,
    /// Total attempts per batch, the first one included.
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True if another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff after the 1-based `attempt` failed, without jitter.
    pub fn backoff(&self, attempt: u32) -> time::Duration {
        let factor = self
            .backoff_coefficient
            .saturating_pow(attempt.saturating_sub(1));
        let candidate = self.initial_interval.saturating_mul(factor);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate, max_interval),
            None => candidate,
        }
    }

    /// Backoff plus up to 50ms of jitter.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let jitter = time::Duration::from_millis(rand::random::<u64>() % 50);
        self.backoff(attempt) + jitter
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: Some(time::Duration::from_secs(100)),
            max_attempts: 5,
        }
    }
}
