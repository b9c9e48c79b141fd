use std::time;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// How many times a media download is attempted, and how long to wait in between.
/// The default policy makes a single attempt.
pub struct FetchRetryPolicy {
    /// Total number of attempts, including the first one. Never less than 1.
    max_attempts: u32,
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval before the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between attempts.
    maximum_interval: time::Duration,
}

impl FetchRetryPolicy {
    pub fn new(
        max_attempts: u32,
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: time::Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` attempts have been made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self
            .backoff_coefficient
            .checked_pow(exponent)
            .unwrap_or(u32::MAX);

        self.initial_interval
            .checked_mul(multiplier)
            .map_or(self.maximum_interval, |candidate| {
                std::cmp::min(candidate, self.maximum_interval)
            })
    }
}

impl Default for FetchRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: time::Duration::from_secs(10),
        }
    }
}
