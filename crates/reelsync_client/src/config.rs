//! Configuration for the client engine.

use std::time::Duration;

/// Configuration for the sync queue and its flush policy.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Account this client syncs for.
    pub account_id: String,
    /// How many queued actions one batch flush sends at most.
    pub flush_batch_size: u32,
    /// Page size for change-feed pulls.
    pub pull_page_size: u32,
    /// Retry policy for retryable failures.
    pub retry: RetryConfig,
    /// Interval for timer-driven flushes, if any.
    pub flush_interval: Option<Duration>,
}

impl ClientConfig {
    /// Creates a configuration for an account with defaults.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            flush_batch_size: 50,
            pull_page_size: 100,
            retry: RetryConfig::default(),
            flush_interval: None,
        }
    }

    /// Sets the batch flush size.
    pub fn with_flush_batch_size(mut self, size: u32) -> Self {
        self.flush_batch_size = size;
        self
    }

    /// Sets the change-feed page size.
    pub fn with_pull_page_size(mut self, size: u32) -> Self {
        self.pull_page_size = size;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables timer-driven flushing at the given interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum delivery attempts per queue entry before it is parked.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on the backoff delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry policy with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Disables jitter, for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates the backoff delay before retry `attempt` (1-indexed; the
    /// initial delivery is attempt 0 and waits for nothing).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter so parked clients don't retry in lockstep.
            let jitter = capped * 0.25 * pseudo_jitter();
            Duration::from_secs_f64(capped + jitter)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Cheap time-derived jitter, good enough for backoff spreading.
fn pseudo_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("alice")
            .with_flush_batch_size(10)
            .with_pull_page_size(25)
            .with_flush_interval(Duration::from_secs(30));

        assert_eq!(config.account_id, "alice");
        assert_eq!(config.flush_batch_size, 10);
        assert_eq!(config.pull_page_size, 25);
        assert_eq!(config.flush_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig::new(10)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400))
            .without_jitter();

        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(8), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_bounded() {
        let retry = RetryConfig::new(3).with_initial_delay(Duration::from_millis(100));
        let delay = retry.delay_for_attempt(1);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn no_retry_policy() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
