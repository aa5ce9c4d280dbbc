//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for one replica's sync sessions.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Partition this replica synchronizes.
    pub partition: String,
    /// Maximum operations per download batch.
    pub pull_batch_size: u32,
    /// Maximum operations per upload batch.
    pub push_batch_size: u32,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Interval between background cycles of a started session.
    /// `None` syncs only when waited on.
    pub sync_interval: Option<Duration>,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration for a partition.
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            pull_batch_size: 100,
            push_batch_size: 100,
            retry: RetryConfig::default(),
            sync_interval: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the download batch size.
    #[must_use]
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size.max(1);
        self
    }

    /// Sets the upload batch size.
    #[must_use]
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables background sync at `interval`.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
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
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Returns the delay before `attempt` (0-indexed; attempt 0 never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25%
            Duration::from_secs_f64(capped + capped * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` taken from the clock's sub-second part.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("tasks")
            .with_pull_batch_size(50)
            .with_push_batch_size(25)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.partition, "tasks");
        assert_eq!(config.pull_batch_size, 50);
        assert_eq!(config.push_batch_size, 25);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let config = SyncConfig::default().with_pull_batch_size(0);
        assert_eq!(config.pull_batch_size, 1);
    }

    #[test]
    fn no_retry_means_one_attempt() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(3), Duration::ZERO);
    }

    #[test]
    fn delays_grow_exponentially() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let first = config.delay_for_attempt(1);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        assert!(config.delay_for_attempt(2) >= Duration::from_millis(200));
    }

    #[test]
    fn delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
