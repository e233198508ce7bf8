//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server base URL, e.g. `https://notes.example.com/api`.
    pub server_url: String,
    /// Interval of the periodic drain while online.
    pub sync_interval: Duration,
    /// Request timeout of the HTTP client.
    pub request_timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            sync_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for retry behavior.
///
/// `max_retries` bounds both the in-call retry loop and the number of times
/// a pending change is re-queued before it is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any delay, jitter included.
    pub max_delay: Duration,
    /// Whether to add up to 100% random jitter.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            jitter: false,
        }
    }

    /// Keeps the retry budget but never sleeps. For tests.
    pub fn no_delay() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Configuration for the network monitor.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Interval of the periodic re-evaluation.
    pub check_interval: Duration,
    /// Bound on a single health probe.
    pub probe_timeout: Duration,
    /// Path of the health endpoint, relative to the server URL.
    pub health_path: String,
}

impl NetworkConfig {
    /// Sets the check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the health endpoint path.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            health_path: "/health".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("https://notes.example.com")
            .with_sync_interval(Duration::from_secs(5))
            .with_request_timeout(Duration::from_secs(60))
            .with_retry(RetryConfig::new(5));

        assert_eq!(config.server_url, "https://notes.example.com");
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 5);
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.sync_interval, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(config.retry.max_delay, Duration::from_millis(10_000));

        let net = NetworkConfig::default();
        assert_eq!(net.health_path, "/health");
        assert_eq!(net.probe_timeout, Duration::from_secs(5));
    }

    #[test]
    fn no_delay_keeps_budget() {
        let retry = RetryConfig::no_delay();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.max_delay, Duration::ZERO);
    }
}
