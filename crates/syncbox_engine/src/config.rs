//! Configuration for the sync engine.

use std::time::Duration;

/// Policy configuration for the engine.
///
/// Transport endpoints and credentials live on the injected transports,
/// not here; this struct only carries scheduling and retry policy.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Wall-clock interval between reconciliation ticks.
    pub poll_interval: Duration,
    /// Maximum number of records pushed per flush or sweep.
    pub flush_limit: usize,
    /// Delivery attempts before a record is failed.
    pub max_retries: u32,
    /// Realtime channel reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl SyncConfig {
    /// Creates a configuration with the default policy: a 5 minute
    /// reconciliation interval, 100-record flush cap and 3 delivery
    /// attempts per record.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5 * 60),
            flush_limit: 100,
            max_retries: 3,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Sets the reconciliation interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-flush record cap.
    pub fn with_flush_limit(mut self, limit: usize) -> Self {
        self.flush_limit = limit;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnect policy for the realtime channel.
///
/// The delay is fixed, not exponential: the reconciliation poller is
/// the delivery path of record, so channel reconnects only chase lower
/// latency and never need to back off aggressively.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Consecutive failed connects before the channel stops retrying
    /// and the engine degrades to polling-only delivery.
    pub max_attempts: u32,
    /// Fixed delay between reconnect attempts.
    pub delay: Duration,
}

impl ReconnectConfig {
    /// Creates a reconnect policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let config = SyncConfig::new();
        assert_eq!(config.poll_interval, Duration::from_secs(300));
        assert_eq!(config.flush_limit, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.delay, Duration::from_secs(30));
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new()
            .with_poll_interval(Duration::from_secs(1))
            .with_flush_limit(10)
            .with_max_retries(5)
            .with_reconnect(ReconnectConfig::new(2, Duration::from_millis(50)));

        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.flush_limit, 10);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.reconnect.max_attempts, 2);
    }
}
