//! Reconnection Policy
//!
//! Fixed-interval retry with a bounded attempt count for client sessions.
//! The policy only answers "wait how long before the next attempt?"; the
//! session driver owns the timer and the connection.

use std::time::Duration;

/// Default delay between reconnection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default bound on a single connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before each reconnection attempt.
    pub retry_interval: Duration,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Bound on each individual connect.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(retry_interval: Duration, max_attempts: u32, connect_timeout: Duration) -> Self {
        Self {
            retry_interval,
            max_attempts,
            connect_timeout,
        }
    }

    /// Create configuration from `SessionSettings`.
    #[must_use]
    pub const fn from_session_settings(settings: &crate::SessionSettings) -> Self {
        Self {
            retry_interval: settings.disconnect_retry,
            max_attempts: settings.max_reconnect_attempts,
            connect_timeout: settings.connect_timeout,
        }
    }
}

/// Reconnection policy counting attempts against a fixed interval.
///
/// # Example
///
/// ```rust
/// use market_watch::infrastructure::session::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// // Wait before the first attempt
/// let delay = policy.next_delay();
/// assert!(delay.is_some());
/// assert_eq!(policy.attempt_count(), 1);
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, counting that attempt.
    ///
    /// Returns `None` once max attempts have been used.
    #[must_use]
    pub const fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.config.retry_interval)
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Bound on each individual connect.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.config.connect_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig::new(Duration::from_millis(100), max_attempts, Duration::from_secs(1))
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.retry_interval, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn policy_fixed_interval() {
        let mut policy = ReconnectPolicy::new(config(0));

        for _ in 0..4 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        }
        assert_eq!(policy.attempt_count(), 4);
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(config(5));

        for attempt in 1..=5 {
            assert!(policy.next_delay().is_some());
            assert_eq!(policy.attempt_count(), attempt);
        }

        // Sixth attempt is refused
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn policy_reset() {
        let mut policy = ReconnectPolicy::new(config(3));

        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn unlimited_attempts() {
        let mut policy = ReconnectPolicy::new(config(0));

        for _ in 0..1000 {
            assert!(policy.should_retry());
            assert!(policy.next_delay().is_some());
        }
    }
}
