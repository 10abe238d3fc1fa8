// ── Runtime bridge configuration ──
//
// Polling, retry and delivery tuning. Never touches disk: the CLI (or any
// embedding application) builds a `BridgeConfig` and hands it in.

use std::time::Duration;

use crate::error::CoreError;

/// Tuning knobs for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Delay between successful poll cycles.
    pub poll_interval: Duration,
    /// First backoff delay after a failed poll; doubles per consecutive failure.
    pub backoff_base: Duration,
    /// Upper bound for the poll backoff.
    pub backoff_cap: Duration,
    /// Consecutive polls a device may be missing before it is evicted.
    pub miss_threshold: u32,
    /// Retries after the first command attempt.
    pub command_retries: u32,
    /// Command retry delay, multiplied by the attempt number.
    pub command_retry_delay: Duration,
    /// Deadline for a command, retries included.
    pub command_timeout: Duration,
    /// How long `stop()` waits for pending commands to drain.
    pub shutdown_timeout: Duration,
    /// Tolerance for numeric value comparison.
    pub float_epsilon: f64,
    /// Events buffered per subscription before the subscriber is lagging.
    pub subscriber_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            miss_threshold: 1,
            command_retries: 3,
            command_retry_delay: Duration::from_millis(250),
            command_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
            float_epsilon: 1e-6,
            subscriber_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::Config {
                message: message.to_owned(),
            })
        };

        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be greater than zero");
        }
        if self.backoff_base.is_zero() || self.backoff_cap < self.backoff_base {
            return invalid("backoff_cap must be at least backoff_base, which must be non-zero");
        }
        if self.miss_threshold == 0 {
            return invalid("miss_threshold must be at least 1");
        }
        if self.command_timeout.is_zero() {
            return invalid("command_timeout must be greater than zero");
        }
        if !(self.float_epsilon.is_finite() && self.float_epsilon >= 0.0) {
            return invalid("float_epsilon must be a finite, non-negative number");
        }
        if self.subscriber_capacity == 0 {
            return invalid("subscriber_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.command_retries, 3);
        assert_eq!(config.miss_threshold, 1);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let config = BridgeConfig {
            backoff_base: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(5),
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn rejects_zero_miss_threshold() {
        let config = BridgeConfig {
            miss_threshold: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
