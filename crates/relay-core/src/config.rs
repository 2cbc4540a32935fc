//! Retention and expiry configuration.

use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The message log must hold at least one message.
    #[error("max_messages must be greater than zero")]
    ZeroCapacity,

    /// A sweep interval of zero would spin.
    #[error("sweep_interval must be greater than zero")]
    ZeroSweepInterval,

    /// Stale state may outlive a window by up to one sweep interval.
    #[error("sweep_interval ({sweep:?}) must be shorter than both retention ({retention:?}) and idle_timeout ({idle:?})")]
    SweepTooSlow {
        sweep: Duration,
        retention: Duration,
        idle: Duration,
    },
}

/// Relay core configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum number of messages retained in the log.
    pub max_messages: usize,
    /// Maximum age of a retained message.
    pub retention: Duration,
    /// Maximum time a session may go without activity.
    pub idle_timeout: Duration,
    /// How often the expiry sweeper runs.
    pub sweep_interval: Duration,
    /// Maximum message content length in bytes.
    pub max_content_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_messages: 1_000,
            retention: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            max_content_len: 64 * 1024,
        }
    }
}

impl RelayConfig {
    /// Check the configuration for values the core cannot honour.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero-capacity log, a zero sweep interval, or a
    /// sweep interval that is not shorter than both expiry windows.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if self.sweep_interval >= self.retention || self.sweep_interval >= self.idle_timeout {
            return Err(ConfigError::SweepTooSlow {
                sweep: self.sweep_interval,
                retention: self.retention,
                idle: self.idle_timeout,
            });
        }
        Ok(())
    }
}
