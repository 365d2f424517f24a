//! Reconnect backoff policy.
//!
//! The first reconnect after losing a working link happens immediately.
//! Every further consecutive failure waits longer, doubling by default up to
//! a cap, so an unreachable access point does not keep the radio busy.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use lora_mqtt_gateway::network::{BackoffConfig, ReconnectBackoff};
//!
//! let mut backoff = ReconnectBackoff::new(BackoffConfig::default());
//! assert_eq!(backoff.next_delay(), Duration::ZERO);
//! assert_eq!(backoff.next_delay(), Duration::from_millis(500));
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//! backoff.reset();
//! assert_eq!(backoff.next_delay(), Duration::ZERO);
//! ```

use crate::config::ConfigError;
use std::time::Duration;

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the second consecutive attempt.
    pub initial: Duration,
    /// Growth factor applied per further failure.
    pub multiplier: u32,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 2,
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Retry immediately every time, without any delay.
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            multiplier: 1,
            max: Duration::ZERO,
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.multiplier == 0 {
            return Err(ConfigError::InvalidBackoff("multiplier must be >= 1"));
        }
        if self.max < self.initial {
            return Err(ConfigError::InvalidBackoff("max must be >= initial"));
        }
        Ok(())
    }
}

/// Tracks consecutive failed connection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    failures: u32,
}

impl ReconnectBackoff {
    /// Create a new backoff tracker.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Delay before the next attempt; records one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.failures {
            0 => Duration::ZERO,
            n => {
                let factor = self.config.multiplier.saturating_pow(n - 1);
                self.config
                    .initial
                    .saturating_mul(factor)
                    .min(self.config.max)
            }
        };
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Forget past failures (call once connected).
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
