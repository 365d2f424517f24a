//! WiFi station credentials.
//!
//! Platform-independent so validation can be tested on the host machine.
//!
//! # Example
//!
//! ```
//! use lora_mqtt_gateway::config::WifiConfig;
//!
//! let config = WifiConfig::new("MyNetwork", "MyPassword").unwrap();
//! assert!(config.validate().is_ok());
//! assert!(!config.is_open());
//! ```

use super::ConfigError;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// WiFi credentials for connecting to an access point.
///
/// The password is wiped from memory when the config is dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct WifiConfig {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network password (8-64 bytes for WPA2, empty for open networks).
    pub password: String,
}

impl WifiConfig {
    /// Create a new WiFi configuration.
    ///
    /// Returns an error if SSID or password are invalid.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration for an open network (no password).
    pub fn open(ssid: impl Into<String>) -> Result<Self, ConfigError> {
        Self::new(ssid, String::new())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is OK for open networks
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ConfigError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl fmt::Debug for WifiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiConfig")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}
