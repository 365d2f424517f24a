//! Gateway configuration.
//!
//! All parameters are compile-time constants. The credentials and broker
//! identity can be overridden when building:
//!
//! ```bash
//! GATEWAY_WIFI_SSID=MyNet GATEWAY_WIFI_PASSWORD=secret123 \
//!     cargo build --release --features esp32
//! ```
//!
//! # Components
//!
//! - [`wifi`] - WiFi station credentials
//! - [`mqtt`] - Broker settings and the fixed publish contract

mod mqtt;
mod wifi;

pub use mqtt::{
    MqttConfig, DEFAULT_MQTT_PORT, PUBLISH_QOS, PUBLISH_RETAIN, PUBLISH_TOPIC,
};
pub use wifi::{WifiConfig, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_PASSWORD_LEN};

use crate::network::BackoffConfig;
use std::fmt;

/// WiFi network name.
pub const WIFI_SSID: &str = match option_env!("GATEWAY_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "lora-gateway",
};

/// WiFi network password.
pub const WIFI_PASSWORD: &str = match option_env!("GATEWAY_WIFI_PASSWORD") {
    Some(password) => password,
    None => "lora-gateway-pass",
};

/// MQTT broker hostname.
pub const MQTT_HOST: &str = match option_env!("GATEWAY_MQTT_HOST") {
    Some(host) => host,
    None => "mqtt.aerisiot.com",
};

/// MQTT broker port.
pub const MQTT_PORT: u16 = DEFAULT_MQTT_PORT;

/// MQTT client identifier.
pub const MQTT_CLIENT_ID: &str = match option_env!("GATEWAY_MQTT_CLIENT_ID") {
    Some(id) => id,
    None => "esp32-lora-gateway",
};

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Station credentials.
    pub wifi: WifiConfig,
    /// Broker settings.
    pub mqtt: MqttConfig,
    /// WiFi reconnect policy.
    pub reconnect: BackoffConfig,
}

impl GatewayConfig {
    /// Build the configuration from the compiled-in constants.
    pub fn from_build() -> Result<Self, ConfigError> {
        Ok(Self {
            wifi: WifiConfig::new(WIFI_SSID, WIFI_PASSWORD)?,
            mqtt: MqttConfig::new(MQTT_HOST, MQTT_PORT, MQTT_CLIENT_ID)?,
            reconnect: BackoffConfig::default(),
        })
    }
}

/// Errors that can occur during configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// Broker host is empty.
    BrokerHostEmpty,
    /// Broker port is zero.
    InvalidPort,
    /// MQTT client id is empty.
    ClientIdEmpty,
    /// Reconnect backoff parameters are inconsistent.
    InvalidBackoff(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::BrokerHostEmpty => write!(f, "MQTT broker host cannot be empty"),
            Self::InvalidPort => write!(f, "MQTT broker port cannot be 0"),
            Self::ClientIdEmpty => write!(f, "MQTT client id cannot be empty"),
            Self::InvalidBackoff(msg) => write!(f, "invalid reconnect backoff: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
