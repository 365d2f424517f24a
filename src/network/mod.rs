//! WiFi connectivity and monitoring.
//!
//! This module contains:
//! - [`backoff`]: Reconnect delay policy
//! - [`connectivity`]: Station state machine and reconnect supervisor
//! - [`stats_server`]: Gateway counters and the HTTP `/stats` endpoint
//! - [`wifi`]: ESP-IDF station driver (ESP32 only)
//!
//! # Example
//!
//! ```ignore
//! use lora_mqtt_gateway::network::{self, WifiStation};
//!
//! let (station, events) = WifiStation::new(modem, sysloop, Some(nvs), &config.wifi)?;
//! let (handle, _task) =
//!     network::connect(station, events, config.reconnect, stats.clone(), cancel).await?;
//! println!("Connected, IP: {:?}", handle.ip_addr());
//! ```

mod backoff;
mod connectivity;
mod stats_server;

#[cfg(feature = "esp32")]
mod wifi;

pub use backoff::{BackoffConfig, ReconnectBackoff};
pub use connectivity::{
    connect, Action, Connectivity, ConnectivityHandle, ConnectivityManager, ConnectivityState,
    StationDriver, StationEvent,
};
pub use stats_server::{GatewayStats, StatsServer, StatsSnapshot, DEFAULT_STATS_PORT};

#[cfg(feature = "esp32")]
pub use wifi::{WifiError, WifiStation};

use crate::config::ConfigError;

/// Network errors.
#[derive(Debug)]
pub enum NetworkError {
    /// Invalid connectivity configuration.
    Config(ConfigError),
    /// The station driver failed.
    Driver(Box<dyn std::error::Error + Send + Sync>),
    /// The connectivity supervisor stopped before connecting.
    SupervisorStopped,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "network config error: {}", e),
            Self::Driver(e) => write!(f, "station driver error: {}", e),
            Self::SupervisorStopped => write!(f, "connectivity supervisor stopped"),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Driver(e) => Some(e.as_ref()),
            Self::SupervisorStopped => None,
        }
    }
}

impl From<ConfigError> for NetworkError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
