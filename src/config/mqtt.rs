//! MQTT broker settings and the fixed publish contract.

use super::ConfigError;
use crate::mqtt::QoS;

/// Topic every decoded payload is published to.
pub const PUBLISH_TOPIC: &str = "lora/data";

/// QoS used for payload publishes.
pub const PUBLISH_QOS: QoS = QoS::AtLeastOnce;

/// Payload publishes are never retained.
pub const PUBLISH_RETAIN: bool = false;

/// Default plain-TCP MQTT port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    /// Broker hostname or IP address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
}

impl MqttConfig {
    /// Create a validated broker configuration.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::BrokerHostEmpty);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::ClientIdEmpty);
        }
        Ok(())
    }

    /// Broker URL over plain TCP, e.g. `mqtt://broker.example.com:1883`.
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}
