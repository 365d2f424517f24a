//! LoRa to MQTT gateway library.
//!
//! Receives Base64-encoded LoRa packets, decodes them and publishes the
//! payload to an MQTT broker over WiFi. Everything except the ESP-IDF drivers
//! is platform-independent and tested on the host machine.

pub mod config;
pub mod ingest;
pub mod lora;
pub mod mqtt;
pub mod network;
pub mod payload;
#[cfg(feature = "esp32")]
pub mod storage;

// Re-export commonly used items
pub use config::{ConfigError, GatewayConfig, MqttConfig, WifiConfig};
pub use ingest::{IngestLoop, PacketOutcome};
pub use lora::{PacketSource, RadioParams, MAX_PACKET_LEN};
pub use mqtt::{LogPublisher, PublishError, Publisher, QoS};
pub use network::{
    BackoffConfig, ConnectivityHandle, ConnectivityState, GatewayStats, NetworkError,
    StatsServer, DEFAULT_STATS_PORT,
};
pub use payload::{PayloadError, DECODED_CAPACITY};
