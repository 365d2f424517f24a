//! MQTT publishing.
//!
//! The ingest loop only needs fire-and-forget publishes, so the client is
//! hidden behind the [`Publisher`] trait:
//!
//! - [`EspPublisher`] - ESP-IDF MQTT client (ESP32 only)
//! - [`LogPublisher`] - logs publishes instead of sending them (host runs)

#[cfg(feature = "esp32")]
mod client;

#[cfg(feature = "esp32")]
pub use client::EspPublisher;

use log::info;
use std::fmt;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// QoS 0, at most once.
    AtMostOnce,
    /// QoS 1, at least once.
    AtLeastOnce,
    /// QoS 2, exactly once.
    ExactlyOnce,
}

impl QoS {
    /// Numeric QoS level as used on the wire.
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// A client that can publish messages to a broker.
///
/// Publishing is best-effort: an `Ok` only means the message was handed to the
/// client, not that the broker received it.
pub trait Publisher {
    /// Publish `payload` to `topic`.
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        (**self).publish(topic, payload, qos, retain)
    }
}

/// Log-only publisher for running the pipeline without a broker.
#[derive(Debug, Default)]
pub struct LogPublisher {
    published: usize,
}

impl LogPublisher {
    /// Create a new log-only publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages "published" so far.
    pub fn published(&self) -> usize {
        self.published
    }
}

impl Publisher for LogPublisher {
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.published += 1;
        info!(
            "mqtt(LOG): topic='{}' len={} qos={} retain={} payload={}",
            topic,
            payload.len(),
            qos.level(),
            retain,
            String::from_utf8_lossy(payload)
        );
        Ok(())
    }
}

/// MQTT client errors.
#[derive(Debug)]
pub enum PublishError {
    /// Failed to create or start the client.
    Init(String),
    /// The client refused to enqueue the message.
    Rejected(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(msg) => write!(f, "MQTT client init failed: {}", msg),
            Self::Rejected(msg) => write!(f, "MQTT publish rejected: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}
