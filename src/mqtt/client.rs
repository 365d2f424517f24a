//! ESP-IDF MQTT client wrapper.
//!
//! The ESP-IDF client runs its own task for socket I/O and reconnects to the
//! broker on its own. Publishes are enqueued into its outbox without blocking.

use super::{PublishError, Publisher, QoS};
use crate::config::MqttConfig;
use esp_idf_svc::mqtt::client::{
    EspMqttClient, EventPayload, MqttClientConfiguration, QoS as EspQoS,
};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// MQTT publisher backed by the ESP-IDF client.
pub struct EspPublisher {
    client: EspMqttClient<'static>,
    connected: Arc<AtomicBool>,
}

impl EspPublisher {
    /// Create the client and start its session.
    ///
    /// Returns once the client is running; the broker session is established
    /// asynchronously, so early publishes may sit in the outbox or be lost.
    pub fn start(config: &MqttConfig) -> Result<Self, PublishError> {
        let url = config.url();
        let connected = Arc::new(AtomicBool::new(false));
        let flag = connected.clone();

        let conf = MqttClientConfiguration {
            client_id: Some(&config.client_id),
            ..Default::default()
        };

        let client = EspMqttClient::new_cb(&url, &conf, move |event| match event.payload() {
            EventPayload::Connected(_) => {
                flag.store(true, Ordering::Release);
                info!("MQTT session established");
            }
            EventPayload::Disconnected => {
                flag.store(false, Ordering::Release);
                warn!("MQTT session lost");
            }
            EventPayload::Published(id) => {
                debug!("MQTT message {} acknowledged", id);
            }
            EventPayload::Error(e) => {
                warn!("MQTT client error: {:?}", e);
            }
            _ => {}
        })
        .map_err(|e| PublishError::Init(format!("{:?}", e)))?;

        info!("MQTT client started for {} as '{}'", url, config.client_id);

        Ok(Self { client, connected })
    }

    /// Whether the broker session is currently up (as last reported by the client).
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Publisher for EspPublisher {
    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        if !self.is_connected() {
            debug!("MQTT session not up yet, enqueueing anyway");
        }

        let qos = match qos {
            QoS::AtMostOnce => EspQoS::AtMostOnce,
            QoS::AtLeastOnce => EspQoS::AtLeastOnce,
            QoS::ExactlyOnce => EspQoS::ExactlyOnce,
        };

        let id = self
            .client
            .enqueue(topic, qos, retain, payload)
            .map_err(|e| PublishError::Rejected(format!("{:?}", e)))?;
        debug!("MQTT message {} enqueued on '{}'", id, topic);
        Ok(())
    }
}

// Note: Tests for this module require ESP32 hardware and a reachable broker.
