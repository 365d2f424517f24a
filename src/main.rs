//! LoRa to MQTT gateway firmware.
//!
//! Startup sequence: storage, radio, WiFi (blocks until an IP is assigned),
//! MQTT client, stats endpoint, then the ingest loop, which never returns.

#[cfg(feature = "esp32")]
use log::{error, info};

#[cfg(feature = "esp32")]
fn platform_init() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

#[cfg(feature = "esp32")]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();

    info!("=== LoRa MQTT gateway starting ===");

    // A failed startup step is fatal; the panic restarts the chip
    if let Err(e) = firmware::run().await {
        error!("Gateway startup failed: {}", e);
        panic!("Gateway startup failed: {}", e);
    }
}

#[cfg(feature = "esp32")]
mod firmware {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use log::{error, info, warn};
    use lora_mqtt_gateway::lora::{LoRaRadio, RadioParams};
    use lora_mqtt_gateway::mqtt::EspPublisher;
    use lora_mqtt_gateway::network::{self, GatewayStats, StatsServer, WifiStation};
    use lora_mqtt_gateway::{storage, GatewayConfig, IngestLoop, DEFAULT_STATS_PORT};
    use std::error::Error;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    pub async fn run() -> Result<(), Box<dyn Error>> {
        let config = GatewayConfig::from_build()?;

        let nvs = storage::init_nvs()?;
        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;

        let pins = peripherals.pins;
        let mut radio = LoRaRadio::new(
            peripherals.spi2,
            pins.gpio12,
            pins.gpio11,
            pins.gpio13,
            pins.gpio10,
            pins.gpio5,
            pins.gpio4,
            pins.gpio1,
            RadioParams::default(),
        )?;
        radio.init()?;
        info!("LoRa radio ready: {}", radio.params());

        let stats = Arc::new(GatewayStats::new());
        // Never cancelled on the device
        let cancel = CancellationToken::new();

        let (station, events) =
            WifiStation::new(peripherals.modem, sysloop, Some(nvs), &config.wifi)?;
        let (connectivity, _supervisor) = network::connect(
            station,
            events,
            config.reconnect,
            stats.clone(),
            cancel.clone(),
        )
        .await?;

        let publisher = match EspPublisher::start(&config.mqtt) {
            Ok(publisher) => Some(publisher),
            Err(e) => {
                error!("Failed to start MQTT client: {}", e);
                None
            }
        };

        let _stats_server = match StatsServer::start(
            None,
            DEFAULT_STATS_PORT,
            stats.clone(),
            Some(connectivity),
        ) {
            Ok(server) => Some(server),
            Err(e) => {
                warn!("Failed to start stats server: {}", e);
                None
            }
        };

        IngestLoop::new(radio, publisher, stats).run(cancel).await;
        Ok(())
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo run --bin host-gateway' to run the pipeline on the host.");
}
