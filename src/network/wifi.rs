//! ESP32 WiFi station driver.
//!
//! Wraps the non-blocking ESP-IDF WiFi driver. Station lifecycle events from
//! the system event loop are forwarded to the connectivity supervisor over a
//! channel, so reconnects never run inside an event callback.

use super::connectivity::{StationDriver, StationEvent};
use crate::config::WifiConfig;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent};
use esp_idf_sys::EspError;
use log::{debug, info};
use tokio::sync::mpsc;

/// WiFi station with event forwarding.
pub struct WifiStation {
    wifi: EspWifi<'static>,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl WifiStation {
    /// Create and configure the station.
    ///
    /// The interface is not started; the supervisor does that. Returns the
    /// station and the receiving end of its event stream.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        config: &WifiConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<StationEvent>), WifiError> {
        let mut wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;

        let auth_method = if config.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let client = Configuration::Client(ClientConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidSsid)?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| WifiError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });
        wifi.set_configuration(&client)?;
        info!("WiFi station configured for SSID: {}", config.ssid);

        let (tx, rx) = mpsc::unbounded_channel();

        let wifi_tx = tx.clone();
        let wifi_events = sysloop.subscribe::<WifiEvent, _>(move |event| {
            let forwarded = match event {
                WifiEvent::StaStarted => Some(StationEvent::Started),
                WifiEvent::StaDisconnected(..) => Some(StationEvent::Disconnected),
                _ => None,
            };
            if let Some(forwarded) = forwarded {
                debug!("WiFi event: {:?}", forwarded);
                let _ = wifi_tx.send(forwarded);
            }
        })?;

        let ip_events = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let IpEvent::DhcpIpAssigned(assignment) = event {
                let _ = tx.send(StationEvent::GotIp(assignment.ip()));
            }
        })?;

        Ok((
            Self {
                wifi,
                _wifi_events: wifi_events,
                _ip_events: ip_events,
            },
            rx,
        ))
    }
}

impl StationDriver for WifiStation {
    type Error = EspError;

    fn start(&mut self) -> Result<(), EspError> {
        self.wifi.start()
    }

    fn connect(&mut self) -> Result<(), EspError> {
        self.wifi.connect()
    }
}

/// Errors that can occur while setting up the station.
#[derive(Debug)]
pub enum WifiError {
    /// SSID is invalid (too long or contains invalid characters).
    InvalidSsid,
    /// Password is invalid.
    InvalidPassword,
    /// ESP-IDF error.
    Esp(EspError),
}

impl From<EspError> for WifiError {
    fn from(e: EspError) -> Self {
        Self::Esp(e)
    }
}

impl std::fmt::Display for WifiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "invalid SSID"),
            Self::InvalidPassword => write!(f, "invalid password"),
            Self::Esp(e) => write!(f, "ESP error: {:?}", e),
        }
    }
}

impl std::error::Error for WifiError {}
