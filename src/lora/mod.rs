//! LoRa radio support.
//!
//! This module contains:
//! - [`config`]: Fixed modulation parameters and SX126x register mapping
//! - [`source`]: The [`PacketSource`] trait the ingest loop polls
//! - [`radio`]: SX1262 receiver driver (ESP32 only)

mod config;
mod source;

#[cfg(feature = "esp32")]
mod radio;

pub use config::{
    HeaderMode, ParamError, RadioParams, BANDWIDTH_HZ, CODING_RATE, CRC_ENABLED, FREQUENCY_HZ,
    MAX_PACKET_LEN, PREAMBLE_LENGTH, SPREADING_FACTOR,
};
pub use source::PacketSource;

#[cfg(feature = "esp32")]
pub use radio::{LoRaRadio, RadioError};
