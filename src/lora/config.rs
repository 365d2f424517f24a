//! LoRa modulation parameters.
//!
//! The gateway listens on a single fixed channel. Parameters must match the
//! transmitting nodes exactly, so none of them are configurable at runtime.

use std::fmt;

/// Operating frequency in Hz (US 915 MHz band).
pub const FREQUENCY_HZ: u32 = 915_000_000;

/// Bandwidth in Hz (125 kHz).
pub const BANDWIDTH_HZ: u32 = 125_000;

/// Spreading factor (SF12 - maximum range, slowest rate).
pub const SPREADING_FACTOR: u8 = 12;

/// Coding rate denominator (5 = 4/5 coding rate).
pub const CODING_RATE: u8 = 5;

/// Preamble length in symbols.
pub const PREAMBLE_LENGTH: u16 = 8;

/// Payload CRC is disabled on the transmitting nodes.
pub const CRC_ENABLED: bool = false;

/// Largest packet the gateway accepts, in bytes.
pub const MAX_PACKET_LEN: usize = 64;

/// Symbol duration above which low data rate optimization is mandatory (us).
const LDRO_SYMBOL_THRESHOLD_US: u32 = 16_384;

/// LoRa header mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// Length, coding rate and CRC flag are sent in a header.
    Explicit,
    /// No header; both sides must agree on a fixed length.
    Implicit,
}

/// Complete set of receiver modulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioParams {
    /// Carrier frequency in Hz.
    pub frequency_hz: u32,
    /// Bandwidth in Hz.
    pub bandwidth_hz: u32,
    /// Spreading factor (5-12).
    pub spreading_factor: u8,
    /// Coding rate denominator (5-8, i.e. 4/5 to 4/8).
    pub coding_rate: u8,
    /// Header mode.
    pub header_mode: HeaderMode,
    /// Whether payload CRC is checked.
    pub crc_enabled: bool,
    /// Preamble length in symbols.
    pub preamble_length: u16,
}

impl Default for RadioParams {
    fn default() -> Self {
        Self {
            frequency_hz: FREQUENCY_HZ,
            bandwidth_hz: BANDWIDTH_HZ,
            spreading_factor: SPREADING_FACTOR,
            coding_rate: CODING_RATE,
            header_mode: HeaderMode::Explicit,
            crc_enabled: CRC_ENABLED,
            preamble_length: PREAMBLE_LENGTH,
        }
    }
}

impl RadioParams {
    /// Duration of one LoRa symbol in microseconds (2^SF / BW).
    pub fn symbol_time_us(&self) -> u32 {
        if self.bandwidth_hz == 0 {
            return 0;
        }
        ((1u64 << self.spreading_factor) * 1_000_000 / self.bandwidth_hz as u64) as u32
    }

    /// Whether low data rate optimization must be enabled for these settings.
    pub fn low_data_rate_optimize(&self) -> bool {
        self.symbol_time_us() >= LDRO_SYMBOL_THRESHOLD_US
    }

    /// SX126x spreading factor register value.
    pub fn sf_register(&self) -> Result<u8, ParamError> {
        match self.spreading_factor {
            5..=12 => Ok(self.spreading_factor),
            sf => Err(ParamError::SpreadingFactor(sf)),
        }
    }

    /// SX126x bandwidth register value (datasheet table 13-48).
    pub fn bandwidth_register(&self) -> Result<u8, ParamError> {
        match self.bandwidth_hz {
            7_810 => Ok(0x00),
            10_420 => Ok(0x08),
            15_630 => Ok(0x01),
            20_830 => Ok(0x09),
            31_250 => Ok(0x02),
            41_670 => Ok(0x0A),
            62_500 => Ok(0x03),
            125_000 => Ok(0x04),
            250_000 => Ok(0x05),
            500_000 => Ok(0x06),
            bw => Err(ParamError::Bandwidth(bw)),
        }
    }

    /// SX126x coding rate register value.
    pub fn coding_rate_register(&self) -> Result<u8, ParamError> {
        match self.coding_rate {
            5..=8 => Ok(self.coding_rate - 4),
            cr => Err(ParamError::CodingRate(cr)),
        }
    }
}

impl fmt::Display for RadioParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} MHz, SF{}, {} kHz, CR 4/{}, {:?} header, CRC {}",
            self.frequency_hz as f64 / 1_000_000.0,
            self.spreading_factor,
            self.bandwidth_hz as f64 / 1000.0,
            self.coding_rate,
            self.header_mode,
            if self.crc_enabled { "on" } else { "off" }
        )
    }
}

/// Unsupported modulation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamError {
    /// Spreading factor outside 5-12.
    SpreadingFactor(u8),
    /// Bandwidth not supported by the SX126x.
    Bandwidth(u32),
    /// Coding rate denominator outside 5-8.
    CodingRate(u8),
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpreadingFactor(sf) => write!(f, "unsupported spreading factor: {}", sf),
            Self::Bandwidth(bw) => write!(f, "unsupported bandwidth: {} Hz", bw),
            Self::CodingRate(cr) => write!(f, "unsupported coding rate: 4/{}", cr),
        }
    }
}

impl std::error::Error for ParamError {}
