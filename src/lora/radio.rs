//! SX1262 receiver for ESP32.
//!
//! Drives the LoRa radio on the LILYGO T3-S3 board through the `sx1262`
//! crate. The radio is kept in continuous receive mode and polled for the
//! RX_DONE interrupt flag.
//!
//! # Pin Configuration (LILYGO T3-S3)
//!
//! | Signal | GPIO | Notes |
//! |--------|------|-------|
//! | SPI MOSI | 11 | Master Out Slave In |
//! | SPI MISO | 13 | Master In Slave Out |
//! | SPI CLK | 12 | SPI Clock |
//! | NSS (CS) | 10 | Chip Select |
//! | RESET | 5 | Radio Reset |
//! | BUSY | 4 | Radio Busy Status |
//! | DIO1 | 1 | Interrupt |

use super::config::{HeaderMode, ParamError, RadioParams};
use super::source::PacketSource;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{Gpio1, Gpio10, Gpio4, Gpio5, Input, Output, PinDriver};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::spi::config::Config as SpiConfig;
use esp_idf_hal::spi::config::DriverConfig;
use esp_idf_hal::spi::{SpiDeviceDriver, SpiDriver, SPI2};
use esp_idf_hal::units::FromValueType;
use log::{debug, info};
use regiface::{Command, NoParameters, ToByteArray};
use std::fmt;
use std::time::{Duration, Instant};
use sx1262::{
    ClearIrqStatus, Device, DioIrqConfig, GetIrqStatus, GetPacketStatus, GetRxBufferStatus,
    IrqMask, PacketParams, PacketType, RfFrequencyConfig, RxMode, SetDioIrqParams,
    SetPacketParams, SetPacketType, SetRfFrequency, SetRx, SetStandby, StandbyConfig,
};

/// Maximum time to wait for radio to become ready (ms).
const BUSY_TIMEOUT_MS: u64 = 1000;

/// Payload length advertised in explicit-header RX mode (upper bound only).
const RX_MAX_PAYLOAD: u8 = 0xFF;

/// Raw LoRa modulation parameters (bypasses sx1262 crate's broken bandwidth enum).
///
/// Format: [SF, BW, CR, LowDataRateOpt, 0, 0, 0, 0]
#[derive(Debug, Clone)]
struct RawLoRaModParams([u8; 8]);

impl RawLoRaModParams {
    fn from_params(params: &RadioParams) -> Result<Self, ParamError> {
        Ok(Self([
            params.sf_register()?,
            params.bandwidth_register()?,
            params.coding_rate_register()?,
            params.low_data_rate_optimize() as u8,
            0,
            0,
            0,
            0,
        ]))
    }
}

impl ToByteArray for RawLoRaModParams {
    type Error = core::convert::Infallible;
    type Array = [u8; 8];

    fn to_bytes(self) -> Result<Self::Array, Self::Error> {
        Ok(self.0)
    }
}

/// Raw SetModulationParams command (opcode 0x8B).
#[derive(Debug, Clone)]
struct RawSetModulationParams {
    params: RawLoRaModParams,
}

impl Command for RawSetModulationParams {
    type IdType = u8;
    type CommandParameters = RawLoRaModParams;
    type ResponseParameters = NoParameters;

    fn id() -> Self::IdType {
        0x8B
    }

    fn invoking_parameters(self) -> Self::CommandParameters {
        self.params
    }
}

/// SX1262 LoRa receiver.
pub struct LoRaRadio<'d> {
    device: Device<SpiDeviceDriver<'d, SpiDriver<'d>>>,
    reset: PinDriver<'d, Gpio5, Output>,
    busy: PinDriver<'d, Gpio4, Input>,
    // Never read: RX_DONE is polled over SPI. Held so GPIO1 stays claimed
    // for the radio and cannot be reconfigured elsewhere.
    _dio1: PinDriver<'d, Gpio1, Input>,
    params: RadioParams,
    initialized: bool,
    receiving: bool,
}

impl<'d> LoRaRadio<'d> {
    /// Create a new radio instance.
    ///
    /// This initializes the SPI bus and GPIO pins but does not configure the radio.
    /// Call [`LoRaRadio::init`] to configure it.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spi: impl Peripheral<P = SPI2> + 'd,
        sclk: impl Peripheral<P = esp_idf_hal::gpio::Gpio12> + 'd,
        mosi: impl Peripheral<P = esp_idf_hal::gpio::Gpio11> + 'd,
        miso: impl Peripheral<P = esp_idf_hal::gpio::Gpio13> + 'd,
        cs: impl Peripheral<P = Gpio10> + 'd,
        reset: impl Peripheral<P = Gpio5> + 'd,
        busy: impl Peripheral<P = Gpio4> + 'd,
        dio1: impl Peripheral<P = Gpio1> + 'd,
        params: RadioParams,
    ) -> Result<Self, RadioError> {
        // SX1262 supports up to 16MHz, use conservative 2MHz
        let spi_config = SpiConfig::new().baudrate(2.MHz().into());
        let driver_config = DriverConfig::new();

        let spi_driver =
            SpiDriver::new(spi, sclk, mosi, Some(miso), &driver_config).map_err(RadioError::Spi)?;
        let spi_device =
            SpiDeviceDriver::new(spi_driver, Some(cs), &spi_config).map_err(RadioError::Spi)?;

        Ok(Self {
            device: Device::new(spi_device),
            reset: PinDriver::output(reset).map_err(RadioError::Gpio)?,
            busy: PinDriver::input(busy).map_err(RadioError::Gpio)?,
            _dio1: PinDriver::input(dio1).map_err(RadioError::Gpio)?,
            params,
            initialized: false,
            receiving: false,
        })
    }

    /// Reset the radio and apply the modulation parameters.
    pub fn init(&mut self) -> Result<(), RadioError> {
        let mod_params = RawLoRaModParams::from_params(&self.params)?;

        info!("Initializing SX1262 radio");

        self.hardware_reset()?;
        self.wait_busy()?;

        self.standby()?;

        self.device
            .execute_command(SetPacketType {
                packet_type: PacketType::LoRa,
            })
            .map_err(RadioError::Command)?;
        self.wait_busy()?;

        self.device
            .execute_command(SetRfFrequency {
                config: RfFrequencyConfig {
                    frequency: self.params.frequency_hz,
                },
            })
            .map_err(RadioError::Command)?;
        self.wait_busy()?;

        // Raw bytes, the sx1262 crate's bandwidth enum has incorrect values
        self.device
            .execute_command(RawSetModulationParams { params: mod_params })
            .map_err(RadioError::Command)?;
        self.wait_busy()?;

        let packet_params = build_lora_packet_params(
            self.params.preamble_length,
            self.params.header_mode,
            RX_MAX_PAYLOAD,
            self.params.crc_enabled,
        );
        self.device
            .execute_command(SetPacketParams {
                params: packet_params,
            })
            .map_err(RadioError::Command)?;
        self.wait_busy()?;

        self.configure_irq()?;

        self.initialized = true;
        info!("SX1262 initialized: {}", self.params);

        Ok(())
    }

    /// Route RX_DONE and TIMEOUT to the IRQ status register.
    fn configure_irq(&mut self) -> Result<(), RadioError> {
        let irq_mask = IrqMask::RX_DONE | IrqMask::TIMEOUT;
        self.device
            .execute_command(SetDioIrqParams {
                config: DioIrqConfig {
                    irq_mask,
                    dio1_mask: irq_mask,
                    dio2_mask: IrqMask::empty(),
                    dio3_mask: IrqMask::empty(),
                },
            })
            .map_err(RadioError::Command)?;
        self.wait_busy()?;
        Ok(())
    }

    fn standby(&mut self) -> Result<(), RadioError> {
        self.device
            .execute_command(SetStandby {
                config: StandbyConfig::Rc,
            })
            .map_err(RadioError::Command)?;
        self.receiving = false;
        self.wait_busy()
    }

    fn clear_irq(&mut self) -> Result<(), RadioError> {
        self.device
            .execute_command(ClearIrqStatus {
                irq_mask: IrqMask::all(),
            })
            .map_err(RadioError::Command)?;
        self.wait_busy()
    }

    /// Hardware reset the radio.
    fn hardware_reset(&mut self) -> Result<(), RadioError> {
        debug!("Resetting radio");
        self.reset.set_low().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(1);
        self.reset.set_high().map_err(RadioError::Gpio)?;
        FreeRtos::delay_ms(10);
        Ok(())
    }

    /// Wait for the radio to be ready (BUSY pin low).
    fn wait_busy(&self) -> Result<(), RadioError> {
        let start = Instant::now();
        let timeout = Duration::from_millis(BUSY_TIMEOUT_MS);

        while self.busy.is_high() {
            if start.elapsed() > timeout {
                return Err(RadioError::Timeout);
            }
            FreeRtos::delay_ms(1);
        }

        Ok(())
    }

    /// The modulation parameters this radio was configured with.
    pub fn params(&self) -> &RadioParams {
        &self.params
    }
}

impl<'d> PacketSource for LoRaRadio<'d> {
    type Error = RadioError;

    fn arm_receive(&mut self) -> Result<(), RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        if self.receiving {
            return Ok(());
        }

        self.clear_irq()?;
        self.device
            .execute_command(SetRx {
                mode: RxMode::Continuous,
            })
            .map_err(RadioError::Command)?;
        self.wait_busy()?;
        self.receiving = true;
        debug!("Radio listening");
        Ok(())
    }

    fn packet_available(&mut self) -> Result<bool, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        self.wait_busy()?;
        let irq = self
            .device
            .execute_command(GetIrqStatus)
            .map_err(RadioError::Command)?;
        Ok(irq.irq_mask.contains(IrqMask::RX_DONE))
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        self.wait_busy()?;

        let status = self
            .device
            .execute_command(GetRxBufferStatus)
            .map_err(RadioError::Command)?;
        self.wait_busy()?;

        let payload_len = status.buffer_status.payload_length as usize;
        let buffer_offset = status.buffer_status.buffer_pointer;
        let copy_len = payload_len.min(buf.len());

        if copy_len > 0 {
            self.device
                .read_buffer(buffer_offset, &mut buf[..copy_len])
                .map_err(RadioError::Command)?;
            self.wait_busy()?;
        }

        let packet_status = self
            .device
            .execute_command(GetPacketStatus)
            .map_err(RadioError::Command)?;

        // Continuous RX keeps listening; only the flag needs clearing
        self.clear_irq()?;

        // LoRa mode: status[0]=RSSI (-val/2 dBm), status[1]=SNR (val/4 dB)
        let rssi = -(packet_status.packet_status.status[0] as i16) / 2;
        let snr = (packet_status.packet_status.status[1] as i8) / 4;
        debug!(
            "LoRa RX: {} bytes, RSSI {} dBm, SNR {} dB",
            payload_len, rssi, snr
        );

        Ok(payload_len)
    }
}

/// Build LoRa packet parameters as raw bytes.
///
/// Format: [preamble_hi, preamble_lo, header_type, payload_len, crc_on, invert_iq, 0, 0, 0]
fn build_lora_packet_params(
    preamble: u16,
    header_mode: HeaderMode,
    payload_len: u8,
    crc_enabled: bool,
) -> PacketParams {
    PacketParams {
        params: [
            (preamble >> 8) as u8,
            (preamble & 0xFF) as u8,
            match header_mode {
                HeaderMode::Explicit => 0x00,
                HeaderMode::Implicit => 0x01,
            },
            payload_len,
            crc_enabled as u8,
            0x00, // Standard IQ
            0,
            0,
            0,
        ],
    }
}

/// Radio errors.
#[derive(Debug)]
pub enum RadioError {
    /// SPI communication error.
    Spi(esp_idf_sys::EspError),
    /// GPIO error.
    Gpio(esp_idf_sys::EspError),
    /// Command execution error.
    Command(sx1262::Error),
    /// Modulation parameters not supported by the chip.
    Params(ParamError),
    /// Radio not initialized.
    NotInitialized,
    /// Radio busy timeout.
    Timeout,
}

impl From<ParamError> for RadioError {
    fn from(e: ParamError) -> Self {
        Self::Params(e)
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spi(e) => write!(f, "SPI error: {:?}", e),
            Self::Gpio(e) => write!(f, "GPIO error: {:?}", e),
            Self::Command(e) => write!(f, "command error: {:?}", e),
            Self::Params(e) => write!(f, "invalid radio parameters: {}", e),
            Self::NotInitialized => write!(f, "radio not initialized"),
            Self::Timeout => write!(f, "radio timeout"),
        }
    }
}

impl std::error::Error for RadioError {}
