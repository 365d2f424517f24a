//! Non-volatile storage initialization.
//!
//! The WiFi driver keeps its calibration data and station state in the
//! default NVS partition, so it must be usable before WiFi starts.
//!
//! `EspDefaultNvsPartition::take()` initializes the partition and, when it
//! reports no free pages or a newer NVS format, erases it and initializes it
//! again. Only failures that survive that retry reach the caller.
//!
//! # Usage
//!
//! ```ignore
//! let nvs = storage::init_nvs()?;
//! let (station, events) = WifiStation::new(modem, sysloop, Some(nvs), &config.wifi)?;
//! ```

use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_sys::EspError;
use log::info;
use std::fmt;

/// Take the default NVS partition.
///
/// Must be called only once; the partition handle can be cloned.
pub fn init_nvs() -> Result<EspDefaultNvsPartition, StorageError> {
    let partition = EspDefaultNvsPartition::take().map_err(StorageError::Init)?;
    info!("NVS initialized");
    Ok(partition)
}

/// Storage initialization errors.
#[derive(Debug)]
pub enum StorageError {
    /// Initializing (or erasing and re-initializing) the partition failed.
    Init(EspError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(e) => write!(f, "NVS init failed: {:?}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::Init(EspError::from_infallible::<
            { esp_idf_sys::ESP_ERR_NVS_NO_FREE_PAGES },
        >());
        assert!(err.to_string().starts_with("NVS init failed"));
    }
}
