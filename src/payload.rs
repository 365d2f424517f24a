//! Base64 payload decoding.
//!
//! Radio packets carry a Base64 string. The packet is read as a C string
//! (everything up to the first NUL byte), decoded, and the decoded bytes are
//! what gets published.
//!
//! # Example
//!
//! ```
//! use lora_mqtt_gateway::payload::{decode, DECODED_CAPACITY};
//!
//! let mut out = [0u8; DECODED_CAPACITY];
//! let len = decode(b"SGVsbG8=", &mut out).unwrap();
//! assert_eq!(&out[..len], b"Hello");
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::fmt::Write;

/// Capacity of the decoded payload buffer.
///
/// Matches the maximum radio packet size; Base64 never decodes to more bytes
/// than it has characters.
pub const DECODED_CAPACITY: usize = 64;

/// Bytes per line in [`hex_dump`] output.
const HEX_BYTES_PER_LINE: usize = 16;

/// Returns the packet bytes up to (not including) the first NUL byte.
pub fn c_text(raw: &[u8]) -> &[u8] {
    match raw.iter().position(|&b| b == 0) {
        Some(end) => &raw[..end],
        None => raw,
    }
}

/// Decode the Base64 text of a raw packet into `out`.
///
/// The input is interpreted as a C string and surrounding ASCII whitespace is
/// ignored. Returns the number of decoded bytes written to the front of `out`
/// (may be zero). `out` is left untouched on error.
pub fn decode(raw: &[u8], out: &mut [u8]) -> Result<usize, PayloadError> {
    let text = c_text(raw).trim_ascii();

    let decoded = STANDARD
        .decode(text)
        .map_err(|e| PayloadError::Malformed(e.to_string()))?;

    if decoded.len() > out.len() {
        return Err(PayloadError::CapacityExceeded {
            needed: decoded.len(),
            capacity: out.len(),
        });
    }

    out[..decoded.len()].copy_from_slice(&decoded);
    Ok(decoded.len())
}

/// Format bytes as space-separated hex, 16 bytes per line.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut dump = String::with_capacity(bytes.len() * 3);
    for (i, line) in bytes.chunks(HEX_BYTES_PER_LINE).enumerate() {
        if i > 0 {
            dump.push('\n');
        }
        for (j, byte) in line.iter().enumerate() {
            if j > 0 {
                dump.push(' ');
            }
            // Writing to a String cannot fail
            let _ = write!(dump, "{:02x}", byte);
        }
    }
    dump
}

/// Payload decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Input is not valid Base64.
    Malformed(String),
    /// Decoded payload does not fit the output buffer.
    CapacityExceeded { needed: usize, capacity: usize },
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed Base64: {}", reason),
            Self::CapacityExceeded { needed, capacity } => write!(
                f,
                "decoded payload too large: {} bytes (capacity {})",
                needed, capacity
            ),
        }
    }
}

impl std::error::Error for PayloadError {}
