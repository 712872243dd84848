//! Manufacturer-specific advertising payloads
//!
//! Both firmware families share the core layout:
//!
//! ```text
//! [version:1][hw_type:2][fw_version:2][reserved:2][battery_mv:2][temperature:1][counter:1]
//! ```
//!
//! ATC gates the temperature on the version byte, OEPL gates every field
//! after `fw_version` on the payload length.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AdvertisingError {
    #[error("empty advertising data")]
    Empty,
    #[error("advertising version {version} requires {required} bytes, got {actual}")]
    TooShort {
        version: u8,
        required: usize,
        actual: usize,
    },
    #[error("unsupported advertising data version: {0}")]
    UnsupportedVersion(u8),
}

/// One parsed advertising beacon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingData {
    pub battery_mv: u16,
    pub battery_pct: u8,
    pub temperature: Option<i8>,
    pub hw_type: u16,
    pub fw_version: u16,
    /// Format version byte, decides which optional fields are present
    pub version: u8,
}

/// Linear estimate between 2.6 V (0 %) and 3.2 V (100 %); 0 mV means unknown
pub fn battery_percentage(voltage_mv: u16) -> u8 {
    if voltage_mv == 0 {
        return 0;
    }
    let voltage = f64::from(voltage_mv) / 1000.0;
    let (min, max) = (2.6, 3.2);
    let pct = ((voltage - min) * 100.0 / (max - min)) as i64;
    pct.clamp(0, 100) as u8
}

fn le16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// Parse an ATC beacon: version 1 is 10 bytes, version 2 adds a signed temperature
pub fn parse_atc(data: &[u8]) -> Result<AdvertisingData, AdvertisingError> {
    let version = *data.first().ok_or(AdvertisingError::Empty)?;
    let required = match version {
        1 => 10,
        2 => 11,
        other => return Err(AdvertisingError::UnsupportedVersion(other)),
    };
    if data.len() < required {
        return Err(AdvertisingError::TooShort {
            version,
            required,
            actual: data.len(),
        });
    }

    let battery_mv = le16(data, 7);
    Ok(AdvertisingData {
        battery_mv,
        battery_pct: battery_percentage(battery_mv),
        temperature: (version == 2).then(|| data[9] as i8),
        hw_type: le16(data, 1),
        fw_version: le16(data, 3),
        version,
    })
}

/// Parse an OEPL beacon: 5 bytes minimum, battery and temperature are optional tails
pub fn parse_oepl(data: &[u8]) -> Result<AdvertisingData, AdvertisingError> {
    let version = *data.first().ok_or(AdvertisingError::Empty)?;
    if data.len() < 5 {
        return Err(AdvertisingError::TooShort {
            version,
            required: 5,
            actual: data.len(),
        });
    }

    let battery_mv = if data.len() >= 9 { le16(data, 7) } else { 0 };
    Ok(AdvertisingData {
        battery_mv,
        battery_pct: battery_percentage(battery_mv),
        temperature: (data.len() >= 10).then(|| data[9] as i8),
        hw_type: le16(data, 1),
        fw_version: le16(data, 3),
        version,
    })
}
