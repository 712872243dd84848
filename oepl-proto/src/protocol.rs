//! Firmware families and the pure half of their handshakes
//!
//! Everything here works on byte slices already read from the tag. The async
//! exchanges that produce those bytes live in `oepl-ble`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::advertising::{self, AdvertisingData, AdvertisingError};
use crate::ble::{self, commands};
use crate::color::ColorScheme;

/// Minimal negotiated display description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub width: u16,
    pub height: u16,
    pub color_scheme: u8,
    /// 1 when the transmit buffer must be rotated 90° before packing
    pub rotatebuffer: u8,
}

impl DeviceCapabilities {
    pub fn scheme(&self) -> ColorScheme {
        ColorScheme::from_code(self.color_scheme)
    }

    pub fn needs_rotation(&self) -> bool {
        self.rotatebuffer == 1
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnsupportedProtocol {
    #[error("unsupported manufacturer id {id:#06x} (supported: {supported})")]
    ManufacturerId { id: u16, supported: String },
    #[error("unsupported protocol {name:?} (supported: {supported})")]
    Name { name: String, supported: String },
}

/// Malformed or unexpected response from a tag
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("unexpected command echo {actual:02x?}, expected {expected:02x?}")]
    UnexpectedEcho { expected: [u8; 2], actual: Vec<u8> },
    #[error("first config chunk has number {0}, expected 0")]
    NotFirstChunk(u16),
    #[error("config incomplete: {received} of {expected} bytes")]
    Incomplete { expected: usize, received: usize },
    #[error("firmware version declares {declared}-byte sha, only {available} present")]
    ShaTruncated { declared: usize, available: usize },
}

/// The two supported firmware families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Atc,
    Oepl,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Atc, Protocol::Oepl];

    pub fn manufacturer_id(self) -> u16 {
        match self {
            Protocol::Atc => ble::ATC_MANUFACTURER_ID,
            Protocol::Oepl => ble::OEPL_MANUFACTURER_ID,
        }
    }

    pub fn service_uuid(self) -> Uuid {
        match self {
            Protocol::Atc => ble::ATC_SERVICE_UUID,
            Protocol::Oepl => ble::OEPL_SERVICE_UUID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Atc => "atc",
            Protocol::Oepl => "oepl",
        }
    }

    pub fn parse_advertising(self, data: &[u8]) -> Result<AdvertisingData, AdvertisingError> {
        match self {
            Protocol::Atc => advertising::parse_atc(data),
            Protocol::Oepl => advertising::parse_oepl(data),
        }
    }

    pub fn supported_manufacturer_ids() -> Vec<u16> {
        Self::ALL.iter().map(|p| p.manufacturer_id()).collect()
    }

    pub fn from_manufacturer_id(id: u16) -> Result<Self, UnsupportedProtocol> {
        Self::ALL
            .into_iter()
            .find(|p| p.manufacturer_id() == id)
            .ok_or_else(|| UnsupportedProtocol::ManufacturerId {
                id,
                supported: Self::supported_manufacturer_ids()
                    .iter()
                    .map(|id| format!("{id:#06x}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn from_name(name: &str) -> Result<Self, UnsupportedProtocol> {
        let lower = name.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == lower)
            .ok_or_else(|| UnsupportedProtocol::Name {
                name: name.to_string(),
                supported: Self::ALL.map(|p| p.name()).join(", "),
            })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Protocol {
    type Err = UnsupportedProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Minimum length of an ATC `0x0005` response, echo included
pub const ATC_DISPLAY_INFO_LEN: usize = 33;

/// Decode the ATC display-info response
pub fn parse_atc_display_info(response: &[u8]) -> Result<DeviceCapabilities, ResponseError> {
    if response.len() < ATC_DISPLAY_INFO_LEN {
        return Err(ResponseError::TooShort {
            expected: ATC_DISPLAY_INFO_LEN,
            actual: response.len(),
        });
    }
    if response[..2] != commands::GET_DISPLAY_INFO {
        return Err(ResponseError::UnexpectedEcho {
            expected: commands::GET_DISPLAY_INFO,
            actual: response[..2].to_vec(),
        });
    }

    let payload = &response[2..];
    let inverted = payload[19] == 1;
    let height = u16::from_le_bytes([payload[22], payload[23]]);
    let width = u16::from_le_bytes([payload[24], payload[25]]);
    let colors = payload[30];

    let scheme = match colors {
        3.. => ColorScheme::Bwry,
        2 => ColorScheme::Bwr,
        _ => ColorScheme::Mono,
    };

    let (width, height) = if inverted {
        (width, height)
    } else {
        (height, width)
    };
    Ok(DeviceCapabilities {
        width,
        height,
        color_scheme: scheme.code(),
        rotatebuffer: 1,
    })
}

/// Strip a leading command echo if the tag sent one
pub fn strip_echo<'a>(response: &'a [u8], command: &[u8; 2]) -> &'a [u8] {
    response.strip_prefix(command.as_slice()).unwrap_or(response)
}

/// Reassembles the chunked `READ_CONFIG` response
///
/// ```text
/// chunk 0: [echo:2][chunk:2 = 0][total_len:2][data]
/// chunk N: [echo:2][chunk:2][data]
/// ```
#[derive(Debug)]
pub struct ConfigAssembler {
    total: usize,
    data: Vec<u8>,
    next_chunk: u16,
}

impl ConfigAssembler {
    /// Upper bound on chunks read, including chunk 0
    pub const MAX_CHUNKS: u16 = 10;

    pub fn new(first: &[u8]) -> Result<Self, ResponseError> {
        let chunk = strip_echo(first, &commands::READ_CONFIG);
        if chunk.len() < 4 {
            return Err(ResponseError::TooShort {
                expected: 4,
                actual: chunk.len(),
            });
        }
        let number = u16::from_le_bytes([chunk[0], chunk[1]]);
        if number != 0 {
            return Err(ResponseError::NotFirstChunk(number));
        }
        let total = usize::from(u16::from_le_bytes([chunk[2], chunk[3]]));
        tracing::debug!(total, first = chunk.len() - 4, "config chunk 0");
        Ok(Self {
            total,
            data: chunk[4..].to_vec(),
            next_chunk: 1,
        })
    }

    /// Append a follow-up chunk; out-of-sequence numbers are tolerated
    pub fn push(&mut self, response: &[u8]) {
        let chunk = strip_echo(response, &commands::READ_CONFIG);
        if chunk.len() >= 2 {
            let number = u16::from_le_bytes([chunk[0], chunk[1]]);
            if number != self.next_chunk {
                tracing::warn!(expected = self.next_chunk, got = number, "config chunk out of sequence");
            }
            self.data.extend_from_slice(&chunk[2..]);
            tracing::debug!(
                chunk = number,
                have = self.data.len(),
                total = self.total,
                "config chunk"
            );
        }
        self.next_chunk += 1;
    }

    /// More chunks are needed and the chunk cap is not reached
    pub fn wants_more(&self) -> bool {
        self.data.len() < self.total && self.next_chunk < Self::MAX_CHUNKS
    }

    pub fn received(&self) -> usize {
        self.data.len()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// The reassembled blob, exactly `total_len` bytes
    pub fn finish(mut self) -> Result<Vec<u8>, ResponseError> {
        if self.data.len() < self.total {
            return Err(ResponseError::Incomplete {
                expected: self.total,
                received: self.data.len(),
            });
        }
        self.data.truncate(self.total);
        Ok(self.data)
    }
}

/// Firmware version reported by `0x0043`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub sha: String,
}

impl FirmwareVersion {
    /// `major << 8 | minor`, comparable with the advertised version
    pub fn raw(&self) -> u16 {
        u16::from(self.major) << 8 | u16::from(self.minor)
    }

    /// `[echo?][major][minor][sha_len][sha]`, the sha part is optional
    pub fn parse(response: &[u8]) -> Result<Self, ResponseError> {
        let payload = strip_echo(response, &commands::READ_FW_VERSION);
        if payload.len() < 2 {
            return Err(ResponseError::TooShort {
                expected: 2,
                actual: payload.len(),
            });
        }
        let sha = match payload.get(2) {
            Some(&len) if len > 0 => {
                let len = usize::from(len);
                let bytes = payload.get(3..3 + len).ok_or(ResponseError::ShaTruncated {
                    declared: len,
                    available: payload.len() - 3,
                })?;
                String::from_utf8_lossy(bytes)
                    .chars()
                    .filter(char::is_ascii)
                    .collect()
            }
            _ => String::new(),
        };
        Ok(Self {
            major: payload[0],
            minor: payload[1],
            sha,
        })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if !self.sha.is_empty() {
            write!(f, " ({})", &self.sha[..self.sha.len().min(8)])?;
        }
        Ok(())
    }
}

/// Transfer modes advertised in `DisplayConfig::transmission_modes`
pub mod transmission_modes {
    pub const ZIP: u8 = 0x02;
    pub const DIRECT_WRITE: u8 = 0x08;
}

/// Compressed direct write is only used below this payload size
pub const DIRECT_WRITE_ZIP_LIMIT: usize = 50 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMethod {
    DirectWriteCompressed,
    DirectWrite,
    Block,
}

impl UploadMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadMethod::DirectWriteCompressed => "direct_write_compressed",
            UploadMethod::DirectWrite => "direct_write",
            UploadMethod::Block => "block",
        }
    }
}

impl fmt::Display for UploadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick a transfer for an `image_size`-byte packed image
pub fn best_upload_method(modes: u8, image_size: usize) -> UploadMethod {
    let direct = modes & transmission_modes::DIRECT_WRITE != 0;
    let zip = modes & transmission_modes::ZIP != 0;
    match (direct, zip) {
        (true, true) if image_size < DIRECT_WRITE_ZIP_LIMIT => UploadMethod::DirectWriteCompressed,
        (true, _) => UploadMethod::DirectWrite,
        _ => UploadMethod::Block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atc_response(inverted: bool, height: u16, width: u16, colors: u8) -> Vec<u8> {
        let mut r = vec![0u8; 33];
        r[..2].copy_from_slice(&[0x00, 0x05]);
        r[2 + 19] = u8::from(inverted);
        r[2 + 22..2 + 24].copy_from_slice(&height.to_le_bytes());
        r[2 + 24..2 + 26].copy_from_slice(&width.to_le_bytes());
        r[2 + 30] = colors;
        r
    }

    #[test]
    fn registry_lookup() {
        assert_eq!(Protocol::from_manufacturer_id(0x1337), Ok(Protocol::Atc));
        assert_eq!(Protocol::from_name("OEPL"), Ok(Protocol::Oepl));
        assert_eq!(Protocol::supported_manufacturer_ids(), vec![0x1337, 0x2446]);
        let err = Protocol::from_manufacturer_id(0x0001).unwrap_err();
        assert!(err.to_string().contains("0x1337, 0x2446"));
        assert!(Protocol::from_name("zigbee").is_err());
    }

    #[test]
    fn service_uuids_embed_manufacturer_id() {
        for p in Protocol::ALL {
            let uuid = p.service_uuid().to_string();
            assert!(uuid.starts_with(&format!("0000{:04x}-", p.manufacturer_id())));
            assert!(uuid.ends_with("-0000-1000-8000-00805f9b34fb"));
        }
    }

    #[test]
    fn atc_display_info_inversion() {
        let caps = parse_atc_display_info(&atc_response(true, 128, 296, 2)).unwrap();
        assert_eq!((caps.width, caps.height), (296, 128));
        assert_eq!(caps.scheme(), ColorScheme::Bwr);
        assert!(caps.needs_rotation());

        let caps = parse_atc_display_info(&atc_response(false, 128, 296, 3)).unwrap();
        assert_eq!((caps.width, caps.height), (128, 296));
        assert_eq!(caps.scheme(), ColorScheme::Bwry);

        let caps = parse_atc_display_info(&atc_response(false, 1, 1, 1)).unwrap();
        assert_eq!(caps.scheme(), ColorScheme::Mono);
    }

    #[test]
    fn atc_display_info_rejects_bad_responses() {
        assert_eq!(
            parse_atc_display_info(&[0x00, 0x05, 1, 2]),
            Err(ResponseError::TooShort {
                expected: 33,
                actual: 4
            })
        );
        let mut wrong = atc_response(true, 1, 1, 1);
        wrong[1] = 0x06;
        assert!(matches!(
            parse_atc_display_info(&wrong),
            Err(ResponseError::UnexpectedEcho { .. })
        ));
    }

    #[test]
    fn three_chunk_config_reassembles_to_total_length() {
        let blob: Vec<u8> = (0..200u16).map(|i| i as u8).collect();

        let mut chunk0 = vec![0x00, 0x40, 0, 0];
        chunk0.extend_from_slice(&200u16.to_le_bytes());
        chunk0.extend_from_slice(&blob[..94]);
        let mut chunk1 = vec![0x00, 0x40, 1, 0];
        chunk1.extend_from_slice(&blob[94..190]);
        // echo is optional on follow-ups
        let mut chunk2 = vec![2, 0];
        chunk2.extend_from_slice(&blob[190..]);

        let mut asm = ConfigAssembler::new(&chunk0).unwrap();
        assert!(asm.wants_more());
        asm.push(&chunk1);
        assert!(asm.wants_more());
        asm.push(&chunk2);
        assert!(!asm.wants_more());
        assert_eq!(asm.finish().unwrap(), blob);
    }

    #[test]
    fn config_assembler_edges() {
        assert_eq!(
            ConfigAssembler::new(&[0x00, 0x40, 1, 0, 10, 0]).unwrap_err(),
            ResponseError::NotFirstChunk(1)
        );

        let short = ConfigAssembler::new(&[0x00, 0x40, 0, 0, 10, 0, 1, 2]).unwrap();
        assert_eq!(
            short.finish(),
            Err(ResponseError::Incomplete {
                expected: 10,
                received: 2
            })
        );

        let long = ConfigAssembler::new(&[0, 0, 2, 0, 9, 8, 7]).unwrap();
        assert_eq!(long.finish().unwrap(), vec![9, 8]);

        let mut capped = ConfigAssembler::new(&[0, 0, 0xFF, 0x00]).unwrap();
        for n in 1..ConfigAssembler::MAX_CHUNKS {
            assert!(capped.wants_more());
            capped.push(&[n as u8, 0, 1]);
        }
        assert!(!capped.wants_more());
    }

    #[test]
    fn firmware_version() {
        let fw = FirmwareVersion::parse(&[0x00, 0x43, 1, 7, 4, b'a', b'b', b'c', b'd']).unwrap();
        assert_eq!((fw.major, fw.minor, fw.sha.as_str()), (1, 7, "abcd"));
        assert_eq!(fw.raw(), 0x0107);
        assert_eq!(fw.to_string(), "1.7 (abcd)");

        assert_eq!(FirmwareVersion::parse(&[2, 0]).unwrap().to_string(), "2.0");
        assert!(FirmwareVersion::parse(&[0x00, 0x43, 1]).is_err());
        assert!(matches!(
            FirmwareVersion::parse(&[1, 0, 5, b'a']),
            Err(ResponseError::ShaTruncated { declared: 5, .. })
        ));
    }

    #[test]
    fn upload_method_selection() {
        assert_eq!(
            best_upload_method(0x0A, 10_000),
            UploadMethod::DirectWriteCompressed
        );
        assert_eq!(best_upload_method(0x0A, 60_000), UploadMethod::DirectWrite);
        assert_eq!(best_upload_method(0x08, 10_000), UploadMethod::DirectWrite);
        assert_eq!(best_upload_method(0x02, 10_000), UploadMethod::Block);
        assert_eq!(best_upload_method(0x00, 10_000).as_str(), "block");
    }
}
