//! Upload framing: block-based and direct-write
//!
//! Block-based transfer announces the image with `DATA_INFO`, then answers
//! every `BLOCK_REQUEST` with the 4 KiB block split into 230-byte parts:
//!
//! ```text
//! block    = [len:2][sum16:2][data...]
//! part     = [checksum:1][block_id:1][part_id:1][payload:230, zero padded]
//! ```
//!
//! Direct write streams the packed image as `DIRECT_WRITE_DATA` frames
//! between a start and an end frame.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ble::{BLOCK_SIZE, MAX_PACKET_DATA, command, commands, response_code, responses};

/// Size of a block part frame body, without the opcode
pub const BLOCK_PART_SIZE: usize = 3 + MAX_PACKET_DATA;

/// Direct-write start frames carry at most this many bytes after the opcode
pub const DIRECT_WRITE_START_MAX: usize = 200;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("packet payload is {len} bytes, at most {max} allowed")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Image encoding announced in `DATA_INFO`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    RawBw = 0x20,
    RawColor = 0x21,
    Compressed = 0x30,
}

/// Body of the `DATA_INFO` command, 17 bytes little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataInfo {
    /// Always 255, the firmware ignores it
    pub checksum: u8,
    /// CRC32 of the full encoded buffer masked to 28 bits, used by the tag
    /// as the data version
    pub data_ver: u64,
    pub data_size: u32,
    pub data_type: DataType,
    pub data_type_argument: u8,
    pub next_check_in: u16,
}

impl DataInfo {
    pub const SIZE: usize = 17;

    /// Tags compare data versions with the top nibble cleared, so an image
    /// already shown is only recognised when the same mask is applied here.
    pub const DATA_VER_MASK: u32 = 0x0FFF_FFFF;

    pub fn for_image(data: &[u8], data_type: DataType) -> Self {
        Self {
            checksum: 255,
            data_ver: u64::from(crc32fast::hash(data) & Self::DATA_VER_MASK),
            data_size: data.len() as u32,
            data_type,
            data_type_argument: 0,
            next_check_in: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.checksum;
        buf[1..9].copy_from_slice(&self.data_ver.to_le_bytes());
        buf[9..13].copy_from_slice(&self.data_size.to_le_bytes());
        buf[13] = self.data_type as u8;
        buf[14] = self.data_type_argument;
        buf[15..17].copy_from_slice(&self.next_check_in.to_le_bytes());
        buf
    }

    /// Complete command frame, opcode included
    pub fn to_command(&self) -> Vec<u8> {
        command(commands::DATA_INFO, &self.to_bytes())
    }
}

/// Frame one part of a block
///
/// The checksum is the byte sum of `block_id`, `part_id` and the payload,
/// modulo 256. Padding bytes are zero and do not affect it.
pub fn create_block_part(
    block_id: u8,
    part_id: u8,
    data: &[u8],
) -> Result<[u8; BLOCK_PART_SIZE], FrameError> {
    if data.len() > MAX_PACKET_DATA {
        return Err(FrameError::PayloadTooLarge {
            len: data.len(),
            max: MAX_PACKET_DATA,
        });
    }
    let mut buf = [0u8; BLOCK_PART_SIZE];
    buf[1] = block_id;
    buf[2] = part_id;
    buf[3..3 + data.len()].copy_from_slice(data);
    buf[0] = buf[1..3 + data.len()]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    Ok(buf)
}

/// Build every part command for `block_id`, opcode included
pub fn block_packets(image: &[u8], block_id: u8) -> Vec<Vec<u8>> {
    let start = (usize::from(block_id) * BLOCK_SIZE).min(image.len());
    let end = (start + BLOCK_SIZE).min(image.len());
    let slice = &image[start..end];

    let sum = slice.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    let mut block = Vec::with_capacity(4 + slice.len());
    block.extend_from_slice(&(slice.len() as u16).to_le_bytes());
    block.extend_from_slice(&sum.to_le_bytes());
    block.extend_from_slice(slice);

    block
        .chunks(MAX_PACKET_DATA)
        .enumerate()
        .filter_map(|(part, data)| create_block_part(block_id, part as u8, data).ok())
        .map(|part| command(commands::BLOCK_PART, &part))
        .collect()
}

/// Notifications seen during a block upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockResponse {
    /// The tag wants `block_id`; `parts` is the requested-parts bitmask when present
    BlockRequest { block_id: u8, parts: Option<[u8; 6]> },
    PartAck,
    PartContinue,
    UploadComplete,
    AlreadyDisplayed,
    Error,
    Other(u16),
    Malformed,
}

impl BlockResponse {
    pub fn parse(data: &[u8]) -> Self {
        let Some(code) = response_code(data) else {
            return BlockResponse::Malformed;
        };
        match code {
            responses::BLOCK_REQUEST => match data.get(11) {
                Some(&block_id) => BlockResponse::BlockRequest {
                    block_id,
                    parts: data.get(12..18).and_then(|p| p.try_into().ok()),
                },
                None => BlockResponse::Malformed,
            },
            responses::BLOCK_PART_ACK => BlockResponse::PartAck,
            responses::BLOCK_PART_CONTINUE => BlockResponse::PartContinue,
            responses::UPLOAD_COMPLETE => BlockResponse::UploadComplete,
            responses::IMAGE_ALREADY_DISPLAYED => BlockResponse::AlreadyDisplayed,
            responses::ERROR => BlockResponse::Error,
            other => BlockResponse::Other(other),
        }
    }
}

/// Refresh requested at the end of a direct write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RefreshMode {
    #[default]
    Full = 0,
    Fast = 1,
    Partial = 2,
    Partial2 = 3,
}

impl RefreshMode {
    pub fn name(self) -> &'static str {
        match self {
            RefreshMode::Full => "full",
            RefreshMode::Fast => "fast",
            RefreshMode::Partial => "partial",
            RefreshMode::Partial2 => "partial2",
        }
    }
}

impl fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(RefreshMode::Full),
            "fast" => Ok(RefreshMode::Fast),
            "partial" => Ok(RefreshMode::Partial),
            "partial2" => Ok(RefreshMode::Partial2),
            other => Err(format!(
                "unknown refresh mode {other:?} (full, fast, partial, partial2)"
            )),
        }
    }
}

pub fn direct_write_data(chunk: &[u8]) -> Vec<u8> {
    command(commands::DIRECT_WRITE_DATA, chunk)
}

pub fn direct_write_end(refresh: RefreshMode) -> Vec<u8> {
    command(commands::DIRECT_WRITE_END, &[refresh as u8])
}

/// Start frame plus the data frames that follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectWritePlan {
    pub start: Vec<u8>,
    /// Chunk payloads, each at most `MAX_PACKET_DATA` bytes
    pub chunks: VecDeque<Vec<u8>>,
}

impl DirectWritePlan {
    /// Split `data` for a direct write
    ///
    /// `uncompressed_size` is `Some` for a compressed stream. The start frame
    /// then carries the size and as much of the first chunk as fits; the rest
    /// of that chunk is queued ahead of the others.
    pub fn new(data: &[u8], uncompressed_size: Option<u32>) -> Self {
        let mut chunks: VecDeque<Vec<u8>> =
            data.chunks(MAX_PACKET_DATA).map(<[u8]>::to_vec).collect();

        let Some(size) = uncompressed_size else {
            return Self {
                start: command(commands::DIRECT_WRITE_START, &[]),
                chunks,
            };
        };

        let mut args = size.to_le_bytes().to_vec();
        let room = DIRECT_WRITE_START_MAX - args.len();
        if args.len() + data.len() <= DIRECT_WRITE_START_MAX {
            args.extend_from_slice(data);
            chunks.clear();
        } else if let Some(first) = chunks.pop_front() {
            let (head, rest) = first.split_at(room.min(first.len()));
            args.extend_from_slice(head);
            if !rest.is_empty() {
                chunks.push_front(rest.to_vec());
            }
        }

        Self {
            start: command(commands::DIRECT_WRITE_START, &args),
            chunks,
        }
    }
}

/// Notifications seen during a direct write, either byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectWriteResponse {
    StartAck,
    DataAck,
    EndAck,
    Error,
    Other(u16),
    Malformed,
}

impl DirectWriteResponse {
    pub fn parse(data: &[u8]) -> Self {
        match response_code(data) {
            None => DirectWriteResponse::Malformed,
            Some(code) => match code {
                responses::DIRECT_WRITE_START_ACK | 0x7000 => DirectWriteResponse::StartAck,
                responses::DIRECT_WRITE_DATA_ACK | 0x7100 => DirectWriteResponse::DataAck,
                responses::DIRECT_WRITE_END_ACK | 0x7200 => DirectWriteResponse::EndAck,
                responses::ERROR => DirectWriteResponse::Error,
                other => DirectWriteResponse::Other(other),
            },
        }
    }
}
