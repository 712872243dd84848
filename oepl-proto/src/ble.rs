//! BLE GATT constants and command bytes for ATC and OEPL tags
//!
//! Every tag exposes a single characteristic that is used both for writes and
//! for notifications. Commands are written as a 2-byte big-endian opcode
//! followed by an optional argument payload.

use uuid::Uuid;

/// ATC firmware manufacturer ID (4919)
pub const ATC_MANUFACTURER_ID: u16 = 0x1337;

/// OEPL firmware manufacturer ID (9286)
pub const OEPL_MANUFACTURER_ID: u16 = 0x2446;

/// ATC service / characteristic UUID: 00001337-0000-1000-8000-00805f9b34fb
pub const ATC_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001337_0000_1000_8000_00805f9b34fb);

/// OEPL service / characteristic UUID: 00002446-0000-1000-8000-00805f9b34fb
pub const OEPL_SERVICE_UUID: Uuid = Uuid::from_u128(0x00002446_0000_1000_8000_00805f9b34fb);

/// Largest payload carried by a single block part or direct-write data frame
pub const MAX_PACKET_DATA: usize = 230;

/// Block size requested by the block-based upload
pub const BLOCK_SIZE: usize = 4096;

/// Command bytes, exactly as written to the characteristic
pub mod commands {
    /// ATC post-connect initialisation
    pub const INIT: [u8; 2] = [0x01, 0x01];

    /// ATC display information (0x0005)
    pub const GET_DISPLAY_INFO: [u8; 2] = [0x00, 0x05];

    /// Clock mode on, followed by a little-endian u32 unix timestamp
    pub const SET_CLOCK_MODE: [u8; 2] = [0x00, 0x0B];

    /// Clock mode off
    pub const DISABLE_CLOCK_MODE: [u8; 2] = [0x00, 0x0C];

    /// OEPL read TLV config (0x0040)
    pub const READ_CONFIG: [u8; 2] = [0x00, 0x40];

    /// OEPL read firmware version (0x0043)
    pub const READ_FW_VERSION: [u8; 2] = [0x00, 0x43];

    /// Block upload: announce the image
    pub const DATA_INFO: [u8; 2] = [0x00, 0x64];

    /// Block upload: one part of the requested block
    pub const BLOCK_PART: [u8; 2] = [0x00, 0x65];

    /// Direct write: start
    pub const DIRECT_WRITE_START: [u8; 2] = [0x00, 0x70];

    /// Direct write: data chunk
    pub const DIRECT_WRITE_DATA: [u8; 2] = [0x00, 0x71];

    /// Direct write: end, followed by the refresh mode byte
    pub const DIRECT_WRITE_END: [u8; 2] = [0x00, 0x72];

    pub const LED_ON: [u8; 3] = [0x00, 0x01, 0x03];
    pub const LED_OFF: [u8; 3] = [0x00, 0x01, 0x00];
    /// Sent after `LED_OFF`, the firmware keeps the LED lit without it
    pub const LED_OFF_FINAL: [u8; 2] = [0x00, 0x00];
}

/// Notification codes, the first two bytes of a notification read big-endian
pub mod responses {
    pub const BLOCK_PART_ACK: u16 = 0x00C4;
    pub const BLOCK_PART_CONTINUE: u16 = 0x00C5;
    pub const BLOCK_REQUEST: u16 = 0x00C6;
    pub const UPLOAD_COMPLETE: u16 = 0x00C7;
    pub const IMAGE_ALREADY_DISPLAYED: u16 = 0x00C8;

    pub const DIRECT_WRITE_START_ACK: u16 = 0x0070;
    pub const DIRECT_WRITE_DATA_ACK: u16 = 0x0071;
    pub const DIRECT_WRITE_END_ACK: u16 = 0x0072;

    pub const ERROR: u16 = 0xFFFF;
}

/// Read the response code of a notification, `None` when shorter than 2 bytes
pub fn response_code(data: &[u8]) -> Option<u16> {
    match data {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Build a command frame: opcode followed by its argument bytes
pub fn command(opcode: [u8; 2], args: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + args.len());
    buf.extend_from_slice(&opcode);
    buf.extend_from_slice(args);
    buf
}
