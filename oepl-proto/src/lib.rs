//! OpenEPaperLink BLE wire protocol
//!
//! Pure, synchronous building blocks shared by the BLE driver and the CLI:
//! opcodes and notification codes, advertising beacons, the ATC/OEPL
//! protocol registry, the TLV device configuration and upload framing.

pub mod advertising;
pub mod ble;
pub mod color;
pub mod frame;
pub mod protocol;
pub mod tlv;

pub use advertising::{AdvertisingData, AdvertisingError};
pub use color::ColorScheme;
pub use frame::{FrameError, RefreshMode};
pub use protocol::{
    DeviceCapabilities, FirmwareVersion, Protocol, ResponseError, UnsupportedProtocol,
    UploadMethod, best_upload_method,
};
pub use tlv::{ConfigError, GlobalConfig};
