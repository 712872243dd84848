use std::time::Duration;

use oepl_image::EncodeError;
use oepl_proto::{ConfigError, ResponseError, UnsupportedProtocol};
use uuid::Uuid;

use crate::transport::TransportError;

/// Everything a device operation can fail with
///
/// Device-facing variants carry the address so the error can be shown to a
/// user without extra context.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{address}: device not found")]
    NotFound { address: String },

    #[error("{address}: no available Bluetooth connection slots")]
    NoSlots { address: String },

    #[error("{address}: characteristic {uuid} not found")]
    CharacteristicNotFound { address: String, uuid: Uuid },

    #[error("{address}: connection failed: {message}")]
    Connection { address: String, message: String },

    #[error("{address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("{address}: no response within {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("{address}: {source}")]
    Protocol {
        address: String,
        #[source]
        source: ResponseError,
    },

    #[error("{address}: device reported an error while {state}")]
    Device { address: String, state: &'static str },

    #[error("{address}: {what} is not supported by {protocol} firmware")]
    NotSupported {
        address: String,
        what: &'static str,
        protocol: oepl_proto::Protocol,
    },

    #[error("{address}: invalid device config: {source}")]
    Config {
        address: String,
        #[source]
        source: ConfigError,
    },

    #[error("image encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Unsupported(#[from] UnsupportedProtocol),
}

impl Error {
    /// Whether a fresh connect-transfer-disconnect attempt may succeed
    ///
    /// Slot exhaustion is a resource ceiling, and the remaining variants are
    /// deterministic for a given device and input.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::NoSlots { .. }
                | Error::Device { .. }
                | Error::NotSupported { .. }
                | Error::Config { .. }
                | Error::Encode(_)
                | Error::Unsupported(_)
        )
    }

    /// Device address, when the failure concerns one device
    pub fn address(&self) -> Option<&str> {
        match self {
            Error::NotFound { address }
            | Error::NoSlots { address }
            | Error::CharacteristicNotFound { address, .. }
            | Error::Connection { address, .. }
            | Error::Transport { address, .. }
            | Error::Timeout { address, .. }
            | Error::Protocol { address, .. }
            | Error::Device { address, .. }
            | Error::NotSupported { address, .. }
            | Error::Config { address, .. } => Some(address),
            Error::Encode(_) | Error::Unsupported(_) => None,
        }
    }
}
