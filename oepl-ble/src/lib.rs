//! BLE driver for ATC and OEPL e-paper tags
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use oepl_ble::{TagClient, btle::BtleTransport};
//! use oepl_proto::Protocol;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BtleTransport::default_adapter(Duration::from_secs(5)).await?;
//!     let client = TagClient::new(transport);
//!
//!     let caps = client.interrogate("AA:BB:CC:DD:EE:FF", Protocol::Oepl).await?;
//!     println!("{}x{}", caps.width, caps.height);
//!
//!     client.turn_led_on("AA:BB:CC:DD:EE:FF", Protocol::Oepl).await?;
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod retry;
pub mod transport;
pub mod upload;
pub mod variant;

pub use client::{TagClient, UploadReport};
pub use config::OperationConfig;
pub use connection::Connection;
pub use error::Error;
pub use lock::{DeviceGuard, DeviceLocks};
pub use retry::RetryPolicy;
pub use transport::{Link, NotificationSink, Transport, TransportError};
pub use upload::{BlockOutcome, UploadOptions};
