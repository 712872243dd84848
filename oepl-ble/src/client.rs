//! Device operations
//!
//! Every operation takes the device lock once, then runs a full
//! connect-transfer-disconnect cycle under the retry policy. The lock is
//! held across retries and backoff, so nothing else reaches the tag between
//! attempts.

use std::sync::Arc;

use image::{DynamicImage, RgbImage};
use oepl_proto::ble::{self, commands};
use oepl_proto::{
    DeviceCapabilities, FirmwareVersion, GlobalConfig, Protocol, UploadMethod, best_upload_method,
};

use crate::config::OperationConfig;
use crate::connection::Connection;
use crate::lock::DeviceLocks;
use crate::transport::Transport;
use crate::upload::{self, BlockOutcome, UploadOptions};
use crate::{Error, variant};

/// What an upload sent and how
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub method: UploadMethod,
    /// Quantized image as transmitted, for previews
    pub preview: RgbImage,
    /// Set for block transfers only
    pub outcome: Option<BlockOutcome>,
}

/// Operations against tags reachable through `T`
pub struct TagClient<T: Transport> {
    transport: T,
    locks: DeviceLocks,
    config: OperationConfig,
}

impl<T: Transport> TagClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, OperationConfig::default())
    }

    pub fn with_config(transport: T, config: OperationConfig) -> Self {
        Self {
            transport,
            locks: DeviceLocks::new(),
            config,
        }
    }

    /// Share a lock registry with other clients of the same radio
    pub fn with_locks(mut self, locks: DeviceLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn locks(&self) -> &DeviceLocks {
        &self.locks
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Run `op` on a fresh connection to `address`, under its lock and the
    /// retry policy
    pub async fn run<R, F>(
        &self,
        address: &str,
        protocol: Protocol,
        operation: &str,
        mut op: F,
    ) -> Result<R, Error>
    where
        F: AsyncFnMut(&mut Connection<T::Link>) -> Result<R, Error>,
    {
        let guard = self.locks.acquire(address).await;
        tracing::debug!(address, operation, "device lock acquired");
        let result = self
            .config
            .retry
            .run(address, operation, async || {
                let mut conn = Connection::open(
                    &self.transport,
                    address,
                    protocol,
                    self.config,
                    Arc::clone(&guard),
                )
                .await?;
                let result = op(&mut conn).await;
                conn.close().await;
                result
            })
            .await;
        drop(guard);
        result
    }

    pub async fn turn_led_on(&self, address: &str, protocol: Protocol) -> Result<(), Error> {
        self.run(address, protocol, "led on", async |conn| {
            conn.write_command(&commands::LED_ON).await
        })
        .await
    }

    pub async fn turn_led_off(&self, address: &str, protocol: Protocol) -> Result<(), Error> {
        self.run(address, protocol, "led off", async |conn| {
            conn.write_command(&commands::LED_OFF).await?;
            conn.write_command(&commands::LED_OFF_FINAL).await
        })
        .await
    }

    /// Connect, initialise and disconnect
    pub async fn ping(&self, address: &str, protocol: Protocol) -> Result<(), Error> {
        self.run(address, protocol, "ping", async |_conn| Ok(())).await
    }

    /// Show a clock, starting from `unix_time`
    pub async fn set_clock_mode(
        &self,
        address: &str,
        protocol: Protocol,
        unix_time: u32,
    ) -> Result<(), Error> {
        let frame = ble::command(commands::SET_CLOCK_MODE, &unix_time.to_le_bytes());
        self.run(address, protocol, "set clock mode", async |conn| {
            conn.write_command(&frame).await
        })
        .await
    }

    pub async fn disable_clock_mode(&self, address: &str, protocol: Protocol) -> Result<(), Error> {
        self.run(address, protocol, "disable clock mode", async |conn| {
            conn.write_command(&commands::DISABLE_CLOCK_MODE).await
        })
        .await
    }

    pub async fn interrogate(
        &self,
        address: &str,
        protocol: Protocol,
    ) -> Result<DeviceCapabilities, Error> {
        self.run(address, protocol, "interrogate", async |conn| {
            variant::interrogate(conn).await
        })
        .await
    }

    pub async fn read_config(&self, address: &str, protocol: Protocol) -> Result<GlobalConfig, Error> {
        self.run(address, protocol, "read config", async |conn| {
            variant::read_config(conn).await
        })
        .await
    }

    pub async fn read_firmware_version(
        &self,
        address: &str,
        protocol: Protocol,
    ) -> Result<FirmwareVersion, Error> {
        self.run(address, protocol, "read firmware version", async |conn| {
            variant::read_firmware_version(conn).await
        })
        .await
    }

    /// Block transfer, supported by both firmware families
    pub async fn upload_block(
        &self,
        address: &str,
        protocol: Protocol,
        source: &DynamicImage,
        caps: &DeviceCapabilities,
        options: &UploadOptions,
    ) -> Result<UploadReport, Error> {
        let image = upload::prepare_block(source, caps, protocol, options.dither)?;
        let outcome = self
            .run(address, protocol, "block upload", async |conn| {
                upload::block::upload(conn, &image.data).await
            })
            .await?;
        Ok(UploadReport {
            method: UploadMethod::Block,
            preview: image.preview,
            outcome: Some(outcome),
        })
    }

    /// Direct write, OEPL firmware only
    pub async fn upload_direct_write(
        &self,
        address: &str,
        protocol: Protocol,
        source: &DynamicImage,
        caps: &DeviceCapabilities,
        options: &UploadOptions,
    ) -> Result<UploadReport, Error> {
        if protocol != Protocol::Oepl {
            return Err(Error::NotSupported {
                address: address.to_string(),
                what: "direct write",
                protocol,
            });
        }
        let image = upload::prepare_direct(source, caps, options.dither, options.compress)?;
        let method = if image.payload.uncompressed_size.is_some() {
            UploadMethod::DirectWriteCompressed
        } else {
            UploadMethod::DirectWrite
        };
        let refresh = options.refresh;
        self.run(address, protocol, method.as_str(), async |conn| {
            upload::direct::upload(conn, &image.payload, refresh).await
        })
        .await?;
        Ok(UploadReport {
            method,
            preview: image.preview,
            outcome: None,
        })
    }

    /// Pick the transfer from the display's `transmission_modes` bits and
    /// the packed image size, then upload
    pub async fn upload(
        &self,
        address: &str,
        protocol: Protocol,
        source: &DynamicImage,
        caps: &DeviceCapabilities,
        transmission_modes: u8,
        options: &UploadOptions,
    ) -> Result<UploadReport, Error> {
        let method = match protocol {
            Protocol::Atc => UploadMethod::Block,
            Protocol::Oepl => {
                let size = oepl_image::pack::packed_len(
                    u32::from(caps.width),
                    u32::from(caps.height),
                    caps.scheme(),
                );
                best_upload_method(transmission_modes, size)
            }
        };
        tracing::info!(address, %method, "selected upload method");
        match method {
            UploadMethod::Block => {
                self.upload_block(address, protocol, source, caps, options).await
            }
            UploadMethod::DirectWrite => {
                let options = UploadOptions {
                    compress: false,
                    ..*options
                };
                self.upload_direct_write(address, protocol, source, caps, &options)
                    .await
            }
            UploadMethod::DirectWriteCompressed => {
                self.upload_direct_write(address, protocol, source, caps, options)
                    .await
            }
        }
    }
}
