//! Image uploads
//!
//! Encoding happens once, before any connection is opened, so a retried
//! transfer resends exactly the same bytes. Both transfers hand back the
//! quantized image that was sent, which is what the tag will show.

pub mod block;
pub mod direct;

use image::{DynamicImage, RgbImage};
use oepl_image::{DirectWritePayload, DitherMode, EncodeError, transform};
use oepl_proto::frame::RefreshMode;
use oepl_proto::{DeviceCapabilities, Protocol};
use serde::{Deserialize, Serialize};

pub use block::BlockOutcome;

/// Per-upload choices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub dither: DitherMode,
    pub refresh: RefreshMode,
    /// Allow compressed direct write when the tag advertises it
    pub compress: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            dither: DitherMode::default(),
            refresh: RefreshMode::default(),
            compress: true,
        }
    }
}

/// Fit `source` to the panel and reduce it to the panel palette
pub fn prepare_preview(
    source: &DynamicImage,
    caps: &DeviceCapabilities,
    dither: DitherMode,
) -> RgbImage {
    let fitted = transform::fit(source, u32::from(caps.width), u32::from(caps.height));
    oepl_image::quantize(&fitted, caps.scheme(), dither)
}

/// Encoded block-transfer image plus the preview it was made from
#[derive(Debug, Clone)]
pub struct BlockImage {
    pub preview: RgbImage,
    pub data: Vec<u8>,
}

/// ATC tags with a transposed frame buffer get the image turned here; OEPL
/// tags rotate in firmware.
pub fn prepare_block(
    source: &DynamicImage,
    caps: &DeviceCapabilities,
    protocol: Protocol,
    dither: DitherMode,
) -> Result<BlockImage, EncodeError> {
    let preview = prepare_preview(source, caps, dither);
    oepl_image::check_size(&preview, u32::from(caps.width), u32::from(caps.height))?;
    let rotate = protocol == Protocol::Atc && caps.needs_rotation();
    let data = oepl_image::block_payload(&preview, caps.scheme(), rotate)?;
    tracing::debug!(
        width = caps.width,
        height = caps.height,
        %protocol,
        rotate,
        size = data.len(),
        "encoded block image"
    );
    Ok(BlockImage { preview, data })
}

#[derive(Debug, Clone)]
pub struct DirectImage {
    pub preview: RgbImage,
    pub payload: DirectWritePayload,
}

pub fn prepare_direct(
    source: &DynamicImage,
    caps: &DeviceCapabilities,
    dither: DitherMode,
    compress: bool,
) -> Result<DirectImage, EncodeError> {
    let preview = prepare_preview(source, caps, dither);
    oepl_image::check_size(&preview, u32::from(caps.width), u32::from(caps.height))?;
    let payload = oepl_image::direct_write_payload(&preview, caps.scheme(), compress)?;
    Ok(DirectImage { preview, payload })
}
