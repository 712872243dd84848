//! Image pipeline for e-paper tags
//!
//! Source images are quantized to the tag palette ([`quantize`]) and then
//! packed into the byte layout of the chosen transfer: the layout keyed by
//! colour scheme for direct write ([`pack`]), or the compressed luminance
//! planes the block transfer expects ([`legacy`]).

pub mod legacy;
pub mod pack;
pub mod quantize;
pub mod transform;

use image::RgbImage;

use oepl_proto::ColorScheme;

pub use quantize::{DitherMode, quantize};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),
    #[error("image {width}x{height} does not fit the 16-bit size header")]
    TooLarge { width: u32, height: u32 },
    #[error("image is {actual_w}x{actual_h}, tag expects {width}x{height}")]
    SizeMismatch {
        width: u32,
        height: u32,
        actual_w: u32,
        actual_h: u32,
    },
    #[error(transparent)]
    Decode(#[from] image::ImageError),
}

/// Encoded bytes for a direct write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectWritePayload {
    pub data: Vec<u8>,
    /// Packed size before compression, `None` when `data` is not compressed
    pub uncompressed_size: Option<u32>,
}

/// Compressed legacy planes for the block transfer
///
/// `rotate` turns the image 90° counter-clockwise first, for tags that keep
/// their frame buffer transposed.
pub fn block_payload(
    quantized: &RgbImage,
    scheme: ColorScheme,
    rotate: bool,
) -> Result<Vec<u8>, EncodeError> {
    if rotate {
        legacy::encode_compressed(&transform::rotate_ccw(quantized), scheme.has_red())
    } else {
        legacy::encode_compressed(quantized, scheme.has_red())
    }
}

/// Scheme-specific packing, optionally zlib-compressed
pub fn direct_write_payload(
    quantized: &RgbImage,
    scheme: ColorScheme,
    compress: bool,
) -> Result<DirectWritePayload, EncodeError> {
    let packed = pack::pack_for_scheme(quantized, scheme);
    if !compress {
        return Ok(DirectWritePayload {
            data: packed,
            uncompressed_size: None,
        });
    }
    let data = legacy::zlib_compress(&packed)?;
    tracing::debug!(
        packed = packed.len(),
        compressed = data.len(),
        "compressed direct-write image"
    );
    Ok(DirectWritePayload {
        data,
        uncompressed_size: Some(packed.len() as u32),
    })
}

/// Check that a quantized image matches the panel
pub fn check_size(img: &RgbImage, width: u32, height: u32) -> Result<(), EncodeError> {
    let (actual_w, actual_h) = img.dimensions();
    if (actual_w, actual_h) != (width, height) {
        return Err(EncodeError::SizeMismatch {
            width,
            height,
            actual_w,
            actual_h,
        });
    }
    Ok(())
}
