//! Geometry helpers applied around quantization

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};

/// Decode an encoded image (PNG, JPEG or BMP)
pub fn load(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Convert to RGB and resize to the panel when the size differs
pub fn fit(source: &DynamicImage, width: u32, height: u32) -> RgbImage {
    let rgb = source.to_rgb8();
    if rgb.dimensions() == (width, height) {
        return rgb;
    }
    tracing::debug!(
        from_w = rgb.width(),
        from_h = rgb.height(),
        width,
        height,
        "resizing source image"
    );
    imageops::resize(&rgb, width, height, FilterType::Lanczos3)
}

/// Rotate 90° counter-clockwise, for tags whose buffer is stored transposed
pub fn rotate_ccw(img: &RgbImage) -> RgbImage {
    imageops::rotate270(img)
}
