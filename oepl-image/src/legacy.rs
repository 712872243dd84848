//! Block-upload image encoding
//!
//! The block transfer predates palette quantization and classifies pixels by
//! luminance instead. Its black plane is inverted relative to
//! [`crate::pack::pack_1bpp`]: a set bit means "not white".

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compress, Compression};
use image::RgbImage;

use crate::EncodeError;

/// First byte of the compressed block-upload header
const HEADER_MAGIC: u8 = 6;

/// zlib window the tags can hold, in bits
const WINDOW_BITS: u8 = 12;

fn luminance([r, g, b]: [u8; 3]) -> f32 {
    0.2126 * f32::from(r) + 0.7152 * f32::from(g) + 0.0722 * f32::from(b)
}

fn pack_bits(bits: impl Iterator<Item = bool>, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len.div_ceil(8)];
    for (i, bit) in bits.enumerate() {
        if bit {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    out
}

/// Black plane, then the red plane when `multi_color`
///
/// A pixel is white when its luminance exceeds 128. The red plane marks
/// pixels with `R > 170` that are not white.
pub fn legacy_planes(img: &RgbImage, multi_color: bool) -> Vec<u8> {
    let len = img.width() as usize * img.height() as usize;
    let white: Vec<bool> = img.pixels().map(|p| luminance(p.0) > 128.0).collect();

    let mut out = pack_bits(white.iter().map(|w| !w), len);
    if multi_color {
        let red = img
            .pixels()
            .zip(&white)
            .map(|(p, w)| p.0[0] > 170 && !w);
        out.extend(pack_bits(red, len));
    }
    out
}

/// zlib stream with a 4 KiB window
pub fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let compress = Compress::new_with_window_bits(Compression::default(), true, WINDOW_BITS);
    let mut encoder = ZlibEncoder::new_with_compress(Vec::new(), compress);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// `[uncompressed_len:4 LE][zlib(header ++ planes)]`
///
/// The 6-byte header is `[6][width:2][height:2][planes]`, all little-endian.
pub fn encode_compressed(img: &RgbImage, multi_color: bool) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = img.dimensions();
    let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
        return Err(EncodeError::TooLarge { width, height });
    };

    let mut buffer = Vec::with_capacity(6 + legacy_len(width, height, multi_color));
    buffer.push(HEADER_MAGIC);
    buffer.extend_from_slice(&w.to_le_bytes());
    buffer.extend_from_slice(&h.to_le_bytes());
    buffer.push(if multi_color { 2 } else { 1 });
    buffer.extend(legacy_planes(img, multi_color));

    let compressed = zlib_compress(&buffer)?;
    tracing::debug!(
        raw = buffer.len(),
        compressed = compressed.len(),
        "compressed block image"
    );

    let mut out = Vec::with_capacity(4 + compressed.len());
    out.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
    out.extend(compressed);
    Ok(out)
}

fn legacy_len(width: u32, height: u32, multi_color: bool) -> usize {
    let plane = (width as usize * height as usize).div_ceil(8);
    if multi_color { 2 * plane } else { plane }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use image::Rgb;
    use oepl_proto::color;
    use std::io::Read;

    #[test]
    fn black_plane_is_inverted() {
        let img = RgbImage::from_fn(8, 1, |x, _| {
            Rgb(if x % 2 == 0 { color::WHITE } else { color::BLACK })
        });
        assert_eq!(legacy_planes(&img, false), vec![0b0101_0101]);
        assert_eq!(crate::pack::pack_1bpp(&img), vec![0b1010_1010]);
    }

    #[test]
    fn red_plane_skips_white_and_dark_pixels() {
        let img = RgbImage::from_fn(4, 1, |x, _| {
            Rgb(match x {
                0 => color::RED,
                1 => [255, 200, 200], // light pink reads as white
                2 => [120, 0, 0],
                _ => color::BLACK,
            })
        });
        let planes = legacy_planes(&img, true);
        assert_eq!(planes, vec![0b1011_0000, 0b1000_0000]);
    }

    #[test]
    fn compressed_layout() {
        let img = RgbImage::from_pixel(20, 10, Rgb(color::RED));
        let out = encode_compressed(&img, true).unwrap();

        let raw_len = u32::from_le_bytes([out[0], out[1], out[2], out[3]]) as usize;
        assert_eq!(raw_len, 6 + 2 * 25);

        // 12-bit window: CINFO nibble is 4
        assert_eq!(out[4] >> 4, 4);

        let mut raw = Vec::new();
        ZlibDecoder::new(&out[4..]).read_to_end(&mut raw).unwrap();
        assert_eq!(raw.len(), raw_len);
        assert_eq!(&raw[..6], &[6, 20, 0, 10, 0, 2]);
        assert!(raw[6..31].iter().all(|b| *b == 0xFF));
    }
}
