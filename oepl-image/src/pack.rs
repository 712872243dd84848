//! Bit-packing of quantized images
//!
//! Every layout packs pixels row-major, most significant bit first, with no
//! padding between rows. Classification is by exact palette colour, so the
//! input must already be quantized to the target scheme.

use image::RgbImage;

use oepl_proto::color::{self, ColorScheme, Rgb};

/// Appends `bits`-wide codes MSB first
struct BitWriter {
    out: Vec<u8>,
    acc: u8,
    used: u8,
}

impl BitWriter {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            out: Vec::with_capacity(bytes),
            acc: 0,
            used: 0,
        }
    }

    fn push(&mut self, code: u8, bits: u8) {
        for shift in (0..bits).rev() {
            self.acc = (self.acc << 1) | ((code >> shift) & 1);
            self.used += 1;
            if self.used == 8 {
                self.out.push(self.acc);
                self.acc = 0;
                self.used = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.out.push(self.acc << (8 - self.used));
        }
        self.out
    }
}

fn pack_with(img: &RgbImage, bits: u8, code: impl Fn(Rgb) -> u8) -> Vec<u8> {
    let (w, h) = img.dimensions();
    let pixels = w as usize * h as usize;
    let mut writer = BitWriter::with_capacity((pixels * bits as usize).div_ceil(8));
    for px in img.pixels() {
        writer.push(code(px.0), bits);
    }
    writer.finish()
}

/// One bit per pixel, 1 = white
pub fn pack_1bpp(img: &RgbImage) -> Vec<u8> {
    pack_with(img, 1, |c| u8::from(c == color::WHITE))
}

/// White plane followed by accent plane
pub fn pack_dual_plane(img: &RgbImage, accent: Rgb) -> Vec<u8> {
    let mut out = pack_with(img, 1, |c| u8::from(c == color::WHITE));
    out.extend(pack_with(img, 1, |c| u8::from(c == accent)));
    out
}

/// BWRY codes: black 0, white 1, yellow 2, red 3
fn bwry_code(c: Rgb) -> u8 {
    match c {
        color::BLACK => 0,
        color::YELLOW => 2,
        color::RED => 3,
        _ => 1,
    }
}

/// Four luminance buckets, 0 = black
fn gray_code(c: Rgb) -> u8 {
    let [r, g, b] = c.map(u32::from);
    let lum = (2126 * r + 7152 * g + 722 * b) / 10_000;
    (lum * 4 / 256).min(3) as u8
}

/// Two bits per pixel, four pixels per byte
pub fn pack_2bpp(img: &RgbImage, scheme: ColorScheme) -> Vec<u8> {
    match scheme {
        ColorScheme::Grayscale4 => pack_with(img, 2, gray_code),
        _ => pack_with(img, 2, bwry_code),
    }
}

/// Six-colour codes; 4 and 7 are reserved by the firmware
fn six_color_code(c: Rgb) -> u8 {
    match c {
        color::BLACK => 0,
        color::YELLOW => 2,
        color::RED => 3,
        color::BLUE => 5,
        color::GREEN => 6,
        _ => 1,
    }
}

/// Four bits per pixel, high nibble first
pub fn pack_4bpp(img: &RgbImage) -> Vec<u8> {
    pack_with(img, 4, six_color_code)
}

/// Pack with the layout the scheme's firmware expects
pub fn pack_for_scheme(img: &RgbImage, scheme: ColorScheme) -> Vec<u8> {
    match scheme {
        ColorScheme::Mono => pack_1bpp(img),
        ColorScheme::Bwr | ColorScheme::Bwy => pack_dual_plane(img, scheme.accent()),
        ColorScheme::Bwry | ColorScheme::Grayscale4 => pack_2bpp(img, scheme),
        ColorScheme::Bwgbry => pack_4bpp(img),
    }
}

/// Packed size for a `width` x `height` image in `scheme`
pub fn packed_len(width: u32, height: u32, scheme: ColorScheme) -> usize {
    let pixels = width as usize * height as usize;
    match scheme {
        ColorScheme::Mono => pixels.div_ceil(8),
        ColorScheme::Bwr | ColorScheme::Bwy => 2 * pixels.div_ceil(8),
        ColorScheme::Bwry | ColorScheme::Grayscale4 => pixels.div_ceil(4),
        ColorScheme::Bwgbry => pixels.div_ceil(2),
    }
}
