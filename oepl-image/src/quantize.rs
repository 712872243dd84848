//! Palette quantization
//!
//! Three strategies map an arbitrary RGB image onto a device palette. All of
//! them share [`find_closest`], a green-weighted squared distance that never
//! lets a near-gray source pixel land on a chromatic palette entry.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use oepl_proto::color::{ColorScheme, Rgb as PaletteRgb};

/// Channels within this distance of green count as "gray"
const GRAY_TOLERANCE: i32 = 20;

const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];
const BAYER_SCALE: f32 = 32.0;

/// Dither mode, numbered as the tag configuration stores it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DitherMode {
    /// Nearest colour, no dithering
    None = 0,
    /// Burkes error diffusion, for photographs
    Burkes = 1,
    /// 4x4 Bayer, for text and line art
    #[default]
    Ordered = 2,
}

impl DitherMode {
    /// Unknown values fall back to direct mapping
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DitherMode::Burkes,
            2 => DitherMode::Ordered,
            _ => DitherMode::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DitherMode::None => "none",
            DitherMode::Burkes => "burkes",
            DitherMode::Ordered => "ordered",
        }
    }
}

impl std::str::FromStr for DitherMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(DitherMode::None),
            "1" | "burkes" => Ok(DitherMode::Burkes),
            "2" | "ordered" | "bayer" => Ok(DitherMode::Ordered),
            other => Err(format!("unknown dither mode {other:?} (none, burkes, ordered)")),
        }
    }
}

fn is_gray(c: PaletteRgb) -> bool {
    let [r, g, b] = c.map(i32::from);
    (r - g).abs() < GRAY_TOLERANCE && (b - g).abs() < GRAY_TOLERANCE
}

fn is_chromatic(c: PaletteRgb) -> bool {
    let [r, g, b] = c.map(i32::from);
    (r - g).abs() > GRAY_TOLERANCE || (b - g).abs() > GRAY_TOLERANCE
}

/// Weighted squared distance, infinite for a gray source against a chromatic target
pub fn perceptual_distance(source: PaletteRgb, target: PaletteRgb) -> f64 {
    if is_gray(source) && is_chromatic(target) {
        return f64::INFINITY;
    }
    let d = |i: usize| f64::from(source[i]) - f64::from(target[i]);
    3.0 * d(0) * d(0) + 5.47 * d(1) * d(1) + 1.53 * d(2) * d(2)
}

/// Index and colour of the nearest palette entry; ties keep the earlier entry
pub fn find_closest(pixel: PaletteRgb, palette: &[PaletteRgb]) -> (usize, PaletteRgb) {
    let mut best = (0, palette.first().copied().unwrap_or([0, 0, 0]));
    let mut best_dist = f64::INFINITY;
    for (idx, color) in palette.iter().enumerate() {
        let dist = perceptual_distance(pixel, *color);
        if dist < best_dist {
            best_dist = dist;
            best = (idx, *color);
        }
    }
    best
}

fn palette_rgb(scheme: ColorScheme) -> Vec<PaletteRgb> {
    scheme.palette().iter().map(|c| c.rgb).collect()
}

/// Clip to `[0, 255]` then truncate
fn clip(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// Nearest colour per pixel
pub fn apply_direct_mapping(source: &RgbImage, scheme: ColorScheme) -> RgbImage {
    let palette = palette_rgb(scheme);
    let mut out = source.clone();
    for px in out.pixels_mut() {
        *px = Rgb(find_closest(px.0, &palette).1);
    }
    out
}

/// Bayer-threshold each channel, then map to the nearest colour
pub fn apply_ordered_dithering(source: &RgbImage, scheme: ColorScheme) -> RgbImage {
    let palette = palette_rgb(scheme);
    let mut out = source.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        let threshold = f32::from(BAYER_4X4[(y % 4) as usize][(x % 4) as usize]) / 16.0;
        let offset = (threshold - 0.5) * BAYER_SCALE;
        let shifted = px.0.map(|c| clip(f32::from(c) + offset));
        *px = Rgb(find_closest(shifted, &palette).1);
    }
    out
}

/// Burkes error diffusion in raster order
///
/// ```text
///             X    8/32  4/32
/// 2/32  4/32  8/32  4/32  2/32
/// ```
pub fn apply_burkes_dithering(source: &RgbImage, scheme: ColorScheme) -> RgbImage {
    const WEIGHTS: [(i64, i64, f32); 7] = [
        (1, 0, 8.0 / 32.0),
        (2, 0, 4.0 / 32.0),
        (-2, 1, 2.0 / 32.0),
        (-1, 1, 4.0 / 32.0),
        (0, 1, 8.0 / 32.0),
        (1, 1, 4.0 / 32.0),
        (2, 1, 2.0 / 32.0),
    ];

    let palette = palette_rgb(scheme);
    let (width, height) = source.dimensions();
    let (w, h) = (i64::from(width), i64::from(height));
    let mut buf: Vec<[f32; 3]> = source.pixels().map(|p| p.0.map(f32::from)).collect();
    let mut out = RgbImage::new(width, height);

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let old = buf[i].map(clip);
            let (_, new) = find_closest(old, &palette);
            out.put_pixel(x as u32, y as u32, Rgb(new));

            let error: [f32; 3] = std::array::from_fn(|c| f32::from(old[c]) - f32::from(new[c]));
            for (dx, dy, weight) in WEIGHTS {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || nx >= w || ny >= h {
                    continue;
                }
                let n = &mut buf[(ny * w + nx) as usize];
                for c in 0..3 {
                    n[c] += error[c] * weight;
                }
            }
        }
    }
    out
}

/// Quantize `source` to the palette of `scheme`
pub fn quantize(source: &RgbImage, scheme: ColorScheme, mode: DitherMode) -> RgbImage {
    match mode {
        DitherMode::None => apply_direct_mapping(source, scheme),
        DitherMode::Burkes => apply_burkes_dithering(source, scheme),
        DitherMode::Ordered => apply_ordered_dithering(source, scheme),
    }
}
