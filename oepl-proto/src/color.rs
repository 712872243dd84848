//! Display colour schemes and their palettes

use serde::{Deserialize, Serialize};

/// An RGB triple
pub type Rgb = [u8; 3];

pub const BLACK: Rgb = [0, 0, 0];
pub const WHITE: Rgb = [255, 255, 255];
pub const RED: Rgb = [255, 0, 0];
pub const YELLOW: Rgb = [255, 255, 0];
pub const GREEN: Rgb = [0, 255, 0];
pub const BLUE: Rgb = [0, 0, 255];
pub const GRAY1: Rgb = [85, 85, 85];
pub const GRAY2: Rgb = [170, 170, 170];

/// A named palette entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteColor {
    pub name: &'static str,
    pub rgb: Rgb,
}

const fn color(name: &'static str, rgb: Rgb) -> PaletteColor {
    PaletteColor { name, rgb }
}

static MONO: [PaletteColor; 2] = [color("black", BLACK), color("white", WHITE)];
static BWR: [PaletteColor; 3] = [color("black", BLACK), color("white", WHITE), color("red", RED)];
static BWY: [PaletteColor; 3] = [
    color("black", BLACK),
    color("white", WHITE),
    color("yellow", YELLOW),
];
static BWRY: [PaletteColor; 4] = [
    color("black", BLACK),
    color("white", WHITE),
    color("red", RED),
    color("yellow", YELLOW),
];
static BWGBRY: [PaletteColor; 6] = [
    color("black", BLACK),
    color("white", WHITE),
    color("green", GREEN),
    color("blue", BLUE),
    color("red", RED),
    color("yellow", YELLOW),
];
static GRAYSCALE_4: [PaletteColor; 4] = [
    color("black", BLACK),
    color("gray1", GRAY1),
    color("gray2", GRAY2),
    color("white", WHITE),
];

/// Colour scheme reported by the tag firmware
///
/// The discriminant is the firmware code. Unknown codes fall back to
/// [`ColorScheme::Mono`], which every panel can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColorScheme {
    Mono = 0,
    Bwr = 1,
    Bwy = 2,
    Bwry = 3,
    Bwgbry = 4,
    Grayscale4 = 5,
}

impl ColorScheme {
    pub const ALL: [ColorScheme; 6] = [
        ColorScheme::Mono,
        ColorScheme::Bwr,
        ColorScheme::Bwy,
        ColorScheme::Bwry,
        ColorScheme::Bwgbry,
        ColorScheme::Grayscale4,
    ];

    /// Look up a scheme by firmware code, `None` if the code is unknown
    pub fn try_from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| *s as u8 == code)
    }

    /// Look up a scheme by firmware code, falling back to mono
    pub fn from_code(code: u8) -> Self {
        Self::try_from_code(code).unwrap_or(ColorScheme::Mono)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorScheme::Mono => "MONO",
            ColorScheme::Bwr => "BWR",
            ColorScheme::Bwy => "BWY",
            ColorScheme::Bwry => "BWRY",
            ColorScheme::Bwgbry => "BWGBRY",
            ColorScheme::Grayscale4 => "GRAYSCALE_4",
        }
    }

    /// Palette colours in firmware order
    pub fn palette(self) -> &'static [PaletteColor] {
        match self {
            ColorScheme::Mono => &MONO,
            ColorScheme::Bwr => &BWR,
            ColorScheme::Bwy => &BWY,
            ColorScheme::Bwry => &BWRY,
            ColorScheme::Bwgbry => &BWGBRY,
            ColorScheme::Grayscale4 => &GRAYSCALE_4,
        }
    }

    pub fn accent_name(self) -> &'static str {
        match self {
            ColorScheme::Mono | ColorScheme::Grayscale4 => "black",
            ColorScheme::Bwr | ColorScheme::Bwry | ColorScheme::Bwgbry => "red",
            ColorScheme::Bwy => "yellow",
        }
    }

    pub fn accent(self) -> Rgb {
        self.rgb(self.accent_name()).unwrap_or(BLACK)
    }

    /// RGB value of a named palette colour
    pub fn rgb(self, name: &str) -> Option<Rgb> {
        self.palette().iter().find(|c| c.name == name).map(|c| c.rgb)
    }

    pub fn has_red(self) -> bool {
        self.rgb("red").is_some()
    }

    pub fn has_yellow(self) -> bool {
        self.rgb("yellow").is_some()
    }

    pub fn is_multi_color(self) -> bool {
        self.palette().len() > 2
    }

    pub fn description(self) -> &'static str {
        match self {
            ColorScheme::Mono => "Monochrome",
            ColorScheme::Bwr => "BWR (black/white/red)",
            ColorScheme::Bwy => "BWY (black/white/yellow)",
            ColorScheme::Bwry => "BWRY (black/white/red/yellow)",
            ColorScheme::Bwgbry => "BWGBRY (6-color)",
            ColorScheme::Grayscale4 => "Grayscale (4-level)",
        }
    }
}

/// Human readable description of a raw firmware colour code
pub fn describe_color_scheme(code: u8) -> String {
    match ColorScheme::try_from_code(code) {
        Some(scheme) => scheme.description().to_string(),
        None => format!("Unknown ({code})"),
    }
}
