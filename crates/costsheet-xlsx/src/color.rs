//! Project color coding
//!
//! Projects are colored by manager: every distinct non-empty manager takes the
//! next palette color in order of first appearance, wrapping around the
//! palette. Projects without a manager are left uncolored.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use costsheet_core::Project;
use thiserror::Error;

/// Fixed palette cycled over managers
pub const PROJECT_PALETTE: [HexColor; 4] = [
    HexColor::new(0x46, 0xbd, 0xc6),
    HexColor::new(0x92, 0xd0, 0x50),
    HexColor::new(0xb6, 0xd7, 0xa8),
    HexColor::new(0xd9, 0xea, 0xd3),
];

/// Shade applied to a project color for its borders
pub const BORDER_SHADE: u32 = 15;

/// Shade applied to a project color for the project total row fill
pub const FILL_SHADE: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid color '{0}': expected #rrggbb")]
pub struct ColorError(String);

/// 24-bit RGB color written as `#rrggbb`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HexColor {
    r: u8,
    g: u8,
    b: u8,
}

impl HexColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Darken by `percent`: each channel becomes floor(c * (100 - percent) / 100),
    /// floored at zero.
    pub fn shade(self, percent: u32) -> Self {
        let scale = |c: u8| -> u8 {
            let shaded = i64::from(c) * (100 - i64::from(percent)) / 100;
            shaded.clamp(0, 255) as u8
        };
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// `0xRRGGBB`, as expected by rust_xlsxwriter colors
    pub const fn to_rgb(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for HexColor {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(ColorError(s.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| ColorError(s.to_string()))
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// Shade a `#rrggbb` string, see [`HexColor::shade`]
pub fn shade_color(color: &str, percent: u32) -> Result<String, ColorError> {
    Ok(color.parse::<HexColor>()?.shade(percent).to_string())
}

/// Map project key -> color. Keys of projects without a manager are absent.
pub fn assign_colors(projects: &[Project]) -> HashMap<String, HexColor> {
    // first-seen order of managers decides the palette slot
    let mut managers: Vec<(&str, HexColor)> = Vec::new();
    for project in projects.iter().filter(|p| p.has_manager()) {
        if !managers.iter().any(|(m, _)| *m == project.manager) {
            let color = PROJECT_PALETTE[managers.len() % PROJECT_PALETTE.len()];
            managers.push((project.manager.as_str(), color));
        }
    }

    projects
        .iter()
        .filter_map(|project| {
            managers
                .iter()
                .find(|(m, _)| *m == project.manager)
                .map(|(_, color)| (project.key.clone(), *color))
        })
        .collect()
}
