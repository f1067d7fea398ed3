//! Pixel layout and rectangle geometry shared by every layer of the crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Layout of one pixel: 1 or 3 colour channels, optionally followed by alpha.
///
/// Alpha is always the last byte of a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl PixelFormat {
    /// Pick the format for a bytes-per-pixel count (1..=4).
    pub fn from_bytes_per_pixel(bpp: usize) -> Option<Self> {
        match bpp {
            1 => Some(PixelFormat::Gray),
            2 => Some(PixelFormat::GrayAlpha),
            3 => Some(PixelFormat::Rgb),
            4 => Some(PixelFormat::Rgba),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::GrayAlpha => 2,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::GrayAlpha | PixelFormat::Rgba)
    }

    /// Number of channels excluding alpha.
    pub fn color_channels(self) -> usize {
        match self {
            PixelFormat::Gray | PixelFormat::GrayAlpha => 1,
            PixelFormat::Rgb | PixelFormat::Rgba => 3,
        }
    }

    /// Byte index of the alpha channel within a pixel, if any.
    pub fn alpha_index(self) -> Option<usize> {
        self.has_alpha().then(|| self.bytes_per_pixel() - 1)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Gray => "gray",
            PixelFormat::GrayAlpha => "gray-alpha",
            PixelFormat::Rgb => "rgb",
            PixelFormat::Rgba => "rgba",
        };
        f.write_str(name)
    }
}

/// Axis-aligned rectangle in canvas pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// One past the last column. Widened, so it cannot overflow.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// One past the last row.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether `other` lies entirely within `self`.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        // Both extents are bounded by the narrower rectangle, so they fit in u32
        (right > x as u64 && bottom > y as u64)
            .then(|| Rect::new(x, y, (right - x as u64) as u32, (bottom - y as u64) as u32))
    }
}
