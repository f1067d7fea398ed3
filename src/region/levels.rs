//! Levels adjustment: per-channel input range, gamma and output range.
//!
//! A channel curve maps an intensity `v` in `0..=255` as
//!
//! ```text
//!   i = (v - low_input) / (high_input - low_input)    (v - low_input when the range is empty)
//!   i = sign(i) * |i| ^ (1 / gamma)                    (skipped when gamma is 0)
//!   o = low_output + i * (high_output - low_output)
//! ```
//!
//! Colour bytes of RGB pixels pass through their own channel curve and then
//! the value curve. Gray bytes use the value curve only and alpha uses the
//! alpha curve only. The result is rounded and clamped to `0..=255` once,
//! after the last curve.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pixel::PixelFormat;

/// Share of pixels [`ChannelLevels::auto`] lets clip at each end.
const AUTO_CLIP: f64 = 0.006;

/// Channels of a [`Histogram`] and of [`Levels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistogramChannel {
    /// Gray value, or the largest colour channel of an RGB pixel
    Value,
    Red,
    Green,
    Blue,
    Alpha,
}

impl HistogramChannel {
    pub const ALL: [HistogramChannel; 5] = [
        HistogramChannel::Value,
        HistogramChannel::Red,
        HistogramChannel::Green,
        HistogramChannel::Blue,
        HistogramChannel::Alpha,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn color(c: usize) -> Self {
        match c {
            0 => HistogramChannel::Red,
            1 => HistogramChannel::Green,
            _ => HistogramChannel::Blue,
        }
    }
}

// =============================================================================
// Histogram
// =============================================================================

/// Pixel counts per intensity for each channel.
#[derive(Clone, PartialEq, Eq)]
pub struct Histogram {
    bins: [[u64; 256]; 5],
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            bins: [[0; 256]; 5],
        }
    }

    /// Count one pixel of `format`.
    pub fn add_pixel(&mut self, pixel: &[u8], format: PixelFormat) {
        if format.color_channels() == 3 {
            let value = pixel[0].max(pixel[1]).max(pixel[2]);
            self.bins[HistogramChannel::Value.index()][value as usize] += 1;
            for (c, &v) in pixel[..3].iter().enumerate() {
                self.bins[HistogramChannel::color(c).index()][v as usize] += 1;
            }
        } else {
            self.bins[HistogramChannel::Value.index()][pixel[0] as usize] += 1;
        }
        if let Some(a) = format.alpha_index() {
            self.bins[HistogramChannel::Alpha.index()][pixel[a] as usize] += 1;
        }
    }

    /// Count every pixel of a packed row.
    pub fn add_row(&mut self, row: &[u8], format: PixelFormat) {
        for pixel in row.chunks_exact(format.bytes_per_pixel()) {
            self.add_pixel(pixel, format);
        }
    }

    pub fn count(&self, channel: HistogramChannel, value: u8) -> u64 {
        self.bins[channel.index()][value as usize]
    }

    /// Pixels with `channel` in `start..=end`.
    pub fn range_count(&self, channel: HistogramChannel, start: u8, end: u8) -> u64 {
        if start > end {
            return 0;
        }
        self.bins[channel.index()][start as usize..=end as usize]
            .iter()
            .sum()
    }

    pub fn total(&self, channel: HistogramChannel) -> u64 {
        self.range_count(channel, 0, 255)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Histogram");
        for channel in HistogramChannel::ALL {
            s.field(&format!("{channel:?}").to_lowercase(), &self.total(channel));
        }
        s.finish()
    }
}

// =============================================================================
// Channel Curve
// =============================================================================

/// Curve parameters of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelLevels {
    pub low_input: u8,
    pub high_input: u8,
    pub gamma: f64,
    pub low_output: u8,
    pub high_output: u8,
}

impl ChannelLevels {
    pub const IDENTITY: ChannelLevels = ChannelLevels {
        low_input: 0,
        high_input: 255,
        gamma: 1.0,
        low_output: 0,
        high_output: 255,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Map an intensity in `0.0..=1.0` through the curve. The result is not
    /// clamped, so curves can be chained without losing range.
    pub fn map(&self, value: f64) -> f64 {
        let low = self.low_input as f64;
        let high = self.high_input as f64;
        let mut inten = if high != low {
            (255.0 * value - low) / (high - low)
        } else {
            255.0 * value - low
        };
        if self.gamma != 0.0 {
            inten = inten.abs().powf(1.0 / self.gamma).copysign(inten);
        }
        let low_out = self.low_output as f64;
        let high_out = self.high_output as f64;
        (low_out + inten * (high_out - low_out)) / 255.0
    }

    /// Input stage alone: each input value after the range stretch and
    /// gamma, clamped to the full output range.
    pub fn input_transfer(&self) -> [u8; 256] {
        let low = self.low_input as f64;
        let high = self.high_input as f64;
        let mut table = [0u8; 256];
        for (v, out) in table.iter_mut().enumerate() {
            let v = v as f64;
            let mut inten = if high != low {
                (v - low) / (high - low)
            } else {
                v - low
            };
            inten = inten.clamp(0.0, 1.0);
            if self.gamma != 0.0 {
                inten = inten.powf(1.0 / self.gamma);
            }
            *out = (inten * 255.0 + 0.5) as u8;
        }
        table
    }

    /// Stretch the input range of `channel` so that about 0.6% of the
    /// counted pixels clip at either end.
    ///
    /// An empty channel gets the degenerate range `0..=0`.
    pub fn auto(histogram: &Histogram, channel: HistogramChannel) -> Self {
        let count = histogram.total(channel) as f64;
        if count == 0.0 {
            return Self {
                low_input: 0,
                high_input: 0,
                ..Self::IDENTITY
            };
        }
        let bin = |i: usize| histogram.count(channel, i as u8) as f64;
        let closer = |here: f64, next: f64| {
            (here / count - AUTO_CLIP).abs() < (next / count - AUTO_CLIP).abs()
        };

        let mut low_input = 0;
        let mut seen = 0.0;
        for i in 0..255 {
            seen += bin(i);
            if closer(seen, seen + bin(i + 1)) {
                low_input = (i + 1) as u8;
                break;
            }
        }

        let mut high_input = 255;
        seen = 0.0;
        for i in (1..=255).rev() {
            seen += bin(i);
            if closer(seen, seen + bin(i - 1)) {
                high_input = (i - 1) as u8;
                break;
            }
        }

        Self {
            low_input,
            high_input,
            ..Self::IDENTITY
        }
    }
}

impl Default for ChannelLevels {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// =============================================================================
// Levels
// =============================================================================

/// Curves for every [`HistogramChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Levels {
    channels: [ChannelLevels; 5],
}

impl Levels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel: HistogramChannel) -> &ChannelLevels {
        &self.channels[channel.index()]
    }

    pub fn channel_mut(&mut self, channel: HistogramChannel) -> &mut ChannelLevels {
        &mut self.channels[channel.index()]
    }

    pub fn with_channel(mut self, channel: HistogramChannel, levels: ChannelLevels) -> Self {
        self.channels[channel.index()] = levels;
        self
    }

    /// Automatic levels from a histogram.
    ///
    /// With `color`, red, green and blue are stretched individually and the
    /// value curve is left as identity; otherwise only the value curve is
    /// stretched.
    pub fn auto(histogram: &Histogram, color: bool) -> Self {
        let mut levels = Self::new();
        if color {
            for c in 0..3 {
                let channel = HistogramChannel::color(c);
                *levels.channel_mut(channel) = ChannelLevels::auto(histogram, channel);
            }
        } else {
            *levels.channel_mut(HistogramChannel::Value) =
                ChannelLevels::auto(histogram, HistogramChannel::Value);
        }
        levels
    }

    /// One lookup table per byte of a `format` pixel.
    pub fn luts(&self, format: PixelFormat) -> Vec<[u8; 256]> {
        let value = self.channel(HistogramChannel::Value);
        (0..format.bytes_per_pixel())
            .map(|k| {
                let curves: Vec<&ChannelLevels> = if format.alpha_index() == Some(k) {
                    vec![self.channel(HistogramChannel::Alpha)]
                } else if format.color_channels() == 3 {
                    vec![self.channel(HistogramChannel::color(k)), value]
                } else {
                    vec![value]
                };
                let mut lut = [0u8; 256];
                for (v, out) in lut.iter_mut().enumerate() {
                    let mapped = curves.iter().fold(v as f64 / 255.0, |x, c| c.map(x));
                    *out = (255.0 * mapped + 0.5).clamp(0.0, 255.0) as u8;
                }
                lut
            })
            .collect()
    }
}
