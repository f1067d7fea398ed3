use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Catalog of compositing kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompositeMode {
    Normal,
    /// Paint only where the destination is transparent
    Behind,
    Multiply,
    Screen,
    Overlay,
    Difference,
    Addition,
    Subtract,
    Darken,
    Lighten,
    Divide,
    Dodge,
    Burn,
    HardLight,
    GrainExtract,
    GrainMerge,
    /// Reduce destination alpha by the source weight
    Erase,
    /// Raise destination alpha by the source weight
    AntiErase,
    /// Interpolate every channel, alpha included, towards the source
    Replace,
    /// Remove the source colour from the destination, turning it into alpha
    ColorToAlpha,
    /// Tint destination luminosity with the source colour
    Colorize,
}

impl CompositeMode {
    pub const COUNT: usize = 21;

    pub const ALL: [CompositeMode; Self::COUNT] = [
        CompositeMode::Normal,
        CompositeMode::Behind,
        CompositeMode::Multiply,
        CompositeMode::Screen,
        CompositeMode::Overlay,
        CompositeMode::Difference,
        CompositeMode::Addition,
        CompositeMode::Subtract,
        CompositeMode::Darken,
        CompositeMode::Lighten,
        CompositeMode::Divide,
        CompositeMode::Dodge,
        CompositeMode::Burn,
        CompositeMode::HardLight,
        CompositeMode::GrainExtract,
        CompositeMode::GrainMerge,
        CompositeMode::Erase,
        CompositeMode::AntiErase,
        CompositeMode::Replace,
        CompositeMode::ColorToAlpha,
        CompositeMode::Colorize,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            CompositeMode::Normal => "normal",
            CompositeMode::Behind => "behind",
            CompositeMode::Multiply => "multiply",
            CompositeMode::Screen => "screen",
            CompositeMode::Overlay => "overlay",
            CompositeMode::Difference => "difference",
            CompositeMode::Addition => "addition",
            CompositeMode::Subtract => "subtract",
            CompositeMode::Darken => "darken",
            CompositeMode::Lighten => "lighten",
            CompositeMode::Divide => "divide",
            CompositeMode::Dodge => "dodge",
            CompositeMode::Burn => "burn",
            CompositeMode::HardLight => "hard-light",
            CompositeMode::GrainExtract => "grain-extract",
            CompositeMode::GrainMerge => "grain-merge",
            CompositeMode::Erase => "erase",
            CompositeMode::AntiErase => "anti-erase",
            CompositeMode::Replace => "replace",
            CompositeMode::ColorToAlpha => "color-to-alpha",
            CompositeMode::Colorize => "colorize",
        }
    }

    /// Whether the blended colour of a channel depends only on the source
    /// and destination values of that same channel.
    ///
    /// Only these modes have accelerated implementations. `Behind` and
    /// `Replace` blend with the `Normal` channel function.
    pub fn is_elementwise(self) -> bool {
        matches!(
            self,
            CompositeMode::Normal
                | CompositeMode::Multiply
                | CompositeMode::Screen
                | CompositeMode::Overlay
                | CompositeMode::Difference
                | CompositeMode::Addition
                | CompositeMode::Subtract
                | CompositeMode::Darken
                | CompositeMode::Lighten
                | CompositeMode::Divide
                | CompositeMode::Dodge
                | CompositeMode::Burn
                | CompositeMode::HardLight
                | CompositeMode::GrainExtract
                | CompositeMode::GrainMerge
        )
    }

    /// Modes that only make sense on a destination with an alpha channel.
    pub fn requires_dest_alpha(self) -> bool {
        matches!(
            self,
            CompositeMode::Erase | CompositeMode::AntiErase | CompositeMode::ColorToAlpha
        )
    }
}

impl fmt::Display for CompositeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompositeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        CompositeMode::ALL
            .into_iter()
            .find(|m| m.name() == wanted)
            .ok_or_else(|| format!("unknown composite mode '{}'", s))
    }
}
