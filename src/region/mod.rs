//! Pixel regions and the whole-region operations built on them.
//!
//! - [`PixelRegion`]: a rectangle of a canvas plus an access mode
//! - [`Span`]: tile-aligned chunk of a region, pinning its tile
//! - [`lock_step`]: iterate several equally sized regions together
//! - [`ops`]: fill, copy, composite, colorize, levels and scale over regions
//! - [`Levels`]: per-channel levels curves and the [`Histogram`] they are fitted to

mod iter;
mod levels;
pub mod ops;

pub use iter::{lock_step, LockStep, PixelRegion, Span, Spans};
pub use levels::{ChannelLevels, Histogram, HistogramChannel, Levels};
pub use ops::Progress;
