//! Whole-region pixel operations.
//!
//! Every operation walks its regions span by span, so at most one tile per
//! region is pinned at a time and the cache may evict freely in between.
//! Long-running operations report progress in pixels through an optional
//! [`Progress`] sink.

use tracing::debug;

use super::iter::{lock_step, PixelRegion};
use super::levels::{Histogram, Levels};
use crate::composite::{CompositeMode, KernelSet};
use crate::error::TileError;
use crate::pixel::PixelFormat;
use crate::tile::{Access, Canvas, TileHandle};

// =============================================================================
// Progress
// =============================================================================

/// Receives `(min, max, current)` updates during long operations.
pub trait Progress {
    fn update(&mut self, min: u64, max: u64, current: u64);
}

impl<F: FnMut(u64, u64, u64)> Progress for F {
    fn update(&mut self, min: u64, max: u64, current: u64) {
        self(min, max, current)
    }
}

struct Reporter<'p> {
    sink: Option<&'p mut dyn Progress>,
    total: u64,
    done: u64,
}

impl<'p> Reporter<'p> {
    fn new(sink: Option<&'p mut dyn Progress>, total: u64) -> Self {
        let mut reporter = Self {
            sink,
            total,
            done: 0,
        };
        reporter.emit();
        reporter
    }

    fn advance(&mut self, pixels: u64) {
        self.done = (self.done + pixels).min(self.total);
        self.emit();
    }

    fn emit(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            sink.update(0, self.total, self.done);
        }
    }
}

// =============================================================================
// Operations
// =============================================================================

/// Set every pixel of `region` to `pixel`.
///
/// # Panics
/// Panics if the region is read-only or `pixel` is not one pixel long.
pub fn fill(region: &PixelRegion<'_>, pixel: &[u8]) -> Result<(), TileError> {
    assert_eq!(region.access(), Access::Write, "fill needs a writable region");
    assert_eq!(pixel.len(), region.bytes_per_pixel(), "fill pixel size mismatch");

    for span in region.spans() {
        let mut span = span?;
        for i in 0..span.height() {
            for px in span.row_mut(i).chunks_exact_mut(pixel.len()) {
                px.copy_from_slice(pixel);
            }
        }
    }
    Ok(())
}

/// Copy `src` into `dst`.
///
/// # Panics
/// Panics if the pixel formats differ, the sizes differ, or `dst` is
/// read-only.
pub fn copy(src: &PixelRegion<'_>, dst: &PixelRegion<'_>) -> Result<(), TileError> {
    assert_eq!(src.format(), dst.format(), "copy between different pixel formats");
    assert_eq!(dst.access(), Access::Write, "copy needs a writable destination");

    for pair in lock_step([*src, *dst]) {
        let [s, mut d] = pair?;
        for i in 0..s.height() {
            d.row_mut(i).copy_from_slice(s.row(i));
        }
    }
    Ok(())
}

/// Composite `src` onto `dst` with `mode` at `opacity`, optionally scaled by
/// a single-channel `mask`.
///
/// # Panics
/// Panics on size or format mismatches (see
/// [`KernelSet::composite_pixels`]), a read-only destination, or a mask
/// that is not [`PixelFormat::Gray`].
#[allow(clippy::too_many_arguments)]
pub fn composite(
    kernels: &KernelSet,
    src: &PixelRegion<'_>,
    dst: &PixelRegion<'_>,
    mask: Option<&PixelRegion<'_>>,
    mode: CompositeMode,
    opacity: u8,
    progress: Option<&mut dyn Progress>,
) -> Result<(), TileError> {
    assert_eq!(dst.access(), Access::Write, "composite needs a writable destination");
    debug!(
        %mode,
        opacity,
        width = dst.width(),
        height = dst.height(),
        masked = mask.is_some(),
        "Compositing region"
    );
    let mut reporter = Reporter::new(progress, dst.rect().area());

    match mask {
        Some(mask) => {
            assert_eq!(mask.format(), PixelFormat::Gray, "mask must be single-channel");
            for triple in lock_step([*src, *dst, *mask]) {
                let [s, mut d, m] = triple?;
                let dst_format = d.format();
                for i in 0..s.height() {
                    kernels.composite_pixels(
                        mode,
                        s.row(i),
                        s.format(),
                        d.row_mut(i),
                        dst_format,
                        Some(m.row(i)),
                        opacity,
                    );
                }
                reporter.advance(s.width() as u64 * s.height() as u64);
            }
        }
        None => {
            for pair in lock_step([*src, *dst]) {
                let [s, mut d] = pair?;
                let dst_format = d.format();
                for i in 0..s.height() {
                    kernels.composite_pixels(
                        mode,
                        s.row(i),
                        s.format(),
                        d.row_mut(i),
                        dst_format,
                        None,
                        opacity,
                    );
                }
                reporter.advance(s.width() as u64 * s.height() as u64);
            }
        }
    }
    Ok(())
}

/// Tint `region` in place: colour channels become `color` scaled by each
/// pixel's luminance.
pub fn colorize(
    kernels: &KernelSet,
    region: &PixelRegion<'_>,
    color: [u8; 3],
    progress: Option<&mut dyn Progress>,
) -> Result<(), TileError> {
    assert_eq!(region.access(), Access::Write, "colorize needs a writable region");
    let mut reporter = Reporter::new(progress, region.rect().area());

    for span in region.spans() {
        let mut span = span?;
        let format = span.format();
        for i in 0..span.height() {
            kernels.colorize_pixels(span.row_mut(i), format, color);
        }
        reporter.advance(span.width() as u64 * span.height() as u64);
    }
    Ok(())
}

/// Per-channel pixel counts of `region`.
pub fn histogram(region: &PixelRegion<'_>) -> Result<Histogram, TileError> {
    let mut histogram = Histogram::new();
    for span in region.spans() {
        let span = span?;
        let format = span.format();
        for i in 0..span.height() {
            histogram.add_row(span.row(i), format);
        }
    }
    Ok(histogram)
}

/// Map every byte of `region` through the curves of `levels`.
pub fn levels(
    region: &PixelRegion<'_>,
    levels: &Levels,
    progress: Option<&mut dyn Progress>,
) -> Result<(), TileError> {
    assert_eq!(region.access(), Access::Write, "levels needs a writable region");
    let luts = levels.luts(region.format());
    debug!(rect = ?region.rect(), format = %region.format(), "Applying levels");
    let mut reporter = Reporter::new(progress, region.rect().area());

    for span in region.spans() {
        let mut span = span?;
        for i in 0..span.height() {
            for px in span.row_mut(i).chunks_exact_mut(luts.len()) {
                for (b, lut) in px.iter_mut().zip(&luts) {
                    *b = lut[*b as usize];
                }
            }
        }
        reporter.advance(span.width() as u64 * span.height() as u64);
    }
    Ok(())
}

/// Resample the whole of `src` into the whole of `dst` (nearest neighbour).
///
/// # Panics
/// Panics if the canvases have different pixel formats or are the same
/// canvas.
pub fn scale(
    src: &Canvas,
    dst: &Canvas,
    progress: Option<&mut dyn Progress>,
) -> Result<(), TileError> {
    assert_eq!(src.format(), dst.format(), "scale between different pixel formats");
    assert_ne!(src.id(), dst.id(), "scale source and destination must differ");
    debug!(
        from_width = src.width(),
        from_height = src.height(),
        to_width = dst.width(),
        to_height = dst.height(),
        "Scaling canvas"
    );

    let bpp = src.bytes_per_pixel();
    let (sw, sh) = (src.width() as u64, src.height() as u64);
    let (dw, dh) = (dst.width() as u64, dst.height() as u64);
    let mut reader = TileReader::new(src);
    let mut reporter = Reporter::new(progress, dw * dh);

    for span in dst.full_region(Access::Write).spans() {
        let mut span = span?;
        for i in 0..span.height() {
            let sy = ((span.y() + i) as u64 * sh / dh) as u32;
            let x0 = span.x();
            let row = span.row_mut(i);
            for (j, px) in row.chunks_exact_mut(bpp).enumerate() {
                let sx = ((x0 as u64 + j as u64) * sw / dw) as u32;
                px.copy_from_slice(reader.pixel(sx, sy)?);
            }
        }
        reporter.advance(span.width() as u64 * span.height() as u64);
    }
    Ok(())
}

/// Random-access reads that keep the most recent tile pinned.
struct TileReader<'a> {
    canvas: &'a Canvas,
    current: Option<TileHandle>,
}

impl<'a> TileReader<'a> {
    fn new(canvas: &'a Canvas) -> Self {
        Self {
            canvas,
            current: None,
        }
    }

    fn pixel(&mut self, x: u32, y: u32) -> Result<&[u8], TileError> {
        let ts = self.canvas.grid().tile_size();
        let (col, row) = (x / ts, y / ts);
        let stale = self
            .current
            .as_ref()
            .map_or(true, |h| (h.id().col, h.id().row) != (col, row));
        if stale {
            // Release before acquiring so the budget sees one pin at most
            self.current = None;
            self.current = Some(self.canvas.acquire(col, row, Access::Read)?);
        }
        let Some(tile) = self.current.as_ref() else {
            unreachable!("tile acquired above")
        };
        let bpp = tile.bytes_per_pixel();
        let offset = (y % ts) as usize * tile.row_stride() + (x % ts) as usize * bpp;
        Ok(&tile.data()[offset..offset + bpp])
    }
}
