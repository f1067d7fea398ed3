//! Tile-aligned span iteration over pixel regions.
//!
//! A [`PixelRegion`] names a rectangle of a canvas. Iterating it yields
//! [`Span`]s: sub-rectangles that lie entirely inside one tile, so each
//! span's rows are contiguous runs of tile memory.
//!
//! # Chunking
//!
//! Regions can be iterated alone ([`PixelRegion::spans`]) or in lock-step
//! with other regions of the same size ([`lock_step`]). The region is cut into
//! chunks at the tile boundaries of *every* co-iterated region, which keeps
//! spans paired even when the regions sit at different offsets in their
//! canvases:
//!
//! ```text
//!   region A (x=0)     |-------- tile --------|-------- tile --------|
//!   region B (x=40)    |-- tile --|-------- tile --------|-- tile ---|
//!   chunks             |   c0     |    c1     |    c2    |    c3     |
//! ```
//!
//! Chunks are produced row-major: a band of rows is cut at the nearest
//! horizontal boundary, then walked left to right.
//!
//! # Tile pins
//!
//! Each span owns the [`TileHandle`] it reads from, so the tile stays pinned
//! exactly as long as the span is alive. Stopping early, or an error
//! mid-iteration, simply drops whatever spans exist.
//!
//! A write span checks its tile out exclusively. Holding two write spans of
//! the same tile at once (for example by collecting the iterator when the
//! region is chunked finer than the tile grid) panics.

use crate::error::TileError;
use crate::pixel::{PixelFormat, Rect};
use crate::tile::{Access, Canvas, TileHandle, TileId};

// =============================================================================
// Pixel Region
// =============================================================================

/// A rectangle of a canvas together with the access mode used to visit it.
#[derive(Clone, Copy)]
pub struct PixelRegion<'a> {
    canvas: &'a Canvas,
    rect: Rect,
    access: Access,
}

impl<'a> PixelRegion<'a> {
    /// # Panics
    /// Panics if `rect` is empty or extends past the canvas.
    pub fn new(canvas: &'a Canvas, rect: Rect, access: Access) -> Self {
        assert!(!rect.is_empty(), "empty region {rect:?}");
        assert!(
            canvas.bounds().contains_rect(&rect),
            "region {rect:?} outside {}x{} canvas",
            canvas.width(),
            canvas.height()
        );
        Self {
            canvas,
            rect,
            access,
        }
    }

    pub fn canvas(&self) -> &'a Canvas {
        self.canvas
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    pub fn format(&self) -> PixelFormat {
        self.canvas.format()
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.canvas.bytes_per_pixel()
    }

    /// Iterate this region alone.
    pub fn spans(&self) -> Spans<'a> {
        Spans {
            inner: lock_step([*self]),
        }
    }

    fn tile_size(&self) -> u32 {
        self.canvas.grid().tile_size()
    }
}

impl std::fmt::Debug for PixelRegion<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelRegion")
            .field("canvas", &self.canvas.id())
            .field("rect", &self.rect)
            .field("access", &self.access)
            .finish()
    }
}

// =============================================================================
// Span
// =============================================================================

/// One tile-aligned chunk of a region, pinning the tile it addresses.
pub struct Span {
    handle: TileHandle,
    format: PixelFormat,
    /// Chunk origin in canvas coordinates
    x: u32,
    y: u32,
    /// Chunk origin relative to the region
    region_x: u32,
    region_y: u32,
    width: u32,
    height: u32,
    /// Byte offset of the first pixel inside the tile buffer
    offset: usize,
}

impl Span {
    fn acquire(
        region: &PixelRegion<'_>,
        dx: u32,
        dy: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, TileError> {
        let x = region.rect.x + dx;
        let y = region.rect.y + dy;
        let ts = region.tile_size();
        let handle = region.canvas.acquire(x / ts, y / ts, region.access)?;
        let offset =
            (y % ts) as usize * handle.row_stride() + (x % ts) as usize * handle.bytes_per_pixel();
        Ok(Self {
            handle,
            format: region.format(),
            x,
            y,
            region_x: dx,
            region_y: dy,
            width,
            height,
            offset,
        })
    }

    pub fn tile(&self) -> TileId {
        self.handle.id()
    }

    /// Canvas x of the first column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Canvas y of the first row.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Position of the span relative to the region origin.
    pub fn region_offset(&self) -> (u32, u32) {
        (self.region_x, self.region_y)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.format.bytes_per_pixel()
    }

    /// Distance in bytes between consecutive rows of the span.
    pub fn row_stride(&self) -> usize {
        self.handle.row_stride()
    }

    /// Pixels of row `i`: `width * bytes_per_pixel` bytes.
    pub fn row(&self, i: u32) -> &[u8] {
        let range = self.row_range(i);
        &self.handle.data()[range]
    }

    /// Mutable pixels of row `i`. Marks the tile dirty.
    ///
    /// # Panics
    /// Panics if the region was opened read-only.
    pub fn row_mut(&mut self, i: u32) -> &mut [u8] {
        let range = self.row_range(i);
        &mut self.handle.data_mut()[range]
    }

    fn row_range(&self, i: u32) -> std::ops::Range<usize> {
        assert!(i < self.height, "row {i} outside span of height {}", self.height);
        let start = self.offset + i as usize * self.row_stride();
        start..start + self.width as usize * self.bytes_per_pixel()
    }
}

impl std::fmt::Debug for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("tile", &self.tile())
            .field("x", &self.x)
            .field("y", &self.y)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Iterate `N` equally sized regions together, yielding one span per region
/// for every chunk.
///
/// # Panics
/// Panics if the regions differ in width or height, or if a writable region
/// shares its canvas with any other region.
pub fn lock_step<const N: usize>(regions: [PixelRegion<'_>; N]) -> LockStep<'_, N> {
    assert!(N > 0, "lock-step needs at least one region");
    let (width, height) = (regions[0].width(), regions[0].height());
    for (i, r) in regions.iter().enumerate() {
        assert!(
            r.width() == width && r.height() == height,
            "lock-step region {i} is {}x{}, expected {width}x{height}",
            r.width(),
            r.height()
        );
        if r.access == Access::Write {
            let shared = regions
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.canvas.id() == r.canvas.id());
            assert!(
                !shared,
                "writable region {i} shares {} with another region",
                r.canvas.id()
            );
        }
    }

    LockStep {
        regions,
        width,
        height,
        dx: 0,
        dy: 0,
        band: 0,
    }
}

/// Lock-step span iterator. See [`lock_step`].
pub struct LockStep<'a, const N: usize> {
    regions: [PixelRegion<'a>; N],
    width: u32,
    height: u32,
    dx: u32,
    dy: u32,
    band: u32,
}

impl<const N: usize> LockStep<'_, N> {
    /// Total pixels per region.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn band_height(&self) -> u32 {
        self.regions
            .iter()
            .map(|r| {
                let ts = r.tile_size();
                ts - (r.rect.y + self.dy) % ts
            })
            .fold(self.height - self.dy, u32::min)
    }

    fn chunk_width(&self) -> u32 {
        self.regions
            .iter()
            .map(|r| {
                let ts = r.tile_size();
                ts - (r.rect.x + self.dx) % ts
            })
            .fold(self.width - self.dx, u32::min)
    }
}

impl<const N: usize> Iterator for LockStep<'_, N> {
    type Item = Result<[Span; N], TileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.dy >= self.height {
            return None;
        }
        if self.dx == 0 {
            self.band = self.band_height();
        }
        let chunk = self.chunk_width();

        let mut spans = Vec::with_capacity(N);
        for region in &self.regions {
            match Span::acquire(region, self.dx, self.dy, chunk, self.band) {
                Ok(span) => spans.push(span),
                Err(e) => {
                    // Fused after a failure; spans acquired so far are released here.
                    self.dy = self.height;
                    return Some(Err(e));
                }
            }
        }

        self.dx += chunk;
        if self.dx >= self.width {
            self.dx = 0;
            self.dy += self.band;
        }

        let Ok(spans) = <[Span; N]>::try_from(spans) else {
            unreachable!("one span per region")
        };
        Some(Ok(spans))
    }
}

impl<const N: usize> std::iter::FusedIterator for LockStep<'_, N> {}

/// Span iterator over a single region.
pub struct Spans<'a> {
    inner: LockStep<'a, 1>,
}

impl Spans<'_> {
    pub fn pixel_count(&self) -> u64 {
        self.inner.pixel_count()
    }
}

impl Iterator for Spans<'_> {
    type Item = Result<Span, TileError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map(|[span]| span))
    }
}

impl std::iter::FusedIterator for Spans<'_> {}
