use std::fmt;
use std::sync::Arc;

use crate::error::TileError;
use crate::io::SwapLocator;
use crate::pixel::{PixelFormat, Rect};

// =============================================================================
// Identity
// =============================================================================

/// Identifier of a canvas within one tile context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanvasId(u64);

impl CanvasId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CanvasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "canvas#{}", self.0)
    }
}

/// Identity of one tile: owning canvas plus grid column and row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub canvas: CanvasId,
    pub col: u32,
    pub row: u32,
}

impl TileId {
    pub const fn new(canvas: CanvasId, col: u32, row: u32) -> Self {
        Self { canvas, col, row }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.canvas, self.col, self.row)
    }
}

// =============================================================================
// State
// =============================================================================

/// Observable lifecycle state of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// Never written; reads as zeros
    Uninitialized,
    /// Pixel memory is in the cache
    Resident { dirty: bool },
    /// Only the swap copy exists
    SwappedOut,
}

/// Book-keeping for one tile slot of a canvas table.
#[derive(Debug, Default)]
pub(crate) struct TileEntry {
    /// Resident pixels, unless an exclusive writer has checked them out
    pub data: Option<Arc<Vec<u8>>>,
    /// A write handle currently owns the pixels
    pub checked_out: bool,
    /// Live handles on this tile
    pub refcount: u32,
    /// Memory differs from the swap copy (or no swap copy exists for written data)
    pub dirty: bool,
    /// Swap copy; valid whenever `dirty` is false
    pub swap: Option<SwapLocator>,
}

impl TileEntry {
    pub fn is_resident(&self) -> bool {
        self.data.is_some() || self.checked_out
    }

    pub fn is_pinned(&self) -> bool {
        self.refcount > 0
    }

    pub fn state(&self) -> TileState {
        if self.is_resident() {
            TileState::Resident { dirty: self.dirty }
        } else if self.swap.is_some() {
            TileState::SwappedOut
        } else {
            TileState::Uninitialized
        }
    }
}

// =============================================================================
// Grid Geometry
// =============================================================================

/// Partition of a canvas into fixed-size tiles.
///
/// Edge tiles in the last column and row cover only the remaining pixels,
/// so their buffers are smaller than the nominal tile size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    width: u32,
    height: u32,
    tile_size: u32,
    cols: u32,
    rows: u32,
    format: PixelFormat,
}

impl TileGrid {
    /// # Panics
    /// Panics if any dimension or the tile size is zero.
    pub fn new(width: u32, height: u32, tile_size: u32, format: PixelFormat) -> Self {
        assert!(width > 0 && height > 0, "canvas must not be empty ({width}x{height})");
        assert!(tile_size > 0, "tile size must be positive");
        Self {
            width,
            height,
            tile_size,
            cols: width.div_ceil(tile_size),
            rows: height.div_ceil(tile_size),
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn tile_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// Row-major index of a tile in the canvas table.
    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    /// Canvas-space rectangle covered by a tile.
    pub fn tile_rect(&self, col: u32, row: u32) -> Rect {
        let x = col * self.tile_size;
        let y = row * self.tile_size;
        Rect::new(
            x,
            y,
            self.tile_size.min(self.width - x),
            self.tile_size.min(self.height - y),
        )
    }

    /// Byte length of a tile's buffer.
    pub fn tile_bytes(&self, col: u32, row: u32) -> usize {
        let rect = self.tile_rect(col, row);
        rect.width as usize * rect.height as usize * self.format.bytes_per_pixel()
    }

    /// Tile covering pixel `(x, y)`, or `None` outside the canvas.
    pub fn tile_at(&self, x: u32, y: u32) -> Option<(u32, u32)> {
        (x < self.width && y < self.height).then(|| (x / self.tile_size, y / self.tile_size))
    }

    pub fn contains_tile(&self, col: u32, row: u32) -> bool {
        col < self.cols && row < self.rows
    }
}

// =============================================================================
// Allocation
// =============================================================================

/// Allocate a zero-filled tile buffer, reporting failure instead of aborting.
pub(crate) fn alloc_zeroed(tile: TileId, len: usize) -> Result<Vec<u8>, TileError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| TileError::Allocation { tile, bytes: len })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Allocate a tile buffer holding a copy of `src`.
pub(crate) fn alloc_copy(tile: TileId, src: &[u8]) -> Result<Vec<u8>, TileError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(src.len())
        .map_err(|_| TileError::Allocation {
            tile,
            bytes: src.len(),
        })?;
    buf.extend_from_slice(src);
    Ok(buf)
}
