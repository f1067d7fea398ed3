use std::fmt;
use std::sync::Arc;

use super::cache::TileContext;
use super::handle::{Access, TileHandle};
use super::{CanvasId, TileGrid, TileId, TileState, TileValidator};
use crate::error::TileError;
use crate::pixel::{PixelFormat, Rect};
use crate::region::PixelRegion;

/// A tiled image whose pixels live in a [`TileContext`].
///
/// Dropping the canvas frees all of its resident tiles and swap extents.
pub struct Canvas {
    ctx: TileContext,
    id: CanvasId,
    grid: TileGrid,
}

impl Canvas {
    pub(crate) fn new(ctx: TileContext, id: CanvasId, grid: TileGrid) -> Self {
        Self { ctx, id, grid }
    }

    pub fn id(&self) -> CanvasId {
        self.id
    }

    pub fn context(&self) -> &TileContext {
        &self.ctx
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    pub fn format(&self) -> PixelFormat {
        self.grid.format()
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.grid.format().bytes_per_pixel()
    }

    pub fn bounds(&self) -> Rect {
        self.grid.bounds()
    }

    /// Pin tile `(col, row)` for reading or writing.
    ///
    /// Swapped-out tiles are faulted in synchronously; uninitialized tiles
    /// are allocated zero-filled, then passed to the canvas validator if one
    /// is set.
    ///
    /// # Panics
    /// Panics if the tile lies outside the grid, or if the tile is already
    /// checked out by a write handle.
    pub fn acquire(&self, col: u32, row: u32, access: Access) -> Result<TileHandle, TileError> {
        assert!(
            self.grid.contains_tile(col, row),
            "tile ({col},{row}) outside {}x{} grid of {}",
            self.grid.cols(),
            self.grid.rows(),
            self.id
        );
        self.ctx.acquire(TileId::new(self.id, col, row), access)
    }

    /// Pin the tile covering pixel `(x, y)`.
    ///
    /// # Panics
    /// Panics if the pixel is outside the canvas.
    pub fn acquire_at_pixel(
        &self,
        x: u32,
        y: u32,
        access: Access,
    ) -> Result<TileHandle, TileError> {
        let Some((col, row)) = self.grid.tile_at(x, y) else {
            panic!(
                "pixel ({x},{y}) outside {}x{} canvas",
                self.width(),
                self.height()
            );
        };
        self.acquire(col, row, access)
    }

    pub fn tile_state(&self, col: u32, row: u32) -> TileState {
        self.ctx.tile_state(TileId::new(self.id, col, row))
    }

    /// Number of live handles on a tile.
    pub fn tile_refcount(&self, col: u32, row: u32) -> u32 {
        self.ctx.refcount(TileId::new(self.id, col, row))
    }

    /// Write every dirty, unpinned tile to swap. Tiles stay resident.
    ///
    /// Returns the number of tiles written, or the first swap failure; tiles
    /// that failed remain dirty.
    pub fn flush(&self) -> Result<usize, TileError> {
        self.ctx.flush_canvas(self.id)
    }

    /// Discard a tile's contents and swap copy. It reads as zeros afterwards,
    /// or is validated again on the next acquisition.
    ///
    /// # Panics
    /// Panics if the tile is pinned.
    pub fn invalidate_tile(&self, col: u32, row: u32) {
        assert!(self.grid.contains_tile(col, row));
        self.ctx.invalidate(TileId::new(self.id, col, row))
    }

    /// Compute uninitialized tiles with `validator` instead of zero-filling
    /// them. Tiles that already hold data are not affected.
    pub fn set_validator<V>(&self, validator: V)
    where
        V: TileValidator + 'static,
    {
        self.ctx.set_validator(self.id, Some(Arc::new(validator)));
    }

    pub fn clear_validator(&self) {
        self.ctx.set_validator(self.id, None);
    }

    /// Make tile `(col, row)` share the pixels of tile `(src_col, src_row)`
    /// of `src`.
    ///
    /// The previous contents and swap copy of the tile are discarded. Both
    /// tiles keep one buffer until either is acquired for writing, which
    /// copies it first. The source is faulted in (or validated) if needed.
    ///
    /// # Panics
    /// Panics if either tile is outside its grid, if the canvases belong to
    /// different contexts or have different pixel formats, if the two tiles
    /// differ in size, or if the destination tile is pinned.
    pub fn map_tile(
        &self,
        col: u32,
        row: u32,
        src: &Canvas,
        src_col: u32,
        src_row: u32,
    ) -> Result<(), TileError> {
        assert!(
            self.grid.contains_tile(col, row) && src.grid.contains_tile(src_col, src_row),
            "tile ({col},{row}) <- ({src_col},{src_row}) outside the grid"
        );
        assert!(
            self.ctx.same_context(&src.ctx),
            "cannot map tiles across tile contexts"
        );
        assert_eq!(
            self.format(),
            src.format(),
            "map_tile between different pixel formats"
        );
        let dst_rect = self.grid.tile_rect(col, row);
        let src_rect = src.grid.tile_rect(src_col, src_row);
        assert_eq!(
            (dst_rect.width, dst_rect.height),
            (src_rect.width, src_rect.height),
            "map_tile between tiles of different size"
        );

        let dst_id = TileId::new(self.id, col, row);
        let src_id = TileId::new(src.id, src_col, src_row);
        if dst_id == src_id {
            return Ok(());
        }
        let pinned = src.acquire(src_col, src_row, Access::Read)?;
        self.ctx.map_tile(dst_id, src_id);
        drop(pinned);
        Ok(())
    }

    /// View of a rectangle of this canvas.
    ///
    /// # Panics
    /// Panics if the rectangle is empty or not fully inside the canvas.
    pub fn region(&self, rect: Rect, access: Access) -> PixelRegion<'_> {
        PixelRegion::new(self, rect, access)
    }

    pub fn full_region(&self, access: Access) -> PixelRegion<'_> {
        PixelRegion::new(self, self.bounds(), access)
    }

    /// Copy of one pixel's bytes.
    pub fn pixel(&self, x: u32, y: u32) -> Result<Vec<u8>, TileError> {
        let tile = self.acquire_at_pixel(x, y, Access::Read)?;
        let offset = self.pixel_offset(&tile, x, y);
        Ok(tile.data()[offset..offset + self.bytes_per_pixel()].to_vec())
    }

    /// Overwrite one pixel.
    ///
    /// # Panics
    /// Panics if `value` is not exactly one pixel long.
    pub fn put_pixel(&self, x: u32, y: u32, value: &[u8]) -> Result<(), TileError> {
        assert_eq!(value.len(), self.bytes_per_pixel(), "pixel size mismatch");
        let mut tile = self.acquire_at_pixel(x, y, Access::Write)?;
        let offset = self.pixel_offset(&tile, x, y);
        tile.data_mut()[offset..offset + value.len()].copy_from_slice(value);
        Ok(())
    }

    /// Copy the whole canvas into a packed row-major buffer.
    pub fn read_all(&self) -> Result<Vec<u8>, TileError> {
        let stride = self.width() as usize * self.bytes_per_pixel();
        let mut out = vec![0u8; stride * self.height() as usize];
        for span in self.full_region(Access::Read).spans() {
            let span = span?;
            let len = span.width() as usize * span.bytes_per_pixel();
            for i in 0..span.height() {
                let start =
                    (span.y() + i) as usize * stride + span.x() as usize * self.bytes_per_pixel();
                out[start..start + len].copy_from_slice(span.row(i));
            }
        }
        Ok(out)
    }

    /// Fill the canvas from a packed row-major buffer.
    ///
    /// # Panics
    /// Panics if `data` is not `width * height * bpp` bytes.
    pub fn write_all(&self, data: &[u8]) -> Result<(), TileError> {
        let stride = self.width() as usize * self.bytes_per_pixel();
        assert_eq!(data.len(), stride * self.height() as usize, "buffer size mismatch");
        for span in self.full_region(Access::Write).spans() {
            let mut span = span?;
            let len = span.width() as usize * span.bytes_per_pixel();
            for i in 0..span.height() {
                let start =
                    (span.y() + i) as usize * stride + span.x() as usize * self.bytes_per_pixel();
                span.row_mut(i).copy_from_slice(&data[start..start + len]);
            }
        }
        Ok(())
    }

    fn pixel_offset(&self, tile: &TileHandle, x: u32, y: u32) -> usize {
        let ts = self.grid.tile_size();
        (y % ts) as usize * tile.row_stride() + (x % ts) as usize * self.bytes_per_pixel()
    }
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("id", &self.id)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .finish()
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        self.ctx.drop_canvas(self.id);
    }
}
