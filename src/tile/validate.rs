use super::TileHandle;
use crate::pixel::Rect;

/// Produces the contents of a tile the first time it is acquired.
///
/// When a canvas has a validator, acquiring one of its uninitialized tiles
/// allocates the buffer and hands it to [`validate`](Self::validate)
/// through a write handle before the caller sees it. The filled tile is
/// kept dirty, so it is swapped out rather than recomputed. Invalidating the
/// tile makes the validator run again on the next acquisition.
///
/// The validator runs without the cache lock held and may read other
/// canvases of the same context. While it runs, the tile is checked out for
/// writing.
///
/// # Example
///
/// ```
/// use tile_composite::{Access, PixelFormat, Rect, TileContext, TileHandle};
///
/// let ctx = TileContext::in_memory(1 << 20, 16);
/// let canvas = ctx.create_canvas(32, 32, PixelFormat::Gray);
/// canvas.set_validator(|rect: Rect, tile: &mut TileHandle| {
///     tile.data_mut().fill((rect.x + rect.y) as u8);
/// });
///
/// assert_eq!(canvas.pixel(20, 5).unwrap(), vec![16]);
/// ```
pub trait TileValidator: Send + Sync {
    /// Fill `tile`, which covers `rect` of its canvas.
    fn validate(&self, rect: Rect, tile: &mut TileHandle);
}

impl<F> TileValidator for F
where
    F: Fn(Rect, &mut TileHandle) + Send + Sync,
{
    fn validate(&self, rect: Rect, tile: &mut TileHandle) {
        self(rect, tile)
    }
}
