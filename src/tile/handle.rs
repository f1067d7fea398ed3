use std::fmt;
use std::sync::Arc;

use super::cache::TileContext;
use super::TileId;

/// Whether a handle may modify the tile it pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

pub(crate) enum HandleData {
    /// Shared snapshot of the resident buffer
    Shared(Arc<Vec<u8>>),
    /// Buffer checked out of the cache for exclusive writing
    Exclusive(Vec<u8>),
}

/// Pinned access to one tile's pixel memory.
///
/// While a handle is alive the tile cannot be evicted. Dropping the handle
/// releases the pin; a write handle also hands its buffer back to the cache,
/// marking the tile dirty if it was modified.
pub struct TileHandle {
    ctx: TileContext,
    id: TileId,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
    data: Option<HandleData>,
    dirty: bool,
}

impl TileHandle {
    pub(crate) fn new(
        ctx: TileContext,
        id: TileId,
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
        data: HandleData,
    ) -> Self {
        Self {
            ctx,
            id,
            width,
            height,
            bytes_per_pixel,
            data: Some(data),
            dirty: false,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn access(&self) -> Access {
        match self.data {
            Some(HandleData::Exclusive(_)) => Access::Write,
            _ => Access::Read,
        }
    }

    /// Effective width of the tile in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Effective height of the tile in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Distance in bytes between the starts of consecutive rows.
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.bytes_per_pixel
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data(&self) -> &[u8] {
        match &self.data {
            Some(HandleData::Shared(buf)) => buf.as_slice(),
            Some(HandleData::Exclusive(buf)) => buf.as_slice(),
            None => &[],
        }
    }

    /// Mutable pixels. Marks the tile dirty.
    ///
    /// # Panics
    /// Panics on a read handle.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.data {
            Some(HandleData::Exclusive(buf)) => {
                self.dirty = true;
                buf.as_mut_slice()
            }
            _ => panic!("tile {} was acquired read-only", self.id),
        }
    }

    /// Record a modification made through other means than [`data_mut`](Self::data_mut).
    ///
    /// # Panics
    /// Panics on a read handle.
    pub fn mark_dirty(&mut self) {
        assert!(
            self.access() == Access::Write,
            "tile {} was acquired read-only",
            self.id
        );
        self.dirty = true;
    }

    /// Take the pinned buffer without releasing it to the cache.
    pub(crate) fn detach(mut self) -> Option<HandleData> {
        self.data.take()
    }
}

impl fmt::Debug for TileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileHandle")
            .field("id", &self.id)
            .field("access", &self.access())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Drop for TileHandle {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.ctx.release(self.id, data, self.dirty);
        }
    }
}
