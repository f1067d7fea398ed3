//! Extent-tracked swap store for evicted tiles.
//!
//! Every swapped tile occupies one extent `(offset, len)` of the backing
//! storage. Freed extents go to a free list that is searched first-fit before
//! the store grows at its end, and adjacent free extents are coalesced. A
//! free extent touching the end of the storage shrinks it instead.
//!
//! Extents never overlap, so a failed write can only damage the extent it was
//! aimed at. Each locator carries a checksum of the bytes written, which is
//! verified when the extent is read back.

use std::collections::BTreeMap;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::SwapBacking;
use crate::error::SwapError;
use crate::tile::TileId;

/// Number of digest bytes kept per extent.
const CHECKSUM_LEN: usize = 8;

/// Location of one tile's bytes in the swap store.
///
/// A locator stays valid until it is passed to [`SwapStore::free`] or the
/// store is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapLocator {
    offset: u64,
    len: usize,
    checksum: [u8; CHECKSUM_LEN],
}

impl SwapLocator {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Point-in-time usage of a swap store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwapUsage {
    /// Bytes held by live extents
    pub used_bytes: u64,
    /// Bytes sitting in free extents below the end of storage
    pub free_bytes: u64,
    /// Logical end of storage (file size once synced)
    pub end: u64,
    /// Number of live extents
    pub extents: usize,
}

/// Swap store over any [`SwapBacking`].
pub struct SwapStore {
    backing: Box<dyn SwapBacking>,
    /// Live extents: offset -> length
    live: BTreeMap<u64, usize>,
    /// Free extents: offset -> length, never adjacent to each other
    free: BTreeMap<u64, u64>,
    end: u64,
}

impl SwapStore {
    pub fn new(backing: impl SwapBacking + 'static) -> Self {
        Self {
            backing: Box::new(backing),
            live: BTreeMap::new(),
            free: BTreeMap::new(),
            end: 0,
        }
    }

    /// Identifier of the backing storage.
    pub fn identifier(&self) -> &str {
        self.backing.identifier()
    }

    /// Write `data` for `tile` into a fresh extent.
    ///
    /// On failure the extent is returned to the free list and no other
    /// extent is touched.
    pub fn write(&mut self, tile: TileId, data: &[u8]) -> Result<SwapLocator, SwapError> {
        let offset = self.allocate(data.len() as u64);

        if let Err(source) = self.backing.write_all_at(offset, data) {
            warn!(%tile, offset, len = data.len(), error = %source, "Swap write failed");
            self.release_extent(offset, data.len() as u64);
            return Err(SwapError::Io {
                path: self.backing.identifier().to_string(),
                source,
            });
        }

        self.live.insert(offset, data.len());
        debug!(%tile, offset, len = data.len(), "Wrote swap extent");

        Ok(SwapLocator {
            offset,
            len: data.len(),
            checksum: checksum(data),
        })
    }

    /// Read back the bytes of a live extent, verifying their checksum.
    pub fn read(&mut self, locator: &SwapLocator) -> Result<Bytes, SwapError> {
        match self.live.get(&locator.offset) {
            Some(&len) if len == locator.len => {}
            _ => return Err(SwapError::UnknownExtent(locator.offset)),
        }

        let size = self.backing.size();
        if locator.offset + locator.len as u64 > size {
            return Err(SwapError::Truncated {
                offset: locator.offset,
                len: locator.len,
                size,
            });
        }

        let mut buf = vec![0u8; locator.len];
        self.backing
            .read_exact_at(locator.offset, &mut buf)
            .map_err(|source| SwapError::Io {
                path: self.backing.identifier().to_string(),
                source,
            })?;

        if checksum(&buf) != locator.checksum {
            return Err(SwapError::Corrupt {
                offset: locator.offset,
                len: locator.len,
            });
        }

        Ok(Bytes::from(buf))
    }

    /// Release an extent for reuse.
    pub fn free(&mut self, locator: &SwapLocator) -> Result<(), SwapError> {
        match self.live.get(&locator.offset) {
            Some(&len) if len == locator.len => {}
            _ => return Err(SwapError::UnknownExtent(locator.offset)),
        }
        self.live.remove(&locator.offset);
        self.release_extent(locator.offset, locator.len as u64);
        Ok(())
    }

    pub fn usage(&self) -> SwapUsage {
        SwapUsage {
            used_bytes: self.live.values().map(|&len| len as u64).sum(),
            free_bytes: self.free.values().sum(),
            end: self.end,
            extents: self.live.len(),
        }
    }

    /// First-fit over the free list, else append at the end.
    fn allocate(&mut self, len: u64) -> u64 {
        let hole = self
            .free
            .iter()
            .find(|(_, &hole_len)| hole_len >= len)
            .map(|(&offset, &hole_len)| (offset, hole_len));

        match hole {
            Some((offset, hole_len)) => {
                self.free.remove(&offset);
                if hole_len > len {
                    self.free.insert(offset + len, hole_len - len);
                }
                offset
            }
            None => {
                let offset = self.end;
                self.end += len;
                offset
            }
        }
    }

    /// Put `[offset, offset + len)` on the free list, merging neighbours.
    fn release_extent(&mut self, mut offset: u64, mut len: u64) {
        if len == 0 {
            return;
        }

        if let Some((&prev_offset, &prev_len)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_len == offset {
                self.free.remove(&prev_offset);
                offset = prev_offset;
                len += prev_len;
            }
        }

        if let Some(next_len) = self.free.remove(&(offset + len)) {
            len += next_len;
        }

        if offset + len == self.end {
            self.end = offset;
            if self.backing.size() > self.end {
                if let Err(e) = self.backing.truncate(self.end) {
                    warn!(end = self.end, error = %e, "Failed to shrink swap storage");
                }
            }
        } else {
            self.free.insert(offset, len);
        }
    }
}

fn checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}
