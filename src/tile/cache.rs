//! Byte-budgeted tile cache with swap-backed eviction.
//!
//! The cache owns the tile tables of every canvas created from a
//! [`TileContext`] and keeps the total size of resident tile buffers at or
//! below a configurable budget.
//!
//! # Eviction
//!
//! Resident tiles are kept in least-recently-used order; every acquisition
//! moves the tile to the hot end. When the budget is exceeded the cache walks
//! from the cold end and evicts the first tile that is not pinned by a live
//! handle:
//!
//! - dirty tiles are written to swap first, then their memory is freed;
//! - clean tiles with a swap copy are dropped without I/O;
//! - clean tiles that were never written return to `Uninitialized`.
//!
//! If every resident tile is pinned the budget is exceeded temporarily; the
//! excess is reclaimed as soon as handles are released.
//!
//! Setting a budget below the resident total evicts immediately, which also
//! retries tiles whose earlier swap write failed. Raising it only stops
//! future evictions.
//!
//! # Lazy contents
//!
//! A canvas may carry a [`TileValidator`]. Uninitialized tiles of such a
//! canvas are produced by the validator on first acquisition instead of
//! reading as zeros. Tiles may also be mapped onto another canvas's tile;
//! both then share one buffer until either is acquired for writing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::entry::{alloc_copy, alloc_zeroed, TileEntry};
use super::handle::{Access, HandleData, TileHandle};
use super::{Canvas, CanvasId, TileGrid, TileId, TileState, TileValidator};
use crate::error::TileError;
use crate::io::{MemoryBacking, SwapStore};
use crate::pixel::PixelFormat;

/// Default cache budget: 256MB
pub const DEFAULT_TILE_CACHE_SIZE: usize = 256 * 1024 * 1024;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 64;

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of cache and swap activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Acquisitions served from memory
    pub hits: u64,
    /// Tiles read back from swap
    pub faults: u64,
    /// Zero-filled buffers allocated for uninitialized tiles
    pub zero_fills: u64,
    /// Uninitialized tiles filled by a canvas validator
    pub validations: u64,
    /// Tiles whose memory was reclaimed
    pub evictions: u64,
    /// Dirty tiles written to swap
    pub swap_writes: u64,
    /// Swap writes that failed (tile kept resident)
    pub failed_swap_writes: u64,
    /// Buffers copied because a writer found readers on the tile
    pub copy_on_write: u64,
    pub resident_bytes: usize,
    pub peak_resident_bytes: usize,
    pub resident_tiles: usize,
    pub budget: usize,
    pub swap_used_bytes: u64,
    pub swap_end: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    faults: u64,
    zero_fills: u64,
    validations: u64,
    evictions: u64,
    swap_writes: u64,
    failed_swap_writes: u64,
    copy_on_write: u64,
    peak_resident_bytes: usize,
}

// =============================================================================
// Cache State
// =============================================================================

struct CanvasTable {
    grid: TileGrid,
    entries: Vec<TileEntry>,
    validator: Option<Arc<dyn TileValidator>>,
}

struct CacheState {
    canvases: HashMap<CanvasId, CanvasTable>,
    /// Resident tiles, most recently used first
    recency: LruCache<TileId, ()>,
    resident_bytes: usize,
    budget: usize,
    swap: SwapStore,
    next_canvas: u64,
    counters: Counters,
}

impl CacheState {
    fn entry_mut(&mut self, id: TileId) -> Option<(&TileGrid, &mut TileEntry)> {
        let table = self.canvases.get_mut(&id.canvas)?;
        let index = table.grid.index(id.col, id.row);
        Some((&table.grid, table.entries.get_mut(index)?))
    }

    fn note_resident(&mut self, id: TileId, bytes: usize) {
        self.resident_bytes += bytes;
        self.counters.peak_resident_bytes =
            self.counters.peak_resident_bytes.max(self.resident_bytes);
        self.recency.put(id, ());
    }

    /// Make a tile resident, faulting it from swap or zero-filling it.
    ///
    /// Returns the canvas validator when a fresh buffer still has to be
    /// filled by it.
    fn lookup_or_fault(&mut self, id: TileId) -> Result<Option<Arc<dyn TileValidator>>, TileError> {
        let Self {
            canvases,
            swap,
            counters,
            ..
        } = self;
        let table = canvases
            .get_mut(&id.canvas)
            .unwrap_or_else(|| panic!("{} does not belong to this context", id.canvas));
        let len = table.grid.tile_bytes(id.col, id.row);
        let entry = &mut table.entries[table.grid.index(id.col, id.row)];

        if entry.is_resident() {
            counters.hits += 1;
            self.recency.promote(&id);
            return Ok(None);
        }

        let mut validator = None;
        let buf = match entry.swap {
            Some(locator) => {
                let bytes = swap
                    .read(&locator)
                    .map_err(|source| TileError::FaultIn { tile: id, source })?;
                counters.faults += 1;
                debug!(tile = %id, offset = locator.offset(), "Faulted tile in from swap");
                alloc_copy(id, &bytes)?
            }
            None => {
                validator = table.validator.clone();
                if validator.is_none() {
                    counters.zero_fills += 1;
                }
                alloc_zeroed(id, len)?
            }
        };

        entry.data = Some(Arc::new(buf));
        self.note_resident(id, len);
        Ok(validator)
    }

    /// Take back a buffer filled by a validator. The tile stays resident and
    /// dirty so its contents survive eviction.
    fn finish_validation(&mut self, id: TileId, data: Option<HandleData>) {
        let Some((_, entry)) = self.entry_mut(id) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        entry.checked_out = false;
        entry.dirty = true;
        if let Some(HandleData::Exclusive(buf)) = data {
            entry.data = Some(Arc::new(buf));
        }
        self.counters.validations += 1;
        debug!(tile = %id, "Validated tile");
    }

    /// Point `dst` at the resident buffer of `src`.
    ///
    /// The caller keeps `src` pinned. A later write acquisition of either
    /// tile copies the buffer first.
    fn map_tile(&mut self, dst: TileId, src: TileId) {
        let Some(shared) = self.entry_mut(src).and_then(|(_, e)| e.data.clone()) else {
            unreachable!("tile {src} is pinned by the caller")
        };
        let Some((grid, entry)) = self.entry_mut(dst) else {
            return;
        };
        assert!(!entry.is_pinned(), "cannot map onto pinned tile {dst}");
        let len = grid.tile_bytes(dst.col, dst.row);
        let was_resident = entry.data.replace(shared).is_some();
        let stale = entry.swap.take();
        entry.dirty = true;

        if let Some(stale) = stale {
            if let Err(e) = self.swap.free(&stale) {
                warn!(tile = %dst, error = %e, "Failed to free swap extent");
            }
        }
        if was_resident {
            self.recency.promote(&dst);
        } else {
            self.note_resident(dst, len);
        }
        debug!(tile = %dst, source = %src, "Mapped tile");
    }

    /// Pin a resident tile and hand out its pixels.
    fn pin(&mut self, id: TileId, access: Access) -> Result<HandleData, TileError> {
        let copy_on_write = {
            let (_, entry) = self
                .entry_mut(id)
                .unwrap_or_else(|| panic!("{} does not belong to this context", id.canvas));
            entry.refcount += 1;

            match access {
                Access::Read => {
                    return match &entry.data {
                        Some(buf) => Ok(HandleData::Shared(Arc::clone(buf))),
                        None => unreachable!("tile {id} is resident"),
                    }
                }
                Access::Write => {
                    let Some(shared) = entry.data.take() else {
                        unreachable!("tile {id} is resident")
                    };
                    entry.checked_out = true;
                    match Arc::try_unwrap(shared) {
                        Ok(buf) => return Ok(HandleData::Exclusive(buf)),
                        Err(shared) => shared,
                    }
                }
            }
        };

        // Readers still hold the old buffer; give the writer its own copy.
        self.counters.copy_on_write += 1;
        match alloc_copy(id, &copy_on_write) {
            Ok(buf) => Ok(HandleData::Exclusive(buf)),
            Err(e) => {
                if let Some((_, entry)) = self.entry_mut(id) {
                    entry.refcount -= 1;
                    entry.checked_out = false;
                    entry.data = Some(copy_on_write);
                }
                Err(e)
            }
        }
    }

    fn release(&mut self, id: TileId, data: HandleData, dirty: bool) {
        let Some((_, entry)) = self.entry_mut(id) else {
            // Canvas already dropped; its bytes were accounted for then.
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if let HandleData::Exclusive(buf) = data {
            entry.data = Some(Arc::new(buf));
            entry.checked_out = false;
        }
        if dirty {
            entry.dirty = true;
        }

        if self.resident_bytes > self.budget {
            if let Err(e) = self.evict_until_under_budget() {
                warn!(error = %e, "Eviction after release left the cache over budget");
            }
        }
    }

    /// Evict cold, unpinned tiles until resident bytes fit the budget.
    ///
    /// Tiles whose swap write fails stay resident and dirty; the first such
    /// failure is returned after every other candidate has been tried.
    fn evict_until_under_budget(&mut self) -> Result<(), TileError> {
        let mut failed: Vec<TileId> = Vec::new();
        let mut first_error = None;

        while self.resident_bytes > self.budget {
            let candidate = self
                .recency
                .iter()
                .rev()
                .map(|(id, _)| *id)
                .find(|id| {
                    !failed.contains(id)
                        && self
                            .canvases
                            .get(&id.canvas)
                            .map(|t| {
                                let e = &t.entries[t.grid.index(id.col, id.row)];
                                !e.is_pinned() && !e.checked_out
                            })
                            .unwrap_or(false)
                });

            let Some(id) = candidate else {
                debug!(
                    resident = self.resident_bytes,
                    budget = self.budget,
                    "All resident tiles pinned; cache temporarily over budget"
                );
                break;
            };

            if let Err(e) = self.evict(id) {
                failed.push(id);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Write a dirty tile to swap, replacing any stale copy.
    fn write_back(&mut self, id: TileId) -> Result<(), TileError> {
        let Self {
            canvases,
            swap,
            counters,
            ..
        } = self;
        let Some(table) = canvases.get_mut(&id.canvas) else {
            return Ok(());
        };
        let entry = &mut table.entries[table.grid.index(id.col, id.row)];
        let Some(buf) = entry.data.as_ref() else {
            return Ok(());
        };

        if let Some(stale) = entry.swap.take() {
            if let Err(e) = swap.free(&stale) {
                warn!(tile = %id, error = %e, "Failed to free stale swap extent");
            }
        }

        match swap.write(id, buf) {
            Ok(locator) => {
                entry.swap = Some(locator);
                entry.dirty = false;
                counters.swap_writes += 1;
                Ok(())
            }
            Err(source) => {
                counters.failed_swap_writes += 1;
                Err(TileError::Swap { tile: id, source })
            }
        }
    }

    fn evict(&mut self, id: TileId) -> Result<(), TileError> {
        let dirty = match self.entry_mut(id) {
            Some((_, entry)) => entry.dirty,
            None => return Ok(()),
        };
        if dirty {
            self.write_back(id)?;
        }

        let Some((grid, entry)) = self.entry_mut(id) else {
            return Ok(());
        };
        let len = grid.tile_bytes(id.col, id.row);
        entry.data = None;
        self.resident_bytes -= len;
        self.recency.pop(&id);
        self.counters.evictions += 1;
        debug!(tile = %id, dirty, "Evicted tile");
        Ok(())
    }

    fn flush_canvas(&mut self, canvas: CanvasId) -> Result<usize, TileError> {
        let dirty: Vec<TileId> = match self.canvases.get(&canvas) {
            Some(table) => (0..table.grid.rows())
                .flat_map(|row| (0..table.grid.cols()).map(move |col| (col, row)))
                .filter(|&(col, row)| {
                    let e = &table.entries[table.grid.index(col, row)];
                    e.dirty && e.data.is_some() && !e.is_pinned()
                })
                .map(|(col, row)| TileId::new(canvas, col, row))
                .collect(),
            None => return Ok(0),
        };

        let mut first_error = None;
        let mut written = 0;
        for id in dirty {
            match self.write_back(id) {
                Ok(()) => written += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    fn invalidate(&mut self, id: TileId) {
        let Some((grid, entry)) = self.entry_mut(id) else {
            return;
        };
        assert!(!entry.is_pinned(), "cannot invalidate pinned tile {id}");
        let len = grid.tile_bytes(id.col, id.row);
        let was_resident = entry.data.take().is_some();
        let stale = entry.swap.take();
        entry.dirty = false;

        if was_resident {
            self.resident_bytes -= len;
            self.recency.pop(&id);
        }
        if let Some(stale) = stale {
            if let Err(e) = self.swap.free(&stale) {
                warn!(tile = %id, error = %e, "Failed to free swap extent");
            }
        }
    }

    /// Forget a canvas and free its tiles. The validator is handed back so
    /// it can be dropped after the lock is released.
    fn drop_canvas(&mut self, canvas: CanvasId) -> Option<Arc<dyn TileValidator>> {
        let table = self.canvases.remove(&canvas)?;
        let mut freed = 0;
        for row in 0..table.grid.rows() {
            for col in 0..table.grid.cols() {
                let id = TileId::new(canvas, col, row);
                let entry = &table.entries[table.grid.index(col, row)];
                if entry.is_resident() {
                    let len = table.grid.tile_bytes(col, row);
                    self.resident_bytes -= len;
                    freed += len;
                    self.recency.pop(&id);
                }
                if let Some(locator) = entry.swap {
                    if let Err(e) = self.swap.free(&locator) {
                        warn!(tile = %id, error = %e, "Failed to free swap extent");
                    }
                }
            }
        }
        debug!(%canvas, freed, "Dropped canvas tiles");
        table.validator
    }

    fn stats(&self) -> CacheStats {
        let usage = self.swap.usage();
        CacheStats {
            hits: self.counters.hits,
            faults: self.counters.faults,
            zero_fills: self.counters.zero_fills,
            validations: self.counters.validations,
            evictions: self.counters.evictions,
            swap_writes: self.counters.swap_writes,
            failed_swap_writes: self.counters.failed_swap_writes,
            copy_on_write: self.counters.copy_on_write,
            resident_bytes: self.resident_bytes,
            peak_resident_bytes: self.counters.peak_resident_bytes,
            resident_tiles: self.recency.len(),
            budget: self.budget,
            swap_used_bytes: usage.used_bytes,
            swap_end: usage.end,
        }
    }
}

// =============================================================================
// Tile Context
// =============================================================================

struct Shared {
    state: Mutex<CacheState>,
    tile_size: u32,
}

/// Shared tile cache and swap store for a group of canvases.
///
/// Cloning is cheap; all clones refer to the same cache. The cache state is
/// guarded by a single mutex, so canvases created from one context may be
/// used from different threads.
///
/// # Example
///
/// ```
/// use tile_composite::{Access, PixelFormat, TileContext};
///
/// let ctx = TileContext::in_memory(4 * 64 * 64 * 4, 64);
/// let canvas = ctx.create_canvas(256, 256, PixelFormat::Rgba);
///
/// let mut tile = canvas.acquire(1, 2, Access::Write).unwrap();
/// tile.data_mut().fill(0xFF);
/// drop(tile);
///
/// assert_eq!(canvas.pixel(70, 130).unwrap(), vec![0xFF; 4]);
/// ```
#[derive(Clone)]
pub struct TileContext {
    shared: Arc<Shared>,
}

impl TileContext {
    /// Create a context with the given byte budget, tile edge and swap store.
    pub fn new(budget: usize, tile_size: u32, swap: SwapStore) -> Self {
        assert!(tile_size > 0, "tile size must be positive");
        info!(
            budget,
            tile_size,
            swap = swap.identifier(),
            "Initialized tile cache"
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    canvases: HashMap::new(),
                    recency: LruCache::unbounded(),
                    resident_bytes: 0,
                    budget,
                    swap,
                    next_canvas: 1,
                    counters: Counters::default(),
                }),
                tile_size,
            }),
        }
    }

    /// Context swapping into process memory.
    pub fn in_memory(budget: usize, tile_size: u32) -> Self {
        Self::new(budget, tile_size, SwapStore::new(MemoryBacking::new()))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tile_size(&self) -> u32 {
        self.shared.tile_size
    }

    /// Create an empty canvas whose tiles live in this context.
    ///
    /// # Panics
    /// Panics if `width` or `height` is zero.
    pub fn create_canvas(&self, width: u32, height: u32, format: PixelFormat) -> Canvas {
        let grid = TileGrid::new(width, height, self.shared.tile_size, format);
        let mut state = self.lock();
        let id = CanvasId::from_raw(state.next_canvas);
        state.next_canvas += 1;
        let mut entries = Vec::with_capacity(grid.tile_count());
        entries.resize_with(grid.tile_count(), TileEntry::default);
        state.canvases.insert(
            id,
            CanvasTable {
                grid,
                entries,
                validator: None,
            },
        );
        drop(state);

        debug!(canvas = %id, width, height, %format, "Created canvas");
        Canvas::new(self.clone(), id, grid)
    }

    /// Change the cache budget.
    ///
    /// If more than `bytes` are resident, cold tiles are evicted immediately;
    /// the returned error is the first swap write failure encountered while
    /// doing so. Calling it again with the same budget retries those tiles.
    pub fn set_size_budget(&self, bytes: usize) -> Result<(), TileError> {
        let mut state = self.lock();
        let previous = state.budget;
        state.budget = bytes;
        info!(previous, budget = bytes, "Tile cache budget changed");
        if state.resident_bytes > bytes {
            state.evict_until_under_budget()
        } else {
            Ok(())
        }
    }

    pub fn size_budget(&self) -> usize {
        self.lock().budget
    }

    pub fn resident_bytes(&self) -> usize {
        self.lock().resident_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }

    pub(crate) fn acquire(&self, id: TileId, access: Access) -> Result<TileHandle, TileError> {
        let mut state = self.lock();

        let (grid, entry) = state
            .entry_mut(id)
            .unwrap_or_else(|| panic!("{} does not belong to this context", id.canvas));
        assert!(
            !entry.checked_out,
            "tile {id} is already checked out for writing"
        );
        let rect = grid.tile_rect(id.col, id.row);
        let bytes_per_pixel = grid.format().bytes_per_pixel();

        if let Some(validator) = state.lookup_or_fault(id)? {
            // Unlocked, so the validator may read other canvases
            let data = state.pin(id, Access::Write)?;
            drop(state);
            let mut tile = TileHandle::new(
                self.clone(),
                id,
                rect.width,
                rect.height,
                bytes_per_pixel,
                data,
            );
            validator.validate(rect, &mut tile);
            let data = tile.detach();
            state = self.lock();
            state.finish_validation(id, data);
        }

        let data = state.pin(id, access)?;

        if state.resident_bytes > state.budget {
            if let Err(e) = state.evict_until_under_budget() {
                warn!(error = %e, "Eviction failed; tile stays resident and dirty");
            }
        }
        drop(state);

        Ok(TileHandle::new(
            self.clone(),
            id,
            rect.width,
            rect.height,
            bytes_per_pixel,
            data,
        ))
    }

    pub(crate) fn same_context(&self, other: &TileContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn set_validator(
        &self,
        canvas: CanvasId,
        validator: Option<Arc<dyn TileValidator>>,
    ) {
        let previous = match self.lock().canvases.get_mut(&canvas) {
            Some(table) => std::mem::replace(&mut table.validator, validator),
            None => validator,
        };
        // Validators may own canvases, whose drop takes the lock
        drop(previous);
    }

    pub(crate) fn map_tile(&self, dst: TileId, src: TileId) {
        let mut state = self.lock();
        state.map_tile(dst, src);
        if state.resident_bytes > state.budget {
            if let Err(e) = state.evict_until_under_budget() {
                warn!(error = %e, "Eviction failed; tile stays resident and dirty");
            }
        }
    }

    pub(crate) fn release(&self, id: TileId, data: HandleData, dirty: bool) {
        self.lock().release(id, data, dirty);
    }

    pub(crate) fn tile_state(&self, id: TileId) -> TileState {
        self.lock()
            .entry_mut(id)
            .map(|(_, e)| e.state())
            .unwrap_or(TileState::Uninitialized)
    }

    pub(crate) fn refcount(&self, id: TileId) -> u32 {
        self.lock()
            .entry_mut(id)
            .map(|(_, e)| e.refcount)
            .unwrap_or(0)
    }

    pub(crate) fn flush_canvas(&self, canvas: CanvasId) -> Result<usize, TileError> {
        self.lock().flush_canvas(canvas)
    }

    pub(crate) fn invalidate(&self, id: TileId) {
        self.lock().invalidate(id)
    }

    pub(crate) fn drop_canvas(&self, canvas: CanvasId) {
        let validator = self.lock().drop_canvas(canvas);
        drop(validator);
    }
}

impl std::fmt::Debug for TileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TileContext")
            .field("tile_size", &self.shared.tile_size)
            .field("budget", &stats.budget)
            .field("resident_bytes", &stats.resident_bytes)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
