//! Tile store and tile cache.
//!
//! Canvases are partitioned into fixed-size tiles which are the unit of
//! caching and swapping. All tiles of all canvases created from one
//! [`TileContext`] share a single byte budget and a single swap store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Region iterator / kernels           │
//! └────────────────────┬────────────────────┘
//!                      │ acquire / drop
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  Canvas ──► TileContext                 │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ tile tables  │  │  LRU recency    │  │
//! │  │ (per canvas) │  │  (resident)     │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ write / read / free
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               SwapStore                 │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileContext`]: shared cache, budget and swap store
//! - [`Canvas`]: a tiled image owned by a context
//! - [`TileHandle`]: RAII pin on one tile's pixels
//! - [`TileGrid`]: tile geometry of a canvas
//! - [`TileValidator`]: lazily computed tile contents
//! - [`CacheStats`]: counters for hits, faults, evictions and swap traffic

mod cache;
mod canvas;
mod entry;
mod handle;
mod validate;

pub use cache::{CacheStats, TileContext, DEFAULT_TILE_CACHE_SIZE, DEFAULT_TILE_SIZE};
pub use canvas::Canvas;
pub use entry::{CanvasId, TileGrid, TileId, TileState};
pub use handle::{Access, TileHandle};
pub use validate::TileValidator;
