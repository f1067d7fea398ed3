//! # Tile Composite
//!
//! The pixel engine of a layered raster editor: tiled canvases backed by a
//! byte-budgeted cache with on-disk swap, a span iterator over rectangular
//! regions, and integer compositing kernels with SIMD variants picked at
//! startup.
//!
//! ## Features
//!
//! - **Tile cache**: LRU eviction of unpinned tiles under a byte budget, with
//!   dirty tiles written to a per-process swap file
//! - **Checksummed swap**: first-fit extent reuse, coalescing, and SHA-256
//!   verification on fault-in
//! - **Region iteration**: tile-aligned spans, alone or in lock-step over
//!   several canvases
//! - **Kernels**: 21 blend modes; reference, portable-SIMD and SSE2 variants
//!   that agree bit for bit
//!
//! ## Architecture
//!
//! - [`io`] - Swap store, backing storage and stale swap cleanup
//! - [`tile`] - Tiles, canvases, handles and the cache
//! - [`region`] - Pixel regions, spans and region operations
//! - [`composite`] - Compositing kernels and CPU dispatch
//! - [`engine`] - Startup and the shared context
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```
//! use tile_composite::{
//!     region::ops, Access, CompositeMode, KernelSet, PixelFormat, Rect, TileContext,
//! };
//!
//! let ctx = TileContext::in_memory(1 << 20, 64);
//! let kernels = KernelSet::detect(true);
//!
//! let background = ctx.create_canvas(300, 200, PixelFormat::Rgba);
//! let layer = ctx.create_canvas(100, 100, PixelFormat::Rgba);
//! ops::fill(&background.full_region(Access::Write), &[255, 255, 255, 255]).unwrap();
//! ops::fill(&layer.full_region(Access::Write), &[255, 0, 0, 255]).unwrap();
//!
//! ops::composite(
//!     &kernels,
//!     &layer.full_region(Access::Read),
//!     &background.region(Rect::new(50, 50, 100, 100), Access::Write),
//!     None,
//!     CompositeMode::Multiply,
//!     255,
//!     None,
//! )
//! .unwrap();
//!
//! assert_eq!(background.pixel(60, 60).unwrap(), vec![255, 0, 0, 255]);
//! ```

pub mod composite;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod pixel;
pub mod region;
pub mod tile;

pub use composite::{CompositeMode, CpuFeatures, KernelSet, KernelVariant};
pub use config::{parse_size, CoreConfig};
pub use engine::Engine;
pub use error::{ConfigError, EngineError, SwapError, TileError};
pub use io::{MemoryBacking, SwapStore};
pub use pixel::{PixelFormat, Rect};
pub use region::{lock_step, Levels, PixelRegion, Progress, Span};
pub use tile::{
    Access, CacheStats, Canvas, CanvasId, TileContext, TileHandle, TileId, TileState, TileValidator,
};
