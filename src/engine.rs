//! Engine startup and the context object shared by all canvases.
//!
//! [`Engine::init`] performs the one-time startup sequence:
//!
//! 1. validate the configuration;
//! 2. create the swap directory and delete swap files of dead processes;
//! 3. open (lazily) this process's swap file `<prefix>.<pid>`;
//! 4. probe the CPU and build the kernel table.
//!
//! The resulting [`Engine`] owns the tile context and kernel table that were
//! process-wide globals in classic designs; several engines can coexist.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::composite::{CompositeMode, KernelSet};
use crate::config::CoreConfig;
use crate::error::{EngineError, TileError};
use crate::io::{
    clean_stale_swap_files, swap_file_path, FileBacking, ProcessProbe, SwapStore, SystemProbe,
};
use crate::pixel::PixelFormat;
use crate::region::{ops, PixelRegion, Progress};
use crate::tile::{CacheStats, Canvas, TileContext};

/// Tile context, swap file and kernel table for one editing session.
#[derive(Debug)]
pub struct Engine {
    ctx: TileContext,
    kernels: KernelSet,
    swap_path: PathBuf,
    removed_stale: Vec<PathBuf>,
}

impl Engine {
    /// Start an engine, probing process liveness through the operating system.
    pub fn init(config: &CoreConfig) -> Result<Self, EngineError> {
        Self::init_with_probe(config, &SystemProbe)
    }

    /// Start an engine with an explicit liveness probe for stale swap cleanup.
    pub fn init_with_probe(
        config: &CoreConfig,
        probe: &dyn ProcessProbe,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let budget = config.cache_size_bytes()?;
        let dir = config.swap_dir();

        std::fs::create_dir_all(&dir).map_err(|source| EngineError::SwapDir {
            path: dir.clone(),
            source,
        })?;
        let removed_stale = clean_stale_swap_files(&dir, &config.swap_prefix, probe).map_err(
            |source| EngineError::SwapDir {
                path: dir.clone(),
                source,
            },
        )?;
        if !removed_stale.is_empty() {
            info!(count = removed_stale.len(), "Cleaned up stale swap files");
        }

        let swap_path = swap_file_path(&dir, &config.swap_prefix);
        if swap_path.exists() {
            warn!(path = %swap_path.display(), "Swap file for this pid already exists; truncating");
        }
        let swap = SwapStore::new(FileBacking::new(&swap_path));
        let ctx = TileContext::new(budget, config.tile_size, swap);
        let kernels = KernelSet::detect(config.use_accel);

        info!(
            budget,
            tile_size = config.tile_size,
            swap = %swap_path.display(),
            "Engine initialized"
        );

        Ok(Self {
            ctx,
            kernels,
            swap_path,
            removed_stale,
        })
    }

    /// Engine over an existing context and kernel table (no swap file setup).
    pub fn from_parts(ctx: TileContext, kernels: KernelSet) -> Self {
        Self {
            ctx,
            kernels,
            swap_path: PathBuf::new(),
            removed_stale: Vec::new(),
        }
    }

    pub fn context(&self) -> &TileContext {
        &self.ctx
    }

    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    /// Path of this process's swap file. The file exists only once a tile
    /// has been swapped out.
    pub fn swap_path(&self) -> &Path {
        &self.swap_path
    }

    /// Stale swap files deleted during startup.
    pub fn removed_stale_files(&self) -> &[PathBuf] {
        &self.removed_stale
    }

    pub fn new_canvas(&self, width: u32, height: u32, format: PixelFormat) -> Canvas {
        self.ctx.create_canvas(width, height, format)
    }

    /// Notification hook for a changed cache budget setting.
    ///
    /// A smaller budget evicts right away; the error is the first swap write
    /// that failed while doing so.
    pub fn on_cache_size_changed(&self, bytes: usize) -> Result<(), TileError> {
        self.ctx.set_size_budget(bytes)
    }

    /// Composite `src` onto `dst` with this engine's kernel table.
    pub fn composite(
        &self,
        src: &PixelRegion<'_>,
        dst: &PixelRegion<'_>,
        mask: Option<&PixelRegion<'_>>,
        mode: CompositeMode,
        opacity: u8,
        progress: Option<&mut dyn Progress>,
    ) -> Result<(), TileError> {
        ops::composite(&self.kernels, src, dst, mask, mode, opacity, progress)
    }

    pub fn stats(&self) -> CacheStats {
        self.ctx.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Access;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tile-composite-engine-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_init_creates_swap_dir() {
        let dir = scratch_dir("init");
        let config = CoreConfig {
            swap_dir: Some(dir.clone()),
            tile_cache_size: "1MB".to_string(),
            ..CoreConfig::default()
        };
        let engine = Engine::init(&config).unwrap();
        assert!(dir.is_dir());
        assert_eq!(engine.context().size_budget(), 1 << 20);
        assert_eq!(engine.swap_path().parent(), Some(dir.as_path()));
        drop(engine);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoreConfig {
            tile_size: 0,
            ..CoreConfig::default()
        };
        assert!(matches!(Engine::init(&config), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_swap_file_created_on_eviction_and_removed_on_drop() {
        let dir = scratch_dir("swapfile");
        let config = CoreConfig {
            swap_dir: Some(dir.clone()),
            tile_cache_size: "4096".to_string(),
            tile_size: 32,
            ..CoreConfig::default()
        };
        let engine = Engine::init(&config).unwrap();
        let canvas = engine.new_canvas(64, 32, PixelFormat::Rgba);
        ops::fill(&canvas.full_region(Access::Write), &[1, 2, 3, 4]).unwrap();
        assert!(engine.swap_path().exists());
        assert_eq!(canvas.pixel(0, 0).unwrap(), vec![1, 2, 3, 4]);

        let path = engine.swap_path().to_path_buf();
        drop(canvas);
        drop(engine);
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
