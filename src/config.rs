//! Configuration for the tile engine and its command-line front end.
//!
//! Settings come from command-line arguments or environment variables with
//! the `TILE_` prefix, falling back to defaults.
//!
//! # Example
//!
//! ```ignore
//! use tile_composite::config::{Cli, Command};
//!
//! if let Command::Probe(core) = Cli::parse().into_command() {
//!     println!("Cache budget: {} bytes", core.cache_size_bytes()?);
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `TILE_CACHE_SIZE` - Tile cache budget, e.g. `256MB`, `512KiB` or plain bytes (default: 256MB)
//! - `TILE_SWAP_DIR` - Directory for swap files (default: system temp dir)
//! - `TILE_SWAP_PREFIX` - Swap file name prefix (default: tileswap)
//! - `TILE_SIZE` - Tile edge length in pixels (default: 64)
//! - `TILE_USE_ACCEL` - Use accelerated kernels when the CPU supports them (default: true)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::composite::CompositeMode;
use crate::error::ConfigError;
use crate::tile::DEFAULT_TILE_SIZE;

// =============================================================================
// Default Values
// =============================================================================

/// Default tile cache budget.
pub const DEFAULT_CACHE_SIZE: &str = "256MB";

/// Default swap file prefix.
pub const DEFAULT_SWAP_PREFIX: &str = "tileswap";

/// Smallest accepted tile edge.
pub const MIN_TILE_SIZE: u32 = 8;

/// Largest accepted tile edge.
pub const MAX_TILE_SIZE: u32 = 1024;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile-based image compositing with a swap-backed tile cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-composite")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Composite one image onto another through the tile cache
    Composite(CompositeConfig),

    /// Print detected CPU features and the kernel chosen for each mode
    Probe(CoreConfig),

    /// Check every accelerated kernel against the reference kernels
    Verify(CoreConfig),

    /// Remove swap files left behind by dead processes
    CleanSwap(CoreConfig),
}

/// Settings consumed by [`Engine::init`](crate::Engine::init).
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Tile cache budget (e.g. 256MB, 512KiB, 1048576).
    #[arg(long, default_value = DEFAULT_CACHE_SIZE, env = "TILE_CACHE_SIZE")]
    pub tile_cache_size: String,

    /// Directory for swap files. Defaults to the system temp directory.
    #[arg(long, env = "TILE_SWAP_DIR")]
    pub swap_dir: Option<PathBuf>,

    /// Swap file name prefix; files are named `<prefix>.<pid>`.
    #[arg(long, default_value = DEFAULT_SWAP_PREFIX, env = "TILE_SWAP_PREFIX")]
    pub swap_prefix: String,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "TILE_SIZE")]
    pub tile_size: u32,

    /// Use accelerated kernels when the CPU supports them.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "TILE_USE_ACCEL")]
    pub use_accel: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            tile_cache_size: DEFAULT_CACHE_SIZE.to_string(),
            swap_dir: None,
            swap_prefix: DEFAULT_SWAP_PREFIX.to_string(),
            tile_size: DEFAULT_TILE_SIZE,
            use_accel: true,
            verbose: false,
        }
    }
}

impl CoreConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_size_bytes()?;

        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&self.tile_size) {
            return Err(ConfigError::TileSize {
                min: MIN_TILE_SIZE,
                max: MAX_TILE_SIZE,
                actual: self.tile_size,
            });
        }

        let prefix = &self.swap_prefix;
        if prefix.is_empty() || prefix.contains(['/', '\\']) || prefix == "." || prefix == ".." {
            return Err(ConfigError::SwapPrefix(prefix.clone()));
        }

        Ok(())
    }

    /// Cache budget in bytes.
    pub fn cache_size_bytes(&self) -> Result<usize, ConfigError> {
        parse_size(&self.tile_cache_size)
    }

    /// Swap directory, defaulting to the system temp directory.
    pub fn swap_dir(&self) -> PathBuf {
        self.swap_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Arguments of the `composite` command.
#[derive(Args, Debug, Clone)]
pub struct CompositeConfig {
    /// Destination (bottom) image.
    pub background: PathBuf,

    /// Source (top) image.
    pub layer: PathBuf,

    /// Output image path (format from extension).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Composite mode.
    #[arg(long, default_value = "normal")]
    pub mode: CompositeMode,

    /// Layer opacity (0-255).
    #[arg(long, default_value_t = 255)]
    pub opacity: u8,

    /// Layer offset from the left edge of the background.
    #[arg(long, default_value_t = 0)]
    pub x: u32,

    /// Layer offset from the top edge of the background.
    #[arg(long, default_value_t = 0)]
    pub y: u32,

    /// Print cache statistics as JSON when done.
    #[arg(long, default_value_t = false)]
    pub stats: bool,

    #[command(flatten)]
    pub core: CoreConfig,
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a byte size such as `64MB`, `512KiB`, `1.5GB` or `4096`.
///
/// Decimal (`KB`, `MB`, `GB`) and binary (`KiB`, `MiB`, `GiB`) suffixes are
/// both powers of 1024, matching how memory budgets are usually written.
pub fn parse_size(input: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidSize(input.to_string());
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        _ => return Err(invalid()),
    };

    let bytes = if number.contains('.') {
        let value: f64 = number.parse().map_err(|_| invalid())?;
        (value * multiplier as f64).round() as u64
    } else {
        let value: u64 = number.parse().map_err(|_| invalid())?;
        value.checked_mul(multiplier).ok_or_else(invalid)?
    };

    usize::try_from(bytes).map_err(|_| invalid())
}

// =============================================================================
// Tests
// =============================================================================
