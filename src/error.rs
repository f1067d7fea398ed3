use std::path::PathBuf;

use thiserror::Error;

use crate::tile::TileId;

/// Errors raised by the swap store and its backing storage.
#[derive(Debug, Error)]
pub enum SwapError {
    /// Underlying read/write/truncate failed (disk full, permissions, ...)
    #[error("Swap I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Extent contents no longer match the checksum recorded at write time
    #[error("Corrupt swap extent at offset {offset} ({len} bytes)")]
    Corrupt { offset: u64, len: usize },

    /// Backing storage is shorter than the extent being read
    #[error("Swap extent out of bounds: {len} bytes at offset {offset}, backing size is {size}")]
    Truncated { offset: u64, len: usize, size: u64 },

    /// Locator does not name a live extent of this store
    #[error("Unknown swap extent at offset {0}")]
    UnknownExtent(u64),
}

/// Errors surfaced by tile acquisition, eviction and flushing.
#[derive(Debug, Error)]
pub enum TileError {
    /// Tile memory could not be allocated. Fatal for the current operation.
    #[error("Failed to allocate {bytes} bytes for tile {tile}")]
    Allocation { tile: TileId, bytes: usize },

    /// A swapped-out tile could not be read back. Fatal: the canvas content is lost.
    #[error("Failed to fault in tile {tile}: {source}")]
    FaultIn {
        tile: TileId,
        #[source]
        source: SwapError,
    },

    /// Writing a dirty tile to swap failed. The tile stays resident and dirty.
    #[error("Failed to flush tile {tile} to swap: {source}")]
    Swap {
        tile: TileId,
        #[source]
        source: SwapError,
    },
}

impl TileError {
    /// Whether the error leaves the canvas in a consistent, retryable state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TileError::Swap { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A size string such as `64MB` could not be parsed
    #[error("Invalid size '{0}': expected a number with an optional B/KB/KiB/MB/MiB/GB/GiB suffix")]
    InvalidSize(String),

    /// Tile edge length outside the supported range
    #[error("tile_size must be between {min} and {max}, got {actual}")]
    TileSize { min: u32, max: u32, actual: u32 },

    /// Swap file prefix is empty or contains a path separator
    #[error("Invalid swap prefix '{0}': must be a non-empty file name without separators")]
    SwapPrefix(String),
}

/// Errors that prevent the engine from starting.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Swap directory {path} is unusable: {source}")]
    SwapDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
