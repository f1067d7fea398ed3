//! Secondary storage for evicted tiles.
//!
//! - [`SwapBacking`] - byte-addressable storage (file or memory)
//! - [`SwapStore`] - extent allocator with first-fit reuse and checksums
//! - [`clean_stale_swap_files`] - startup cleanup of files left by dead processes

mod backing;
mod stale;
mod swap;

pub use backing::{FileBacking, MemoryBacking, SwapBacking};
pub use stale::{
    clean_stale_swap_files, parse_swap_pid, swap_file_name, swap_file_path, ProcessProbe,
    SystemProbe,
};
pub use swap::{SwapLocator, SwapStore, SwapUsage};
