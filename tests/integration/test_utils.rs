//! Test utilities for integration tests.
//!
//! Scratch directories, deterministic pixel patterns and canvas helpers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tile_composite::{Canvas, PixelFormat};

// =============================================================================
// Scratch Directories
// =============================================================================

/// A fresh directory under the system temp dir, removed on drop.
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn new(name: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "tile-composite-it-{}-{}-{}",
            name,
            std::process::id(),
            n
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// File names currently in the directory, sorted.
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.path)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

// =============================================================================
// Pixel Patterns
// =============================================================================

/// Deterministic byte for channel `c` of pixel `(x, y)`.
pub fn pattern_byte(x: u32, y: u32, c: usize) -> u8 {
    (x.wrapping_mul(7) ^ y.wrapping_mul(13) ^ (c as u32).wrapping_mul(101)) as u8
}

/// A whole image of [`pattern_byte`] values in row-major order.
pub fn pattern_image(width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let mut data = Vec::with_capacity(width as usize * height as usize * bpp);
    for y in 0..height {
        for x in 0..width {
            for c in 0..bpp {
                data.push(pattern_byte(x, y, c));
            }
        }
    }
    data
}

/// Write the pattern into every pixel of `canvas`.
pub fn fill_pattern(canvas: &Canvas) {
    let data = pattern_image(canvas.width(), canvas.height(), canvas.format());
    canvas.write_all(&data).unwrap();
}

/// All 65536 `(s, d)` byte pairs as two parallel buffers.
pub fn all_pairs() -> (Vec<u8>, Vec<u8>) {
    let src = (0..256 * 256).map(|i| (i >> 8) as u8).collect();
    let dst = (0..256 * 256).map(|i| (i & 0xFF) as u8).collect();
    (src, dst)
}
