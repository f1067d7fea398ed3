use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

/// Byte-addressable storage that the swap store writes tile extents into.
///
/// The swap store does its own extent bookkeeping; a backing only needs to
/// read and write at absolute offsets and to shrink when the tail is freed.
pub trait SwapBacking: Send {
    /// Read exactly `buf.len()` bytes starting at `offset`.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `data` starting at `offset`, growing the storage if needed.
    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Shrink (or grow) the storage to exactly `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Current size of the storage in bytes.
    fn size(&self) -> u64;

    /// Identifier for log and error messages (a path, or `memory://...`).
    fn identifier(&self) -> &str;
}

// =============================================================================
// File Backing
// =============================================================================

/// Swap backing stored in a single file.
///
/// The file is created lazily on the first write and removed when the
/// backing is dropped, so a process that never swaps leaves nothing behind.
pub struct FileBacking {
    path: PathBuf,
    display: String,
    file: Option<File>,
    size: u64,
}

impl FileBacking {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display = path.display().to_string();
        Self {
            path,
            display,
            file: None,
            size: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&self.path)?;
            debug!(path = %self.display, "Opened swap file");
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(io::Error::other("swap file not open")),
        }
    }
}

impl SwapBacking for FileBacking {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        self.size = self.size.max(offset + data.len() as u64);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if self.file.is_none() && len == 0 {
            return Ok(());
        }
        self.file()?.set_len(len)?;
        self.size = len;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.display
    }
}

impl Drop for FileBacking {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.display, error = %e, "Failed to remove swap file");
            } else {
                debug!(path = %self.display, "Removed swap file");
            }
        }
    }
}

// =============================================================================
// Memory Backing
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    data: Vec<u8>,
    limit: Option<u64>,
    reads: usize,
    writes: usize,
}

/// In-memory swap backing with an optional capacity limit.
///
/// Clones share the same storage, so a caller can keep a clone to inspect
/// or damage the contents after handing the backing to a swap store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBacking {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backing that refuses writes extending past `limit` bytes.
    pub fn with_limit(limit: u64) -> Self {
        let backing = Self::new();
        backing.set_limit(Some(limit));
        backing
    }

    /// Change the capacity limit; `None` removes it.
    pub fn set_limit(&self, limit: Option<u64>) {
        self.lock().limit = limit;
    }

    /// Flip every bit of the byte at `offset`.
    pub fn corrupt_byte(&self, offset: u64) {
        let mut inner = self.lock();
        if let Some(byte) = inner.data.get_mut(offset as usize) {
            *byte ^= 0xFF;
        }
    }

    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn len(&self) -> u64 {
        self.lock().data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SwapBacking for MemoryBacking {
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut inner = self.lock();
        inner.reads += 1;
        let start = offset as usize;
        let end = start + buf.len();
        if end > inner.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of memory swap",
            ));
        }
        buf.copy_from_slice(&inner.data[start..end]);
        Ok(())
    }

    fn write_all_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        let end = offset + data.len() as u64;
        if let Some(limit) = inner.limit {
            if end > limit {
                return Err(io::Error::other("memory swap capacity exhausted"));
            }
        }
        inner.writes += 1;
        if inner.data.len() < end as usize {
            inner.data.resize(end as usize, 0);
        }
        inner.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.lock().data.resize(len as usize, 0);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.len()
    }

    fn identifier(&self) -> &str {
        "memory://swap"
    }
}
