//! Swap file naming and cleanup of files left behind by dead processes.
//!
//! Swap files are named `<prefix>.<pid>`. At startup every file in the swap
//! directory matching that pattern is checked: if its pid is neither the
//! current process nor alive, the file is deleted.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// Answers whether a process id belongs to a running process.
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system.
///
/// On unix this delivers signal 0, which checks for existence without
/// affecting the target. `EPERM` means the process exists but belongs to
/// another user, so it counts as alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        if pid <= 0 {
            return false;
        }
        // SAFETY: kill with signal 0 performs only the permission and
        // existence checks; no signal is delivered.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    // Files held open by a live process cannot be removed on these platforms
    // anyway, so trying every candidate is harmless.
    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }
}

impl<F: Fn(u32) -> bool> ProcessProbe for F {
    fn is_alive(&self, pid: u32) -> bool {
        self(pid)
    }
}

/// File name of the swap file for `pid`.
pub fn swap_file_name(prefix: &str, pid: u32) -> String {
    format!("{}.{}", prefix, pid)
}

/// Path of this process's swap file inside `dir`.
pub fn swap_file_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(swap_file_name(prefix, std::process::id()))
}

/// Extract the pid from a swap file name, if it matches `<prefix>.<digits>`.
pub fn parse_swap_pid(file_name: &str, prefix: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('.')?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Delete swap files in `dir` whose owning process is gone.
///
/// Returns the paths that were removed. A missing directory is not an
/// error; individual removal failures are logged and skipped.
pub fn clean_stale_swap_files(
    dir: &Path,
    prefix: &str,
    probe: &dyn ProcessProbe,
) -> io::Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let own_pid = std::process::id();
    let mut removed = Vec::new();

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(pid) = parse_swap_pid(name, prefix) else {
            continue;
        };

        if pid == own_pid || probe.is_alive(pid) {
            debug!(file = name, pid, "Keeping swap file of live process");
            continue;
        }

        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), pid, "Removed stale swap file");
                removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale swap file"),
        }
    }

    Ok(removed)
}
