//! PID-file arbitration helpers.
//!
//! The PID file acts as an exclusive per-account lock: a trader refuses to
//! start while a live PID holds it, and stale files are reaped by a
//! liveness probe. The manager uses the same probe to decide whether a
//! trader process exists.

use std::path::Path;

use tracing::warn;

use crate::errors::{TraderError, TraderResult};

/// Whether a process with this PID is alive (signal 0 probe)
#[must_use]
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) performs the permission and existence checks without
    // delivering a signal.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Read the decimal PID out of a PID file
#[must_use]
pub fn read_pid_file(path: &Path) -> Option<i32> {
    let text = std::fs::read_to_string(path).ok()?;
    text.trim().parse().ok()
}

/// Whether the PID file names a live process. A stale file is removed.
#[must_use]
pub fn pid_file_live(path: &Path) -> bool {
    let Some(pid) = read_pid_file(path) else {
        return false;
    };
    if pid_alive(pid) {
        return true;
    }
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "stale pid file removal failed");
    }
    false
}

/// Take the single-instance lock: write the current PID, failing if a live
/// process already holds the file.
pub fn acquire_pid_file(path: &Path) -> TraderResult<()> {
    if path.exists() {
        if let Some(pid) = read_pid_file(path) {
            if pid_alive(pid) {
                return Err(TraderError::Lifecycle(format!(
                    "another instance is running (pid {pid}), refusing to start"
                )));
            }
        }
        // Stale or unreadable: reap it.
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, std::process::id().to_string())?;
    Ok(())
}

/// Release the lock, tolerating a missing file
pub fn release_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "pid file removal failed");
        }
    }
}
