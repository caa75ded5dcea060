//! Single-instance lock.
//!
//! `serve` writes its PID to the configured path and holds an `fs2`
//! exclusive lock on the file for its whole life.  A second instance fails
//! at launch.  Both the lock and the file go away in [`remove_pid_file`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

/// Lock `path` and write the current PID into it.
///
/// The returned [`File`] holds the lock; keep it alive until shutdown.
/// The file is only truncated after the lock is won, so a losing
/// instance leaves the running one's PID intact.
pub fn write_pid_file(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("opening PID file {}: {e}", path.display()))?;

    file.try_lock_exclusive().map_err(|_| {
        let holder = fs::read_to_string(path).unwrap_or_default();
        let holder = holder.trim();
        if holder.is_empty() {
            anyhow::anyhow!(
                "another chatbridge instance is running (PID file {} is locked)",
                path.display()
            )
        } else {
            anyhow::anyhow!(
                "another chatbridge instance is running (PID {holder}, lock file {})",
                path.display()
            )
        }
    })?;

    let pid = std::process::id();
    file.set_len(0)?;
    {
        let mut f = &file;
        writeln!(f, "{pid}")?;
        f.flush()?;
    }

    tracing::info!(path = %path.display(), pid, "PID file written");
    Ok(file)
}

/// Remove the PID file.  The lock is released when `_handle` drops.
pub fn remove_pid_file(path: &Path, _handle: File) {
    if let Err(e) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
