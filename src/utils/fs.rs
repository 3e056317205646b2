//! File system utilities for cross-platform, atomic file operations.
//!
//! Everything the state machine persists goes through [`atomic_write`]
//! (write-temp-then-rename), so a reader of any managed file sees either the
//! previous or the next content, never a partial write. Renames that can
//! collide with Windows file locking go through [`rename_with_retry`].

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Ensures a directory exists, creating it and all parents if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        bail!("path exists but is not a directory: {}", path.display());
    }
    Ok(())
}

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// Content is written to a `.tmp` sibling, synced to disk, then renamed over
/// the target. Readers never observe a partially written file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("failed to write temp file: {}", temp_path.display()))?;
        file.sync_all().context("failed to sync temp file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename temp file to: {}", path.display()))?;
    Ok(())
}

/// Renames `from` to `to`, retrying on Windows sharing/lock violations.
///
/// Windows reports `ERROR_SHARING_VIOLATION` (32) or `ERROR_LOCK_VIOLATION`
/// (33) while another process still holds a handle into the tree; those are
/// transient when the holder is an exiting application, so the rename is
/// retried `attempts` times with `delay` between tries. On other platforms a
/// single rename either succeeds or fails.
pub fn rename_with_retry(from: &Path, to: &Path, attempts: u32, delay: Duration) -> Result<()> {
    let mut tries = 0;
    loop {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(err) => {
                tries += 1;
                let transient = is_sharing_violation(&err);
                if !transient || tries >= attempts {
                    return Err(err).with_context(|| {
                        format!("failed to rename {} -> {}", from.display(), to.display())
                    });
                }
                warn!(
                    "rename {} -> {} blocked ({err}), retry {tries}/{attempts}",
                    from.display(),
                    to.display()
                );
                std::thread::sleep(delay);
            }
        }
    }
}

#[cfg(windows)]
fn is_sharing_violation(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_sharing_violation(_err: &std::io::Error) -> bool {
    false
}

/// Recursively removes a directory, swallowing errors. Best-effort cleanup.
pub fn remove_dir_all_quiet(path: &Path) {
    if !path.exists() {
        return;
    }
    debug!("removing {}", path.display());
    if let Err(err) = fs::remove_dir_all(path) {
        warn!("could not remove {}: {err}", path.display());
    }
}

/// Removes a file if it exists, swallowing "not found".
pub fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

/// Marks a file executable on Unix; no-op elsewhere.
pub fn set_executable(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if mode & 0o111 != 0 { mode } else { 0o755 };
        let perms = fs::Permissions::from_mode(mode);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

/// Joins a relative, forward-slash entry path onto a base directory,
/// rejecting traversal outside it.
///
/// Used for every path that originates in a signature, patch header, or
/// archive entry, none of which are trusted.
pub fn safe_join(base: &Path, entry: &str) -> Result<PathBuf> {
    if entry.is_empty() {
        bail!("empty entry path");
    }

    let mut joined = base.to_path_buf();
    for component in entry.split('/') {
        match component {
            "" | "." => continue,
            ".." => bail!("entry path escapes its directory: {entry}"),
            name if name.contains('\\') || name.contains('\0') => {
                bail!("entry path contains invalid characters: {entry}");
            }
            name => joined.push(name),
        }
    }

    if joined == base {
        bail!("entry path resolves to the directory itself: {entry}");
    }
    Ok(joined)
}
