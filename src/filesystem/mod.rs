// src/filesystem/mod.rs

//! Filesystem helpers for materializing pack artifacts
//!
//! - Path sanitization for pack-supplied relative paths
//! - Atomic writes (temp file in the destination directory + rename)
//! - Parent directory creation that reports which directories are new

pub mod path;

pub use path::{safe_join, sanitize_path, validate_component};

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Write `content` to `path` atomically
///
/// The bytes land in a temp file next to the destination, are synced, then
/// renamed over the target, so readers never observe a partial file.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let mut temp = tempfile::Builder::new()
        .prefix(".gitvan-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| Error::io(parent, e))?;
    temp.write_all(content).map_err(|e| Error::io(path, e))?;
    temp.as_file().sync_all().map_err(|e| Error::io(path, e))?;
    temp.persist(path).map_err(|e| Error::io(path, e.error))?;

    Ok(())
}

/// Create every missing ancestor of `path` that lies under `root`
///
/// Returns the directories that did not exist before, parents first.
pub fn create_parent_dirs(root: &Path, path: &Path) -> Result<Vec<PathBuf>> {
    let Some(parent) = path.parent() else {
        return Ok(Vec::new());
    };

    let mut missing = Vec::new();
    let mut current = Some(parent);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }
    missing.reverse();

    for dir in &missing {
        fs::create_dir(dir).map_err(|e| Error::io(dir, e))?;
    }

    Ok(missing)
}

/// Mark a file executable (`0755`)
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = fs::Permissions::from_mode(0o755);
    fs::set_permissions(path, perms).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Existence and size of a path without following symlinks
pub fn probe(path: &Path) -> (bool, u64) {
    match path.symlink_metadata() {
        Ok(meta) => (true, meta.len()),
        Err(_) => (false, 0),
    }
}

/// True when the file at `path` was modified less than `window` ago
pub fn modified_within(path: &Path, window: Duration) -> bool {
    if window.is_zero() {
        return false;
    }
    let Ok(modified) = path.symlink_metadata().and_then(|m| m.modified()) else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age < window,
        // mtime in the future counts as recent
        Err(_) => true,
    }
}
