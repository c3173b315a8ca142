// src/lock.rs

//! Exclusive advisory lock on a target tree
//!
//! Every mutating operation holds `<target>/<engine-dir>/.lock` for its
//! whole duration. The lock uses `flock(LOCK_EX)` through `fs2` and is
//! released when the guard is dropped, on every exit path.
//!
//! A lock held longer than the stale age is force-broken: the lock file is
//! replaced and the new holder proceeds with a warning.

use crate::error::{Error, LockErrorKind, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Guard for a held target lock
pub struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    /// Try to take the lock at `path` without blocking
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Self::held(file, path),
            Err(e) if is_contended(&e) => {
                if !is_stale(path, stale_after) {
                    return Err(Error::Lock {
                        kind: LockErrorKind::Held,
                        path: path.to_path_buf(),
                    });
                }

                warn!(
                    "breaking stale target lock {} (older than {}s)",
                    path.display(),
                    stale_after.as_secs()
                );
                drop(file);
                fs::remove_file(path).map_err(|e| Error::io(path, e))?;

                let file = open(path)?;
                file.try_lock_exclusive().map_err(|_| Error::Lock {
                    kind: LockErrorKind::StaleBroken,
                    path: path.to_path_buf(),
                })?;
                Self::held(file, path)
            }
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn held(mut file: File, path: &Path) -> Result<Self> {
        // Holder pid for humans; the lock itself is the flock
        file.set_len(0).map_err(|e| Error::io(path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| Error::io(path, e))?;
        debug!("acquired target lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some other handle currently holds the lock at `path`
    pub fn is_held(path: &Path) -> bool {
        let Ok(file) = File::open(path) else {
            return false;
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        }
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("released target lock {}", self.path.display());
    }
}

fn open(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::io(path, e))
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .is_some_and(|age| age > stale_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".gitvan").join(".lock");

        let lock = TargetLock::acquire(&path, HOUR).unwrap();
        assert!(path.exists());
        assert!(TargetLock::is_held(&path));
        assert_eq!(lock.path(), path.as_path());

        drop(lock);
        assert!(!TargetLock::is_held(&path));
        TargetLock::acquire(&path, HOUR).unwrap();
    }

    #[test]
    fn test_held_lock_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let _first = TargetLock::acquire(&path, HOUR).unwrap();
        let err = TargetLock::acquire(&path, HOUR).err().unwrap();
        assert!(matches!(
            err,
            Error::Lock {
                kind: LockErrorKind::Held,
                ..
            }
        ));
    }

    #[test]
    fn test_stale_lock_broken() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".lock");

        let _first = TargetLock::acquire(&path, HOUR).unwrap();
        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        filetime::set_file_mtime(&path, FileTime::from_system_time(two_hours_ago)).unwrap();

        let second = TargetLock::acquire(&path, HOUR);
        assert!(second.is_ok());
    }
}
