// src/filesystem/path.rs

//! Path sanitization for pack-supplied paths
//!
//! Every `src` and `target` in a manifest comes from an untrusted pack. They
//! are resolved relative to the pack root or the target root and must never
//! escape it.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize a pack-relative path
///
/// `.` components are dropped. Absolute paths, `..` components and paths
/// that normalize to nothing are rejected.
///
/// # Examples
///
/// ```
/// use gitvan_pack::filesystem::path::sanitize_path;
/// use std::path::PathBuf;
///
/// assert_eq!(sanitize_path("docs/./README.md").unwrap(), PathBuf::from("docs/README.md"));
/// assert!(sanitize_path("/etc/hosts").is_err());
/// assert!(sanitize_path("../outside.txt").is_err());
/// ```
pub fn sanitize_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let raw = path.as_ref();
    let shown = || raw.to_string_lossy().into_owned();

    let normalized = raw
        .components()
        .try_fold(PathBuf::new(), |mut acc, component| match component {
            Component::Normal(part) => {
                acc.push(part);
                Ok(acc)
            }
            Component::CurDir => Ok(acc),
            Component::ParentDir => Err(Error::PathTraversal(shown())),
            Component::RootDir | Component::Prefix(_) => {
                Err(Error::InvalidPath(format!("'{}' must be relative", shown())))
            }
        })?;

    if normalized.components().next().is_none() {
        return Err(Error::InvalidPath(format!("'{}' names no file", shown())));
    }
    Ok(normalized)
}

/// Join an untrusted relative path onto a root it cannot escape
///
/// The deepest existing ancestor of the result is resolved and must stay
/// under the resolved root, so a symlinked directory inside the root cannot
/// redirect writes outside of it.
pub fn safe_join(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<PathBuf> {
    let root = root.as_ref();
    let joined = root.join(sanitize_path(path)?);

    let Ok(resolved_root) = root.canonicalize() else {
        // Root not created yet: nothing under it can be a symlink
        return Ok(joined);
    };
    let existing = joined
        .ancestors()
        .find(|p| p.symlink_metadata().is_ok())
        .unwrap_or(root);
    if let Ok(resolved) = existing.canonicalize()
        && !resolved.starts_with(&resolved_root)
    {
        return Err(Error::PathTraversal(format!(
            "{} resolves outside {}",
            joined.display(),
            root.display()
        )));
    }
    Ok(joined)
}

/// Check that `name` is usable as a single path component (pack ids)
///
/// ```
/// use gitvan_pack::filesystem::path::validate_component;
///
/// assert!(validate_component("react-starter").is_ok());
/// assert!(validate_component("../react-starter").is_err());
/// ```
pub fn validate_component(name: &str) -> Result<()> {
    match name {
        "" => Err(Error::InvalidPath("empty name".to_string())),
        "." | ".." => Err(Error::PathTraversal(format!("'{}' is not a name", name))),
        _ if name.contains(['/', '\\']) => Err(Error::PathTraversal(format!(
            "'{}' contains a path separator",
            name
        ))),
        _ => Ok(()),
    }
}

/// Render a path relative to a root for display and matching
pub fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_relative_paths() {
        assert_eq!(sanitize_path("src/index.js").unwrap(), PathBuf::from("src/index.js"));
        assert_eq!(sanitize_path("./a/./b").unwrap(), PathBuf::from("a/b"));
    }

    #[test]
    fn test_rejects_escapes_and_absolute_paths() {
        for bad in ["..", "../etc/passwd", "src/../../secrets", "/jobs/daily.mjs"] {
            assert!(sanitize_path(bad).is_err(), "{} accepted", bad);
        }
        assert!(matches!(sanitize_path("a/../b"), Err(Error::PathTraversal(_))));
        assert!(matches!(sanitize_path("/x"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_rejects_empty() {
        for bad in ["", ".", "./"] {
            assert!(matches!(sanitize_path(bad), Err(Error::InvalidPath(_))), "{:?}", bad);
        }
    }

    #[test]
    fn test_safe_join() {
        let root = tempfile::TempDir::new().unwrap();
        assert_eq!(
            safe_join(root.path(), "docs/README.md").unwrap(),
            root.path().join("docs/README.md")
        );
        assert!(safe_join(root.path(), "../README.md").is_err());

        let missing = root.path().join("not-yet");
        assert_eq!(safe_join(&missing, "a.txt").unwrap(), missing.join("a.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_safe_join_rejects_symlinked_directory() {
        let outside = tempfile::TempDir::new().unwrap();
        let root = tempfile::TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        assert!(safe_join(root.path(), "link/new-file").is_err());
        assert!(safe_join(root.path(), "plain/new-file").is_ok());
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("demo").is_ok());
        assert!(validate_component("a/b").is_err());
        assert!(validate_component("a\\b").is_err());
        assert!(validate_component(".").is_err());
        assert!(validate_component("").is_err());
    }

    #[test]
    fn test_display_relative() {
        let root = Path::new("/t");
        assert_eq!(display_relative(root, Path::new("/t/src/a.js")), "src/a.js");
        assert_eq!(display_relative(root, Path::new("/elsewhere")), "/elsewhere");
    }
}
