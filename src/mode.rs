// src/mode.rs

//! Target tree classification
//!
//! A target is an `existing-tree` when it carries a VCS working tree marker
//! or when any of the pack's `detects` probes match; otherwise it is a
//! `fresh-tree`.

use crate::descriptor::ProjectDescriptor;
use crate::manifest::{Detect, DetectKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use strum_macros::{Display, EnumString};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Mode {
    ExistingTree,
    FreshTree,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::ExistingTree, Mode::FreshTree];
}

/// Directory marking a VCS working tree
pub const VCS_MARKER: &str = ".git";

#[derive(Debug, Clone)]
pub struct ModeDetector {
    marker: String,
}

impl Default for ModeDetector {
    fn default() -> Self {
        Self {
            marker: VCS_MARKER.to_string(),
        }
    }
}

impl ModeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different working tree marker
    pub fn with_marker(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }

    pub fn detect(&self, target: &Path, detects: &[Detect]) -> Mode {
        if target.join(&self.marker).exists() {
            debug!("{} holds {}, existing tree", target.display(), self.marker);
            return Mode::ExistingTree;
        }

        for probe in detects {
            let hit = self.probe(target, probe);
            if hit != probe.negate {
                debug!(
                    "detect probe {:?} '{}' matched (negate={})",
                    probe.kind, probe.pattern, probe.negate
                );
                return Mode::ExistingTree;
            }
        }

        Mode::FreshTree
    }

    fn probe(&self, target: &Path, probe: &Detect) -> bool {
        match probe.kind {
            DetectKind::File => target.join(&probe.pattern).exists(),
            DetectKind::Glob => glob_matches(target, &probe.pattern, &self.marker),
            DetectKind::ProjectDep => match ProjectDescriptor::load(target) {
                Ok(Some(desc)) => desc.has_dependency(&probe.pattern),
                Ok(None) => false,
                Err(e) => {
                    warn!("Ignoring unreadable project descriptor: {}", e);
                    false
                }
            },
        }
    }
}

/// At least one non-directory under `target` matches `pattern`
fn glob_matches(target: &Path, pattern: &str, skip_dir: &str) -> bool {
    let pattern = match glob::Pattern::new(pattern) {
        Ok(p) => p,
        Err(e) => {
            warn!("Invalid glob '{}' in detects: {}", pattern, e);
            return false;
        }
    };

    WalkDir::new(target)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || e.file_name() != skip_dir)
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .any(|e| {
            e.path()
                .strip_prefix(target)
                .map(|rel| pattern.matches_path(rel))
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn detect(kind: DetectKind, pattern: &str, negate: bool) -> Detect {
        Detect {
            kind,
            pattern: pattern.to_string(),
            negate,
        }
    }

    #[test]
    fn test_empty_dir_is_fresh() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(ModeDetector::new().detect(temp_dir.path(), &[]), Mode::FreshTree);
    }

    #[test]
    fn test_vcs_marker_is_existing() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join(".git")).unwrap();
        assert_eq!(
            ModeDetector::new().detect(temp_dir.path(), &[]),
            Mode::ExistingTree
        );
    }

    #[test]
    fn test_file_and_negated_probes() {
        let temp_dir = TempDir::new().unwrap();
        let detector = ModeDetector::new();

        let probe = detect(DetectKind::File, "package.json", false);
        assert_eq!(detector.detect(temp_dir.path(), &[probe.clone()]), Mode::FreshTree);

        fs::write(temp_dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detector.detect(temp_dir.path(), &[probe]), Mode::ExistingTree);

        let negated = detect(DetectKind::File, "Cargo.toml", true);
        assert_eq!(detector.detect(temp_dir.path(), &[negated]), Mode::ExistingTree);
    }

    #[test]
    fn test_glob_probe_ignores_directories() {
        let temp_dir = TempDir::new().unwrap();
        let detector = ModeDetector::new();
        let probe = detect(DetectKind::Glob, "src/*.ts", false);

        fs::create_dir_all(temp_dir.path().join("src/dir.ts")).unwrap();
        assert_eq!(detector.detect(temp_dir.path(), &[probe.clone()]), Mode::FreshTree);

        fs::write(temp_dir.path().join("src/index.ts"), "").unwrap();
        assert_eq!(detector.detect(temp_dir.path(), &[probe]), Mode::ExistingTree);
    }

    #[cfg(unix)]
    #[test]
    fn test_glob_probe_does_not_follow_symlinks() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.ts"), "").unwrap();

        let temp_dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("linked")).unwrap();

        let probe = detect(DetectKind::Glob, "linked/*.ts", false);
        assert_eq!(
            ModeDetector::new().detect(temp_dir.path(), &[probe]),
            Mode::FreshTree
        );
    }

    #[test]
    fn test_project_dep_probe() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("package.json"),
            r#"{"devDependencies":{"vite":"^5.0.0"}}"#,
        )
        .unwrap();

        let detector = ModeDetector::new();
        assert_eq!(
            detector.detect(temp_dir.path(), &[detect(DetectKind::ProjectDep, "vite", false)]),
            Mode::ExistingTree
        );
        assert_eq!(
            detector.detect(temp_dir.path(), &[detect(DetectKind::ProjectDep, "react", false)]),
            Mode::FreshTree
        );
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!(Mode::ExistingTree.to_string(), "existing-tree");
        assert_eq!("fresh-tree".parse::<Mode>().unwrap(), Mode::FreshTree);
        assert_eq!(
            serde_json::to_string(&Mode::FreshTree).unwrap(),
            "\"fresh-tree\""
        );
    }
}
