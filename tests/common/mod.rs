// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use gitvan_pack::capability::{EngineContext, FixedClock, MemoryVcs};
use gitvan_pack::config::EngineConfig;
use gitvan_pack::manager::PackManager;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Commit the in-memory repository starts at
pub const HEAD: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Scratch area holding packs and a target tree.
///
/// Keep it alive for the duration of the test to prevent cleanup.
pub struct Workspace {
    pub dir: TempDir,
    pub target: PathBuf,
    pub vcs: Arc<MemoryVcs>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("project");
        fs::create_dir_all(&target).unwrap();
        Self {
            dir,
            target,
            vcs: Arc::new(MemoryVcs::with_head(HEAD)),
        }
    }

    /// Write a pack directory named `name` with `manifest` and asset files
    pub fn pack(&self, name: &str, manifest: Value, assets: &[(&str, &str)]) -> PathBuf {
        let root = self.dir.path().join("packs").join(name);
        for (rel, content) in assets {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        fs::create_dir_all(&root).unwrap();
        fs::write(
            root.join("pack.json"),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        root
    }

    /// The `demo` pack: one README written with mode `write`
    pub fn demo_pack(&self, version: &str, readme: &str) -> PathBuf {
        self.pack(
            &format!("demo-{}", version),
            json!({
                "id": "demo",
                "version": version,
                "provides": {
                    "files": [{"src": "README.md", "target": "README.md", "mode": "write"}]
                }
            }),
            &[("files/README.md", readme)],
        )
    }

    /// Context over this workspace's repository with a fixed clock
    pub fn context(&self) -> EngineContext {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
        EngineContext::with_vcs(self.vcs.clone()).clock(Arc::new(clock))
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.target.join(rel)
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn receipt_file(&self, pack_id: &str) -> PathBuf {
        self.target
            .join(".gitvan/packs")
            .join(pack_id)
            .join("receipt.json")
    }

    pub fn key_dir(&self) -> PathBuf {
        self.dir.path().join("keys")
    }
}

/// Defaults with the recent-modification heuristic switched off
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.recent_modification_secs = 0;
    config
}

pub fn manager() -> PackManager {
    PackManager::new(config())
}

pub fn no_inputs() -> Map<String, Value> {
    Map::new()
}

pub fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn sha256_hex(data: &[u8]) -> String {
    gitvan_pack::hash::sha256(data)
}

pub fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}
