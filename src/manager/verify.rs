// src/manager/verify.rs
//! Installed-pack verification: receipt checks plus artifact hashes

use super::{resolve_target, PackManager};
use crate::capability::EngineContext;
use crate::error::{Error, Result};
use crate::filesystem::path::display_relative;
use crate::hash::{file_state, FileState};
use crate::receipt::{Operation, ReceiptBuilder, ReceiptStatus, VerifyReport};
use ed25519_dalek::VerifyingKey;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub pack_id: String,
    pub version: String,
    pub receipt: VerifyReport,
    /// Files whose content no longer matches the receipt
    pub modified: Vec<String>,
    pub missing: Vec<String>,
    pub checked: usize,
}

impl VerifyOutcome {
    pub fn is_clean(&self) -> bool {
        self.receipt.valid && self.modified.is_empty() && self.missing.is_empty()
    }
}

impl PackManager {
    /// Check the installed receipt of `pack_id` and every file it records
    ///
    /// The check itself is recorded as a `verify` note.
    pub fn verify(
        &self,
        pack_id: &str,
        target: &Path,
        trusted: Option<&VerifyingKey>,
        ctx: &EngineContext,
    ) -> Result<VerifyOutcome> {
        let target = &resolve_target(target)?;
        let store = self.store(ctx);
        let receipt = store
            .latest(target, pack_id)?
            .ok_or_else(|| Error::NotInstalled(pack_id.to_string()))?;

        let report = receipt.verify(ctx.vcs.as_ref(), trusted);

        let files: Vec<(&PathBuf, &str)> = receipt
            .artifacts
            .iter()
            .filter_map(|a| a.hash.as_deref().map(|h| (&a.target, h)))
            .collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism.max(1))
            .build()
            .map_err(|e| Error::Config(format!("failed to start hashing pool: {}", e)))?;
        let states: Vec<(&PathBuf, Result<FileState>)> = pool.install(|| {
            files
                .par_iter()
                .map(|(path, hash)| (*path, file_state(path, hash)))
                .collect()
        });

        let mut modified = Vec::new();
        let mut missing = Vec::new();
        for (path, state) in states {
            let shown = display_relative(target, path);
            match state? {
                FileState::Unchanged => {}
                FileState::Modified(_) => modified.push(shown),
                FileState::Missing => missing.push(shown),
            }
        }

        let outcome = VerifyOutcome {
            pack_id: receipt.id.clone(),
            version: receipt.version.clone(),
            receipt: report,
            modified,
            missing,
            checked: files.len(),
        };

        if outcome.is_clean() {
            info!("{} verified ({} files)", receipt.label(), outcome.checked);
        } else {
            warn!(
                "{} failed verification: {} receipt errors, {} modified, {} missing",
                receipt.label(),
                outcome.receipt.errors.len(),
                outcome.modified.len(),
                outcome.missing.len()
            );
        }

        let status = if outcome.is_clean() {
            ReceiptStatus::Success
        } else {
            ReceiptStatus::Failure
        };
        let record = ReceiptBuilder::new(Operation::Verify, &receipt.id, &receipt.version)
            .status(status)
            .fingerprint(&receipt.fingerprint)
            .manifest_hash(&receipt.integrity.manifest)
            .mode(receipt.mode)
            .detail("receiptErrors", json!(outcome.receipt.errors))
            .detail("modified", json!(outcome.modified))
            .detail("missing", json!(outcome.missing))
            .build(target, ctx)?;
        store.write_note(&record)?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::NoVcs;
    use crate::config::EngineConfig;
    use serde_json::Map;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_verify_reports_drift() {
        let packs = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        fs::create_dir_all(packs.path().join("files")).unwrap();
        fs::write(packs.path().join("files/a.txt"), "a\n").unwrap();
        fs::write(packs.path().join("files/b.txt"), "b\n").unwrap();
        let manifest = json!({
            "id": "demo",
            "version": "1.0.0",
            "provides": {"files": [
                {"src": "a.txt", "target": "a.txt"},
                {"src": "b.txt", "target": "b.txt"}
            ]}
        });
        fs::write(packs.path().join("pack.json"), manifest.to_string()).unwrap();

        let mut config = EngineConfig::default();
        config.parallelism = 2;
        let manager = PackManager::new(config);
        let ctx = EngineContext::with_vcs(Arc::new(NoVcs));
        manager.apply(packs.path(), target.path(), &Map::new(), &ctx).unwrap();

        let clean = manager.verify("demo", target.path(), None, &ctx).unwrap();
        assert!(clean.is_clean());
        assert_eq!(clean.checked, 2);

        fs::write(target.path().join("a.txt"), "changed\n").unwrap();
        fs::remove_file(target.path().join("b.txt")).unwrap();
        let drift = manager.verify("demo", target.path(), None, &ctx).unwrap();
        assert!(drift.receipt.valid);
        assert_eq!(drift.modified, vec!["a.txt"]);
        assert_eq!(drift.missing, vec!["b.txt"]);

        assert!(matches!(
            manager.verify("other", target.path(), None, &ctx),
            Err(Error::NotInstalled(_))
        ));
    }
}
