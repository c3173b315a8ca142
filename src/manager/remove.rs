// src/manager/remove.rs
//! Pack removal
//!
//! Artifacts are undone in reverse write order. A file is deleted only when
//! it still hashes as recorded (or with `force`); files the pack did not
//! bring into existence are left in place.

use super::{resolve_target, seal, PackManager};
use crate::capability::EngineContext;
use crate::error::Result;
use crate::filesystem::path::display_relative;
use crate::hash::{file_state, FileState};
use crate::lock::TargetLock;
use crate::policy::PolicySubject;
use crate::receipt::{
    Artifact, ArtifactType, CreatedBy, Operation, Receipt, ReceiptBuilder, ReceiptStatus,
};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io;
use std::path::Path;
use strum_macros::Display;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoveStatus {
    Ok,
    /// Some files were kept because the user changed them
    Partial,
    Error,
    NotFound,
}

impl RemoveStatus {
    fn receipt_status(self) -> ReceiptStatus {
        match self {
            RemoveStatus::Ok => ReceiptStatus::Success,
            RemoveStatus::Partial => ReceiptStatus::Partial,
            RemoveStatus::Error | RemoveStatus::NotFound => ReceiptStatus::Failure,
        }
    }
}

/// An artifact left behind, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveIssue {
    /// Path relative to the target
    pub artifact: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReport {
    pub status: RemoveStatus,
    pub pack_id: String,
    pub removed: Vec<String>,
    pub skipped: Vec<RemoveIssue>,
    pub errors: Vec<RemoveIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

impl RemoveReport {
    fn not_found(pack_id: &str) -> Self {
        Self {
            status: RemoveStatus::NotFound,
            pack_id: pack_id.to_string(),
            removed: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            receipt: None,
        }
    }
}

/// Per-artifact bookkeeping of one removal walk
#[derive(Default)]
struct Walk {
    removed: Vec<String>,
    skipped: Vec<RemoveIssue>,
    errors: Vec<RemoveIssue>,
    /// Artifacts still on disk and still owned by the pack
    kept: Vec<Artifact>,
    failed: bool,
}

impl Walk {
    fn skip(&mut self, shown: String, reason: &str) {
        debug!("keeping {}: {}", shown, reason);
        self.skipped.push(RemoveIssue {
            artifact: shown,
            reason: reason.to_string(),
        });
    }

    fn keep(&mut self, artifact: &Artifact, shown: String, reason: String, failed: bool) {
        self.failed |= failed;
        self.kept.push(artifact.clone());
        self.errors.push(RemoveIssue {
            artifact: shown,
            reason,
        });
    }

    fn status(&self) -> RemoveStatus {
        if self.failed {
            RemoveStatus::Error
        } else if !self.errors.is_empty() {
            RemoveStatus::Partial
        } else {
            RemoveStatus::Ok
        }
    }

    fn artifact(&mut self, artifact: &Artifact, target: &Path, force: bool) {
        let path = &artifact.target;
        let shown = display_relative(target, path);

        if !path.starts_with(target) {
            self.skip(shown, "outside-target");
            return;
        }
        if !artifact.engine_created() {
            let reason = if artifact.created_by == CreatedBy::Transform {
                "transformed"
            } else {
                "pre-existing"
            };
            self.skip(shown, reason);
            return;
        }

        match artifact.kind {
            ArtifactType::File => self.file(artifact, shown, force),
            ArtifactType::Directory => self.directory(artifact, shown, force),
        }
    }

    fn file(&mut self, artifact: &Artifact, shown: String, force: bool) {
        let path = &artifact.target;
        let state = match artifact.hash.as_deref() {
            Some(hash) => file_state(path, hash),
            None => Ok(FileState::Modified(String::new())),
        };

        match state {
            Ok(FileState::Missing) => debug!("{} already gone", shown),
            Ok(FileState::Modified(_)) if !force => {
                warn!("{} was modified since install, keeping it", shown);
                self.keep(artifact, shown, "modified".to_string(), false);
            }
            Ok(_) => match fs::remove_file(path) {
                Ok(()) => self.removed.push(shown),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => self.keep(artifact, shown, e.to_string(), true),
            },
            Err(e) => self.keep(artifact, shown, e.to_string(), true),
        }
    }

    fn directory(&mut self, artifact: &Artifact, shown: String, force: bool) {
        let path = &artifact.target;
        let empty = match fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                self.keep(artifact, shown, e.to_string(), true);
                return;
            }
        };

        let outcome = if empty {
            fs::remove_dir(path)
        } else if force {
            fs::remove_dir_all(path)
        } else {
            self.skip(shown, "not-empty");
            return;
        };
        match outcome {
            Ok(()) => self.removed.push(shown),
            Err(e) => self.keep(artifact, shown, e.to_string(), true),
        }
    }
}

impl PackManager {
    /// Remove an installed pack from `target`
    ///
    /// On `OK` the receipt directory is erased and the removal is recorded
    /// as a note only. Otherwise the removal receipt, listing what is still
    /// on disk, replaces the installed one.
    pub fn remove(&self, pack_id: &str, target: &Path, force: bool, ctx: &EngineContext) -> Result<RemoveReport> {
        let target = &resolve_target(target)?;
        let store = self.store(ctx);
        let Some(installed) = store.latest(target, pack_id)? else {
            info!("{} is not installed in {}", pack_id, target.display());
            return Ok(RemoveReport::not_found(pack_id));
        };

        let decision = self.policy.evaluate(&PolicySubject::for_removal(
            pack_id,
            &installed.version,
            ctx.approved,
        ));
        self.enforce(&decision, ctx)?;

        let signing = self.signing_context(ctx)?;
        let _lock = TargetLock::acquire(&self.config.lock_path(target), self.config.stale_lock_age())?;
        info!("Removing {} from {}", installed.label(), target.display());

        let mut walk = Walk::default();
        for artifact in installed.artifacts.iter().rev() {
            if let Err(e) = ctx.cancel.check(&format!("remove {}", artifact.target.display())) {
                walk.keep(artifact, display_relative(target, &artifact.target), e.to_string(), true);
                continue;
            }
            walk.artifact(artifact, target, force);
        }

        let status = walk.status();
        let audit = self.policy.audit(&decision, &status.to_string(), ctx.clock.as_ref());
        // Kept artifacts were collected in reverse; restore write order
        let kept: Vec<Artifact> = walk.kept.iter().rev().cloned().collect();

        let builder = ReceiptBuilder::new(Operation::Remove, &installed.id, &installed.version)
            .status(status.receipt_status())
            .fingerprint(&installed.fingerprint)
            .manifest_hash(&installed.integrity.manifest)
            .mode(installed.mode)
            .previous_version(Some(installed.version.clone()))
            .detail("removed", json!(walk.removed))
            .detail("skipped", serde_json::to_value(&walk.skipped)?)
            .detail("errors", serde_json::to_value(&walk.errors)?)
            .detail("force", json!(force))
            .detail("audit", audit.to_value())
            .artifacts(kept);
        let receipt = seal(builder, target, &signing)?;

        if status == RemoveStatus::Ok {
            store.write_note(&receipt)?;
            store.erase(target, pack_id)?;
        } else {
            store.write(&receipt)?;
        }
        info!(
            "Removed {}: {} ({} removed, {} kept)",
            installed.label(),
            status,
            walk.removed.len(),
            walk.errors.len()
        );

        Ok(RemoveReport {
            status,
            pack_id: pack_id.to_string(),
            removed: walk.removed,
            skipped: walk.skipped,
            errors: walk.errors,
            receipt: Some(receipt),
        })
    }
}
