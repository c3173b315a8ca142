// src/receipt/store.rs
//! Receipt persistence and queries
//!
//! The latest receipt of each pack is kept at
//! `<target>/<engine-dir>/packs/<id>/receipt.json`. Every receipt is also
//! appended as a note under the configured notes ref, attached to the
//! receipt's commit (or `HEAD`). Note bodies may hold several concatenated
//! receipts; unreadable entries are skipped.

use super::{Operation, Receipt, ReceiptStatus, UNKNOWN_COMMIT};
use crate::capability::Vcs;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::filesystem::write_atomic;
use chrono::DateTime;
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Receipt export encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(Error::Config(format!("unknown export format: {}", other))),
        }
    }
}

pub struct ReceiptStore {
    config: EngineConfig,
    vcs: Arc<dyn Vcs>,
}

impl ReceiptStore {
    pub fn new(config: &EngineConfig, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            config: config.clone(),
            vcs,
        }
    }

    /// Persist `receipt` as the latest file receipt and as a VCS note
    ///
    /// A failed note write is logged; the file receipt is authoritative for
    /// the installed state.
    pub fn write(&self, receipt: &Receipt) -> Result<PathBuf> {
        let body = receipt.to_pretty_json()?;
        let path = self.config.receipt_path(&receipt.worktree, &receipt.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        write_atomic(&path, body.as_bytes())?;
        debug!("wrote receipt {}", path.display());

        self.note_or_warn(receipt, &body);
        Ok(path)
    }

    /// Record `receipt` as a VCS note only, leaving the file receipt alone
    pub fn write_note(&self, receipt: &Receipt) -> Result<()> {
        let body = receipt.to_pretty_json()?;
        self.note_or_warn(receipt, &body);
        Ok(())
    }

    fn note_or_warn(&self, receipt: &Receipt, body: &str) {
        if let Err(e) = self.append_note(receipt, body) {
            warn!("receipt note for {} not written: {}", receipt.label(), e);
        }
    }

    fn append_note(&self, receipt: &Receipt, body: &str) -> Result<()> {
        if !self.vcs.is_available() || !self.vcs.is_repository(&receipt.worktree) {
            debug!("no repository at {}; skipping note", receipt.worktree.display());
            return Ok(());
        }
        let commit = if receipt.commit == UNKNOWN_COMMIT {
            "HEAD"
        } else {
            receipt.commit.as_str()
        };

        let mut file = NamedTempFile::new().map_err(|e| Error::io(std::env::temp_dir(), e))?;
        file.write_all(body.as_bytes())
            .map_err(|e| Error::io(file.path(), e))?;
        file.flush().map_err(|e| Error::io(file.path(), e))?;

        self.vcs
            .append_note(&receipt.worktree, &self.config.notes_ref, commit, file.path())
    }

    /// Latest file receipt for `pack_id`, if installed
    pub fn latest(&self, target: &Path, pack_id: &str) -> Result<Option<Receipt>> {
        let path = self.config.receipt_path(target, pack_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Latest file receipt of every installed pack, ordered by id
    pub fn installed(&self, target: &Path) -> Result<Vec<Receipt>> {
        let packs_dir = self.config.state_dir(target).join("packs");
        if !packs_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut receipts = Vec::new();
        for entry in fs::read_dir(&packs_dir).map_err(|e| Error::io(&packs_dir, e))? {
            let entry = entry.map_err(|e| Error::io(&packs_dir, e))?;
            let path = entry.path().join("receipt.json");
            if !path.is_file() {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            match serde_json::from_str::<Receipt>(&content) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => warn!("ignoring unreadable receipt {}: {}", path.display(), e),
            }
        }
        receipts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(receipts)
    }

    /// Drop the per-pack receipt directory
    pub fn erase(&self, target: &Path, pack_id: &str) -> Result<()> {
        let dir = self.config.pack_dir(target, pack_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }

    /// Every receipt recorded for `target`, newest first
    ///
    /// Reads notes when a repository is available, otherwise falls back to
    /// the file receipts.
    pub fn all(&self, target: &Path) -> Result<Vec<Receipt>> {
        let mut receipts = if self.vcs.is_available() && self.vcs.is_repository(target) {
            let mut parsed = Vec::new();
            for body in self.vcs.read_notes(target, &self.config.notes_ref)? {
                parsed.extend(parse_note_body(&body));
            }
            parsed
        } else {
            self.installed(target)?
        };
        sort_newest_first(&mut receipts);
        Ok(receipts)
    }

    /// Receipts, optionally for one pack, optionally only the newest
    pub fn read(&self, target: &Path, pack_id: Option<&str>, latest: bool) -> Result<Vec<Receipt>> {
        let mut receipts: Vec<Receipt> = self
            .all(target)?
            .into_iter()
            .filter(|r| pack_id.is_none_or(|id| r.id == id))
            .collect();
        if latest {
            receipts.truncate(1);
        }
        Ok(receipts)
    }

    pub fn list_by_status(&self, target: &Path, status: ReceiptStatus) -> Result<Vec<Receipt>> {
        Ok(self
            .all(target)?
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }

    pub fn list_by_operation(&self, target: &Path, operation: Operation) -> Result<Vec<Receipt>> {
        Ok(self
            .all(target)?
            .into_iter()
            .filter(|r| r.operation == operation)
            .collect())
    }

    /// All receipts of one pack, newest first
    pub fn history(&self, target: &Path, pack_id: &str) -> Result<Vec<Receipt>> {
        self.read(target, Some(pack_id), false)
    }

    pub fn export(&self, target: &Path, format: ExportFormat) -> Result<String> {
        let receipts = self.all(target)?;
        match format {
            ExportFormat::Json => {
                let mut out = serde_json::to_string_pretty(&receipts)?;
                out.push('\n');
                Ok(out)
            }
            ExportFormat::Csv => export_csv(&receipts),
        }
    }
}

/// Parse every receipt in a note body, skipping anything unreadable
fn parse_note_body(body: &str) -> Vec<Receipt> {
    let mut receipts = Vec::new();
    let stream = serde_json::Deserializer::from_str(body).into_iter::<serde_json::Value>();
    for value in stream {
        match value {
            Ok(value) => match Receipt::deserialize(value) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => debug!("skipping non-receipt note entry: {}", e),
            },
            Err(e) => {
                debug!("stopping at malformed note content: {}", e);
                break;
            }
        }
    }
    receipts
}

fn sort_newest_first(receipts: &mut [Receipt]) {
    receipts.sort_by(|a, b| {
        let ta = DateTime::parse_from_rfc3339(&a.timestamp).ok();
        let tb = DateTime::parse_from_rfc3339(&b.timestamp).ok();
        tb.cmp(&ta).then_with(|| b.timestamp.cmp(&a.timestamp))
    });
}

fn export_csv(receipts: &[Receipt]) -> Result<String> {
    let csv_error = |e: csv::Error| Error::Config(format!("csv export failed: {}", e));
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record([
            "id",
            "version",
            "operation",
            "status",
            "timestamp",
            "commit",
            "fingerprint",
            "artifacts",
        ])
        .map_err(csv_error)?;
    for r in receipts {
        writer
            .write_record([
                r.id.clone(),
                r.version.clone(),
                r.operation.to_string(),
                r.status.to_string(),
                r.timestamp.clone(),
                r.commit.clone(),
                r.fingerprint.clone(),
                r.artifacts.len().to_string(),
            ])
            .map_err(csv_error)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Config(format!("csv export failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Config(format!("csv export failed: {}", e)))
}
