// src/receipt/mod.rs
//! Operation receipts
//!
//! A receipt is the immutable JSON record of one install, update, remove or
//! verify. It carries the artifacts written (in write order, which is the
//! undo order), an environment snapshot, a canonical integrity hash and an
//! optional Ed25519 signature over the same canonical bytes.

mod signing;
mod store;
mod verify;

pub use signing::{load_public_key, ReceiptSigner, SigningKeyPair, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};
pub use store::{ExportFormat, ReceiptStore};
pub use verify::VerifyReport;

use crate::canonical;
use crate::capability::EngineContext;
use crate::error::{Error, Result, SignErrorKind};
use crate::hash;
use crate::mode::Mode;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Value of the `kind` field of every receipt
pub const RECEIPT_KIND: &str = "pack-receipt";

/// Commit placeholder when the target is not under version control
pub const UNKNOWN_COMMIT: &str = "unknown";

/// Signature algorithm written into receipts
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Install,
    Update,
    Remove,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Partial,
    Failure,
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ArtifactType {
    File,
    Directory,
}

/// Step kind that produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CreatedBy {
    File,
    Template,
    Job,
    Event,
    Transform,
}

/// One recorded result of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub target: PathBuf,
    /// SHA-256 of the bytes written (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub created_by: CreatedBy,
    /// Size of the file before the engine touched it, if it existed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_size: Option<u64>,
}

impl Artifact {
    pub fn file(target: PathBuf, hash: String, created_by: CreatedBy, orig_size: Option<u64>) -> Self {
        Self {
            kind: ArtifactType::File,
            target,
            hash: Some(hash),
            created_by,
            orig_size,
        }
    }

    pub fn directory(target: PathBuf, created_by: CreatedBy) -> Self {
        Self {
            kind: ArtifactType::Directory,
            target,
            hash: None,
            created_by,
            orig_size: None,
        }
    }

    /// Whether the engine brought this path into existence
    pub fn engine_created(&self) -> bool {
        self.orig_size.is_none() && self.created_by != CreatedBy::Transform
    }
}

/// Process-level attributes captured when the receipt was built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub runtime: String,
    pub platform: String,
    pub arch: String,
    pub user: String,
    pub ci: bool,
    pub engine_version: String,
    pub pwd: String,
    pub utc_timestamp: String,
}

impl Environment {
    pub fn capture(ctx: &EngineContext) -> Self {
        Self::capture_from(ctx, |name| std::env::var(name).ok())
    }

    pub fn capture_from(ctx: &EngineContext, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ci = lookup("CI")
            .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        let user = lookup("USER")
            .or_else(|| lookup("USERNAME"))
            .unwrap_or_else(|| "unknown".to_string());
        let pwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            runtime: "rust".to_string(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            user,
            ci,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            pwd,
            utc_timestamp: ctx.clock.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Integrity {
    pub manifest: String,
    #[serde(default)]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSignature {
    pub algorithm: String,
    /// Base64 signature over the canonical payload
    pub signature: String,
    /// SHA-256 of the canonical payload
    pub data_hash: String,
    /// SHA-256 of the raw public key bytes
    pub key_fingerprint: String,
    /// Base64 public key, checked against `key_fingerprint`
    pub public_key: String,
    pub issued_at: String,
    pub pack_id: String,
    pub pack_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub kind: String,
    pub id: String,
    pub version: String,
    pub operation: Operation,
    pub status: ReceiptStatus,
    pub timestamp: String,
    pub commit: String,
    pub worktree: PathBuf,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub environment: Environment,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub integrity: Integrity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ReceiptSignature>,
}

impl Receipt {
    /// Canonical bytes covered by both the integrity hash and the signature
    ///
    /// The receipt hash and the signature are cleared before encoding.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.insert("signature".to_string(), Value::Null);
            if let Some(Value::Object(integrity)) = map.get_mut("integrity") {
                integrity.insert("receipt".to_string(), Value::Null);
            }
        }
        Ok(canonical::value_to_canonical_bytes(&value))
    }

    /// Recompute the receipt hash from the current field values
    pub fn compute_integrity(&self) -> Result<String> {
        Ok(hash::sha256(&self.signing_payload()?))
    }

    /// Sign (when a signer is given) and assign `integrity.receipt`
    pub fn seal(&mut self, signer: Option<&dyn ReceiptSigner>) -> Result<()> {
        self.signature = None;
        self.integrity.receipt = None;
        let payload = self.signing_payload()?;
        let data_hash = hash::sha256(&payload);

        if let Some(signer) = signer {
            let signature = signer.sign(&payload)?;
            let public_key = signer.public_key();
            if public_key.is_empty() {
                return Err(Error::sign(SignErrorKind::NoKey, "signer has no public key"));
            }
            self.signature = Some(ReceiptSignature {
                algorithm: SIGNATURE_ALGORITHM.to_string(),
                signature: BASE64.encode(signature),
                data_hash: data_hash.clone(),
                key_fingerprint: hash::sha256(&public_key),
                public_key: BASE64.encode(&public_key),
                issued_at: self.timestamp.clone(),
                pack_id: self.id.clone(),
                pack_version: self.version.clone(),
            });
            debug!("signed receipt for {}@{}", self.id, self.version);
        }

        self.integrity.receipt = Some(data_hash);
        Ok(())
    }

    /// `id@version` label used in logs and policy decisions
    pub fn label(&self) -> String {
        format!("{}@{}", self.id, self.version)
    }

    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }

    /// Pretty JSON with a trailing newline, as written to disk and notes
    pub fn to_pretty_json(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

/// Assembles a [`Receipt`] for one operation
#[derive(Debug, Clone)]
pub struct ReceiptBuilder {
    operation: Operation,
    id: String,
    version: String,
    status: ReceiptStatus,
    fingerprint: String,
    manifest_hash: String,
    mode: Option<Mode>,
    previous_version: Option<String>,
    details: Map<String, Value>,
    artifacts: Vec<Artifact>,
}

impl ReceiptBuilder {
    pub fn new(operation: Operation, id: &str, version: &str) -> Self {
        Self {
            operation,
            id: id.to_string(),
            version: version.to_string(),
            status: ReceiptStatus::Started,
            fingerprint: String::new(),
            manifest_hash: String::new(),
            mode: None,
            previous_version: None,
            details: Map::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn status(mut self, status: ReceiptStatus) -> Self {
        self.status = status;
        self
    }

    pub fn fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = fingerprint.to_string();
        self
    }

    pub fn manifest_hash(mut self, manifest_hash: &str) -> Self {
        self.manifest_hash = manifest_hash.to_string();
        self
    }

    pub fn mode(mut self, mode: Option<Mode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn previous_version(mut self, version: Option<String>) -> Self {
        self.previous_version = version;
        self
    }

    pub fn detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Build and seal the receipt against `worktree`
    ///
    /// The commit comes from the VCS head, or `unknown` when there is none.
    pub fn build(self, worktree: &Path, ctx: &EngineContext) -> Result<Receipt> {
        let commit = if ctx.vcs.is_available() && ctx.vcs.is_repository(worktree) {
            ctx.vcs
                .head_commit(worktree)
                .unwrap_or_else(|e| {
                    debug!("head lookup failed: {}", e);
                    None
                })
                .unwrap_or_else(|| UNKNOWN_COMMIT.to_string())
        } else {
            UNKNOWN_COMMIT.to_string()
        };

        let mut receipt = Receipt {
            kind: RECEIPT_KIND.to_string(),
            id: self.id,
            version: self.version,
            operation: self.operation,
            status: self.status,
            timestamp: ctx.clock.timestamp(),
            commit,
            worktree: worktree.to_path_buf(),
            fingerprint: self.fingerprint,
            mode: self.mode,
            previous_version: self.previous_version,
            details: self.details,
            environment: Environment::capture(ctx),
            artifacts: self.artifacts,
            integrity: Integrity {
                manifest: self.manifest_hash,
                receipt: None,
            },
            signature: None,
        };
        receipt.seal(ctx.signer.as_deref())?;
        Ok(receipt)
    }
}
