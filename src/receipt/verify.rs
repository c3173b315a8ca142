// src/receipt/verify.rs
//! Receipt verification
//!
//! Checks required fields, the canonical integrity hash, the Ed25519
//! signature (when present) and that the recorded commit still exists.

use super::{Receipt, RECEIPT_KIND, SIGNATURE_ALGORITHM, UNKNOWN_COMMIT};
use crate::capability::Vcs;
use crate::error::{Error, Result, VerifyErrorKind};
use crate::hash;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Serialize;
use tracing::debug;

/// Outcome of [`Receipt::verify`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerifyReport {
    pub valid: bool,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub kinds: Vec<VerifyErrorKind>,
}

impl VerifyReport {
    fn fail(&mut self, kind: VerifyErrorKind, message: impl Into<String>) {
        self.valid = false;
        self.kinds.push(kind);
        self.errors.push(message.into());
    }

    /// Convert the first failure into a [`Error::Verify`]
    pub fn into_result(self) -> Result<()> {
        match (self.kinds.first(), self.errors.first()) {
            (Some(kind), Some(message)) => Err(Error::Verify {
                kind: *kind,
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl Receipt {
    /// Verify this receipt
    ///
    /// With `trusted` set, a signature must come from that key. A signed
    /// receipt whose payload changed reports only `Invalid signature`.
    pub fn verify(&self, vcs: &dyn Vcs, trusted: Option<&VerifyingKey>) -> VerifyReport {
        let mut report = VerifyReport {
            valid: true,
            ..Default::default()
        };

        for missing in self.missing_fields() {
            report.fail(
                VerifyErrorKind::FieldsMissing,
                format!("Missing required field: {}", missing),
            );
        }

        let recomputed = match self.compute_integrity() {
            Ok(hash) => hash,
            Err(e) => {
                report.fail(VerifyErrorKind::Integrity, format!("Cannot canonicalize receipt: {}", e));
                return report;
            }
        };

        match &self.signature {
            Some(sig) => {
                if let Err(reason) = check_signature(self, &recomputed, trusted) {
                    debug!("signature check failed for {}: {}", self.label(), reason);
                    report.fail(VerifyErrorKind::Signature, "Invalid signature");
                } else if self.integrity.receipt.as_deref() != Some(sig.data_hash.as_str()) {
                    report.fail(VerifyErrorKind::Integrity, "Receipt integrity mismatch");
                }
            }
            None => {
                if self.integrity.receipt.as_deref() != Some(recomputed.as_str()) {
                    report.fail(VerifyErrorKind::Integrity, "Receipt integrity mismatch");
                }
            }
        }

        if self.commit != UNKNOWN_COMMIT && vcs.is_available() {
            match vcs.commit_exists(&self.worktree, &self.commit) {
                Ok(true) => {}
                Ok(false) => report.fail(
                    VerifyErrorKind::CommitMissing,
                    format!("Commit {} not found", self.commit),
                ),
                Err(e) => debug!("commit lookup for {} failed: {}", self.commit, e),
            }
        }

        report
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.kind != RECEIPT_KIND {
            missing.push("kind");
        }
        if self.id.is_empty() {
            missing.push("id");
        }
        if self.version.is_empty() {
            missing.push("version");
        }
        if self.timestamp.is_empty() {
            missing.push("timestamp");
        }
        if self.commit.is_empty() {
            missing.push("commit");
        }
        if self.worktree.as_os_str().is_empty() {
            missing.push("worktree");
        }
        if self.fingerprint.is_empty() {
            missing.push("fingerprint");
        }
        if self.integrity.manifest.is_empty() {
            missing.push("integrity.manifest");
        }
        if self.integrity.receipt.is_none() {
            missing.push("integrity.receipt");
        }
        missing
    }
}

fn check_signature(
    receipt: &Receipt,
    recomputed: &str,
    trusted: Option<&VerifyingKey>,
) -> std::result::Result<(), String> {
    let Some(sig) = &receipt.signature else {
        return Err("unsigned".to_string());
    };
    if sig.algorithm != SIGNATURE_ALGORITHM {
        return Err(format!("unsupported algorithm {}", sig.algorithm));
    }
    if sig.data_hash != recomputed {
        return Err("data hash mismatch".to_string());
    }

    let public_bytes = BASE64
        .decode(&sig.public_key)
        .map_err(|e| format!("invalid public key encoding: {}", e))?;
    if hash::sha256(&public_bytes) != sig.key_fingerprint {
        return Err("key fingerprint mismatch".to_string());
    }
    let public_array: [u8; 32] = public_bytes
        .try_into()
        .map_err(|_| "invalid public key length".to_string())?;
    let key = VerifyingKey::from_bytes(&public_array).map_err(|e| e.to_string())?;
    if let Some(trusted) = trusted
        && trusted != &key
    {
        return Err("signed by an untrusted key".to_string());
    }

    let sig_bytes: [u8; 64] = BASE64
        .decode(&sig.signature)
        .map_err(|e| format!("invalid signature encoding: {}", e))?
        .try_into()
        .map_err(|_| "invalid signature length".to_string())?;
    let payload = receipt.signing_payload().map_err(|e| e.to_string())?;
    key.verify(&payload, &Signature::from_bytes(&sig_bytes))
        .map_err(|e| e.to_string())
}
