// src/manifest/signature.rs
//! Pack signature file
//!
//! An optional `SIGNATURE` file under the pack root vouches for the
//! manifest. Ed25519 signatures cover the ASCII bytes of `manifest_hash`
//! (hex SHA-256 of the canonical manifest). RSA variants are parsed for
//! compatibility but not cryptographically checked.

use super::Pack;
use crate::error::{Error, ManifestErrorKind, Result, VerifyErrorKind};
use crate::receipt::SigningKeyPair;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub const SIGNATURE_FILE: &str = "SIGNATURE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    Ed25519,
    #[serde(rename = "RSA-SHA256")]
    RsaSha256,
    #[serde(rename = "RSA-SHA512")]
    RsaSha512,
}

/// Contents of `SIGNATURE`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackSignature {
    pub algorithm: SignatureAlgorithm,
    /// Base64-encoded signature bytes
    pub signature: String,
    pub timestamp: String,
    pub manifest_hash: String,
    pub signer: String,
    pub pack_id: String,
    pub pack_version: String,
}

/// Outcome of checking a pack signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Unsigned,
    Verified { signer: String },
    /// Parsed but the algorithm is not checked by this engine
    AcceptedNotVerified { algorithm: SignatureAlgorithm },
}

impl PackSignature {
    /// Read `<root>/SIGNATURE` if present
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(SIGNATURE_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let signature = serde_json::from_str(&content)
            .map_err(|e| Error::manifest(ManifestErrorKind::Parse, &path, e.to_string()))?;
        Ok(Some(signature))
    }

    /// Sign `pack` with an Ed25519 key
    pub fn sign(pack: &Pack, key: &SigningKeyPair, signer: &str, timestamp: &str) -> Self {
        let manifest_hash = pack.manifest_hash();
        Self {
            algorithm: SignatureAlgorithm::Ed25519,
            signature: BASE64.encode(key.sign_bytes(manifest_hash.as_bytes())),
            timestamp: timestamp.to_string(),
            manifest_hash,
            signer: signer.to_string(),
            pack_id: pack.manifest.id.clone(),
            pack_version: pack.manifest.version.to_string(),
        }
    }

    /// Write as pretty JSON to `<root>/SIGNATURE`
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(SIGNATURE_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content).map_err(|e| Error::io(&path, e))
    }
}

impl Pack {
    /// Check the pack signature against `key`
    pub fn verify_signature(&self, key: &VerifyingKey) -> Result<SignatureStatus> {
        let Some(sig) = &self.signature else {
            return Ok(SignatureStatus::Unsigned);
        };

        let integrity = |message: String| Error::Verify {
            kind: VerifyErrorKind::Integrity,
            message,
        };
        let invalid = |message: String| Error::Verify {
            kind: VerifyErrorKind::Signature,
            message,
        };

        if sig.pack_id != self.manifest.id || sig.pack_version != self.manifest.version.to_string()
        {
            return Err(integrity(format!(
                "signature is for {}@{}, pack is {}@{}",
                sig.pack_id, sig.pack_version, self.manifest.id, self.manifest.version
            )));
        }

        let actual = self.manifest_hash();
        if sig.manifest_hash != actual {
            return Err(integrity(format!(
                "manifest hash mismatch: signed {}, actual {}",
                sig.manifest_hash, actual
            )));
        }

        match sig.algorithm {
            SignatureAlgorithm::Ed25519 => {
                let bytes = BASE64
                    .decode(&sig.signature)
                    .map_err(|e| invalid(format!("invalid base64 signature: {}", e)))?;
                let bytes: [u8; 64] = bytes
                    .try_into()
                    .map_err(|_| invalid("invalid signature length".to_string()))?;
                key.verify(sig.manifest_hash.as_bytes(), &Signature::from_bytes(&bytes))
                    .map_err(|e| invalid(format!("signature verification failed: {}", e)))?;
                debug!("Pack {} signature verified ({})", self.manifest.id, sig.signer);
                Ok(SignatureStatus::Verified {
                    signer: sig.signer.clone(),
                })
            }
            algorithm => {
                warn!(
                    "Pack {} signed with {:?}: accepted, not verified",
                    self.manifest.id, algorithm
                );
                Ok(SignatureStatus::AcceptedNotVerified { algorithm })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_pack(dir: &Path, version: &str) {
        fs::write(
            dir.join("pack.json"),
            format!(r#"{{"id":"demo","version":"{}"}}"#, version),
        )
        .unwrap();
    }

    #[test]
    fn test_sign_and_verify_pack() {
        let temp_dir = TempDir::new().unwrap();
        write_pack(temp_dir.path(), "1.0.0");
        let key = SigningKeyPair::generate();

        let pack = Pack::load(temp_dir.path()).unwrap();
        PackSignature::sign(&pack, &key, "release-bot", "2024-03-01T00:00:00Z")
            .save(temp_dir.path())
            .unwrap();

        let pack = Pack::load(temp_dir.path()).unwrap();
        assert_eq!(
            pack.verify_signature(&key.verifying_key()).unwrap(),
            SignatureStatus::Verified {
                signer: "release-bot".to_string()
            }
        );

        let other = SigningKeyPair::generate();
        assert!(matches!(
            pack.verify_signature(&other.verifying_key()),
            Err(Error::Verify { kind: VerifyErrorKind::Signature, .. })
        ));
    }

    #[test]
    fn test_tampered_manifest_fails() {
        let temp_dir = TempDir::new().unwrap();
        write_pack(temp_dir.path(), "1.0.0");
        let key = SigningKeyPair::generate();
        let pack = Pack::load(temp_dir.path()).unwrap();
        PackSignature::sign(&pack, &key, "bot", "2024-03-01T00:00:00Z")
            .save(temp_dir.path())
            .unwrap();

        fs::write(
            temp_dir.path().join("pack.json"),
            r#"{"id":"demo","version":"1.0.0","description":"changed"}"#,
        )
        .unwrap();
        let pack = Pack::load(temp_dir.path()).unwrap();
        assert!(matches!(
            pack.verify_signature(&key.verifying_key()),
            Err(Error::Verify { kind: VerifyErrorKind::Integrity, .. })
        ));
    }

    #[test]
    fn test_rsa_accepted_not_verified() {
        let temp_dir = TempDir::new().unwrap();
        write_pack(temp_dir.path(), "1.0.0");
        let pack = Pack::load(temp_dir.path()).unwrap();
        let sig = PackSignature {
            algorithm: SignatureAlgorithm::RsaSha256,
            signature: "AAAA".to_string(),
            timestamp: "2024-03-01T00:00:00Z".to_string(),
            manifest_hash: pack.manifest_hash(),
            signer: "legacy".to_string(),
            pack_id: "demo".to_string(),
            pack_version: "1.0.0".to_string(),
        };
        sig.save(temp_dir.path()).unwrap();
        let saved = fs::read_to_string(temp_dir.path().join(SIGNATURE_FILE)).unwrap();
        assert!(saved.contains("\"RSA-SHA256\""));

        let pack = Pack::load(temp_dir.path()).unwrap();
        let key = SigningKeyPair::generate();
        assert_eq!(
            pack.verify_signature(&key.verifying_key()).unwrap(),
            SignatureStatus::AcceptedNotVerified {
                algorithm: SignatureAlgorithm::RsaSha256
            }
        );
    }
}
