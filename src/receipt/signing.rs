// src/receipt/signing.rs
//! Ed25519 signing keys for receipts and pack signature files
//!
//! Keys live in a key directory as two TOML files holding base64 key
//! material: `private.ed25519` (mode 0600) and `public.ed25519` (mode 0644).

use crate::error::{Error, Result, SignErrorKind};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub const PRIVATE_KEY_FILE: &str = "private.ed25519";
pub const PUBLIC_KEY_FILE: &str = "public.ed25519";

const KEY_ALGORITHM: &str = "ed25519";

/// Something that can sign canonical receipt bytes
pub trait ReceiptSigner: Send + Sync {
    /// Raw public key bytes
    fn public_key(&self) -> Vec<u8>;

    /// Detached signature over `data`
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// An Ed25519 key pair
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: Option<String>,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            key_id: None,
        }
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        Self {
            signing_key: key,
            key_id: None,
        }
    }

    /// Set a human-readable key identifier
    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = Some(id.to_string());
        self
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Raw 64-byte signature over `data`
    pub fn sign_bytes(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }

    /// Write both key files into `key_dir`, creating it owner-only
    pub fn save(&self, key_dir: &Path) -> Result<()> {
        fs::create_dir_all(key_dir).map_err(|e| Error::io(key_dir, e))?;
        set_mode(key_dir, 0o700)?;

        let private_path = key_dir.join(PRIVATE_KEY_FILE);
        let private_data = KeyFile {
            algorithm: KEY_ALGORITHM.to_string(),
            key: BASE64.encode(self.signing_key.to_bytes()),
            key_id: self.key_id.clone(),
        };
        let private_toml = toml::to_string_pretty(&private_data)
            .map_err(|e| Error::sign(SignErrorKind::Crypto, e.to_string()))?;
        fs::write(&private_path, private_toml).map_err(|e| Error::io(&private_path, e))?;
        set_mode(&private_path, 0o600)?;

        let public_path = key_dir.join(PUBLIC_KEY_FILE);
        let public_data = KeyFile {
            algorithm: KEY_ALGORITHM.to_string(),
            key: self.public_key_base64(),
            key_id: self.key_id.clone(),
        };
        let public_toml = toml::to_string_pretty(&public_data)
            .map_err(|e| Error::sign(SignErrorKind::Crypto, e.to_string()))?;
        fs::write(&public_path, public_toml).map_err(|e| Error::io(&public_path, e))?;
        set_mode(&public_path, 0o644)?;

        Ok(())
    }

    /// Load the private key from `key_dir`
    ///
    /// Refuses a private key file readable by group or others.
    pub fn load(key_dir: &Path) -> Result<Self> {
        let path = key_dir.join(PRIVATE_KEY_FILE);
        if !path.exists() {
            return Err(Error::sign(
                SignErrorKind::NoKey,
                format!("no private key at {}", path.display()),
            ));
        }
        check_private_mode(&path)?;

        let key_file = read_key_file(&path)?;
        let key_bytes = decode_key(&key_file.key)?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| Error::sign(SignErrorKind::Crypto, "invalid private key length"))?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_array),
            key_id: key_file.key_id,
        })
    }

    /// Load the key pair, generating and saving one when `generate` is set
    pub fn load_or_generate(key_dir: &Path, generate: bool) -> Result<Self> {
        if key_dir.join(PRIVATE_KEY_FILE).exists() || !generate {
            return Self::load(key_dir);
        }
        let pair = Self::generate();
        pair.save(key_dir)?;
        info!("generated receipt signing key in {}", key_dir.display());
        Ok(pair)
    }
}

impl ReceiptSigner for SigningKeyPair {
    fn public_key(&self) -> Vec<u8> {
        self.verifying_key().as_bytes().to_vec()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.sign_bytes(data).to_vec())
    }
}

/// Key file format
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

fn read_key_file(path: &Path) -> Result<KeyFile> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let key_file: KeyFile = toml::from_str(&content).map_err(|e| {
        Error::sign(
            SignErrorKind::Crypto,
            format!("failed to parse key file {}: {}", path.display(), e),
        )
    })?;
    if key_file.algorithm != KEY_ALGORITHM {
        return Err(Error::sign(
            SignErrorKind::Crypto,
            format!("unsupported key algorithm: {}", key_file.algorithm),
        ));
    }
    Ok(key_file)
}

fn decode_key(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| Error::sign(SignErrorKind::Crypto, format!("invalid base64 in key file: {}", e)))
}

/// Load a public key file written by [`SigningKeyPair::save`]
pub fn load_public_key(path: &Path) -> Result<VerifyingKey> {
    let key_file = read_key_file(path)?;
    let bytes: [u8; 32] = decode_key(&key_file.key)?
        .try_into()
        .map_err(|_| Error::sign(SignErrorKind::Crypto, "invalid public key length"))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| Error::sign(SignErrorKind::Crypto, e.to_string()))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn check_private_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path).map_err(|e| Error::io(path, e))?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(Error::sign(
            SignErrorKind::Permissions,
            format!(
                "private key {} has mode {:o}, expected 600",
                path.display(),
                mode & 0o777
            ),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_private_mode(_path: &Path) -> Result<()> {
    Ok(())
}
