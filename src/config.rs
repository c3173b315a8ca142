// src/config.rs
//! Engine configuration
//!
//! TOML file layout (every key optional):
//!
//! ```toml
//! engine_name = "gitvan"
//! engine_dir = ".gitvan"
//! notes_ref = "refs/notes/gitvan/pack-receipts"
//! key_dir = "/home/me/.gitvan/keys"
//! sign_receipts = false
//! continue_on_error = false
//! parallelism = 1
//! post_action_timeout_secs = 30
//!
//! [policy]
//! requireSignature = false
//! allowedCommands = ["npm", "git"]
//! ```
//!
//! Environment overlay: `GITVAN_AUTH` (registry credentials), `GITVAN_SIGN`
//! (enable signing) and `GITVAN_KEY_DIR` (key directory).

use crate::error::{Error, Result};
use crate::policy::PolicyConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ENGINE_NAME: &str = "gitvan";

/// Environment variable carrying registry credentials
pub const ENV_AUTH: &str = "GITVAN_AUTH";
/// Environment variable enabling receipt signing
pub const ENV_SIGN: &str = "GITVAN_SIGN";
/// Environment variable overriding the key directory
pub const ENV_KEY_DIR: &str = "GITVAN_KEY_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name used in notes refs and the default key directory
    pub engine_name: String,

    /// Per-target state directory (`<target>/<engine_dir>`)
    pub engine_dir: String,

    /// Notes ref receipts are attached under
    pub notes_ref: String,

    /// Directory holding `private.ed25519` / `public.ed25519`
    pub key_dir: PathBuf,

    pub sign_receipts: bool,

    /// Generate a key pair on first signing when none exists
    pub generate_keys: bool,

    pub continue_on_error: bool,

    /// Worker threads for artifact hashing
    pub parallelism: usize,

    pub post_action_timeout_secs: u64,

    /// Age after which a target lock is considered abandoned
    pub stale_lock_secs: u64,

    /// Window for the recent-modification conflict heuristic
    pub recent_modification_secs: u64,

    pub policy: PolicyConfig,

    /// Registry credentials, never written back to disk
    #[serde(skip)]
    pub registry_auth: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::named(DEFAULT_ENGINE_NAME)
    }
}

impl EngineConfig {
    /// Defaults for an engine called `name`
    pub fn named(name: &str) -> Self {
        Self {
            engine_name: name.to_string(),
            engine_dir: format!(".{}", name),
            notes_ref: format!("refs/notes/{}/pack-receipts", name),
            key_dir: default_key_dir(name),
            sign_receipts: false,
            generate_keys: true,
            continue_on_error: false,
            parallelism: 1,
            post_action_timeout_secs: 30,
            stale_lock_secs: 3600,
            recent_modification_secs: 24 * 3600,
            policy: PolicyConfig::default(),
            registry_auth: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `GITVAN_*` variables from the process environment
    pub fn with_env(self) -> Self {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay `GITVAN_*` variables from an arbitrary lookup
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(auth) = lookup(ENV_AUTH).filter(|v| !v.is_empty()) {
            self.registry_auth = Some(auth);
        }
        if let Some(sign) = lookup(ENV_SIGN) {
            self.sign_receipts = matches!(
                sign.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(dir) = lookup(ENV_KEY_DIR).filter(|v| !v.is_empty()) {
            self.key_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine_name.trim().is_empty() {
            return Err(Error::Config("engine_name must not be empty".to_string()));
        }
        if self.engine_dir.trim().is_empty()
            || Path::new(&self.engine_dir).is_absolute()
            || self.engine_dir.contains("..")
        {
            return Err(Error::Config(format!(
                "engine_dir must be a relative directory name, got '{}'",
                self.engine_dir
            )));
        }
        if !self.notes_ref.starts_with("refs/notes/") {
            return Err(Error::Config(format!(
                "notes_ref must live under refs/notes/, got '{}'",
                self.notes_ref
            )));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `<target>/<engine_dir>`
    pub fn state_dir(&self, target: &Path) -> PathBuf {
        target.join(&self.engine_dir)
    }

    /// `<target>/<engine_dir>/packs/<id>`
    pub fn pack_dir(&self, target: &Path, pack_id: &str) -> PathBuf {
        self.state_dir(target).join("packs").join(pack_id)
    }

    /// `<target>/<engine_dir>/packs/<id>/receipt.json`
    pub fn receipt_path(&self, target: &Path, pack_id: &str) -> PathBuf {
        self.pack_dir(target, pack_id).join("receipt.json")
    }

    /// `<target>/<engine_dir>/.lock`
    pub fn lock_path(&self, target: &Path) -> PathBuf {
        self.state_dir(target).join(".lock")
    }

    pub fn post_action_timeout(&self) -> Duration {
        Duration::from_secs(self.post_action_timeout_secs)
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    pub fn recent_modification_window(&self) -> Duration {
        Duration::from_secs(self.recent_modification_secs)
    }
}

fn default_key_dir(name: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!(".{}", name))
        .join("keys")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine_dir, ".gitvan");
        assert_eq!(config.notes_ref, "refs/notes/gitvan/pack-receipts");
        assert!(config.key_dir.ends_with(".gitvan/keys"));
        assert_eq!(config.post_action_timeout(), Duration::from_secs(30));
        assert_eq!(config.parallelism, 1);
        assert!(!config.sign_receipts);
    }

    #[test]
    fn test_paths() {
        let config = EngineConfig::default();
        let target = Path::new("/work/app");
        assert_eq!(
            config.receipt_path(target, "demo"),
            PathBuf::from("/work/app/.gitvan/packs/demo/receipt.json")
        );
        assert_eq!(
            config.lock_path(target),
            PathBuf::from("/work/app/.gitvan/.lock")
        );
    }

    #[test]
    fn test_parse_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gitvan.toml");
        std::fs::write(
            &path,
            r#"
sign_receipts = true
parallelism = 4
key_dir = "/tmp/keys"

[policy]
requireSignature = true
allowedCommands = ["git"]
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(config.sign_receipts);
        assert_eq!(config.parallelism, 4);
        assert_eq!(config.key_dir, PathBuf::from("/tmp/keys"));
        assert!(config.policy.require_signature);
        assert_eq!(config.policy.allowed_commands, vec!["git".to_string()]);
        // Untouched keys keep defaults
        assert_eq!(config.engine_dir, ".gitvan");
    }

    #[test]
    fn test_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "parallelism = 0\n").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(Error::Config(_))));

        std::fs::write(&path, "engine_dir = \"../escape\"\n").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = [
            (ENV_AUTH, "token-123"),
            (ENV_SIGN, "yes"),
            (ENV_KEY_DIR, "/secure/keys"),
        ]
        .into_iter()
        .collect();

        let config =
            EngineConfig::default().with_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.registry_auth.as_deref(), Some("token-123"));
        assert!(config.sign_receipts);
        assert_eq!(config.key_dir, PathBuf::from("/secure/keys"));
    }
}
