// src/error.rs

//! Error taxonomy for the pack lifecycle engine
//!
//! Every public entry point returns [`Result`]. Variants that break the
//! precondition of a whole operation (manifest, abi, constraint, input,
//! mode, policy, lock) are raised before any mutation; per-step failures
//! are collected by the applier instead of being returned.

use std::path::{Path, PathBuf};
use strum_macros::Display;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Sub-kinds of a manifest failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ManifestErrorKind {
    MissingFile,
    Parse,
    Schema,
}

/// Sub-kinds of an input resolution failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum InputErrorKind {
    MissingRequired,
    Coerce,
    Validate,
}

/// Sub-kinds of a planning failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PlanErrorKind {
    WhenExpr,
    ReadIo,
}

/// Sub-kinds of a signing failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SignErrorKind {
    NoKey,
    Permissions,
    Crypto,
}

/// Sub-kinds of a receipt verification failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum VerifyErrorKind {
    Integrity,
    Signature,
    CommitMissing,
    FieldsMissing,
}

/// Sub-kinds of a target lock failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum LockErrorKind {
    Held,
    StaleBroken,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("manifest error ({kind}) at {}: {message}", .path.display())]
    Manifest {
        kind: ManifestErrorKind,
        path: PathBuf,
        message: String,
    },

    #[error("unsupported pack abi '{found}' (engine supports '{expected}')")]
    Abi { found: String, expected: String },

    #[error("unmet requirement: {requirement}")]
    Constraint { requirement: String },

    #[error("input '{key}' ({kind}): {message}")]
    Input {
        kind: InputErrorKind,
        key: String,
        message: String,
    },

    #[error("detected mode {detected} is unsupported (pack allows: {})", .allowed.join(", "))]
    Mode {
        detected: String,
        allowed: Vec<String>,
    },

    #[error("plan error ({kind}): {message}")]
    Plan { kind: PlanErrorKind, message: String },

    #[error("conflict ({kind}) at step {step}")]
    Conflict { kind: String, step: String },

    #[error("policy denied {operation}: {}", .violations.join("; "))]
    PolicyViolation {
        violations: Vec<String>,
        operation: String,
    },

    #[error("step {step} failed: {cause}")]
    Apply { step: String, cause: String },

    #[error("signing failed ({kind}): {message}")]
    Sign { kind: SignErrorKind, message: String },

    #[error("verification failed ({kind}): {message}")]
    Verify {
        kind: VerifyErrorKind,
        message: String,
    },

    #[error("target lock {kind}: {}", .path.display())]
    Lock { kind: LockErrorKind, path: PathBuf },

    #[error("step {step} timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },

    #[error("pack '{0}' is not installed")]
    NotInstalled(String),

    #[error("operation cancelled before {0}")]
    Cancelled(String),

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("VCS error: {0}")]
    Vcs(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("exec error: {0}")]
    Exec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn manifest(
        kind: ManifestErrorKind,
        path: impl AsRef<Path>,
        message: impl Into<String>,
    ) -> Self {
        Self::Manifest {
            kind,
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn input(kind: InputErrorKind, key: &str, message: impl Into<String>) -> Self {
        Self::Input {
            kind,
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn sign(kind: SignErrorKind, message: impl Into<String>) -> Self {
        Self::Sign {
            kind,
            message: message.into(),
        }
    }

    /// Process exit code for a thin CLI driving the engine
    ///
    /// `0` success, `1` generic error, `2` policy violation, `3` conflict,
    /// `4` input validation failure, `5` abi mismatch.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PolicyViolation { .. } => 2,
            Self::Conflict { .. } => 3,
            Self::Input { .. } => 4,
            Self::Abi { .. } => 5,
            _ => 1,
        }
    }

    /// True for errors raised before the engine touched the target
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Manifest { .. }
                | Self::Abi { .. }
                | Self::Constraint { .. }
                | Self::Input { .. }
                | Self::Mode { .. }
                | Self::PolicyViolation { .. }
                | Self::Lock { .. }
        )
    }
}
