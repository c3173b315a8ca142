// src/lib.rs

//! gitvan-pack: pack lifecycle engine
//!
//! Applies declarative, versioned packs (files, templates, jobs, transforms
//! and dependency merges) onto a working tree and records a verifiable
//! receipt of every operation.
//!
//! # Architecture
//!
//! - Plans first: every operation is planned as pure data before anything
//!   on disk changes
//! - Receipts: canonical JSON, SHA-256 integrity, optional Ed25519 signature,
//!   stored as VCS notes and as the latest receipt per pack
//! - Idempotent: re-applying an installed pack at the same fingerprint is a
//!   no-op; removal undoes only files still matching their recorded hash
//! - Capabilities: VCS, templating, prompting, process execution, registry
//!   and clock are narrow traits carried in an [`EngineContext`]

pub mod apply;
pub mod canonical;
pub mod capability;
pub mod config;
pub mod descriptor;
mod error;
pub mod filesystem;
pub mod hash;
pub mod inputs;
pub mod lock;
pub mod manager;
pub mod manifest;
pub mod mode;
pub mod plan;
pub mod policy;
pub mod receipt;
pub mod version;
pub mod when;

pub use apply::{ApplyResult, ApplyStatus, Applier};
pub use capability::EngineContext;
pub use config::EngineConfig;
pub use error::{
    Error, InputErrorKind, LockErrorKind, ManifestErrorKind, PlanErrorKind, Result, SignErrorKind,
    VerifyErrorKind,
};
pub use manager::{PackManager, RemoveStatus, UpdateOutcome};
pub use manifest::{Pack, PackManifest};
pub use mode::Mode;
pub use plan::{Plan, Planner, Step};
pub use policy::{Policy, PolicyConfig};
pub use receipt::{Receipt, ReceiptStore};
pub use version::PackVersion;
