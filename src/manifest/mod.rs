// src/manifest/mod.rs
//! Pack manifest (`pack.json`) parsing and data structures
//!
//! A pack is a directory holding `pack.json` plus asset subdirectories
//! (`files/`, `templates/`, `jobs/`, `events/`). Loading validates the
//! required fields, fills defaults for every optional field and keeps
//! unknown top-level fields around untouched.

mod signature;

pub use signature::{PackSignature, SignatureAlgorithm, SignatureStatus, SIGNATURE_FILE};

use crate::canonical;
use crate::capability::EngineContext;
use crate::error::{Error, ManifestErrorKind, Result};
use crate::filesystem::{sanitize_path, validate_component};
use crate::mode::Mode;
use crate::version::{check_runtime, PackVersion, RuntimeCheck};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::Display;
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "pack.json";

/// The only manifest abi this engine understands
pub const SUPPORTED_ABI: &str = "1.0";

/// Root structure of pack.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackManifest {
    pub id: String,
    pub version: PackVersion,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub requires: Requires,

    #[serde(default)]
    pub detects: Vec<Detect>,

    /// Supported target modes (both when omitted)
    #[serde(default = "default_modes")]
    pub modes: Vec<Mode>,

    #[serde(default)]
    pub inputs: Vec<InputSchema>,

    /// Free-form tags consumed by policy
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Project descriptor dependencies (name -> version constraint)
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default)]
    pub provides: Provides,

    #[serde(default)]
    pub post_install: Vec<PostAction>,

    #[serde(default)]
    pub idempotency: Idempotency,

    /// Registry the pack was published to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Environment variables the pack wants exposed to post-actions
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Unknown top-level fields, preserved but ignored
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_modes() -> Vec<Mode> {
    Mode::ALL.to_vec()
}

/// Capability requirements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requires {
    /// VCS must be available (hard)
    #[serde(default)]
    pub vcs: bool,

    /// Runtime name -> semver requirement (soft)
    #[serde(default)]
    pub runtimes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectKind {
    File,
    Glob,
    ProjectDep,
}

/// One mode detection probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detect {
    pub kind: DetectKind,
    pub pattern: String,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    String,
    Text,
    Number,
    Boolean,
    Path,
    Select,
    Multiselect,
}

/// Declared pack input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSchema {
    pub key: String,

    #[serde(rename = "type", default)]
    pub input_type: InputType,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default)]
    pub description: String,
}

impl InputSchema {
    /// Required iff `required` is set and there is no default
    pub fn is_required(&self) -> bool {
        self.required && self.default.is_none()
    }
}

/// How a file-like step treats its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WriteMode {
    Write,
    Skip,
    Merge,
}

/// `idempotency.conflict`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConflictPolicy {
    #[default]
    Skip,
    Overwrite,
    Merge,
    Error,
}

impl ConflictPolicy {
    /// Write mode used for items that do not declare one
    pub fn default_write_mode(self) -> WriteMode {
        match self {
            ConflictPolicy::Skip => WriteMode::Skip,
            ConflictPolicy::Overwrite | ConflictPolicy::Error => WriteMode::Write,
            ConflictPolicy::Merge => WriteMode::Merge,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idempotency {
    /// Fields hashed into the fingerprint
    #[serde(default = "default_fingerprint_fields")]
    pub fingerprint: Vec<String>,

    #[serde(default)]
    pub conflict: ConflictPolicy,
}

impl Default for Idempotency {
    fn default() -> Self {
        Self {
            fingerprint: default_fingerprint_fields(),
            conflict: ConflictPolicy::default(),
        }
    }
}

fn default_fingerprint_fields() -> Vec<String> {
    vec![
        "version".to_string(),
        "provides".to_string(),
        "dependencies".to_string(),
    ]
}

/// Literal file copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    pub src: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WriteMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// Inputs-rendered file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub src: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<WriteMode>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// Job or event copied into its conventional subtree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub src: String,
    /// Defaults to `jobs/<file name>` or `events/<file name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransformKind {
    JsonMerge,
    TextInsert,
    LineReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    Before,
    #[default]
    After,
}

/// In-place edit of an existing file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub target: String,
    pub kind: TransformKind,
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<InsertPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// Job schedule registration (data only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub job: String,
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provides {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<TemplateSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<JobSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedules: Vec<ScheduleSpec>,
}

impl Provides {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
            && self.templates.is_empty()
            && self.jobs.is_empty()
            && self.events.is_empty()
            && self.transforms.is_empty()
            && self.schedules.is_empty()
    }
}

/// Post-install action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAction {
    pub action: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds; the engine default applies when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl PackManifest {
    /// Parse and normalize manifest JSON; `path` is only used in errors
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let raw: Value = serde_json::from_str(content)
            .map_err(|e| Error::manifest(ManifestErrorKind::Parse, path, e.to_string()))?;
        Self::from_value(raw, path)
    }

    /// Build from an already parsed JSON value
    pub fn from_value(raw: Value, path: &Path) -> Result<Self> {
        let Some(object) = raw.as_object() else {
            return Err(Error::manifest(
                ManifestErrorKind::Schema,
                path,
                "manifest must be a JSON object",
            ));
        };

        for field in ["id", "version"] {
            if !object.contains_key(field) {
                return Err(Error::manifest(
                    ManifestErrorKind::Schema,
                    path,
                    format!("missing required field: {}", field),
                ));
            }
        }

        // abi is checked before the full shape so a newer manifest format
        // reports as an abi mismatch rather than a schema error
        if let Some(abi) = object.get("abi") {
            let found = abi.as_str().map(str::to_string).unwrap_or_else(|| abi.to_string());
            if found != SUPPORTED_ABI {
                return Err(Error::Abi {
                    found,
                    expected: SUPPORTED_ABI.to_string(),
                });
            }
        }

        let mut manifest: PackManifest = serde_json::from_value(raw)
            .map_err(|e| Error::manifest(ManifestErrorKind::Schema, path, e.to_string()))?;
        manifest.validate(path)?;
        manifest.normalize();
        Ok(manifest)
    }

    /// Validate ids, paths and patterns
    pub fn validate(&self, path: &Path) -> Result<()> {
        let schema = |message: String| Error::manifest(ManifestErrorKind::Schema, path, message);

        if self.id.trim().is_empty() {
            return Err(schema("id must not be empty".to_string()));
        }
        validate_component(&self.id).map_err(|e| schema(format!("invalid id: {}", e)))?;

        if self.modes.is_empty() {
            return Err(schema("modes must list at least one mode".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for input in &self.inputs {
            if input.key.is_empty() {
                return Err(schema("input with empty key".to_string()));
            }
            if !seen.insert(input.key.as_str()) {
                return Err(schema(format!("duplicate input '{}'", input.key)));
            }
            if let Some(pattern) = &input.pattern {
                regex::Regex::new(pattern)
                    .map_err(|e| schema(format!("input '{}' pattern: {}", input.key, e)))?;
            }
        }

        for detect in &self.detects {
            if detect.kind == DetectKind::Glob {
                glob::Pattern::new(&detect.pattern)
                    .map_err(|e| schema(format!("detect glob '{}': {}", detect.pattern, e)))?;
            }
        }

        let targets = self
            .provides
            .files
            .iter()
            .map(|f| (&f.src, Some(&f.target)))
            .chain(self.provides.templates.iter().map(|t| (&t.src, Some(&t.target))))
            .chain(self.provides.jobs.iter().map(|j| (&j.src, j.target.as_ref())))
            .chain(self.provides.events.iter().map(|e| (&e.src, e.target.as_ref())));
        for (src, target) in targets {
            sanitize_path(src).map_err(|e| schema(format!("src '{}': {}", src, e)))?;
            if let Some(target) = target {
                sanitize_path(target).map_err(|e| schema(format!("target '{}': {}", target, e)))?;
            }
        }
        for transform in &self.provides.transforms {
            sanitize_path(&transform.target)
                .map_err(|e| schema(format!("transform target '{}': {}", transform.target, e)))?;
            if transform.kind == TransformKind::LineReplace {
                let anchor = transform.anchor.as_deref().ok_or_else(|| {
                    schema(format!("line-replace on '{}' needs an anchor", transform.target))
                })?;
                regex::Regex::new(anchor)
                    .map_err(|e| schema(format!("line-replace anchor '{}': {}", anchor, e)))?;
            }
        }

        for action in &self.post_install {
            if action.action.trim().is_empty() {
                return Err(schema("postInstall action with empty name".to_string()));
            }
        }

        Ok(())
    }

    /// Fill defaults that depend on other fields
    fn normalize(&mut self) {
        let default_mode = self.idempotency.conflict.default_write_mode();
        for file in &mut self.provides.files {
            file.mode.get_or_insert(default_mode);
        }
        for template in &mut self.provides.templates {
            template.mode.get_or_insert(default_mode);
        }
        for transform in &mut self.provides.transforms {
            if transform.kind == TransformKind::TextInsert {
                transform.position.get_or_insert(InsertPosition::After);
            }
        }
        self.modes.sort();
        self.modes.dedup();
        if self.abi.is_none() {
            self.abi = Some(SUPPORTED_ABI.to_string());
        }
    }

    /// Hex SHA-256 of the canonical `{version, provides, dependencies}`
    ///
    /// Independent of the target tree, inputs and every other manifest field.
    pub fn fingerprint(&self) -> Result<String> {
        canonical::hash_value(&json!({
            "version": self.version,
            "provides": self.provides,
            "dependencies": self.dependencies,
        }))
    }

    pub fn supports(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }

    /// Check `requires`; returns warnings for unmet soft constraints
    pub fn check_constraints(&self, ctx: &EngineContext) -> Result<Vec<String>> {
        if self.requires.vcs && !ctx.vcs.is_available() {
            return Err(Error::Constraint {
                requirement: "vcs".to_string(),
            });
        }

        let mut warnings = Vec::new();
        for (runtime, requirement) in &self.requires.runtimes {
            let found = ctx.runtimes.get(runtime).map(String::as_str);
            let warning = match check_runtime(requirement, found) {
                RuntimeCheck::Satisfied => continue,
                RuntimeCheck::Unsatisfied { found } => format!(
                    "runtime {} {} does not satisfy {}",
                    runtime, found, requirement
                ),
                RuntimeCheck::Unknown => {
                    format!("runtime {} version unknown (requires {})", runtime, requirement)
                }
                RuntimeCheck::Invalid(detail) => {
                    format!("runtime {} requirement unusable: {}", runtime, detail)
                }
            };
            warn!("{}: {}", self.id, warning);
            warnings.push(warning);
        }
        Ok(warnings)
    }
}

/// A pack directory on disk
#[derive(Debug, Clone)]
pub struct Pack {
    pub root: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: PackManifest,
    /// Manifest as written, for the pack signature hash
    pub raw: Value,
    pub signature: Option<PackSignature>,
}

impl Pack {
    /// Load a pack from its directory (or from the `pack.json` inside it)
    pub fn load(path: &Path) -> Result<Self> {
        let (root, manifest_path) = if path.file_name().is_some_and(|n| n == MANIFEST_FILE) {
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (root, path.to_path_buf())
        } else {
            (path.to_path_buf(), path.join(MANIFEST_FILE))
        };

        if !manifest_path.is_file() {
            return Err(Error::manifest(
                ManifestErrorKind::MissingFile,
                &manifest_path,
                "manifest not found",
            ));
        }

        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            Error::manifest(ManifestErrorKind::MissingFile, &manifest_path, e.to_string())
        })?;
        let raw: Value = serde_json::from_str(&content).map_err(|e| {
            Error::manifest(ManifestErrorKind::Parse, &manifest_path, e.to_string())
        })?;
        let manifest = PackManifest::from_value(raw.clone(), &manifest_path)?;
        let signature = PackSignature::load(&root)?;

        debug!(
            "Loaded pack {}@{} from {}",
            manifest.id,
            manifest.version,
            root.display()
        );

        Ok(Self {
            root,
            manifest_path,
            manifest,
            raw,
            signature,
        })
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn fingerprint(&self) -> Result<String> {
        self.manifest.fingerprint()
    }

    /// Hex SHA-256 of the canonical manifest as written
    pub fn manifest_hash(&self) -> String {
        canonical::hash_value(&self.raw).unwrap_or_default()
    }

    /// Resolve a pack-relative asset: `<pack>/<subdir>/<src>` if present, else `<pack>/<src>`
    pub fn asset_path(&self, subdir: &str, src: &str) -> Result<PathBuf> {
        let relative = sanitize_path(src)?;
        let nested = self.root.join(subdir).join(&relative);
        if nested.exists() {
            return Ok(nested);
        }
        Ok(self.root.join(relative))
    }
}
