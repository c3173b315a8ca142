// src/descriptor.rs

//! Project descriptor (`package.json`) access
//!
//! Mode detection probes it, the planner compares proposed dependencies
//! against it and the applier merges dependencies into it. Writes go through
//! one atomic rename, so a failed merge never leaves a half-written file.

use crate::error::{Error, PlanErrorKind, Result};
use crate::filesystem::write_atomic;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "package.json";

/// Sections holding `name -> version` maps
pub const DEPENDENCY_SECTIONS: [&str; 2] = ["dependencies", "devDependencies"];

/// Result of merging one section
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Names that were not present before
    pub added: Vec<String>,
    /// `(name, existing, proposed)` for names already present at another version
    pub disagreements: Vec<(String, String, String)>,
}

#[derive(Debug, Clone)]
pub struct ProjectDescriptor {
    path: PathBuf,
    root: Map<String, Value>,
    existed: bool,
}

impl ProjectDescriptor {
    /// Read `<target>/package.json`, `None` when absent
    pub fn load(target: &Path) -> Result<Option<Self>> {
        let path = target.join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let value: Value = serde_json::from_str(&content).map_err(|e| Error::Plan {
            kind: PlanErrorKind::ReadIo,
            message: format!("{} is not valid JSON: {}", path.display(), e),
        })?;

        match value {
            Value::Object(root) => Ok(Some(Self {
                path,
                root,
                existed: true,
            })),
            _ => Err(Error::Plan {
                kind: PlanErrorKind::ReadIo,
                message: format!("{} is not a JSON object", path.display()),
            }),
        }
    }

    /// Existing descriptor, or an empty one that will be created on save
    pub fn load_or_new(target: &Path) -> Result<Self> {
        Ok(Self::load(target)?.unwrap_or_else(|| Self {
            path: target.join(DESCRIPTOR_FILE),
            root: Map::new(),
            existed: false,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn existed(&self) -> bool {
        self.existed
    }

    /// Version declared for `name` in `section`
    pub fn dependency(&self, section: &str, name: &str) -> Option<&str> {
        self.root.get(section)?.get(name)?.as_str()
    }

    /// True when `name` appears in any dependency section
    pub fn has_dependency(&self, name: &str) -> bool {
        DEPENDENCY_SECTIONS
            .iter()
            .any(|section| self.root.get(*section).and_then(|s| s.get(name)).is_some())
    }

    /// Compare `proposed` against `section` without changing anything
    pub fn diff(&self, section: &str, proposed: &BTreeMap<String, String>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (name, version) in proposed {
            match self.dependency(section, name) {
                None => outcome.added.push(name.clone()),
                Some(existing) if existing != version => outcome.disagreements.push((
                    name.clone(),
                    existing.to_string(),
                    version.clone(),
                )),
                Some(_) => {}
            }
        }
        outcome
    }

    /// Add names missing from `section`; existing versions are never changed
    pub fn merge(&mut self, section: &str, proposed: &BTreeMap<String, String>) -> Result<MergeOutcome> {
        let outcome = self.diff(section, proposed);
        if outcome.added.is_empty() {
            return Ok(outcome);
        }

        let entry = self
            .root
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(map) = entry else {
            return Err(Error::Apply {
                step: format!("dependencies:{}", section),
                cause: format!("'{}' in {} is not an object", section, DESCRIPTOR_FILE),
            });
        };

        for name in &outcome.added {
            if let Some(version) = proposed.get(name) {
                map.insert(name.clone(), Value::String(version.clone()));
            }
        }

        Ok(outcome)
    }

    /// Pretty JSON with a trailing newline
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&Value::Object(self.root.clone()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Write back atomically
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, &self.to_bytes()?)
    }
}
