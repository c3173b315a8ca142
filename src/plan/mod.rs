// src/plan/mod.rs

//! Plans: ordered, typed steps plus impact and conflict summaries
//!
//! A plan is pure data. It is produced by the [`Planner`], consumed by the
//! applier, may be serialized, and is never changed after creation.

mod planner;

pub use planner::{command_name, template_context, Planner};

use crate::inputs::Resolved;
use crate::manifest::{InsertPosition, TransformKind, WriteMode};
use crate::mode::Mode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use strum_macros::Display;

/// One unit of work; the JSON form carries the variant in `"type"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Step {
    /// Descriptor section -> (name -> version), new names only
    Dependencies {
        sections: BTreeMap<String, BTreeMap<String, String>>,
    },
    File {
        src: PathBuf,
        target: PathBuf,
        mode: WriteMode,
        exists: bool,
        size: u64,
    },
    Template {
        src: PathBuf,
        target: PathBuf,
        mode: WriteMode,
        executable: bool,
        exists: bool,
        size: u64,
    },
    Job {
        src: PathBuf,
        target: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        mode: WriteMode,
        exists: bool,
    },
    Event {
        src: PathBuf,
        target: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        mode: WriteMode,
        exists: bool,
    },
    Transform {
        target: PathBuf,
        kind: TransformKind,
        spec: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<InsertPosition>,
        exists: bool,
    },
    Schedule {
        job: String,
        cron: String,
    },
    PostAction {
        action: String,
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
}

impl Step {
    /// Short label used in errors, logs and conflicts (`file:README.md`)
    pub fn label(&self) -> String {
        match self {
            Step::Dependencies { .. } => "dependencies".to_string(),
            Step::Schedule { job, .. } => format!("schedule:{}", job),
            Step::PostAction { action, args, .. } => {
                format!("post-action:{} {}", action, args.join(" "))
                    .trim_end()
                    .to_string()
            }
            other => format!(
                "{}:{}",
                other.kind(),
                other.target().map(|t| t.display().to_string()).unwrap_or_default()
            ),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Dependencies { .. } => "dependencies",
            Step::File { .. } => "file",
            Step::Template { .. } => "template",
            Step::Job { .. } => "job",
            Step::Event { .. } => "event",
            Step::Transform { .. } => "transform",
            Step::Schedule { .. } => "schedule",
            Step::PostAction { .. } => "post-action",
        }
    }

    /// Target path of file-like and transform steps
    pub fn target(&self) -> Option<&PathBuf> {
        match self {
            Step::File { target, .. }
            | Step::Template { target, .. }
            | Step::Job { target, .. }
            | Step::Event { target, .. }
            | Step::Transform { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Risk attached to a modified path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModifyRisk {
    Overwrite,
    Merge,
    Transform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateImpact {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyImpact {
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: String,
    pub risk: ModifyRisk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandImpact {
    pub action: String,
    pub args: Vec<String>,
    pub risk: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConflictKind {
    RecentModification,
    MissingTarget,
    DependencyVersion,
}

impl ConflictKind {
    /// Fatal regardless of the conflict policy
    pub fn is_fatal(self) -> bool {
        matches!(self, ConflictKind::MissingTarget)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub step: String,
    pub reason: ConflictKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impacts {
    pub creates: Vec<CreateImpact>,
    pub modifies: Vec<ModifyImpact>,
    pub conflicts: Vec<Conflict>,
    pub commands: Vec<CommandImpact>,
    pub dependencies: Vec<String>,
    pub estimated_changes: usize,
}

impl Impacts {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.modifies.is_empty()
            && self.commands.is_empty()
            && self.dependencies.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PlanStatus {
    Ready,
    Conflicts,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub pack_id: String,
    pub pack_version: String,
    pub fingerprint: String,
    pub target_root: PathBuf,
    pub mode: Mode,
    pub inputs: Resolved,
    pub steps: Vec<Step>,
    /// Targets left alone because they exist and the item says `skip`
    #[serde(default)]
    pub skipped: Vec<PathBuf>,
    pub impacts: Impacts,
    pub conflicts: Vec<Conflict>,
    pub status: PlanStatus,
    /// Set when the installed receipt already matches this pack
    #[serde(default)]
    pub up_to_date: bool,
    /// Rendered template bytes by target, reused by the applier
    #[serde(skip)]
    pub rendered: BTreeMap<PathBuf, Vec<u8>>,
}

impl Plan {
    pub fn has_fatal_conflicts(&self) -> bool {
        self.status == PlanStatus::Error
    }

    /// An empty plan for an installed pack whose artifacts are untouched
    pub fn into_up_to_date(mut self) -> Self {
        self.steps.clear();
        self.skipped.clear();
        self.impacts = Impacts::default();
        self.conflicts.clear();
        self.status = PlanStatus::Ready;
        self.up_to_date = true;
        self.rendered.clear();
        self
    }
}
