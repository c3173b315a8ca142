// src/apply/mod.rs

//! Plan execution
//!
//! The [`Applier`] walks plan steps in emission order and records an
//! [`Artifact`] for every file it writes, in write order. Each step is
//! independent: a failure is collected as a [`StepError`] and, unless
//! `continue_on_error` is set, stops the walk. Dependency merges are atomic
//! over the project descriptor and always stop the walk when they fail.
//!
//! Cancellation is checked before every step.

mod merge;
mod postaction;
mod transform;

pub use merge::{decode_text, deep_merge, line_ending, merge_content, merge_text};
pub use postaction::run_post_action;
pub use transform::{apply_transform, line_replace, text_insert};

use crate::capability::EngineContext;
use crate::config::EngineConfig;
use crate::descriptor::ProjectDescriptor;
use crate::error::{Error, Result};
use crate::filesystem::{create_parent_dirs, set_executable, write_atomic};
use crate::hash;
use crate::inputs::Resolved;
use crate::manifest::{InsertPosition, Pack, WriteMode};
use crate::mode::Mode;
use crate::plan::{template_context, Plan, Step};
use crate::receipt::{Artifact, CreatedBy, Receipt, ReceiptStatus};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// Final disposition of an apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ApplyStatus {
    Success,
    Partial,
    Failure,
    NoOp,
}

impl ApplyStatus {
    /// Receipt status for this outcome; `None` for a no-op
    pub fn receipt_status(self) -> Option<ReceiptStatus> {
        match self {
            ApplyStatus::Success => Some(ReceiptStatus::Success),
            ApplyStatus::Partial => Some(ReceiptStatus::Partial),
            ApplyStatus::Failure => Some(ReceiptStatus::Failure),
            ApplyStatus::NoOp => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepError {
    pub step: String,
    pub cause: String,
}

impl StepError {
    fn from_error(step: &Step, err: Error) -> Self {
        let cause = match err {
            Error::Apply { cause, .. } => cause,
            other => other.to_string(),
        };
        Self {
            step: step.label(),
            cause,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub status: ApplyStatus,
    /// Labels of steps that completed
    pub applied: Vec<String>,
    pub errors: Vec<StepError>,
    pub inputs: Resolved,
    pub mode: Mode,
    pub artifacts: Vec<Artifact>,
    /// Targets left alone because they already exist
    pub skipped: Vec<PathBuf>,
    /// Schedules registered by the plan (`job`, `cron`)
    pub schedules: Vec<(String, String)>,
}

impl ApplyResult {
    fn no_op(plan: &Plan) -> Self {
        Self {
            status: ApplyStatus::NoOp,
            applied: Vec::new(),
            errors: Vec::new(),
            inputs: plan.inputs.clone(),
            mode: plan.mode,
            artifacts: Vec::new(),
            skipped: Vec::new(),
            schedules: Vec::new(),
        }
    }

    /// No-op for a pack whose installed receipt already covers it
    pub fn unchanged(installed: &Receipt) -> Self {
        let inputs = match installed.details.get("inputs") {
            Some(serde_json::Value::Object(inputs)) => inputs.clone(),
            _ => Resolved::new(),
        };
        Self {
            status: ApplyStatus::NoOp,
            applied: Vec::new(),
            errors: Vec::new(),
            inputs,
            mode: installed.mode.unwrap_or(Mode::ExistingTree),
            artifacts: Vec::new(),
            skipped: Vec::new(),
            schedules: Vec::new(),
        }
    }
}

/// Executes plans against a target tree
pub struct Applier {
    continue_on_error: bool,
    post_action_timeout: Duration,
}

impl Applier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            continue_on_error: config.continue_on_error,
            post_action_timeout: config.post_action_timeout(),
        }
    }

    /// Execute `plan`
    ///
    /// `previous` is the installed receipt for this pack, if any. A
    /// successful receipt with the plan's fingerprint makes this a no-op.
    pub fn apply(
        &self,
        pack: &Pack,
        plan: &Plan,
        previous: Option<&Receipt>,
        ctx: &EngineContext,
    ) -> Result<ApplyResult> {
        if let Some(prev) = previous
            && prev.is_success()
            && prev.id == plan.pack_id
            && prev.fingerprint == plan.fingerprint
        {
            info!("{}@{} already applied, nothing to do", plan.pack_id, plan.pack_version);
            return Ok(ApplyResult::no_op(plan));
        }

        let owned: HashSet<PathBuf> = previous
            .map(|r| {
                r.artifacts
                    .iter()
                    .filter(|a| a.engine_created())
                    .map(|a| a.target.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut run = Run {
            applier: self,
            pack,
            plan,
            ctx,
            owned,
            artifacts: Vec::new(),
        };
        let mut result = ApplyResult {
            skipped: plan.skipped.clone(),
            ..ApplyResult::no_op(plan)
        };

        info!(
            "Applying {}@{} to {} ({} steps)",
            plan.pack_id,
            plan.pack_version,
            plan.target_root.display(),
            plan.steps.len()
        );

        for step in &plan.steps {
            if let Err(e) = ctx.cancel.check(&step.label()) {
                if result.applied.is_empty() && result.errors.is_empty() {
                    return Err(e);
                }
                warn!("Cancelled before {}", step.label());
                result.errors.push(StepError::from_error(step, e));
                break;
            }

            debug!("Step {}", step.label());
            match run.step(step) {
                Ok(()) => {
                    if let Step::Schedule { job, cron } = step {
                        result.schedules.push((job.clone(), cron.clone()));
                    }
                    result.applied.push(step.label());
                }
                Err(e) => {
                    warn!("Step {} failed: {}", step.label(), e);
                    result.errors.push(StepError::from_error(step, e));
                    let atomic = matches!(step, Step::Dependencies { .. });
                    if atomic || !self.continue_on_error {
                        break;
                    }
                }
            }
        }

        result.artifacts = run.artifacts;
        result.status = if result.errors.is_empty() {
            ApplyStatus::Success
        } else if result.applied.is_empty() {
            ApplyStatus::Failure
        } else {
            ApplyStatus::Partial
        };

        info!(
            "Applied {}@{}: {} ({} steps, {} errors)",
            plan.pack_id,
            plan.pack_version,
            result.status,
            result.applied.len(),
            result.errors.len()
        );
        Ok(result)
    }
}

/// State of one apply walk
struct Run<'a> {
    applier: &'a Applier,
    pack: &'a Pack,
    plan: &'a Plan,
    ctx: &'a EngineContext,
    /// Paths the previous install created
    owned: HashSet<PathBuf>,
    artifacts: Vec<Artifact>,
}

impl Run<'_> {
    fn step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Dependencies { sections } => {
                let mut descriptor = ProjectDescriptor::load_or_new(&self.plan.target_root)?;
                for (section, proposed) in sections {
                    let outcome = descriptor.merge(section, proposed)?;
                    debug!("{}: added {:?}", section, outcome.added);
                }
                descriptor.save()
            }
            Step::File {
                src, target, mode, ..
            } => {
                let bytes = fs::read(src).map_err(|e| Error::io(src, e))?;
                self.write(target, &bytes, *mode, CreatedBy::File)
            }
            Step::Template {
                src,
                target,
                mode,
                executable,
                ..
            } => {
                let bytes = match self.plan.rendered.get(target) {
                    Some(bytes) => bytes.clone(),
                    None => {
                        let source = fs::read_to_string(src).map_err(|e| Error::io(src, e))?;
                        let context = template_context(self.pack, &self.plan.inputs, self.ctx);
                        self.ctx.renderer.render(&source, &context)?
                    }
                };
                self.write(target, &bytes, *mode, CreatedBy::Template)?;
                if *executable {
                    set_executable(target)?;
                }
                Ok(())
            }
            Step::Job {
                src, target, mode, ..
            } => {
                let bytes = fs::read(src).map_err(|e| Error::io(src, e))?;
                self.write(target, &bytes, *mode, CreatedBy::Job)
            }
            Step::Event {
                src, target, mode, ..
            } => {
                let bytes = fs::read(src).map_err(|e| Error::io(src, e))?;
                self.write(target, &bytes, *mode, CreatedBy::Event)
            }
            Step::Transform {
                target,
                kind,
                spec,
                anchor,
                position,
                ..
            } => {
                if !target.is_file() {
                    return Err(Error::Apply {
                        step: step.label(),
                        cause: "transform target does not exist".to_string(),
                    });
                }
                let before = fs::read(target).map_err(|e| Error::io(target, e))?;
                let after = apply_transform(
                    target,
                    &before,
                    *kind,
                    spec,
                    anchor.as_deref(),
                    position.unwrap_or(InsertPosition::After),
                )?;
                if after != before {
                    write_atomic(target, &after)?;
                }
                let orig_size = Some(before.len() as u64);
                self.record_file(target, &after, CreatedBy::Transform, orig_size);
                Ok(())
            }
            Step::Schedule { job, cron } => {
                debug!("Registered schedule {} ({})", job, cron);
                Ok(())
            }
            Step::PostAction {
                action,
                args,
                timeout,
            } => {
                let timeout = timeout
                    .map(Duration::from_secs)
                    .unwrap_or(self.applier.post_action_timeout);
                run_post_action(
                    action,
                    args,
                    timeout,
                    &self.plan.target_root,
                    &self.pack.manifest.environment,
                    self.ctx,
                )
            }
        }
    }

    /// Write bytes for a file-like step honoring its mode
    fn write(&mut self, target: &Path, bytes: &[u8], mode: WriteMode, created_by: CreatedBy) -> Result<()> {
        let exists = target.is_file();
        if exists && mode == WriteMode::Skip {
            debug!("{} exists, skipped", target.display());
            return Ok(());
        }

        let orig_size = if exists && !self.is_engine_path(target) {
            fs::metadata(target).ok().map(|m| m.len())
        } else {
            None
        };

        let content = if exists && mode == WriteMode::Merge {
            let existing = fs::read(target).map_err(|e| Error::io(target, e))?;
            merge_content(target, &existing, bytes)?
        } else {
            bytes.to_vec()
        };

        for dir in create_parent_dirs(&self.plan.target_root, target)? {
            self.artifacts.push(Artifact::directory(dir, created_by));
        }
        write_atomic(target, &content)?;
        self.record_file(target, &content, created_by, orig_size);
        Ok(())
    }

    /// Paths this run or the previous install brought into existence
    fn is_engine_path(&self, target: &Path) -> bool {
        self.owned.contains(target)
            || self
                .artifacts
                .iter()
                .any(|a| a.target == target && a.engine_created())
    }

    /// Record the bytes now at `target`; a later write of the same path
    /// updates the earlier artifact's hash
    fn record_file(&mut self, target: &Path, content: &[u8], created_by: CreatedBy, orig_size: Option<u64>) {
        let digest = hash::sha256(content);
        if let Some(existing) = self
            .artifacts
            .iter_mut()
            .find(|a| a.target == target && a.hash.is_some())
        {
            existing.hash = Some(digest);
            return;
        }
        self.artifacts
            .push(Artifact::file(target.to_path_buf(), digest, created_by, orig_size));
    }
}
