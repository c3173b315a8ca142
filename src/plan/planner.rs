// src/plan/planner.rs

//! Plan construction and impact analysis
//!
//! Steps are emitted in a fixed order: dependency merges, files, templates,
//! jobs, events, transforms, schedules, post-actions. The planner only reads
//! the target tree.

use super::{
    CommandImpact, Conflict, ConflictKind, CreateImpact, Impacts, ModifyImpact, ModifyRisk, Plan,
    PlanStatus, Step,
};
use crate::capability::EngineContext;
use crate::config::EngineConfig;
use crate::descriptor::ProjectDescriptor;
use crate::error::{Error, PlanErrorKind, Result};
use crate::filesystem::{modified_within, probe, safe_join};
use crate::inputs::Resolved;
use crate::manifest::{ConflictPolicy, JobSpec, Pack, WriteMode};
use crate::mode::Mode;
use crate::when;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Commands whose post-actions are flagged as high risk in impacts
const HIGH_RISK_COMMANDS: &[&str] = &[
    "rm", "sudo", "su", "curl", "wget", "dd", "mkfs", "chmod", "chown", "shutdown", "reboot",
];

/// Render context shared by the planner and the applier
///
/// Inputs are visible both under `inputs.` and at top level; `date`,
/// `timestamp` and `pack` are fixed helpers.
pub fn template_context(pack: &Pack, inputs: &Resolved, ctx: &EngineContext) -> Value {
    let mut context = inputs.clone();
    let now = ctx.clock.now();
    context.insert("inputs".to_string(), Value::Object(inputs.clone()));
    context.insert(
        "date".to_string(),
        Value::String(now.format("%Y-%m-%d").to_string()),
    );
    context.insert("timestamp".to_string(), Value::String(ctx.clock.timestamp()));
    context.insert(
        "pack".to_string(),
        json!({
            "id": pack.manifest.id,
            "version": pack.manifest.version.to_string(),
        }),
    );
    Value::Object(context)
}

pub struct Planner {
    recent_window: Duration,
}

impl Planner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            recent_window: config.recent_modification_window(),
        }
    }

    /// Build a plan for `pack` over `target` in `mode`
    pub fn plan(
        &self,
        pack: &Pack,
        target: &Path,
        mode: Mode,
        inputs: &Resolved,
        ctx: &EngineContext,
    ) -> Result<Plan> {
        let manifest = &pack.manifest;
        if !manifest.supports(mode) {
            return Err(Error::Mode {
                detected: mode.to_string(),
                allowed: manifest.modes.iter().map(|m| m.to_string()).collect(),
            });
        }

        let mut builder = PlanBuilder::new(self, target, inputs, mode);
        let conflict_policy = manifest.idempotency.conflict;

        // Dependency merges
        if !manifest.dependencies.is_empty() {
            builder.dependencies("dependencies", &manifest.dependencies)?;
        }

        // Files
        for file in &manifest.provides.files {
            if !builder.selected(file.when.as_deref())? {
                continue;
            }
            let src = pack.asset_path("files", &file.src)?;
            let size = source_size(&src)?;
            let mode = file.mode.unwrap_or(conflict_policy.default_write_mode());
            let dest = safe_join(target, &file.target)?;
            builder.file_like("file", dest, mode, Some(size), true, |target, exists, size| {
                Step::File {
                    src: src.clone(),
                    target,
                    mode,
                    exists,
                    size,
                }
            });
        }

        // Templates
        let context = template_context(pack, inputs, ctx);
        for template in &manifest.provides.templates {
            if !builder.selected(template.when.as_deref())? {
                continue;
            }
            let src = pack.asset_path("templates", &template.src)?;
            let source = fs::read_to_string(&src).map_err(|e| read_error(&src, e))?;
            let dest = safe_join(target, &template.target)?;
            let mode = template.mode.unwrap_or(conflict_policy.default_write_mode());

            let rendered_size = match ctx.renderer.render(&source, &context) {
                Ok(bytes) => {
                    let len = bytes.len() as u64;
                    builder.rendered.insert(dest.clone(), bytes);
                    len
                }
                Err(e) => {
                    // Surfaced again as a step failure when applied
                    debug!("Template {} does not render yet: {}", template.src, e);
                    source.len() as u64
                }
            };

            let executable = template.executable;
            builder.file_like(
                "template",
                dest,
                mode,
                Some(rendered_size),
                true,
                |target, exists, size| Step::Template {
                    src: src.clone(),
                    target,
                    mode,
                    executable,
                    exists,
                    size,
                },
            );
        }

        // Jobs and events
        for (kind, subdir, specs) in [
            ("job", "jobs", &manifest.provides.jobs),
            ("event", "events", &manifest.provides.events),
        ] {
            for spec in specs {
                if !builder.selected(spec.when.as_deref())? {
                    continue;
                }
                let src = pack.asset_path(subdir, &spec.src)?;
                let size = source_size(&src)?;
                let dest = safe_join(target, default_job_target(spec, subdir))?;
                let mode = conflict_policy.default_write_mode();
                let id = spec.id.clone();
                builder.file_like(kind, dest, mode, Some(size), false, |target, exists, _| {
                    if kind == "job" {
                        Step::Job {
                            src: src.clone(),
                            target,
                            id: id.clone(),
                            mode,
                            exists,
                        }
                    } else {
                        Step::Event {
                            src: src.clone(),
                            target,
                            id: id.clone(),
                            mode,
                            exists,
                        }
                    }
                });
            }
        }

        // Transforms
        for transform in &manifest.provides.transforms {
            if !builder.selected(transform.when.as_deref())? {
                continue;
            }
            let dest = safe_join(target, &transform.target)?;
            let step = Step::Transform {
                target: dest.clone(),
                kind: transform.kind,
                spec: transform.spec.clone(),
                anchor: transform.anchor.clone(),
                position: transform.position,
                exists: false,
            };
            builder.transform(step, dest);
        }

        // Schedules (data only)
        for schedule in &manifest.provides.schedules {
            if !builder.selected(schedule.when.as_deref())? {
                continue;
            }
            builder.steps.push(Step::Schedule {
                job: schedule.job.clone(),
                cron: schedule.cron.clone(),
            });
        }

        // Post-actions
        for action in &manifest.post_install {
            builder.impacts.commands.push(CommandImpact {
                action: action.action.clone(),
                args: action.args.clone(),
                risk: command_risk(&action.action, &action.args).to_string(),
            });
            builder.steps.push(Step::PostAction {
                action: action.action.clone(),
                args: action.args.clone(),
                timeout: action.timeout,
            });
        }

        builder.finish(pack, target, mode, inputs, conflict_policy)
    }
}

struct PlanBuilder<'a> {
    planner: &'a Planner,
    target: &'a Path,
    inputs: &'a Resolved,
    mode: Mode,
    steps: Vec<Step>,
    skipped: Vec<PathBuf>,
    impacts: Impacts,
    rendered: BTreeMap<PathBuf, Vec<u8>>,
    /// Paths an earlier step will create
    planned: HashSet<PathBuf>,
    /// Paths already listed in creates or modifies
    impacted: HashSet<PathBuf>,
}

impl<'a> PlanBuilder<'a> {
    fn new(planner: &'a Planner, target: &'a Path, inputs: &'a Resolved, mode: Mode) -> Self {
        Self {
            planner,
            target,
            inputs,
            mode,
            steps: Vec::new(),
            skipped: Vec::new(),
            impacts: Impacts::default(),
            rendered: BTreeMap::new(),
            planned: HashSet::new(),
            impacted: HashSet::new(),
        }
    }

    fn selected(&self, when: Option<&str>) -> Result<bool> {
        when::evaluate(when, self.mode, self.inputs)
    }

    fn dependencies(&mut self, section: &str, proposed: &BTreeMap<String, String>) -> Result<()> {
        let outcome = match ProjectDescriptor::load(self.target)? {
            Some(desc) => desc.diff(section, proposed),
            None => crate::descriptor::MergeOutcome {
                added: proposed.keys().cloned().collect(),
                disagreements: Vec::new(),
            },
        };

        for (name, existing, wanted) in &outcome.disagreements {
            self.impacts.conflicts.push(Conflict {
                step: format!("dependencies:{}", name),
                reason: ConflictKind::DependencyVersion,
                message: format!("{} is {} in the project, pack wants {}", name, existing, wanted),
            });
        }

        if outcome.added.is_empty() {
            return Ok(());
        }

        let added: BTreeMap<String, String> = outcome
            .added
            .iter()
            .filter_map(|name| proposed.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        self.impacts.dependencies.extend(added.keys().cloned());
        self.steps.push(Step::Dependencies {
            sections: BTreeMap::from([(section.to_string(), added)]),
        });
        Ok(())
    }

    /// Emit a file-like step and its impact
    fn file_like(
        &mut self,
        kind: &str,
        dest: PathBuf,
        mode: WriteMode,
        new_size: Option<u64>,
        check_recent: bool,
        make: impl FnOnce(PathBuf, bool, u64) -> Step,
    ) {
        let (on_disk, current_size) = probe(&dest);
        let exists = on_disk || self.planned.contains(&dest);

        if exists && mode == WriteMode::Skip {
            debug!("{} exists, skipping", dest.display());
            self.skipped.push(dest);
            return;
        }

        if exists {
            let risk = match mode {
                WriteMode::Merge => ModifyRisk::Merge,
                _ => ModifyRisk::Overwrite,
            };
            if check_recent
                && mode == WriteMode::Write
                && on_disk
                && modified_within(&dest, self.planner.recent_window)
            {
                self.impacts.conflicts.push(Conflict {
                    step: format!("{}:{}", kind, dest.display()),
                    reason: ConflictKind::RecentModification,
                    message: "target was modified recently".to_string(),
                });
            }
            if self.impacted.insert(dest.clone()) {
                self.impacts.modifies.push(ModifyImpact {
                    path: dest.clone(),
                    kind: kind.to_string(),
                    risk,
                    size: new_size,
                });
            }
        } else {
            if self.impacted.insert(dest.clone()) {
                self.impacts.creates.push(CreateImpact {
                    path: dest.clone(),
                    kind: kind.to_string(),
                    size: new_size.unwrap_or(0),
                });
            }
            self.planned.insert(dest.clone());
        }

        let size = if on_disk { current_size } else { 0 };
        self.steps.push(make(dest, exists, size));
    }

    fn transform(&mut self, mut step: Step, dest: PathBuf) {
        let exists = dest.is_file() || self.planned.contains(&dest);
        if let Step::Transform { exists: e, .. } = &mut step {
            *e = exists;
        }

        if !exists {
            self.impacts.conflicts.push(Conflict {
                step: step.label(),
                reason: ConflictKind::MissingTarget,
                message: "transform target does not exist".to_string(),
            });
        } else if self.impacted.insert(dest.clone()) {
            let size = fs::metadata(&dest).map(|m| m.len()).ok();
            self.impacts.modifies.push(ModifyImpact {
                path: dest,
                kind: "transform".to_string(),
                risk: ModifyRisk::Transform,
                size,
            });
        }
        self.steps.push(step);
    }

    fn finish(
        mut self,
        pack: &Pack,
        target: &Path,
        mode: Mode,
        inputs: &Resolved,
        conflict_policy: ConflictPolicy,
    ) -> Result<Plan> {
        self.impacts.estimated_changes = self.impacts.creates.len()
            + self.impacts.modifies.len()
            + self.impacts.dependencies.len()
            + self.impacts.commands.len();

        let conflicts = self.impacts.conflicts.clone();
        let status = if conflicts.is_empty() {
            PlanStatus::Ready
        } else if conflict_policy == ConflictPolicy::Error
            || conflicts.iter().any(|c| c.reason.is_fatal())
        {
            PlanStatus::Error
        } else {
            PlanStatus::Conflicts
        };

        debug!(
            "Planned {}@{}: {} steps, {} conflicts ({})",
            pack.manifest.id,
            pack.manifest.version,
            self.steps.len(),
            conflicts.len(),
            status
        );

        Ok(Plan {
            pack_id: pack.manifest.id.clone(),
            pack_version: pack.manifest.version.to_string(),
            fingerprint: pack.fingerprint()?,
            target_root: target.to_path_buf(),
            mode,
            inputs: inputs.clone(),
            steps: self.steps,
            skipped: self.skipped,
            impacts: self.impacts,
            conflicts,
            status,
            up_to_date: false,
            rendered: self.rendered,
        })
    }
}

fn default_job_target(spec: &JobSpec, subdir: &str) -> PathBuf {
    match &spec.target {
        Some(target) => PathBuf::from(target),
        None => {
            let name = Path::new(&spec.src)
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&spec.src));
            Path::new(subdir).join(name)
        }
    }
}

fn source_size(src: &Path) -> Result<u64> {
    fs::metadata(src)
        .map(|m| m.len())
        .map_err(|e| read_error(src, e))
}

fn read_error(path: &Path, e: std::io::Error) -> Error {
    Error::Plan {
        kind: PlanErrorKind::ReadIo,
        message: format!("{}: {}", path.display(), e),
    }
}

/// `high` for destructive or network commands, `medium` otherwise
fn command_risk(action: &str, args: &[String]) -> &'static str {
    if action != "run" {
        return "high";
    }
    match args.first() {
        Some(cmd) if HIGH_RISK_COMMANDS.contains(&command_name(cmd)) => "high",
        _ => "medium",
    }
}

/// Basename of a command (`/usr/bin/rm` -> `rm`)
pub fn command_name(cmd: &str) -> &str {
    Path::new(cmd)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(cmd)
}
