// src/manager/mod.rs

//! Pack lifecycle orchestration
//!
//! [`PackManager`] owns the stateless pipeline pieces (planner, applier,
//! policy) and drives them for one target at a time:
//!
//! ```text
//! apply:  Manifest -> Inputs -> Mode -> Planner -> Policy -> lock -> Applier -> Receipt
//! update: Receipt? -> (CURRENT | plan -> risks -> RISKS | apply)
//! remove: Receipt -> Policy -> lock -> reverse artifact walk -> Receipt
//! ```
//!
//! Everything that can refuse the operation runs before the target lock is
//! taken, so a refused operation never touches the tree.

mod remove;
mod risk;
mod verify;

pub use remove::{RemoveIssue, RemoveReport, RemoveStatus};
pub use risk::{assess_update_risks, RiskSeverity, UpdateRisk};
pub use verify::VerifyOutcome;

use crate::apply::{ApplyResult, ApplyStatus, Applier};
use crate::capability::EngineContext;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::hash::{file_state, FileState};
use crate::inputs::{InputResolver, Resolved};
use crate::lock::TargetLock;
use crate::manifest::Pack;
use crate::mode::ModeDetector;
use crate::plan::{Plan, Planner};
use crate::policy::{Policy, PolicyDecision, PolicySubject};
use crate::receipt::{
    Artifact, Operation, Receipt, ReceiptBuilder, ReceiptSigner, ReceiptStore, SigningKeyPair,
};
use crate::version::PackVersion;
use risk::DEPENDENCIES_DETAIL;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dry-run result of [`PackManager::plan`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub plan: Plan,
    pub decision: PolicyDecision,
    pub warnings: Vec<String>,
}

/// Result of an apply (or of the apply half of an update)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub result: ApplyResult,
    /// The receipt written for this operation; the installed one for a no-op
    pub receipt: Option<Receipt>,
    pub warnings: Vec<String>,
}

impl ApplyReport {
    pub fn status(&self) -> ApplyStatus {
        self.result.status
    }
}

/// Outcome of [`PackManager::update`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum UpdateOutcome {
    /// Installed version and fingerprint already match
    Current { receipt: Receipt },
    /// Refused: at least one high-severity risk and no `force`
    Risks { risks: Vec<UpdateRisk>, plan: Plan },
    Applied {
        risks: Vec<UpdateRisk>,
        report: ApplyReport,
    },
}

impl UpdateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UpdateOutcome::Current { .. } => "CURRENT",
            UpdateOutcome::Risks { .. } => "RISKS",
            UpdateOutcome::Applied { .. } => "APPLIED",
        }
    }
}

/// An installed pack with a newer registry version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedPack {
    pub id: String,
    pub installed: String,
    pub latest: String,
}

/// Everything resolved before planning and applying
struct Prepared {
    pack: Pack,
    plan: Plan,
    warnings: Vec<String>,
}

pub struct PackManager {
    config: EngineConfig,
    policy: Policy,
    planner: Planner,
    applier: Applier,
}

impl PackManager {
    pub fn new(config: EngineConfig) -> Self {
        let policy = Policy::new(config.policy.clone());
        Self {
            planner: Planner::new(&config),
            applier: Applier::new(&config),
            policy,
            config,
        }
    }

    /// Replace the policy built from the configuration
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn store(&self, ctx: &EngineContext) -> ReceiptStore {
        ReceiptStore::new(&self.config, ctx.vcs.clone())
    }

    /// Latest receipt of every installed pack, ordered by id
    pub fn status(&self, target: &Path, ctx: &EngineContext) -> Result<Vec<Receipt>> {
        let target = &resolve_target(target)?;
        self.store(ctx).installed(target)
    }

    /// Plan `pack_path` over `target` without touching it
    pub fn plan(
        &self,
        pack_path: &Path,
        target: &Path,
        inputs: &Map<String, Value>,
        ctx: &EngineContext,
    ) -> Result<PlanReport> {
        let target = &resolve_target(target)?;
        let pack = Pack::load(pack_path)?;
        let previous = self.store(ctx).latest(target, pack.id())?;
        let Prepared {
            pack,
            plan,
            warnings,
        } = self.prepare(pack, target, previous.as_ref(), inputs, ctx)?;

        let operation = if previous.is_some() {
            Operation::Update
        } else {
            Operation::Install
        };
        let version = pack.manifest.version.to_string();
        let decision = self.policy.evaluate(&PolicySubject::for_pack(
            &pack,
            &version,
            Some(&plan),
            operation,
            ctx.approved,
        ));

        let plan = match previous {
            Some(ref receipt) if is_untouched(receipt, &plan) => {
                debug!("{} is installed and untouched", receipt.label());
                plan.into_up_to_date()
            }
            _ => plan,
        };

        Ok(PlanReport {
            plan,
            decision,
            warnings,
        })
    }

    /// Install `pack_path` into `target`
    ///
    /// A successful installed receipt with the pack's fingerprint makes this
    /// a no-op, decided before inputs, mode, conflicts or the lock.
    pub fn apply(
        &self,
        pack_path: &Path,
        target: &Path,
        inputs: &Map<String, Value>,
        ctx: &EngineContext,
    ) -> Result<ApplyReport> {
        let target = &resolve_target(target)?;
        let pack = Pack::load(pack_path)?;
        let previous = self.store(ctx).latest(target, pack.id())?;
        if let Some(installed) = previous.as_ref()
            && already_applied(installed, &pack)?
        {
            info!("{} already applied, nothing to do", installed.label());
            return Ok(ApplyReport {
                result: ApplyResult::unchanged(installed),
                receipt: previous,
                warnings: Vec::new(),
            });
        }

        let prepared = self.prepare(pack, target, previous.as_ref(), inputs, ctx)?;
        self.execute(prepared, target, previous, Operation::Install, ctx)
    }

    /// Move an installed pack to the version at `pack_path`
    ///
    /// Without an installed receipt this is an apply. A `high` risk refuses
    /// the update unless `force` is set.
    pub fn update(
        &self,
        pack_path: &Path,
        target: &Path,
        inputs: &Map<String, Value>,
        force: bool,
        ctx: &EngineContext,
    ) -> Result<UpdateOutcome> {
        let target = &resolve_target(target)?;
        let pack = Pack::load(pack_path)?;
        let Some(previous) = self.store(ctx).latest(target, pack.id())? else {
            info!("{} is not installed, applying", pack.id());
            let prepared = self.prepare(pack, target, None, inputs, ctx)?;
            let report = self.execute(prepared, target, None, Operation::Install, ctx)?;
            return Ok(UpdateOutcome::Applied {
                risks: Vec::new(),
                report,
            });
        };

        let version = pack.manifest.version.to_string();
        if previous.version == version && already_applied(&previous, &pack)? {
            info!("{} is current", previous.label());
            return Ok(UpdateOutcome::Current { receipt: previous });
        }

        let prepared = self.prepare(pack, target, Some(&previous), inputs, ctx)?;
        let risks = assess_update_risks(&previous, &prepared.pack, &prepared.plan);
        for risk in &risks {
            debug!("update risk {} ({}): {}", risk.kind, risk.severity, risk.message);
        }

        let blocking = risks.iter().any(|r| r.severity == RiskSeverity::High);
        if blocking && !force {
            warn!(
                "Refusing to update {} to {}: high-severity risks",
                previous.label(),
                version
            );
            return Ok(UpdateOutcome::Risks {
                risks,
                plan: prepared.plan,
            });
        }

        let report = self.execute(prepared, target, Some(previous), Operation::Update, ctx)?;
        Ok(UpdateOutcome::Applied { risks, report })
    }

    /// Installed packs for which the registry knows a newer version
    pub fn outdated(&self, target: &Path, ctx: &EngineContext) -> Result<Vec<OutdatedPack>> {
        let target = &resolve_target(target)?;
        let registry = ctx
            .registry
            .as_ref()
            .ok_or_else(|| Error::Config("no registry capability configured".to_string()))?;

        let mut outdated = Vec::new();
        for receipt in self.store(ctx).installed(target)? {
            let installed = match receipt.version.parse::<PackVersion>() {
                Ok(v) => v,
                Err(e) => {
                    warn!("{}: unreadable installed version: {}", receipt.id, e);
                    continue;
                }
            };
            if let Some(latest) = registry.latest_version(&receipt.id)?
                && latest > installed
            {
                outdated.push(OutdatedPack {
                    id: receipt.id.clone(),
                    installed: installed.to_string(),
                    latest: latest.to_string(),
                });
            }
        }
        Ok(outdated)
    }

    /// Constraints, inputs, mode and plan for a loaded pack
    ///
    /// When `previous` already records this fingerprint as applied, its mode
    /// is reused: the tree the pack created no longer looks fresh.
    fn prepare(
        &self,
        pack: Pack,
        target: &Path,
        previous: Option<&Receipt>,
        provided: &Map<String, Value>,
        ctx: &EngineContext,
    ) -> Result<Prepared> {
        let warnings = pack.manifest.check_constraints(ctx)?;
        let inputs: Resolved =
            InputResolver::with_base_dir(&pack.manifest.inputs, target).resolve(provided, ctx.prompt.as_ref())?;
        let recorded = match previous {
            Some(receipt) if already_applied(receipt, &pack)? => receipt.mode,
            _ => None,
        };
        let mode = match recorded {
            Some(mode) => mode,
            None => ModeDetector::new().detect(target, &pack.manifest.detects),
        };
        debug!("{} over {}: mode {}", pack.id(), target.display(), mode);

        let plan = self.planner.plan(&pack, target, mode, &inputs, ctx)?;
        Ok(Prepared {
            pack,
            plan,
            warnings,
        })
    }

    /// Policy, lock, apply and receipt for a prepared pack
    fn execute(
        &self,
        prepared: Prepared,
        target: &Path,
        previous: Option<Receipt>,
        operation: Operation,
        ctx: &EngineContext,
    ) -> Result<ApplyReport> {
        let Prepared {
            pack,
            plan,
            warnings,
        } = prepared;

        if plan.has_fatal_conflicts() {
            return Err(conflict_error(&plan));
        }

        let version = pack.manifest.version.to_string();
        let decision = self.policy.evaluate(&PolicySubject::for_pack(
            &pack,
            &version,
            Some(&plan),
            operation,
            ctx.approved,
        ));
        self.enforce(&decision, ctx)?;

        let signing = self.signing_context(ctx)?;
        let _lock = TargetLock::acquire(&self.config.lock_path(target), self.config.stale_lock_age())?;

        let result = self.applier.apply(&pack, &plan, previous.as_ref(), ctx)?;
        let Some(status) = result.status.receipt_status() else {
            return Ok(ApplyReport {
                result,
                receipt: previous,
                warnings,
            });
        };

        let audit = self.policy.audit(&decision, &status.to_string(), ctx.clock.as_ref());
        let artifacts = carry_forward(previous.as_ref(), &result.artifacts);
        let schedules: Vec<Value> = result
            .schedules
            .iter()
            .map(|(job, cron)| json!({"job": job, "cron": cron}))
            .collect();

        let builder = ReceiptBuilder::new(operation, pack.id(), &version)
            .status(status)
            .fingerprint(&plan.fingerprint)
            .manifest_hash(&pack.manifest_hash())
            .mode(Some(result.mode))
            .previous_version(previous.as_ref().map(|r| r.version.clone()))
            .detail("applied", json!(result.applied))
            .detail("errors", serde_json::to_value(&result.errors)?)
            .detail("skipped", serde_json::to_value(&result.skipped)?)
            .detail("inputs", Value::Object(result.inputs.clone()))
            .detail("schedules", Value::Array(schedules))
            .detail("warnings", json!(warnings))
            .detail(DEPENDENCIES_DETAIL, json!(pack.manifest.dependencies))
            .detail("audit", audit.to_value())
            .artifacts(artifacts);

        let receipt = seal(builder, target, &signing)?;
        let path = self.store(ctx).write(&receipt)?;
        info!(
            "{} {}: {} (receipt {})",
            operation,
            receipt.label(),
            receipt.status,
            path.display()
        );

        Ok(ApplyReport {
            result,
            receipt: Some(receipt),
            warnings,
        })
    }

    /// Refuse a vetoed operation, logging its audit record
    fn enforce(&self, decision: &PolicyDecision, ctx: &EngineContext) -> Result<()> {
        if !decision.allowed {
            let record = self.policy.audit(decision, "denied", ctx.clock.as_ref());
            warn!(
                "policy {} denied {} of {}: {}",
                record.policy,
                record.operation,
                record.pack,
                record.violations.join("; ")
            );
        }
        decision.enforce()
    }

    /// Context whose signer seals receipts
    ///
    /// A caller-supplied signer wins. Otherwise, with `sign_receipts` on,
    /// the key pair comes from `key_dir`; failing to load it is fatal here,
    /// before anything is written.
    fn signing_context(&self, ctx: &EngineContext) -> Result<EngineContext> {
        if ctx.signer.is_some() || !self.config.sign_receipts {
            return Ok(ctx.clone());
        }
        let pair = SigningKeyPair::load_or_generate(&self.config.key_dir, self.config.generate_keys)?;
        let signer: Arc<dyn ReceiptSigner> = Arc::new(pair);
        Ok(ctx.clone().signer(signer))
    }
}

/// Absolute, lexically normalized form of a caller-supplied target
///
/// Receipts record artifact paths under the target, so a relative target
/// would tie them to the caller's working directory.
pub(crate) fn resolve_target(target: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(target).map_err(|e| Error::io(target, e))?;
    let mut resolved = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}

/// `installed` is a successful receipt for this exact pack content
fn already_applied(installed: &Receipt, pack: &Pack) -> Result<bool> {
    Ok(installed.is_success() && installed.id == pack.id() && installed.fingerprint == pack.fingerprint()?)
}

/// Build a receipt, falling back to an unsigned one when signing fails
/// after the tree was already changed
fn seal(builder: ReceiptBuilder, target: &Path, ctx: &EngineContext) -> Result<Receipt> {
    match builder.clone().build(target, ctx) {
        Err(Error::Sign { kind, message }) => {
            warn!("receipt left unsigned ({}): {}", kind, message);
            let mut unsigned = ctx.clone();
            unsigned.signer = None;
            builder.build(target, &unsigned)
        }
        other => other,
    }
}

/// Error for a plan whose conflicts forbid applying it
fn conflict_error(plan: &Plan) -> Error {
    let conflict = plan
        .conflicts
        .iter()
        .find(|c| c.reason.is_fatal())
        .or_else(|| plan.conflicts.first());
    match conflict {
        Some(c) => Error::Conflict {
            kind: c.reason.to_string(),
            step: c.step.clone(),
        },
        None => Error::Conflict {
            kind: plan.status.to_string().to_lowercase(),
            step: plan.pack_id.clone(),
        },
    }
}

/// Previous artifacts this run did not rewrite, followed by the new ones
///
/// Keeps write order intact so the reverse walk of a later remove undoes
/// the oldest writes last.
fn carry_forward(previous: Option<&Receipt>, current: &[Artifact]) -> Vec<Artifact> {
    let rewritten: HashSet<&PathBuf> = current.iter().map(|a| &a.target).collect();
    let mut artifacts: Vec<Artifact> = previous
        .map(|r| {
            r.artifacts
                .iter()
                .filter(|a| !rewritten.contains(&a.target))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    artifacts.extend(current.iter().cloned());
    artifacts
}

/// A successful receipt for this plan's fingerprint whose files still hash
/// as recorded
fn is_untouched(receipt: &Receipt, plan: &Plan) -> bool {
    receipt.is_success()
        && receipt.fingerprint == plan.fingerprint
        && receipt.artifacts.iter().all(|a| match a.hash.as_deref() {
            Some(hash) => matches!(file_state(&a.target, hash), Ok(FileState::Unchanged)),
            None => true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{FixedClock, MemoryVcs, NoVcs, StaticRegistry};
    use crate::receipt::{CreatedBy, ReceiptStatus};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn context() -> EngineContext {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap());
        EngineContext::with_vcs(Arc::new(NoVcs)).clock(Arc::new(clock))
    }

    fn write_pack(dir: &Path, version: &str, readme: &str) {
        fs::create_dir_all(dir.join("files")).unwrap();
        fs::write(dir.join("files/README.md"), readme).unwrap();
        let manifest = json!({
            "id": "demo",
            "version": version,
            "provides": {
                "files": [{"src": "README.md", "target": "README.md", "mode": "write"}]
            }
        });
        fs::write(dir.join("pack.json"), manifest.to_string()).unwrap();
    }

    fn manager() -> PackManager {
        let mut config = EngineConfig::default();
        config.recent_modification_secs = 0;
        PackManager::new(config)
    }

    #[test]
    fn test_apply_then_no_op() {
        let packs = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_pack(packs.path(), "1.0.0", "# Demo\n");
        let manager = manager();
        let ctx = context();
        let inputs = Map::new();

        let first = manager.apply(packs.path(), target.path(), &inputs, &ctx).unwrap();
        assert_eq!(first.status(), ApplyStatus::Success);
        let receipt = first.receipt.unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert_eq!(receipt.artifacts.len(), 1);
        assert_eq!(fs::read_to_string(target.path().join("README.md")).unwrap(), "# Demo\n");

        let second = manager.apply(packs.path(), target.path(), &inputs, &ctx).unwrap();
        assert_eq!(second.status(), ApplyStatus::NoOp);
        assert_eq!(second.receipt.unwrap().fingerprint, receipt.fingerprint);
    }

    #[test]
    fn test_plan_after_apply_is_up_to_date() {
        let packs = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_pack(packs.path(), "1.0.0", "# Demo\n");
        let manager = manager();
        let ctx = context();

        let before = manager.plan(packs.path(), target.path(), &Map::new(), &ctx).unwrap();
        assert!(!before.plan.up_to_date);
        assert_eq!(before.plan.steps.len(), 1);
        assert!(before.decision.allowed);

        manager.apply(packs.path(), target.path(), &Map::new(), &ctx).unwrap();
        let after = manager.plan(packs.path(), target.path(), &Map::new(), &ctx).unwrap();
        assert!(after.plan.up_to_date);
        assert!(after.plan.impacts.is_empty());
    }

    #[test]
    fn test_update_current_and_major_risk() {
        let packs = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_pack(packs.path(), "1.0.0", "# Demo\n");
        let manager = manager();
        let ctx = context();
        manager.apply(packs.path(), target.path(), &Map::new(), &ctx).unwrap();

        let current = manager
            .update(packs.path(), target.path(), &Map::new(), false, &ctx)
            .unwrap();
        assert_eq!(current.label(), "CURRENT");

        write_pack(packs.path(), "2.0.0", "# Demo v2\n");
        let refused = manager
            .update(packs.path(), target.path(), &Map::new(), false, &ctx)
            .unwrap();
        match refused {
            UpdateOutcome::Risks { risks, .. } => {
                assert_eq!(risks[0].kind, "major-version");
                assert_eq!(risks[0].severity, RiskSeverity::High);
            }
            other => panic!("expected RISKS, got {}", other.label()),
        }
        assert_eq!(fs::read_to_string(target.path().join("README.md")).unwrap(), "# Demo\n");

        let forced = manager
            .update(packs.path(), target.path(), &Map::new(), true, &ctx)
            .unwrap();
        assert_eq!(forced.label(), "APPLIED");
        assert_eq!(fs::read_to_string(target.path().join("README.md")).unwrap(), "# Demo v2\n");
    }

    #[test]
    fn test_outdated_needs_registry() {
        let packs = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_pack(packs.path(), "1.0.0", "# Demo\n");
        let manager = manager();
        let ctx = context();
        manager.apply(packs.path(), target.path(), &Map::new(), &ctx).unwrap();

        assert!(matches!(manager.outdated(target.path(), &ctx), Err(Error::Config(_))));

        let registry = StaticRegistry::new().with("demo", PackVersion::new(1, 2, 0));
        let ctx = ctx.registry(Arc::new(registry));
        let outdated = manager.outdated(target.path(), &ctx).unwrap();
        assert_eq!(
            outdated,
            vec![OutdatedPack {
                id: "demo".to_string(),
                installed: "1.0.0".to_string(),
                latest: "1.2.0".to_string(),
            }]
        );
    }

    #[test]
    fn test_resolve_target_is_absolute() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_target(Path::new("project")).unwrap(), cwd.join("project"));
        assert_eq!(
            resolve_target(Path::new("./a/../project/.")).unwrap(),
            cwd.join("project")
        );
        assert_eq!(resolve_target(Path::new("/srv/app/../web")).unwrap(), PathBuf::from("/srv/web"));
    }

    #[test]
    fn test_carry_forward_keeps_order() {
        let vcs = Arc::new(MemoryVcs::new());
        let ctx = EngineContext::with_vcs(vcs);
        let old = |name: &str| Artifact::file(PathBuf::from(name), "a".repeat(64), CreatedBy::File, None);
        let previous = ReceiptBuilder::new(Operation::Install, "demo", "1.0.0")
            .status(ReceiptStatus::Success)
            .artifacts(vec![old("/t/a"), old("/t/b")])
            .build(Path::new("/t"), &ctx)
            .unwrap();

        let current = vec![
            Artifact::file(PathBuf::from("/t/b"), "b".repeat(64), CreatedBy::File, None),
            Artifact::file(PathBuf::from("/t/c"), "c".repeat(64), CreatedBy::File, None),
        ];
        let merged = carry_forward(Some(&previous), &current);
        let targets: Vec<_> = merged.iter().map(|a| a.target.display().to_string()).collect();
        assert_eq!(targets, vec!["/t/a", "/t/b", "/t/c"]);
        assert_eq!(merged[1].hash.as_deref(), Some("b".repeat(64).as_str()));
    }
}
