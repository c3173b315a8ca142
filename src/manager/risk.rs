// src/manager/risk.rs
//! Update risk assessment
//!
//! Risks are advisory. The manager refuses an update carrying a `high` risk
//! unless the caller forces it.

use crate::filesystem::path::display_relative;
use crate::hash::{file_state, FileState};
use crate::manifest::Pack;
use crate::plan::{ConflictKind, ModifyRisk, Plan};
use crate::receipt::Receipt;
use crate::version::PackVersion;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use strum_macros::Display;

/// Receipt detail key holding the dependencies a pack merged
pub(crate) const DEPENDENCIES_DETAIL: &str = "dependencies";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRisk {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: RiskSeverity,
    pub message: String,
    pub payload: Value,
}

/// Compare the installed receipt with the next pack and its plan
pub fn assess_update_risks(previous: &Receipt, next: &Pack, plan: &Plan) -> Vec<UpdateRisk> {
    let mut risks = Vec::new();
    let next_version = &next.manifest.version;

    if let Ok(prev_version) = previous.version.parse::<PackVersion>()
        && prev_version.is_major_bump_to(next_version)
    {
        risks.push(UpdateRisk {
            kind: "major-version".to_string(),
            severity: RiskSeverity::High,
            message: format!("major version change {} -> {}", prev_version, next_version),
            payload: json!({"from": prev_version.to_string(), "to": next_version.to_string()}),
        });
    }

    if let Some(risk) = overwrite_risk(previous, plan) {
        risks.push(risk);
    }
    if let Some(risk) = dependency_risk(previous, next, plan) {
        risks.push(risk);
    }

    risks
}

/// Overwrites of files the previous install did not write, or that the
/// user changed since
fn overwrite_risk(previous: &Receipt, plan: &Plan) -> Option<UpdateRisk> {
    let owned: BTreeMap<&PathBuf, &str> = previous
        .artifacts
        .iter()
        .filter(|a| a.engine_created())
        .filter_map(|a| a.hash.as_deref().map(|h| (&a.target, h)))
        .collect();

    let mut untracked = Vec::new();
    let mut modified = Vec::new();
    for impact in &plan.impacts.modifies {
        if impact.risk != ModifyRisk::Overwrite {
            continue;
        }
        let shown = display_relative(&plan.target_root, &impact.path);
        match owned.get(&impact.path) {
            None => untracked.push(shown),
            Some(hash) => {
                if !matches!(file_state(&impact.path, hash), Ok(FileState::Unchanged)) {
                    modified.push(shown);
                }
            }
        }
    }

    if untracked.is_empty() && modified.is_empty() {
        return None;
    }
    let severity = if modified.is_empty() {
        RiskSeverity::Medium
    } else {
        RiskSeverity::High
    };
    Some(UpdateRisk {
        kind: "file-overwrites".to_string(),
        severity,
        message: format!(
            "{} file(s) would be overwritten ({} modified since install)",
            untracked.len() + modified.len(),
            modified.len()
        ),
        payload: json!({"modified": modified, "untracked": untracked}),
    })
}

fn dependency_risk(previous: &Receipt, next: &Pack, plan: &Plan) -> Option<UpdateRisk> {
    let before: BTreeSet<String> = previous
        .details
        .get(DEPENDENCIES_DETAIL)
        .and_then(Value::as_object)
        .map(|deps| deps.keys().cloned().collect())
        .unwrap_or_default();
    let after: BTreeSet<String> = next.manifest.dependencies.keys().cloned().collect();

    let added = plan.impacts.dependencies.clone();
    let dropped: Vec<String> = before.difference(&after).cloned().collect();
    let disagreements: Vec<String> = plan
        .impacts
        .conflicts
        .iter()
        .filter(|c| c.reason == ConflictKind::DependencyVersion)
        .map(|c| c.message.clone())
        .collect();

    if added.is_empty() && dropped.is_empty() && disagreements.is_empty() {
        return None;
    }
    let severity = if disagreements.is_empty() && dropped.is_empty() {
        RiskSeverity::Low
    } else {
        RiskSeverity::Medium
    };
    Some(UpdateRisk {
        kind: "dependency-changes".to_string(),
        severity,
        message: format!(
            "{} added, {} no longer declared, {} version disagreement(s)",
            added.len(),
            dropped.len(),
            disagreements.len()
        ),
        payload: json!({"added": added, "dropped": dropped, "disagreements": disagreements}),
    })
}
