// src/policy/mod.rs
//! Pre-flight policy guard
//!
//! A [`Policy`] is consulted at the start of every operation. It runs a
//! chain of rules built from [`PolicyConfig`] over the pack manifest and the
//! plan, and returns a [`PolicyDecision`]. `allowed = false` is a veto.
//! Policy never persists anything; [`Policy::audit`] only builds the record.

mod rules;

pub use rules::PolicyRule;

use crate::capability::Clock;
use crate::error::{Error, Result};
use crate::manifest::Pack;
use crate::plan::Plan;
use crate::receipt::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

/// Policy configuration (camelCase keys in JSON and TOML)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    /// Reject packs without a `SIGNATURE` file
    pub require_signature: bool,
    /// When non-empty, every manifest capability must be listed
    pub allowed_capabilities: Vec<String>,
    pub blocked_capabilities: Vec<String>,
    pub allowed_modes: Vec<String>,
    /// Bytes
    pub max_file_size: u64,
    /// Bytes of rendered output
    pub max_template_size: u64,
    pub max_job_count: usize,
    pub max_hook_count: usize,
    /// Extensions (with or without the dot); empty allows everything
    pub allowed_file_types: Vec<String>,
    pub blocked_file_types: Vec<String>,
    /// Allow post-install commands outside `allowed_commands`
    pub allow_system_commands: bool,
    pub allowed_commands: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub allow_network_access: bool,
    pub allow_environment_variables: bool,
    pub restricted_environment_variables: Vec<String>,
    /// Require caller approval for install and update
    pub require_approval: bool,
    /// When non-empty, a manifest `registry` must be listed
    pub allowed_registries: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_signature: false,
            allowed_capabilities: Vec::new(),
            blocked_capabilities: Vec::new(),
            allowed_modes: strings(&["existing-tree", "fresh-tree"]),
            max_file_size: 10 * 1024 * 1024,
            max_template_size: 1024 * 1024,
            max_job_count: 50,
            max_hook_count: 20,
            allowed_file_types: Vec::new(),
            blocked_file_types: strings(&[
                ".exe", ".dll", ".so", ".dylib", ".bat", ".cmd", ".com", ".scr", ".msi",
            ]),
            allow_system_commands: false,
            allowed_commands: strings(&["npm", "pnpm", "yarn", "git", "node"]),
            blocked_commands: strings(&[
                "rm", "sudo", "su", "curl", "wget", "dd", "mkfs", "shutdown", "reboot", "chmod",
                "chown",
            ]),
            allow_network_access: true,
            allow_environment_variables: true,
            restricted_environment_variables: strings(&[
                "PATH",
                "HOME",
                "SSH_AUTH_SOCK",
                "AWS_SECRET_ACCESS_KEY",
                "GITHUB_TOKEN",
                "NPM_TOKEN",
                "GITVAN_AUTH",
            ]),
            require_approval: false,
            allowed_registries: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Signed packs only, read-only capabilities, minimal commands
    pub fn restrictive() -> Self {
        Self {
            require_signature: true,
            allowed_capabilities: strings(&["files", "templates", "read"]),
            blocked_capabilities: strings(&["exec", "network", "shell", "system"]),
            max_file_size: 1024 * 1024,
            max_template_size: 256 * 1024,
            max_job_count: 10,
            max_hook_count: 5,
            allow_system_commands: false,
            allowed_commands: strings(&["git"]),
            allow_network_access: false,
            allow_environment_variables: false,
            require_approval: true,
            ..Self::default()
        }
    }

    /// Unsigned packs, generous caps, only outright dangerous commands blocked
    pub fn permissive() -> Self {
        Self {
            require_signature: false,
            max_file_size: 100 * 1024 * 1024,
            max_template_size: 10 * 1024 * 1024,
            max_job_count: 500,
            max_hook_count: 100,
            blocked_file_types: Vec::new(),
            allow_system_commands: true,
            allowed_commands: strings(&["npm", "pnpm", "yarn", "git", "node", "npx", "bun", "make"]),
            blocked_commands: strings(&["sudo", "su", "dd", "mkfs", "shutdown", "reboot"]),
            allow_network_access: true,
            allow_environment_variables: true,
            restricted_environment_variables: Vec::new(),
            ..Self::default()
        }
    }
}

/// What a policy evaluation looks at
#[derive(Debug, Clone, Copy)]
pub struct PolicySubject<'a> {
    pub pack_id: &'a str,
    pub pack_version: &'a str,
    /// Absent for removals, which only have the receipt
    pub pack: Option<&'a Pack>,
    pub plan: Option<&'a Plan>,
    pub operation: Operation,
    pub approved: bool,
}

impl<'a> PolicySubject<'a> {
    pub fn for_pack(
        pack: &'a Pack,
        pack_version: &'a str,
        plan: Option<&'a Plan>,
        operation: Operation,
        approved: bool,
    ) -> Self {
        Self {
            pack_id: &pack.manifest.id,
            pack_version,
            pack: Some(pack),
            plan,
            operation,
            approved,
        }
    }

    pub fn for_removal(pack_id: &'a str, pack_version: &'a str, approved: bool) -> Self {
        Self {
            pack_id,
            pack_version,
            pack: None,
            plan: None,
            operation: Operation::Remove,
            approved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub violations: Vec<String>,
    pub operation: Operation,
    /// `id@version`
    pub pack: String,
}

impl PolicyDecision {
    /// Turn a veto into `Error::PolicyViolation`
    pub fn enforce(&self) -> Result<()> {
        if self.allowed {
            return Ok(());
        }
        Err(Error::PolicyViolation {
            violations: self.violations.clone(),
            operation: self.operation.to_string(),
        })
    }
}

/// Structured audit record; embedded in receipts under `details.audit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub timestamp: String,
    pub operation: Operation,
    pub pack: String,
    pub allowed: bool,
    pub violations: Vec<String>,
    /// Final disposition of the operation (`success`, `partial`, `REMOVED`, ...)
    pub outcome: String,
    pub policy: String,
}

pub struct Policy {
    name: String,
    config: PolicyConfig,
    rules: Vec<Box<dyn PolicyRule>>,
}

impl Policy {
    pub fn new(config: PolicyConfig) -> Self {
        Self::named("custom", config)
    }

    pub fn named(name: &str, config: PolicyConfig) -> Self {
        let rules = rules::chain(&config);
        Self {
            name: name.to_string(),
            config,
            rules,
        }
    }

    pub fn restrictive() -> Self {
        Self::named("restrictive", PolicyConfig::restrictive())
    }

    pub fn permissive() -> Self {
        Self::named("permissive", PolicyConfig::permissive())
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Add a rule after the configured ones
    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, subject: &PolicySubject<'_>) -> PolicyDecision {
        let mut violations = Vec::new();
        for rule in &self.rules {
            let before = violations.len();
            rule.check(subject, &self.config, &mut violations);
            if violations.len() > before {
                debug!("policy rule {} reported {} violation(s)", rule.name(), violations.len() - before);
            }
        }

        let decision = PolicyDecision {
            allowed: violations.is_empty(),
            violations,
            operation: subject.operation,
            pack: format!("{}@{}", subject.pack_id, subject.pack_version),
        };
        if !decision.allowed {
            warn!(
                "Policy {} denied {} of {}: {}",
                self.name,
                decision.operation,
                decision.pack,
                decision.violations.join("; ")
            );
        }
        decision
    }

    /// Build an audit record for a finished (or vetoed) operation
    pub fn audit(&self, decision: &PolicyDecision, outcome: &str, clock: &dyn Clock) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: clock.timestamp(),
            operation: decision.operation,
            pack: decision.pack.clone(),
            allowed: decision.allowed,
            violations: decision.violations.clone(),
            outcome: outcome.to_string(),
            policy: self.name.clone(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::named("default", PolicyConfig::default())
    }
}

impl AuditRecord {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn pack(manifest: &str) -> (TempDir, Pack) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pack.json"), manifest).unwrap();
        let pack = Pack::load(dir.path()).unwrap();
        (dir, pack)
    }

    fn evaluate(policy: &Policy, pack: &Pack, operation: Operation, approved: bool) -> PolicyDecision {
        let version = pack.manifest.version.to_string();
        policy.evaluate(&PolicySubject::for_pack(pack, &version, None, operation, approved))
    }

    #[test]
    fn test_default_policy_allows_plain_pack() {
        let (_dir, pack) = pack(r#"{"id":"demo","version":"1.0.0"}"#);
        let decision = evaluate(&Policy::default(), &pack, Operation::Install, false);
        assert!(decision.allowed, "{:?}", decision.violations);
        assert_eq!(decision.pack, "demo@1.0.0");
        assert!(decision.enforce().is_ok());
    }

    #[test]
    fn test_blocked_command_vetoes() {
        let (_dir, pack) = pack(
            r#"{"id":"demo","version":"1.0.0",
                "postInstall":[{"action":"run","args":["rm","-rf","/"]},
                               {"action":"run","args":["make"]},
                               {"action":"open","args":["x"]}]}"#,
        );
        let decision = evaluate(&Policy::default(), &pack, Operation::Install, false);
        assert!(!decision.allowed);
        assert_eq!(decision.violations.len(), 3);

        let err = decision.enforce().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_restrictive_profile() {
        let (_dir, pack) = pack(
            r#"{"id":"demo","version":"1.0.0","capabilities":["exec"],
                "environment":{"NODE_ENV":"production"},
                "description":"calls fetch('https://example.org')"}"#,
        );
        let policy = Policy::restrictive();
        let decision = evaluate(&policy, &pack, Operation::Install, false);
        assert!(!decision.allowed);
        let joined = decision.violations.join("\n");
        assert!(joined.contains("signature"));
        assert!(joined.contains("exec"));
        assert!(joined.contains("network"));
        assert!(joined.contains("environment"));
        assert!(joined.contains("approval"));
    }

    #[test]
    fn test_permissive_allows_system_commands() {
        let (_dir, pack) = pack(
            r#"{"id":"demo","version":"1.0.0",
                "postInstall":[{"action":"run","args":["make","setup"]}]}"#,
        );
        assert!(evaluate(&Policy::permissive(), &pack, Operation::Install, false).allowed);
        assert!(!evaluate(&Policy::default(), &pack, Operation::Install, false).allowed);
    }

    #[test]
    fn test_approval_and_registry() {
        let (_dir, pack) = pack(
            r#"{"id":"demo","version":"1.0.0","registry":"https://evil.example"}"#,
        );
        let config = PolicyConfig {
            require_approval: true,
            allowed_registries: vec!["https://registry.gitvan.dev".to_string()],
            ..PolicyConfig::default()
        };
        let policy = Policy::new(config);

        let decision = evaluate(&policy, &pack, Operation::Update, false);
        assert_eq!(decision.violations.len(), 2);

        let decision = evaluate(&policy, &pack, Operation::Update, true);
        assert_eq!(decision.violations.len(), 1);
        assert!(decision.violations[0].contains("registry"));

        // Removal has no manifest and does not need approval
        let decision = policy.evaluate(&PolicySubject::for_removal("demo", "1.0.0", false));
        assert!(decision.allowed);
    }

    #[test]
    fn test_audit_record() {
        let (_dir, pack) = pack(r#"{"id":"demo","version":"1.0.0"}"#);
        let policy = Policy::default();
        let decision = evaluate(&policy, &pack, Operation::Install, false);
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());

        let record = policy.audit(&decision, "success", &clock);
        assert_eq!(record.timestamp, "2024-03-01T00:00:00.000Z");
        assert_eq!(record.pack, "demo@1.0.0");
        assert_eq!(record.policy, "default");
        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.to_value()["operation"], "install");
    }
}
