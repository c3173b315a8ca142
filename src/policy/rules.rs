// src/policy/rules.rs
//! Built-in policy rules
//!
//! Each rule inspects one concern and appends human-readable violations.
//! [`chain`] builds the rule list from a [`PolicyConfig`], only adding the
//! rules the configuration actually enables.

use super::{PolicyConfig, PolicySubject};
use crate::manifest::Pack;
use crate::plan::{command_name, Step};
use crate::receipt::Operation;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Tokens that suggest a pack reaches out to the network
const NETWORK_TOKENS: &str =
    r"(?i)\b(fetch|curl|wget|axios|XMLHttpRequest|WebSocket)\b|https?://|wss?://";

/// A single policy check
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>);
}

/// Rules enabled by `config`, in evaluation order
pub(super) fn chain(config: &PolicyConfig) -> Vec<Box<dyn PolicyRule>> {
    let mut rules: Vec<Box<dyn PolicyRule>> = Vec::new();

    if config.require_signature {
        rules.push(Box::new(SignatureRule));
    }
    if !config.allowed_capabilities.is_empty() || !config.blocked_capabilities.is_empty() {
        rules.push(Box::new(CapabilityRule));
    }
    rules.push(Box::new(ModeRule));
    rules.push(Box::new(LimitRule));
    if !config.allowed_file_types.is_empty() || !config.blocked_file_types.is_empty() {
        rules.push(Box::new(FileTypeRule));
    }
    rules.push(Box::new(CommandRule));
    if !config.allow_network_access
        && let Ok(pattern) = Regex::new(NETWORK_TOKENS)
    {
        rules.push(Box::new(NetworkRule { pattern }));
    }
    rules.push(Box::new(EnvironmentRule));
    if config.require_approval {
        rules.push(Box::new(ApprovalRule));
    }
    if !config.allowed_registries.is_empty() {
        rules.push(Box::new(RegistryRule));
    }

    rules
}

struct SignatureRule;

impl PolicyRule for SignatureRule {
    fn name(&self) -> &str {
        "require-signature"
    }

    fn check(&self, subject: &PolicySubject<'_>, _config: &PolicyConfig, violations: &mut Vec<String>) {
        if let Some(pack) = subject.pack
            && pack.signature.is_none()
        {
            violations.push(format!("pack {} has no signature file", pack.manifest.id));
        }
    }
}

struct CapabilityRule;

impl PolicyRule for CapabilityRule {
    fn name(&self) -> &str {
        "capabilities"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        let Some(pack) = subject.pack else {
            return;
        };
        for capability in &pack.manifest.capabilities {
            if config.blocked_capabilities.contains(capability) {
                violations.push(format!("capability '{}' is blocked", capability));
            } else if !config.allowed_capabilities.is_empty()
                && !config.allowed_capabilities.contains(capability)
            {
                violations.push(format!("capability '{}' is not in the allowed list", capability));
            }
        }
    }
}

struct ModeRule;

impl PolicyRule for ModeRule {
    fn name(&self) -> &str {
        "allowed-modes"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        let Some(pack) = subject.pack else {
            return;
        };
        let allowed = |mode: String| config.allowed_modes.contains(&mode);

        if !pack.manifest.modes.iter().any(|m| allowed(m.to_string())) {
            violations.push(format!(
                "pack supports only modes outside the allowed set ({})",
                config.allowed_modes.join(", ")
            ));
        } else if let Some(plan) = subject.plan
            && !allowed(plan.mode.to_string())
        {
            violations.push(format!("mode {} is not allowed", plan.mode));
        }
    }
}

struct LimitRule;

impl PolicyRule for LimitRule {
    fn name(&self) -> &str {
        "limits"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        let Some(pack) = subject.pack else {
            return;
        };
        let manifest = &pack.manifest;

        for (src, size) in file_sources(pack, subject) {
            if size > config.max_file_size {
                violations.push(format!(
                    "file {} is {} bytes (max file size {})",
                    src, size, config.max_file_size
                ));
            }
        }

        for (target, size) in template_sizes(pack, subject) {
            if size > config.max_template_size {
                violations.push(format!(
                    "template {} renders to {} bytes (max template size {})",
                    target, size, config.max_template_size
                ));
            }
        }

        let jobs = manifest.provides.jobs.len() + manifest.provides.events.len();
        if jobs > config.max_job_count {
            violations.push(format!(
                "pack declares {} jobs and events (max job count {})",
                jobs, config.max_job_count
            ));
        }

        if manifest.post_install.len() > config.max_hook_count {
            violations.push(format!(
                "pack declares {} post-install actions (max hook count {})",
                manifest.post_install.len(),
                config.max_hook_count
            ));
        }
    }
}

/// `(src, size)` of literal files the operation would copy
fn file_sources(pack: &Pack, subject: &PolicySubject<'_>) -> Vec<(String, u64)> {
    let size_of = |path: &Path| fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    if let Some(plan) = subject.plan {
        return plan
            .steps
            .iter()
            .filter_map(|step| match step {
                Step::File { src, .. } | Step::Job { src, .. } | Step::Event { src, .. } => {
                    Some((src.display().to_string(), size_of(src)))
                }
                _ => None,
            })
            .collect();
    }

    pack.manifest
        .provides
        .files
        .iter()
        .filter_map(|f| {
            let path = pack.asset_path("files", &f.src).ok()?;
            Some((f.src.clone(), size_of(&path)))
        })
        .collect()
}

/// `(target, size)` of rendered templates, or template sources without a plan
fn template_sizes(pack: &Pack, subject: &PolicySubject<'_>) -> Vec<(String, u64)> {
    if let Some(plan) = subject.plan {
        return plan
            .rendered
            .iter()
            .map(|(target, bytes)| (target.display().to_string(), bytes.len() as u64))
            .collect();
    }

    pack.manifest
        .provides
        .templates
        .iter()
        .filter_map(|t| {
            let path = pack.asset_path("templates", &t.src).ok()?;
            let size = fs::metadata(path).ok()?.len();
            Some((t.target.clone(), size))
        })
        .collect()
}

struct FileTypeRule;

fn extension_matches(path: &str, types: &[String]) -> bool {
    let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    types
        .iter()
        .any(|t| t.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

impl PolicyRule for FileTypeRule {
    fn name(&self) -> &str {
        "file-types"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        let created: Vec<String> = match (subject.plan, subject.pack) {
            (Some(plan), _) => plan
                .impacts
                .creates
                .iter()
                .map(|c| c.path.display().to_string())
                .collect(),
            (None, Some(pack)) => pack
                .manifest
                .provides
                .files
                .iter()
                .map(|f| f.target.clone())
                .chain(pack.manifest.provides.templates.iter().map(|t| t.target.clone()))
                .collect(),
            (None, None) => return,
        };

        for path in created {
            if extension_matches(&path, &config.blocked_file_types) {
                violations.push(format!("file type of {} is blocked", path));
            } else if !config.allowed_file_types.is_empty()
                && !extension_matches(&path, &config.allowed_file_types)
            {
                violations.push(format!("file type of {} is not in the allowed list", path));
            }
        }
    }
}

struct CommandRule;

impl PolicyRule for CommandRule {
    fn name(&self) -> &str {
        "commands"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        let Some(pack) = subject.pack else {
            return;
        };

        for action in &pack.manifest.post_install {
            if action.action != "run" {
                violations.push(format!(
                    "post-install action '{}' is not supported",
                    action.action
                ));
                continue;
            }
            let Some(command) = action.args.first() else {
                violations.push("post-install 'run' without a command".to_string());
                continue;
            };
            let name = command_name(command);
            if config.blocked_commands.iter().any(|b| b == name) {
                violations.push(format!("command '{}' is blocked", name));
            } else if !config.allow_system_commands
                && !config.allowed_commands.iter().any(|a| a == name)
            {
                violations.push(format!(
                    "command '{}' is not in the allowed command list",
                    name
                ));
            }
        }
    }
}

struct NetworkRule {
    pattern: Regex,
}

impl PolicyRule for NetworkRule {
    fn name(&self) -> &str {
        "network-access"
    }

    fn check(&self, subject: &PolicySubject<'_>, _config: &PolicyConfig, violations: &mut Vec<String>) {
        let Some(pack) = subject.pack else {
            return;
        };

        let manifest_text = pack.raw.to_string();
        if let Some(hit) = self.pattern.find(&manifest_text) {
            violations.push(format!(
                "manifest references network access ('{}')",
                hit.as_str()
            ));
        }

        if let Some(plan) = subject.plan {
            for (target, bytes) in &plan.rendered {
                let text = String::from_utf8_lossy(bytes);
                if let Some(hit) = self.pattern.find(&text) {
                    violations.push(format!(
                        "template {} references network access ('{}')",
                        target.display(),
                        hit.as_str()
                    ));
                }
            }
        }
    }
}

struct EnvironmentRule;

impl PolicyRule for EnvironmentRule {
    fn name(&self) -> &str {
        "environment"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        let Some(pack) = subject.pack else {
            return;
        };
        let declared = &pack.manifest.environment;
        if declared.is_empty() {
            return;
        }

        if !config.allow_environment_variables {
            violations.push(format!(
                "environment variables are not allowed ({})",
                declared.keys().cloned().collect::<Vec<_>>().join(", ")
            ));
            return;
        }
        for name in declared.keys() {
            if config.restricted_environment_variables.contains(name) {
                violations.push(format!("restricted environment variable {}", name));
            }
        }
    }
}

struct ApprovalRule;

impl PolicyRule for ApprovalRule {
    fn name(&self) -> &str {
        "require-approval"
    }

    fn check(&self, subject: &PolicySubject<'_>, _config: &PolicyConfig, violations: &mut Vec<String>) {
        if matches!(subject.operation, Operation::Install | Operation::Update) && !subject.approved {
            violations.push(format!("{} requires explicit approval", subject.operation));
        }
    }
}

struct RegistryRule;

impl PolicyRule for RegistryRule {
    fn name(&self) -> &str {
        "allowed-registries"
    }

    fn check(&self, subject: &PolicySubject<'_>, config: &PolicyConfig, violations: &mut Vec<String>) {
        if let Some(pack) = subject.pack
            && let Some(registry) = &pack.manifest.registry
            && !config.allowed_registries.contains(registry)
        {
            violations.push(format!("registry {} is not allowed", registry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_matching() {
        let types = vec![".exe".to_string(), "SH".to_string()];
        assert!(extension_matches("bin/tool.EXE", &types));
        assert!(extension_matches("scripts/setup.sh", &types));
        assert!(!extension_matches("README.md", &types));
        assert!(!extension_matches("Makefile", &types));
    }

    #[test]
    fn test_chain_only_enabled_rules() {
        let names: Vec<String> = chain(&PolicyConfig::default())
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert!(!names.contains(&"require-signature".to_string()));
        assert!(!names.contains(&"network-access".to_string()));
        assert!(names.contains(&"commands".to_string()));

        let names: Vec<String> = chain(&PolicyConfig::restrictive())
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert!(names.contains(&"require-signature".to_string()));
        assert!(names.contains(&"network-access".to_string()));
        assert!(names.contains(&"require-approval".to_string()));
    }

    #[test]
    fn test_network_pattern() {
        let re = Regex::new(NETWORK_TOKENS).unwrap();
        assert!(re.is_match("await fetch(url)"));
        assert!(re.is_match("see https://example.org"));
        assert!(re.is_match("new WebSocket('wss://x')"));
        assert!(!re.is_match("prefetched local data"));
    }
}
