// tests/lifecycle.rs

//! End-to-end apply, update and remove workflows over a real target tree.

mod common;

use common::{manager, no_inputs, sha256_hex, Workspace};
use gitvan_pack::apply::ApplyStatus;
use gitvan_pack::manager::{RemoveIssue, RemoveStatus, RiskSeverity, UpdateOutcome};
use gitvan_pack::receipt::{load_public_key, ArtifactType, Operation, ReceiptStatus, PUBLIC_KEY_FILE};
use gitvan_pack::{EngineConfig, Error, Mode, PackManager};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::{Component, PathBuf};

#[test]
fn test_fresh_apply_writes_file_and_receipt() {
    let ws = Workspace::new();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");
    let ctx = ws.context();

    let report = manager().apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(report.status(), ApplyStatus::Success);
    assert_eq!(ws.read("README.md"), "# Demo\n");

    let receipt = report.receipt.unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Success);
    assert_eq!(receipt.operation, Operation::Install);
    assert_eq!(receipt.commit, common::HEAD);
    assert_eq!(receipt.artifacts.len(), 1);
    let artifact = &receipt.artifacts[0];
    assert_eq!(artifact.kind, ArtifactType::File);
    assert_eq!(artifact.target, ws.path("README.md"));
    assert_eq!(artifact.hash.as_deref(), Some(sha256_hex(b"# Demo\n").as_str()));

    assert!(ws.receipt_file("demo").is_file());
    assert!(receipt.verify(ws.vcs.as_ref(), None).valid);
}

#[test]
fn test_reapply_is_no_op() {
    let ws = Workspace::new();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");
    let ctx = ws.context();
    let manager = manager();

    let first = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    let receipt_bytes = fs::read(ws.receipt_file("demo")).unwrap();

    let second = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(second.status(), ApplyStatus::NoOp);
    assert_eq!(
        second.receipt.unwrap().fingerprint,
        first.receipt.unwrap().fingerprint
    );
    assert_eq!(fs::read(ws.receipt_file("demo")).unwrap(), receipt_bytes);

    let notes = manager.store(&ctx).all(&ws.target).unwrap();
    assert_eq!(notes.len(), 1);
}

#[test]
fn test_reapply_inside_recent_window_is_no_op() {
    let ws = Workspace::new();
    let ctx = ws.context();
    // Default window: the files written by the first apply count as recent
    let manager = PackManager::new(EngineConfig::default());
    let pack = ws.pack(
        "strict",
        json!({
            "id": "strict",
            "version": "1.0.0",
            "idempotency": {"conflict": "error"},
            "provides": {"files": [{"src": "README.md", "target": "README.md"}]}
        }),
        &[("files/README.md", "# Strict\n")],
    );

    let first = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(first.status(), ApplyStatus::Success);
    let receipt_bytes = fs::read(ws.receipt_file("strict")).unwrap();

    let second = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(second.status(), ApplyStatus::NoOp);
    assert!(second.result.applied.is_empty());
    assert_eq!(fs::read(ws.receipt_file("strict")).unwrap(), receipt_bytes);
    assert_eq!(manager.store(&ctx).all(&ws.target).unwrap().len(), 1);
}

#[test]
fn test_reapply_fresh_tree_pack_is_no_op() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let pack = ws.pack(
        "node-init",
        json!({
            "id": "node-init",
            "version": "1.0.0",
            "modes": ["fresh-tree"],
            "detects": [{"kind": "file", "pattern": "package.json"}],
            "provides": {"files": [{"src": "package.json", "target": "package.json"}]}
        }),
        &[("files/package.json", "{\"name\": \"app\"}\n")],
    );

    let first = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(first.status(), ApplyStatus::Success);
    assert_eq!(first.result.mode, Mode::FreshTree);
    assert!(ws.path("package.json").exists());

    // The tree now matches the detect rule, yet the pack is installed
    let second = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(second.status(), ApplyStatus::NoOp);
    assert_eq!(second.result.mode, Mode::FreshTree);

    let plan = manager.plan(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert!(plan.plan.up_to_date);
    assert_eq!(plan.plan.mode, Mode::FreshTree);

    // A different pack with the same rule still sees an existing tree
    let other = ws.pack(
        "node-init-2",
        json!({
            "id": "node-init-2",
            "version": "1.0.0",
            "modes": ["fresh-tree"],
            "detects": [{"kind": "file", "pattern": "package.json"}]
        }),
        &[],
    );
    let err = manager.apply(&other, &ws.target, &no_inputs(), &ctx).unwrap_err();
    assert!(matches!(err, Error::Mode { ref detected, .. } if detected == "existing-tree"));
}

#[test]
fn test_relative_target_records_absolute_paths() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");

    // Same directory, spelled relative to the working directory
    let cwd = std::env::current_dir().unwrap();
    let relative: PathBuf = cwd
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .map(|_| Component::ParentDir)
        .chain(ws.target.components().filter(|c| matches!(c, Component::Normal(_))))
        .collect();
    assert!(relative.is_relative());

    let report = manager.apply(&pack, &relative, &no_inputs(), &ctx).unwrap();
    assert_eq!(report.status(), ApplyStatus::Success);
    let receipt = report.receipt.unwrap();
    let artifact = &receipt.artifacts[0].target;
    assert!(artifact.is_absolute());
    assert!(!artifact.components().any(|c| c == Component::ParentDir));
    assert_eq!(
        artifact.canonicalize().unwrap(),
        ws.path("README.md").canonicalize().unwrap()
    );

    // Absolute and relative spellings address the same install
    let again = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(again.status(), ApplyStatus::NoOp);
    assert!(manager.verify("demo", &relative, None, &ctx).unwrap().is_clean());
}

#[test]
fn test_plan_apply_plan_is_empty() {
    let ws = Workspace::new();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");
    let ctx = ws.context();
    let manager = manager();

    let before = manager.plan(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(before.plan.impacts.creates.len(), 1);
    assert!(!ws.path("README.md").exists());

    manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    let after = manager.plan(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert!(after.plan.up_to_date);
    assert!(after.plan.impacts.is_empty());
    assert!(after.plan.steps.is_empty());
}

#[test]
fn test_minor_update_overwrites_and_links_versions() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let v1 = ws.demo_pack("1.0.0", "# Demo\n");
    manager.apply(&v1, &ws.target, &no_inputs(), &ctx).unwrap();

    let v11 = ws.demo_pack("1.1.0", "# Demo\n");
    let outcome = manager
        .update(&v11, &ws.target, &no_inputs(), false, &ctx)
        .unwrap();

    let UpdateOutcome::Applied { risks, report } = outcome else {
        panic!("expected the update to apply");
    };
    assert!(risks.iter().all(|r| r.kind != "major-version"));
    assert_eq!(report.status(), ApplyStatus::Success);

    let receipt = report.receipt.unwrap();
    assert_eq!(receipt.operation, Operation::Update);
    assert_eq!(receipt.version, "1.1.0");
    assert_eq!(receipt.previous_version.as_deref(), Some("1.0.0"));
    assert_eq!(receipt.artifacts.len(), 1);
    assert_eq!(ws.read("README.md"), "# Demo\n");
}

#[test]
fn test_update_plan_modifies_installed_file() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let v1 = ws.demo_pack("1.0.0", "# Demo\n");
    manager.apply(&v1, &ws.target, &no_inputs(), &ctx).unwrap();

    let v11 = ws.demo_pack("1.1.0", "# Demo\n");
    let report = manager.plan(&v11, &ws.target, &no_inputs(), &ctx).unwrap();
    assert!(report.plan.impacts.creates.is_empty());
    assert_eq!(report.plan.impacts.modifies.len(), 1);
    assert_eq!(report.plan.impacts.modifies[0].path, ws.path("README.md"));
}

#[test]
fn test_major_update_blocked_without_force() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let v1 = ws.demo_pack("1.0.0", "# Demo\n");
    manager.apply(&v1, &ws.target, &no_inputs(), &ctx).unwrap();
    let receipt_bytes = fs::read(ws.receipt_file("demo")).unwrap();

    let v2 = ws.demo_pack("2.0.0", "# Demo 2\n");
    let outcome = manager
        .update(&v2, &ws.target, &no_inputs(), false, &ctx)
        .unwrap();

    let UpdateOutcome::Risks { risks, plan } = &outcome else {
        panic!("expected RISKS, got {}", outcome.label());
    };
    assert_eq!(plan.pack_version, "2.0.0");
    assert!(
        risks
            .iter()
            .any(|r| r.kind == "major-version" && r.severity == RiskSeverity::High)
    );

    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["status"], json!("RISKS"));
    assert_eq!(value["risks"][0]["type"], json!("major-version"));
    assert_eq!(value["risks"][0]["severity"], json!("high"));

    assert_eq!(ws.read("README.md"), "# Demo\n");
    assert_eq!(fs::read(ws.receipt_file("demo")).unwrap(), receipt_bytes);
}

#[test]
fn test_update_warns_about_user_edits() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let v1 = ws.demo_pack("1.0.0", "# Demo\n");
    manager.apply(&v1, &ws.target, &no_inputs(), &ctx).unwrap();
    ws.write("README.md", "# Demo\nlocal notes\n");

    let v11 = ws.demo_pack("1.1.0", "# Demo 1.1\n");
    let outcome = manager
        .update(&v11, &ws.target, &no_inputs(), false, &ctx)
        .unwrap();
    let UpdateOutcome::Risks { risks, .. } = outcome else {
        panic!("expected RISKS for an edited file");
    };
    assert_eq!(risks.len(), 1);
    assert_eq!(risks[0].kind, "file-overwrites");
    assert_eq!(risks[0].payload["modified"], json!(["README.md"]));
    assert_eq!(ws.read("README.md"), "# Demo\nlocal notes\n");
}

#[test]
fn test_update_without_install_applies() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");

    let outcome = manager()
        .update(&pack, &ws.target, &no_inputs(), false, &ctx)
        .unwrap();
    let UpdateOutcome::Applied { report, .. } = outcome else {
        panic!("expected the update to apply");
    };
    assert_eq!(report.receipt.unwrap().operation, Operation::Install);
    assert_eq!(ws.read("README.md"), "# Demo\n");
}

#[test]
fn test_remove_keeps_user_edit() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");
    manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    ws.write("README.md", "# Demo\nedited\n");

    let report = manager.remove("demo", &ws.target, false, &ctx).unwrap();
    assert_eq!(report.status, RemoveStatus::Partial);
    assert_eq!(
        report.errors,
        vec![RemoveIssue {
            artifact: "README.md".to_string(),
            reason: "modified".to_string(),
        }]
    );
    assert_eq!(ws.read("README.md"), "# Demo\nedited\n");
    assert!(ws.receipt_file("demo").is_file());
}

#[test]
fn test_remove_clean_install() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    let pack = ws.pack(
        "docs",
        json!({
            "id": "docs",
            "version": "0.3.0",
            "provides": {"files": [
                {"src": "guide.md", "target": "docs/guide.md"},
                {"src": "faq.md", "target": "docs/faq.md"}
            ]}
        }),
        &[("files/guide.md", "guide\n"), ("files/faq.md", "faq\n")],
    );
    manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert!(ws.path("docs/faq.md").is_file());

    let report = manager.remove("docs", &ws.target, false, &ctx).unwrap();
    assert_eq!(report.status, RemoveStatus::Ok);
    assert!(!ws.path("docs").exists());
    assert!(!ws.target.join(".gitvan/packs/docs").exists());
    assert!(manager.status(&ws.target, &ctx).unwrap().is_empty());

    let operations: Vec<Operation> = manager
        .store(&ctx)
        .history(&ws.target, "docs")
        .unwrap()
        .iter()
        .map(|r| r.operation)
        .collect();
    assert!(operations.contains(&Operation::Install));
    assert!(operations.contains(&Operation::Remove));
}

#[test]
fn test_remove_leaves_preexisting_files() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let manager = manager();
    ws.write("README.md", "# Mine\n");
    let pack = ws.demo_pack("1.0.0", "# Demo\n");

    manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(ws.read("README.md"), "# Demo\n");

    let report = manager.remove("demo", &ws.target, false, &ctx).unwrap();
    assert_eq!(report.status, RemoveStatus::Ok);
    assert_eq!(report.skipped[0].reason, "pre-existing");
    assert!(ws.path("README.md").exists());
}

#[test]
fn test_signed_receipt_detects_tampering() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let mut config = common::config();
    config.sign_receipts = true;
    config.key_dir = ws.key_dir();
    let manager = gitvan_pack::PackManager::new(config);
    let pack = ws.demo_pack("1.0.0", "# Demo\n");

    let report = manager.apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    let mut receipt = report.receipt.unwrap();
    let signature = receipt.signature.clone().unwrap();
    assert_eq!(signature.algorithm, "Ed25519");
    assert_eq!(Some(signature.data_hash.as_str()), receipt.integrity.receipt.as_deref());

    let public = load_public_key(&ws.key_dir().join(PUBLIC_KEY_FILE)).unwrap();
    assert!(receipt.verify(ws.vcs.as_ref(), Some(&public)).valid);

    receipt.operation = Operation::Remove;
    let verdict = receipt.verify(ws.vcs.as_ref(), Some(&public));
    assert!(!verdict.valid);
    assert_eq!(verdict.errors, vec!["Invalid signature".to_string()]);
}

#[test]
fn test_unsigned_receipt_detects_tampering() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let pack = ws.demo_pack("1.0.0", "# Demo\n");
    let mut receipt = manager()
        .apply(&pack, &ws.target, &no_inputs(), &ctx)
        .unwrap()
        .receipt
        .unwrap();
    assert!(receipt.signature.is_none());

    receipt.version = "9.9.9".to_string();
    let verdict = receipt.verify(ws.vcs.as_ref(), None);
    assert!(!verdict.valid);
    assert_eq!(verdict.errors, vec!["Receipt integrity mismatch".to_string()]);
}

#[test]
fn test_empty_provides_records_success() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let pack = ws.pack("empty", json!({"id": "empty", "version": "0.1.0"}), &[]);

    let report = manager().apply(&pack, &ws.target, &no_inputs(), &ctx).unwrap();
    assert_eq!(report.status(), ApplyStatus::Success);
    let receipt = report.receipt.unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Success);
    assert!(receipt.artifacts.is_empty());
}

#[test]
fn test_missing_manifest() {
    let ws = Workspace::new();
    let ctx = ws.context();
    let missing = ws.dir.path().join("packs/nothing");

    let err = manager()
        .apply(&missing, &ws.target, &no_inputs(), &ctx)
        .unwrap_err();
    match err {
        Error::Manifest { path, .. } => assert!(path.ends_with("pack.json")),
        other => panic!("unexpected error: {}", other),
    }
}
