// Safety gate: checks run against in-memory buffers only, and a failed
// check never yields the pass token that apply requires.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use dualstate_core::config::GateConfig;
use dualstate_core::types::ValidationStatus;
use dualstate_enforce::{
    ChangeSimulator, Diagnostic, FsSourceTree, GateSession, GateState, Overlay, ProposedEdit,
    ProposedSignature, StaticChecker,
};

use super::common::{create_project, ingest_project, key, new_ledger, MarkerChecker};

const LIB: &str = "fn a() { b(1); }\nfn b(x: u32) {}\n";

type TreeState = BTreeMap<PathBuf, (Vec<u8>, SystemTime)>;

fn tree_state(root: &Path) -> TreeState {
    fn walk(dir: &Path, out: &mut TreeState) {
        for entry in fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, out);
            } else {
                let modified = entry.metadata().unwrap().modified().unwrap();
                out.insert(path.clone(), (fs::read(&path).unwrap(), modified));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, &mut out);
    out
}

/// Captures the working tree from inside the check, i.e. while Checked.
struct SnoopingChecker {
    root: PathBuf,
    during_check: Mutex<Option<TreeState>>,
    buffered: Mutex<Option<String>>,
}

impl StaticChecker for SnoopingChecker {
    fn check(&self, overlay: &Overlay, _: &[String]) -> Vec<Diagnostic> {
        *self.during_check.lock().unwrap() = Some(tree_state(&self.root));
        *self.buffered.lock().unwrap() = overlay.buffer("src/lib.rs").map(str::to_string);
        Vec::new()
    }
}

fn widen_b() -> Vec<ProposedEdit> {
    vec![
        ProposedEdit::edit(key("src/lib.rs", "b"), "fn b(x: u64) {}")
            .with_signature(ProposedSignature::new("fn b(x: u64)")),
        ProposedEdit::create(
            key("src/extra.rs", "extra"),
            ProposedSignature::new("fn extra()"),
            "fn extra() {}",
        ),
    ]
}

#[tokio::test]
async fn test_gate_never_touches_the_working_tree() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let graph = ingest_project(&root);
    let current = graph.current();
    let mut ledger = new_ledger();
    let (simulation, _) = ChangeSimulator::record(&mut ledger, &current, &widen_b()).unwrap();

    let before = tree_state(&root);
    let checker = Arc::new(SnoopingChecker {
        root: root.clone(),
        during_check: Mutex::new(None),
        buffered: Mutex::new(None),
    });
    let mut gate = GateSession::new(
        &GateConfig::default(),
        Arc::new(FsSourceTree::new(&root)),
        checker.clone(),
    );

    gate.open(&current, &ledger, &simulation.red_keys()).unwrap();
    assert_eq!(gate.state(), GateState::Opened);
    assert_eq!(tree_state(&root), before, "opening wrote to the tree");
    let overlay = gate.overlay().unwrap();
    assert_eq!(overlay.buffer("src/extra.rs"), Some("fn extra() {}\n"));

    let report = gate.check(&current, &mut ledger).await.unwrap();
    assert!(report.passed());

    assert_eq!(checker.during_check.lock().unwrap().as_ref(), Some(&before));
    assert_eq!(
        checker.buffered.lock().unwrap().as_deref(),
        Some("fn a() { b(1); }\nfn b(x: u64) {}\n")
    );
    assert_eq!(tree_state(&root), before, "checking wrote to the tree");
    assert!(!root.join("src/extra.rs").exists());
    assert!(gate.overlay().is_none());
}

#[tokio::test]
async fn test_error_diagnostic_fails_session_and_withholds_pass() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let graph = ingest_project(&root);
    let current = graph.current();
    let mut ledger = new_ledger();
    let edits = vec![ProposedEdit::edit(key("src/lib.rs", "b"), "fn b(x: u32) { UNDEFINED }")];
    let (simulation, _) = ChangeSimulator::record(&mut ledger, &current, &edits).unwrap();

    let mut gate = GateSession::new(
        &GateConfig::default(),
        Arc::new(FsSourceTree::new(&root)),
        Arc::new(MarkerChecker { marker: "UNDEFINED" }),
    );
    let report = gate
        .run(&current, &mut ledger, &simulation.red_keys())
        .await
        .unwrap();

    assert!(!report.passed());
    assert_eq!(report.errors().count(), 1);
    assert_eq!(gate.state(), GateState::Failed);
    // The only token apply accepts is never issued.
    assert!(gate.take_pass().is_none());
    let row = ledger.row(&key("src/lib.rs", "b")).unwrap().unwrap();
    assert_eq!(row.validation_status, ValidationStatus::Failed);
    assert_eq!(fs::read_to_string(root.join("src/lib.rs")).unwrap(), LIB);

    // A failed session cannot be checked again without a restart.
    assert!(gate.check(&current, &mut ledger).await.is_err());
    gate.restart().unwrap();
    assert_eq!(gate.state(), GateState::NotStarted);
}

#[tokio::test]
async fn test_abandoned_session_releases_buffers() {
    let (_dir, root) = create_project(&[("src/lib.rs", LIB)]);
    let graph = ingest_project(&root);
    let current = graph.current();
    let mut ledger = new_ledger();
    ChangeSimulator::record(&mut ledger, &current, &widen_b()).unwrap();

    let mut gate = GateSession::new(
        &GateConfig::default(),
        Arc::new(FsSourceTree::new(&root)),
        Arc::new(MarkerChecker { marker: "never" }),
    );
    gate.open(&current, &ledger, &[]).unwrap();
    assert_eq!(gate.overlay().unwrap().len(), 2);

    gate.close();
    assert!(gate.overlay().is_none());
    assert!(gate.check(&current, &mut ledger).await.is_err());
    assert_eq!(
        ledger.row(&key("src/lib.rs", "b")).unwrap().unwrap().validation_status,
        ValidationStatus::Pending
    );
}
