// All-or-nothing writes: a failure on file 2 of 3 leaves the tree as it was
// and the proposal back at Pending, ready to be gated again.
use std::fs;
use std::sync::Arc;

use dualstate_apply::{ApplyError, ApplyLoop, ApplyRequest, FsWriter, SourceWriter};
use dualstate_core::config::{ApplyConfig, GateConfig};
use dualstate_core::graph::InterfaceGraph;
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::types::ValidationStatus;
use dualstate_enforce::{ChangeSimulator, FsSourceTree, GateSession, PassedGate, ProposedEdit};

use super::common::{
    create_project, init_tracing, ingest_project, key, new_ledger, FailingWriter, FnLineSource, MarkerChecker,
    RecordingVcs,
};

const FILES: [(&str, &str); 3] = [
    ("src/a.rs", "fn alpha() { beta(); }\n"),
    ("src/b.rs", "fn beta() { gamma(); }\n"),
    ("src/c.rs", "fn gamma() {}\n"),
];

async fn gate_pass(root: &std::path::Path, graph: &InterfaceGraph, ledger: &mut ChangeLedger) -> PassedGate {
    let current = graph.current();
    let mut gate = GateSession::new(
        &GateConfig::default(),
        Arc::new(FsSourceTree::new(root)),
        Arc::new(MarkerChecker { marker: "BROKEN" }),
    );
    let report = gate.run(&current, ledger, &[]).await.unwrap();
    assert!(report.passed());
    gate.take_pass().unwrap()
}

fn apply_loop(root: &std::path::Path, writer: Box<dyn SourceWriter>, vcs: RecordingVcs) -> ApplyLoop {
    ApplyLoop::new(root, ApplyConfig::default(), writer, Box::new(vcs), Arc::new(FnLineSource))
}

#[tokio::test]
async fn test_failure_on_second_file_rolls_back_and_can_be_retried() {
    init_tracing();
    let (_dir, root) = create_project(&FILES);
    let graph = ingest_project(&root);
    let current = graph.current();
    let mut ledger = new_ledger();
    let edits = vec![
        ProposedEdit::edit(key("src/a.rs", "alpha"), "fn alpha() { beta(); beta(); }"),
        ProposedEdit::edit(key("src/b.rs", "beta"), "fn beta() { gamma(); gamma(); }"),
        ProposedEdit::edit(key("src/c.rs", "gamma"), "fn gamma() { 0; }"),
    ];
    ChangeSimulator::record(&mut ledger, &current, &edits).unwrap();

    let pass = gate_pass(&root, &graph, &mut ledger).await;
    let vcs = RecordingVcs::default();
    let writer = Box::new(FailingWriter {
        inner: FsWriter::new(&root),
        fail_on: "src/b.rs".to_string(),
    });
    let err = apply_loop(&root, writer, vcs.clone())
        .apply(&ApplyRequest::approve("r1"), pass, &graph, &mut ledger)
        .unwrap_err();

    assert!(
        matches!(&err, ApplyError::Write { path, rolled_back: true, .. } if path == "src/b.rs"),
        "unexpected error: {err}"
    );
    for (path, text) in FILES {
        assert_eq!(fs::read_to_string(root.join(path)).unwrap(), text, "{path} not restored");
    }
    let statuses: Vec<ValidationStatus> =
        ledger.rows().unwrap().into_iter().map(|r| r.validation_status).collect();
    assert_eq!(statuses, vec![ValidationStatus::Pending; 3]);
    assert!(vcs.commits.lock().unwrap().is_empty());
    assert_eq!(graph.current().version(), current.version());

    // The same proposal passes the gate again and applies cleanly.
    let pass = gate_pass(&root, &graph, &mut ledger).await;
    let receipt = apply_loop(&root, Box::new(FsWriter::new(&root)), vcs.clone())
        .apply(&ApplyRequest::approve("r1"), pass, &graph, &mut ledger)
        .unwrap();
    assert_eq!(receipt.files, vec!["src/a.rs", "src/b.rs", "src/c.rs"]);
    assert_eq!(receipt.cleared_rows, 3);
    assert_eq!(
        fs::read_to_string(root.join("src/c.rs")).unwrap(),
        "fn gamma() { 0; }\n"
    );
    assert_eq!(vcs.commits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_apply_is_excluded_by_lock() {
    let (_dir, root) = create_project(&FILES);
    let graph = ingest_project(&root);
    let current = graph.current();
    let mut ledger = new_ledger();
    ChangeSimulator::record(
        &mut ledger,
        &current,
        &[ProposedEdit::edit(key("src/c.rs", "gamma"), "fn gamma() { 1; }")],
    )
    .unwrap();
    let pass = gate_pass(&root, &graph, &mut ledger).await;

    let held = dualstate_apply::ApplyLock::acquire(
        &root.join(dualstate_core::config::STATE_DIR),
        std::time::Duration::ZERO,
    )
    .unwrap();
    let config = ApplyConfig {
        lock_wait_ms: 50,
        ..Default::default()
    };
    let err = ApplyLoop::new(
        &root,
        config,
        Box::new(FsWriter::new(&root)),
        Box::new(RecordingVcs::default()),
        Arc::new(FnLineSource),
    )
    .apply(&ApplyRequest::approve("r2"), pass, &graph, &mut ledger)
    .unwrap_err();
    drop(held);

    assert!(matches!(err, ApplyError::Locked { .. }));
    assert_eq!(fs::read_to_string(root.join("src/c.rs")).unwrap(), "fn gamma() {}\n");
    assert_eq!(
        ledger.row(&key("src/c.rs", "gamma")).unwrap().unwrap().validation_status,
        ValidationStatus::Pending
    );
}
