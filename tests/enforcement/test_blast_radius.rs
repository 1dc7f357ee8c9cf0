// Blast radius and RED/GREEN marking over real call graphs.
use std::collections::BTreeSet;

use dualstate_core::error::UnrepresentableChangeError;
use dualstate_core::graph::InterfaceGraph;
use dualstate_core::ingest::IngestionBatch;
use dualstate_core::types::{FutureAction, InterfaceKey};
use dualstate_enforce::{ChangeSimulator, Marking, ProposedEdit, ProposedSignature};

use super::common::generators::{layered_batch, layered_key};
use super::common::{create_project, in_memory_store, ingest_project, key};

const CHAIN: &str = "fn a() { b(1); }\nfn b(x: u32) { c(); }\nfn c() {}\n";

fn lib(name: &str) -> InterfaceKey {
    key("src/lib.rs", name)
}

fn keys(names: &[&str]) -> BTreeSet<InterfaceKey> {
    names.iter().map(|n| lib(n)).collect()
}

#[test]
fn test_signature_edit_marks_callers_not_callees() {
    let (_dir, root) = create_project(&[("src/lib.rs", CHAIN)]);
    let graph = ingest_project(&root);
    let current = graph.current();
    assert_eq!(current.callees(&lib("a")), vec![&lib("b")]);

    let edit = ProposedEdit::edit(lib("b"), "fn b(x: u64) { c(); }")
        .with_signature(ProposedSignature::new("fn b(x: u64)"));
    let result = ChangeSimulator::simulate(&current, &[edit]).unwrap();

    assert_eq!(result.blast_radius, keys(&["a", "b"]));
    assert_eq!(result.marking[&lib("a")], Marking::Red);
    assert_eq!(result.marking[&lib("b")], Marking::Red);
    assert_eq!(result.marking[&lib("c")], Marking::Green);
    assert_eq!(result.signature_changes, keys(&["b"]));

    // Current is untouched; the future carries the new signature.
    assert_eq!(current.node(&lib("b")).unwrap().signature, "fn b(x: u32)");
    assert_eq!(result.future.node(&lib("b")).unwrap().signature, "fn b(x: u64)");
    assert!(result.future.is_future());
    assert_eq!(graph.current().version(), current.version());
}

#[test]
fn test_body_edit_stays_local() {
    let (_dir, root) = create_project(&[("src/lib.rs", CHAIN)]);
    let current = ingest_project(&root).current();
    let edit = ProposedEdit::edit(lib("b"), "fn b(x: u32) { c(); c(); }");
    let radius = ChangeSimulator::blast_radius(&current, &[edit]).unwrap();
    assert_eq!(radius, keys(&["b"]));
}

#[test]
fn test_delete_reaches_every_transitive_caller() {
    let (_dir, root) = create_project(&[("src/lib.rs", CHAIN)]);
    let current = ingest_project(&root).current();
    let result = ChangeSimulator::simulate(&current, &[ProposedEdit::delete(lib("c"))]).unwrap();
    assert_eq!(result.blast_radius, keys(&["a", "b", "c"]));
    assert!(!result.future.contains(&lib("c")));
    assert!(result.future.callees(&lib("b")).is_empty());
}

#[test]
fn test_create_for_existing_key_is_unrepresentable() {
    let (_dir, root) = create_project(&[("src/lib.rs", CHAIN)]);
    let current = ingest_project(&root).current();
    let mut ledger = super::common::new_ledger();

    let create = ProposedEdit::create(lib("a"), ProposedSignature::new("fn a()"), "fn a() {}");
    let err = ChangeSimulator::simulate(&current, std::slice::from_ref(&create)).unwrap_err();
    assert_eq!(err, UnrepresentableChangeError::AlreadyPresent { key: lib("a") });

    assert!(ChangeSimulator::record(&mut ledger, &current, &[create]).is_err());
    assert!(ledger.rows().unwrap().is_empty());
}

/// Candidate proposals over a layered graph, mixing every action.
fn proposal_pool() -> Vec<ProposedEdit> {
    let sig = |text: &str| ProposedSignature::new(text);
    vec![
        ProposedEdit::edit(layered_key(2, 0), "pub fn func_0() {}")
            .with_signature(sig("pub fn func_0(arg: u128) -> u64")),
        ProposedEdit::edit(layered_key(1, 1), "pub fn func_1() { /* faster */ }"),
        ProposedEdit::delete(layered_key(3, 2)),
        ProposedEdit::create(
            InterfaceKey::new("src/layer_9.rs", "", "fresh"),
            sig("pub fn fresh()"),
            "pub fn fresh() {}",
        ),
        ProposedEdit {
            key: layered_key(0, 1),
            action: FutureAction::None,
            future_code: None,
            new_signature: None,
        },
        // Same key as the second entry, now changing the signature.
        ProposedEdit::edit(layered_key(1, 1), "pub fn func_1(arg: bool) {}")
            .with_signature(sig("pub fn func_1(arg: bool) -> u64")),
    ]
}

fn subset(pool: &[ProposedEdit], mask: u32) -> Vec<ProposedEdit> {
    pool.iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, e)| e.clone())
        .collect()
}

#[test]
fn test_blast_radius_is_monotone_in_the_proposal_set() {
    let graph = InterfaceGraph::new(Box::new(in_memory_store()));
    graph.ingest(layered_batch(4, 3)).unwrap();
    let current = graph.current();
    let pool = proposal_pool();
    let full = (1u32 << pool.len()) - 1;

    let radii: Vec<BTreeSet<InterfaceKey>> = (0..=full)
        .map(|mask| ChangeSimulator::blast_radius(&current, &subset(&pool, mask)).unwrap())
        .collect();

    for b in 0..=full {
        // Every submask of b.
        let mut a = b;
        loop {
            assert!(
                radii[a as usize].is_subset(&radii[b as usize]),
                "radius of {a:#b} not within radius of {b:#b}"
            );
            if a == 0 {
                break;
            }
            a = (a - 1) & b;
        }
    }

    assert!(radii[0].is_empty());
    // Deleting layer 3 node 2 reaches its whole column.
    let column: BTreeSet<InterfaceKey> = (0..4).map(|layer| layered_key(layer, 2)).collect();
    assert!(column.is_subset(&radii[1 << 2]));
}

#[test]
fn test_empty_graph_and_empty_proposal() {
    let graph = InterfaceGraph::new(Box::new(in_memory_store()));
    graph.ingest(IngestionBatch::default()).unwrap();
    let result = ChangeSimulator::simulate(&graph.current(), &[]).unwrap();
    assert!(result.blast_radius.is_empty());
    assert!(result.marking.is_empty());
    assert_eq!(result.future.node_count(), 0);
}
