// Readers racing ingestion only ever see complete snapshots.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use dualstate_core::graph::InterfaceGraph;

use super::common::generators::layered_batch;
use super::common::in_memory_store;

const WIDTH: usize = 10;
const VERSIONS: u64 = 20;

/// Version `v` is built from `v` layers, so its shape is fixed by its version.
fn assert_complete(snapshot: &dualstate_core::snapshot::GraphSnapshot) {
    let v = snapshot.version() as usize;
    assert_eq!(snapshot.node_count(), v * WIDTH, "torn read at v{v}");
    assert_eq!(snapshot.edge_count(), v.saturating_sub(1) * WIDTH, "torn read at v{v}");
    for edge in snapshot.edges() {
        assert!(snapshot.contains(&edge.from) && snapshot.contains(&edge.to));
    }
}

#[test]
fn test_concurrent_readers_never_observe_partial_ingestion() {
    let graph = InterfaceGraph::new(Box::new(in_memory_store()));
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                s.spawn(|| {
                    let mut seen = 0u64;
                    while !done.load(Ordering::Acquire) {
                        let snapshot = graph.current();
                        assert!(snapshot.version() >= seen, "active snapshot went backwards");
                        seen = snapshot.version();
                        assert_complete(&snapshot);
                    }
                    seen
                })
            })
            .collect();

        for v in 1..=VERSIONS {
            graph.ingest(layered_batch(v as usize, WIDTH)).unwrap();
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            assert!(reader.join().unwrap() <= VERSIONS);
        }
    });

    assert_eq!(graph.current().version(), VERSIONS);
}

#[test]
fn test_reader_keeps_its_snapshot_across_ingestion() {
    let graph = InterfaceGraph::new(Box::new(in_memory_store()));
    graph.ingest(layered_batch(1, WIDTH)).unwrap();
    let held = graph.current();

    graph.ingest(layered_batch(2, WIDTH)).unwrap();

    assert_eq!(held.version(), 1);
    assert_complete(&held);
    assert_complete(&graph.current());
}

#[test]
fn test_failed_ingestion_keeps_previous_snapshot() {
    let graph = InterfaceGraph::new(Box::new(in_memory_store()));
    graph.ingest(layered_batch(1, WIDTH)).unwrap();

    let mut broken = layered_batch(2, WIDTH);
    broken.interfaces.pop();
    assert!(graph.ingest(broken).is_err());

    let current = graph.current();
    assert_eq!(current.version(), 1);
    assert_complete(&current);
}
