// Serializing a snapshot and ingesting it again preserves the graph.
use dualstate_core::error::IngestionError;
use dualstate_core::export::{SnapshotRecordSet, RECORD_SET_FORMAT_VERSION};
use dualstate_core::graph::InterfaceGraph;
use dualstate_core::sqlite::SqliteGraphStore;

use super::common::generators::{generate_call_chain, layered_batch};
use super::common::{create_project, ingest_project, key};

#[test]
fn test_record_set_roundtrip_preserves_keys_and_edges() {
    let chain = generate_call_chain(25);
    let (_dir, root) = create_project(&[("src/chain.rs", chain.as_str())]);
    let graph = ingest_project(&root);
    let original = graph.current();
    assert_eq!(original.node_count(), 25);
    assert_eq!(original.edge_count(), 24);

    let json = SnapshotRecordSet::from_snapshot(&original).to_json().unwrap();
    let (rebuilt, stats) = SnapshotRecordSet::from_json(&json).unwrap().rebuild().unwrap();

    assert_eq!(rebuilt.node_count(), original.node_count());
    assert_eq!(rebuilt.edge_count(), original.edge_count());
    assert_eq!(rebuilt.key_set(), original.key_set());
    assert_eq!(rebuilt.edges(), original.edges());
    assert_eq!(stats.node_count, 25);
    for node in original.nodes() {
        assert_eq!(rebuilt.node(&node.key), Some(node));
    }
}

#[test]
fn test_reingesting_exported_batch_through_service() {
    let source = InterfaceGraph::new(Box::new(SqliteGraphStore::in_memory().unwrap()));
    source.ingest(layered_batch(4, 6)).unwrap();
    let exported = SnapshotRecordSet::from_snapshot(&source.current()).into_batch();

    let target = InterfaceGraph::new(Box::new(SqliteGraphStore::in_memory().unwrap()));
    let stats = target.ingest(exported).unwrap();

    assert_eq!(stats.node_count, 24);
    assert_eq!(stats.edge_count, 18);
    assert_eq!(target.current().key_set(), source.current().key_set());
    assert_eq!(target.current().edges(), source.current().edges());
}

#[test]
fn test_persisted_snapshot_is_restored_on_open() {
    let (dir, root) = create_project(&[("src/lib.rs", "fn a() { b(); }\nfn b() {}\n")]);
    let db = dir.path().join("graph.db");
    {
        let graph = InterfaceGraph::new(Box::new(SqliteGraphStore::open(&db).unwrap()));
        graph.ingest_from(&super::common::FnLineSource, &root).unwrap();
    }

    let reopened = InterfaceGraph::open(Box::new(SqliteGraphStore::open(&db).unwrap())).unwrap();
    let current = reopened.current();
    assert_eq!(current.version(), 1);
    assert_eq!(current.callees(&key("src/lib.rs", "a")), vec![&key("src/lib.rs", "b")]);
    assert_eq!(reopened.history(10).unwrap().len(), 1);
}

#[test]
fn test_record_set_from_newer_format_is_refused() {
    let graph = InterfaceGraph::new(Box::new(SqliteGraphStore::in_memory().unwrap()));
    graph.ingest(layered_batch(2, 3)).unwrap();
    let json = SnapshotRecordSet::from_snapshot(&graph.current()).to_json().unwrap();

    let mut doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["format_version"], RECORD_SET_FORMAT_VERSION);
    assert_eq!(doc["snapshot_version"], 1);
    assert_eq!(doc["nodes"].as_array().map(Vec::len), Some(6));
    doc["format_version"] = serde_json::json!(RECORD_SET_FORMAT_VERSION + 1);

    let err = SnapshotRecordSet::from_json(&doc.to_string()).unwrap_err();
    assert!(matches!(
        err,
        IngestionError::UnsupportedFormat { found, expected }
            if found == RECORD_SET_FORMAT_VERSION + 1 && expected == RECORD_SET_FORMAT_VERSION
    ));
}
