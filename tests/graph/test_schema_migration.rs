// Store files written by an older schema open and migrate in place.
use dualstate_core::graph::InterfaceGraph;
use dualstate_core::ledger::ChangeLedger;
use dualstate_core::sqlite::SqliteGraphStore;
use dualstate_core::types::GraphError;

fn write_v1_store(path: &std::path::Path) {
    write_store(path, V1_RUNS);
}

const V1_RUNS: &str = "
        CREATE TABLE ingestion_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_version INTEGER NOT NULL,
            node_count INTEGER NOT NULL,
            edge_count INTEGER NOT NULL,
            scope_count INTEGER NOT NULL DEFAULT 0,
            binding_count INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        INSERT INTO ingestion_runs (snapshot_version, node_count, edge_count, duration_ms)
            VALUES (3, 12, 9, 4);
";

fn write_store(path: &std::path::Path, runs: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "
        CREATE TABLE dualstate_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
        INSERT INTO dualstate_meta (key, value) VALUES ('schema_version', '1');
        ",
    )
    .unwrap();
    conn.execute_batch(runs).unwrap();
}

#[test]
fn test_v1_store_migrates_and_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.db");
    write_v1_store(&db);

    let store = SqliteGraphStore::open(&db).unwrap();
    assert_eq!(store.schema_version().unwrap(), 3);

    let graph = InterfaceGraph::new(Box::new(store));
    let history = graph.history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].snapshot_version, 3);
    assert_eq!(history[0].node_count, 12);
    assert_eq!(history[0].rename_count, 0);
}

#[test]
fn test_migration_is_idempotent_across_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.db");
    write_v1_store(&db);

    drop(SqliteGraphStore::open(&db).unwrap());
    let store = SqliteGraphStore::open(&db).unwrap();
    assert_eq!(store.schema_version().unwrap(), 3);

    let conn = rusqlite::Connection::open(&db).unwrap();
    let columns: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('ingestion_runs') WHERE name = 'rename_count'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(columns, 1);
}

#[test]
fn test_v2_ledger_gains_span_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.db");
    write_v1_store(&db);
    {
        let conn = rusqlite::Connection::open(&db).unwrap();
        conn.execute_batch(
            "
            UPDATE dualstate_meta SET value = '2' WHERE key = 'schema_version';
            ALTER TABLE ingestion_runs ADD COLUMN rename_count INTEGER NOT NULL DEFAULT 0;
            CREATE TABLE change_ledger (
                key TEXT PRIMARY KEY,
                current_present INTEGER NOT NULL,
                future_present INTEGER NOT NULL,
                current_code TEXT,
                future_code TEXT,
                future_action TEXT NOT NULL,
                validation_status TEXT NOT NULL DEFAULT 'pending',
                applied INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT INTO change_ledger (key, current_present, future_present, current_code,
                future_code, future_action)
                VALUES ('src/lib.rs::a', 1, 1, 'fn a() {}', 'fn a() { 1; }', 'edit');
            ",
        )
        .unwrap();
    }

    let store = SqliteGraphStore::open(&db).unwrap();
    assert_eq!(store.schema_version().unwrap(), 3);
    let ledger = ChangeLedger::new(Box::new(store));
    let rows = ledger.rows().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].current_span, None);
    assert_eq!(rows[0].future_code.as_deref(), Some("fn a() { 1; }"));
}

#[test]
fn test_failed_column_add_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.db");
    write_store(&db, "CREATE VIEW ingestion_runs AS SELECT 1 AS id;");

    assert!(SqliteGraphStore::open(&db).is_err());

    let version: String = rusqlite::Connection::open(&db)
        .unwrap()
        .query_row(
            "SELECT value FROM dualstate_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, "1");
}

#[test]
fn test_store_from_newer_release_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("graph.db");
    drop(SqliteGraphStore::open(&db).unwrap());

    rusqlite::Connection::open(&db)
        .unwrap()
        .execute(
            "UPDATE dualstate_meta SET value = '99' WHERE key = 'schema_version'",
            [],
        )
        .unwrap();

    match SqliteGraphStore::open(&db) {
        Err(GraphError::SchemaMigration { from, to }) => {
            assert_eq!(from, 99);
            assert_eq!(to, 3);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("newer schema should be refused"),
    }
}
