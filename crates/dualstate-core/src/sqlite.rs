use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::types::{
    ChangeLedgerRow, FutureAction, GenericParam, GraphError, InterfaceFlags, InterfaceKey, Span,
    ValidationStatus,
};

const SCHEMA_VERSION: u32 = 3;

/// SQLite-backed implementation of the store traits.
pub struct SqliteGraphStore {
    pub(crate) conn: Connection,
}

impl SqliteGraphStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let conn = Connection::open(path.as_ref())?;
        Self::set_performance_pragmas(&conn)?;
        let store = SqliteGraphStore { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, GraphError> {
        let conn = Connection::open_in_memory()?;
        Self::set_performance_pragmas(&conn)?;
        let store = SqliteGraphStore { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    fn set_performance_pragmas(conn: &Connection) -> Result<(), GraphError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -8000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    fn initialize_schema(&self) -> Result<(), GraphError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS dualstate_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Active snapshot
            CREATE TABLE IF NOT EXISTS interfaces (
                key TEXT PRIMARY KEY,
                node_id INTEGER NOT NULL,
                file_path TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('function', 'type', 'trait', 'module')),
                visibility TEXT NOT NULL DEFAULT 'private',
                signature TEXT NOT NULL DEFAULT '',
                signature_hash TEXT NOT NULL,
                body_hash TEXT NOT NULL,
                generics TEXT NOT NULL DEFAULT '[]',
                flags TEXT NOT NULL DEFAULT '{}',
                start_line INTEGER NOT NULL DEFAULT 0,
                end_line INTEGER NOT NULL DEFAULT 0,
                code TEXT,
                summary TEXT,
                renamed_from TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_interfaces_file ON interfaces(file_path);

            CREATE TABLE IF NOT EXISTS edges (
                from_key TEXT NOT NULL,
                to_key TEXT NOT NULL,
                edge_type TEXT NOT NULL
                    CHECK (edge_type IN ('calls', 'depends-on', 'uses-type', 'defines-in-scope')),
                PRIMARY KEY (from_key, to_key, edge_type)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_key);

            CREATE TABLE IF NOT EXISTS scopes (
                id INTEGER PRIMARY KEY,
                parent INTEGER,
                name TEXT NOT NULL,
                owner TEXT
            );

            CREATE TABLE IF NOT EXISTS bindings (
                scope INTEGER NOT NULL,
                name TEXT NOT NULL,
                target TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (scope, name)
            );

            CREATE TABLE IF NOT EXISTS renames (
                from_key TEXT NOT NULL,
                to_key TEXT NOT NULL,
                PRIMARY KEY (from_key, to_key)
            );

            -- Proposal state
            CREATE TABLE IF NOT EXISTS change_ledger (
                key TEXT PRIMARY KEY,
                current_present INTEGER NOT NULL,
                future_present INTEGER NOT NULL,
                current_code TEXT,
                future_code TEXT,
                future_action TEXT NOT NULL
                    CHECK (future_action IN ('create', 'edit', 'delete', 'none')),
                validation_status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (validation_status IN ('pending', 'passed', 'failed')),
                span_start INTEGER,
                span_end INTEGER,
                applied INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS pattern_outcomes (
                pattern_id TEXT PRIMARY KEY,
                accepted INTEGER NOT NULL DEFAULT 0,
                rejected INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS ingestion_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                snapshot_version INTEGER NOT NULL,
                node_count INTEGER NOT NULL,
                edge_count INTEGER NOT NULL,
                scope_count INTEGER NOT NULL DEFAULT 0,
                binding_count INTEGER NOT NULL DEFAULT 0,
                rename_count INTEGER NOT NULL DEFAULT 0,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;

        // New databases start at the current version.
        self.conn.execute(
            "INSERT OR IGNORE INTO dualstate_meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<(), GraphError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(GraphError::SchemaMigration {
                from: current,
                to: SCHEMA_VERSION,
            });
        }
        if current < 2 {
            self.migrate_v1_to_v2()?;
        }
        if current < 3 {
            self.migrate_v2_to_v3()?;
        }
        Ok(())
    }

    /// v1 -> v2: rename counts in the ingestion history.
    fn migrate_v1_to_v2(&self) -> Result<(), GraphError> {
        self.add_column("ingestion_runs", "rename_count", "INTEGER NOT NULL DEFAULT 0")?;
        self.set_schema_version(2)?;
        tracing::info!("migrated store schema v1 -> v2");
        Ok(())
    }

    /// v2 -> v3: source span of each ledger row's current code.
    fn migrate_v2_to_v3(&self) -> Result<(), GraphError> {
        self.add_column("change_ledger", "span_start", "INTEGER")?;
        self.add_column("change_ledger", "span_end", "INTEGER")?;
        self.set_schema_version(3)?;
        tracing::info!("migrated store schema v2 -> v3");
        Ok(())
    }

    /// `ALTER TABLE ... ADD COLUMN` unless the column is already there.
    fn add_column(&self, table: &str, column: &str, decl: &str) -> Result<(), GraphError> {
        let present: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |row| row.get(0),
        )?;
        if present == 0 {
            self.conn
                .execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
        }
        Ok(())
    }

    fn set_schema_version(&self, version: u32) -> Result<(), GraphError> {
        self.conn.execute(
            "UPDATE dualstate_meta SET value = ?1 WHERE key = 'schema_version'",
            params![version.to_string()],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<u32, GraphError> {
        let version: String = self.conn.query_row(
            "SELECT value FROM dualstate_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        version
            .parse()
            .map_err(|e| GraphError::Internal(format!("Invalid schema version: {}", e)))
    }

    pub(crate) fn meta_value(&self, key: &str) -> Result<Option<String>, GraphError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM dualstate_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub(crate) fn parse_key(table: &'static str, raw: &str) -> Result<InterfaceKey, GraphError> {
        InterfaceKey::parse(raw).ok_or_else(|| GraphError::CorruptRow {
            table,
            detail: format!("malformed key `{raw}`"),
        })
    }

    pub(crate) fn decode_generics(raw: &str) -> Result<Vec<GenericParam>, GraphError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub(crate) fn decode_flags(raw: &str) -> Result<InterfaceFlags, GraphError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub(crate) fn row_to_ledger(row: &rusqlite::Row) -> rusqlite::Result<RawLedgerRow> {
        Ok(RawLedgerRow {
            key: row.get("key")?,
            current_present: row.get::<_, i32>("current_present")? != 0,
            future_present: row.get::<_, i32>("future_present")? != 0,
            current_code: row.get("current_code")?,
            future_code: row.get("future_code")?,
            future_action: row.get("future_action")?,
            validation_status: row.get("validation_status")?,
            span_start: row.get("span_start")?,
            span_end: row.get("span_end")?,
            applied: row.get::<_, i32>("applied")? != 0,
        })
    }
}

/// A ledger row as stored, before key and enum decoding.
pub(crate) struct RawLedgerRow {
    key: String,
    current_present: bool,
    future_present: bool,
    current_code: Option<String>,
    future_code: Option<String>,
    future_action: String,
    validation_status: String,
    span_start: Option<u32>,
    span_end: Option<u32>,
    applied: bool,
}

impl RawLedgerRow {
    pub(crate) fn decode(self) -> Result<ChangeLedgerRow, GraphError> {
        let corrupt = |detail: String| GraphError::CorruptRow {
            table: "change_ledger",
            detail,
        };
        Ok(ChangeLedgerRow {
            key: SqliteGraphStore::parse_key("change_ledger", &self.key)?,
            current_present: self.current_present,
            future_present: self.future_present,
            current_code: self.current_code,
            future_code: self.future_code,
            future_action: FutureAction::parse(&self.future_action)
                .ok_or_else(|| corrupt(format!("unknown action `{}`", self.future_action)))?,
            validation_status: ValidationStatus::parse(&self.validation_status)
                .ok_or_else(|| corrupt(format!("unknown status `{}`", self.validation_status)))?,
            current_span: match (self.span_start, self.span_end) {
                (Some(start), Some(end)) => Some(Span::new(start, end)),
                _ => None,
            },
            applied: self.applied,
        })
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
