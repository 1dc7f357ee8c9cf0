use rusqlite::params;

use crate::export::{SnapshotRecordSet, RECORD_SET_FORMAT_VERSION};
use crate::hash::stable_id;
use crate::ingest::{EdgeRecord, IngestionStats, InterfaceRecord};
use crate::sqlite::SqliteGraphStore;
use crate::store::GraphStore;
use crate::types::{
    Binding, EdgeType, GraphError, InterfaceKind, RenameRecord, Scope, Span, Visibility,
};

struct RawInterface {
    key: String,
    kind: String,
    visibility: String,
    signature: String,
    signature_hash: String,
    body_hash: String,
    generics: String,
    flags: String,
    start_line: u32,
    end_line: u32,
    code: Option<String>,
    summary: Option<String>,
    renamed_from: Option<String>,
}

impl RawInterface {
    fn decode(self) -> Result<InterfaceRecord, GraphError> {
        let corrupt = |detail: String| GraphError::CorruptRow {
            table: "interfaces",
            detail,
        };
        let renamed_from = match self.renamed_from {
            Some(raw) => Some(SqliteGraphStore::parse_key("interfaces", &raw)?),
            None => None,
        };
        Ok(InterfaceRecord {
            key: SqliteGraphStore::parse_key("interfaces", &self.key)?,
            kind: InterfaceKind::parse(&self.kind)
                .ok_or_else(|| corrupt(format!("unknown kind `{}`", self.kind)))?,
            visibility: Visibility::parse(&self.visibility)
                .ok_or_else(|| corrupt(format!("unknown visibility `{}`", self.visibility)))?,
            signature: self.signature,
            signature_hash: self.signature_hash,
            body_hash: self.body_hash,
            generics: SqliteGraphStore::decode_generics(&self.generics)?,
            flags: SqliteGraphStore::decode_flags(&self.flags)?,
            span: Span::new(self.start_line, self.end_line),
            code: self.code,
            summary: self.summary,
            renamed_from,
        })
    }
}

impl SqliteGraphStore {
    fn load_interfaces(&self) -> Result<Vec<InterfaceRecord>, GraphError> {
        let mut stmt = self.conn.prepare(
            "SELECT key, kind, visibility, signature, signature_hash, body_hash, generics, flags,
                    start_line, end_line, code, summary, renamed_from
             FROM interfaces ORDER BY key",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok(RawInterface {
                    key: row.get(0)?,
                    kind: row.get(1)?,
                    visibility: row.get(2)?,
                    signature: row.get(3)?,
                    signature_hash: row.get(4)?,
                    body_hash: row.get(5)?,
                    generics: row.get(6)?,
                    flags: row.get(7)?,
                    start_line: row.get(8)?,
                    end_line: row.get(9)?,
                    code: row.get(10)?,
                    summary: row.get(11)?,
                    renamed_from: row.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawInterface::decode).collect()
    }

    fn load_edges(&self) -> Result<Vec<EdgeRecord>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT from_key, to_key, edge_type FROM edges ORDER BY from_key, to_key, edge_type")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(from, to, edge_type)| {
                let edge_type = EdgeType::parse(&edge_type).ok_or_else(|| GraphError::CorruptRow {
                    table: "edges",
                    detail: format!("unknown edge type `{edge_type}`"),
                })?;
                Ok(EdgeRecord::new(
                    Self::parse_key("edges", &from)?,
                    Self::parse_key("edges", &to)?,
                    edge_type,
                ))
            })
            .collect()
    }

    fn load_scopes(&self) -> Result<Vec<Scope>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, parent, name, owner FROM scopes ORDER BY id")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, Option<u32>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(id, parent, name, owner)| {
                let owner = match owner {
                    Some(o) => Some(Self::parse_key("scopes", &o)?),
                    None => None,
                };
                Ok(Scope {
                    id,
                    parent,
                    name,
                    owner,
                })
            })
            .collect()
    }

    fn load_bindings(&self) -> Result<Vec<Binding>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT scope, name, target FROM bindings ORDER BY position")?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(scope, name, target)| {
                Ok(Binding {
                    scope,
                    name,
                    target: Self::parse_key("bindings", &target)?,
                })
            })
            .collect()
    }
}

impl GraphStore for SqliteGraphStore {
    fn save_snapshot(
        &mut self,
        records: &SnapshotRecordSet,
        renames: &[RenameRecord],
    ) -> Result<(), GraphError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "
            DELETE FROM interfaces;
            DELETE FROM edges;
            DELETE FROM scopes;
            DELETE FROM bindings;
            DELETE FROM renames;
            ",
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO interfaces (key, node_id, file_path, kind, visibility, signature,
                    signature_hash, body_hash, generics, flags, start_line, end_line, code,
                    summary, renamed_from)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for r in &records.nodes {
                stmt.execute(params![
                    r.key.canonical(),
                    // Stored as the bit pattern; SQLite integers are signed.
                    stable_id(&r.key) as i64,
                    r.key.file_path,
                    r.kind.as_str(),
                    r.visibility.as_str(),
                    r.signature,
                    r.signature_hash,
                    r.body_hash,
                    serde_json::to_string(&r.generics)?,
                    serde_json::to_string(&r.flags)?,
                    r.span.start_line,
                    r.span.end_line,
                    r.code,
                    r.summary,
                    r.renamed_from.as_ref().map(|k| k.canonical()),
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO edges (from_key, to_key, edge_type) VALUES (?1, ?2, ?3)",
            )?;
            for e in &records.edges {
                stmt.execute(params![
                    e.from_key.canonical(),
                    e.to_key.canonical(),
                    e.edge_type.as_str()
                ])?;
            }

            let mut stmt =
                tx.prepare("INSERT INTO scopes (id, parent, name, owner) VALUES (?1, ?2, ?3, ?4)")?;
            for s in &records.scopes {
                stmt.execute(params![
                    s.id,
                    s.parent,
                    s.name,
                    s.owner.as_ref().map(|k| k.canonical())
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO bindings (scope, name, target, position) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (i, b) in records.bindings.iter().enumerate() {
                stmt.execute(params![b.scope, b.name, b.target.canonical(), i as i64])?;
            }

            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO renames (from_key, to_key) VALUES (?1, ?2)")?;
            for r in renames {
                stmt.execute(params![r.from.canonical(), r.to.canonical()])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO dualstate_meta (key, value) VALUES ('snapshot_version', ?1)",
            params![records.snapshot_version.to_string()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO dualstate_meta (key, value) VALUES ('record_format', ?1)",
            params![records.format_version.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<SnapshotRecordSet>, GraphError> {
        let Some(version) = self.meta_value("snapshot_version")? else {
            return Ok(None);
        };
        let snapshot_version: u64 = version
            .parse()
            .map_err(|e| GraphError::Internal(format!("Invalid snapshot version: {}", e)))?;
        let format_version = match self.meta_value("record_format")? {
            Some(v) => v
                .parse()
                .map_err(|e| GraphError::Internal(format!("Invalid record format: {}", e)))?,
            None => RECORD_SET_FORMAT_VERSION,
        };
        Ok(Some(SnapshotRecordSet {
            format_version,
            snapshot_version,
            nodes: self.load_interfaces()?,
            edges: self.load_edges()?,
            scopes: self.load_scopes()?,
            bindings: self.load_bindings()?,
        }))
    }

    fn load_renames(&self) -> Result<Vec<RenameRecord>, GraphError> {
        let mut stmt = self
            .conn
            .prepare("SELECT from_key, to_key FROM renames ORDER BY to_key")?;
        let raw = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(from, to)| {
                Ok(RenameRecord {
                    from: Self::parse_key("renames", &from)?,
                    to: Self::parse_key("renames", &to)?,
                })
            })
            .collect()
    }

    fn record_ingestion(&mut self, stats: &IngestionStats) -> Result<(), GraphError> {
        self.conn.execute(
            "INSERT INTO ingestion_runs (snapshot_version, node_count, edge_count, scope_count,
                binding_count, rename_count, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                stats.snapshot_version as i64,
                stats.node_count as i64,
                stats.edge_count as i64,
                stats.scope_count as i64,
                stats.binding_count as i64,
                stats.rename_count as i64,
                stats.duration_ms as i64,
            ],
        )?;
        Ok(())
    }

    fn ingestion_history(&self, limit: usize) -> Result<Vec<IngestionStats>, GraphError> {
        let mut stmt = self.conn.prepare(
            "SELECT snapshot_version, node_count, edge_count, scope_count, binding_count,
                    rename_count, duration_ms
             FROM ingestion_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(IngestionStats {
                    snapshot_version: row.get::<_, i64>(0)? as u64,
                    node_count: row.get::<_, i64>(1)? as usize,
                    edge_count: row.get::<_, i64>(2)? as usize,
                    scope_count: row.get::<_, i64>(3)? as usize,
                    binding_count: row.get::<_, i64>(4)? as usize,
                    rename_count: row.get::<_, i64>(5)? as usize,
                    duration_ms: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
