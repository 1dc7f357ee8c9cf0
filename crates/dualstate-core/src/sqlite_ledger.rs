use rusqlite::{params, OptionalExtension};

use crate::sqlite::SqliteGraphStore;
use crate::store::LedgerStore;
use crate::types::{ChangeLedgerRow, GraphError, InterfaceKey, ValidationStatus};

const LEDGER_COLUMNS: &str = "key, current_present, future_present, current_code, future_code, \
                              future_action, validation_status, span_start, span_end, applied";

impl LedgerStore for SqliteGraphStore {
    fn put_row(&mut self, row: &ChangeLedgerRow) -> Result<(), GraphError> {
        self.conn.execute(
            "INSERT INTO change_ledger (key, current_present, future_present, current_code,
                future_code, future_action, validation_status, span_start, span_end, applied)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(key) DO UPDATE SET
                current_present = excluded.current_present,
                future_present = excluded.future_present,
                current_code = excluded.current_code,
                future_code = excluded.future_code,
                future_action = excluded.future_action,
                validation_status = excluded.validation_status,
                span_start = excluded.span_start,
                span_end = excluded.span_end,
                applied = excluded.applied,
                updated_at = datetime('now')",
            params![
                row.key.canonical(),
                row.current_present as i32,
                row.future_present as i32,
                row.current_code,
                row.future_code,
                row.future_action.as_str(),
                row.validation_status.as_str(),
                row.current_span.map(|s| s.start_line),
                row.current_span.map(|s| s.end_line),
                row.applied as i32,
            ],
        )?;
        Ok(())
    }

    fn get_row(&self, key: &InterfaceKey) -> Result<Option<ChangeLedgerRow>, GraphError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {LEDGER_COLUMNS} FROM change_ledger WHERE key = ?1"),
                params![key.canonical()],
                Self::row_to_ledger,
            )
            .optional()?;
        raw.map(|r| r.decode()).transpose()
    }

    fn all_rows(&self) -> Result<Vec<ChangeLedgerRow>, GraphError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LEDGER_COLUMNS} FROM change_ledger ORDER BY key"))?;
        let raw = stmt
            .query_map([], Self::row_to_ledger)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(|r| r.decode()).collect()
    }

    fn set_status(
        &mut self,
        key: &InterfaceKey,
        status: ValidationStatus,
    ) -> Result<bool, GraphError> {
        let changed = self.conn.execute(
            "UPDATE change_ledger SET validation_status = ?1, updated_at = datetime('now')
             WHERE key = ?2",
            params![status.as_str(), key.canonical()],
        )?;
        Ok(changed > 0)
    }

    fn mark_applied(&mut self, keys: &[InterfaceKey]) -> Result<(), GraphError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE change_ledger SET applied = 1, updated_at = datetime('now') WHERE key = ?1",
            )?;
            for key in keys {
                stmt.execute(params![key.canonical()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_applied(&mut self) -> Result<usize, GraphError> {
        Ok(self
            .conn
            .execute("DELETE FROM change_ledger WHERE applied = 1", [])?)
    }

    fn delete_all(&mut self) -> Result<(), GraphError> {
        self.conn.execute("DELETE FROM change_ledger", [])?;
        Ok(())
    }
}
