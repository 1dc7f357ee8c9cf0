use rusqlite::{params, OptionalExtension};

use crate::sqlite::SqliteGraphStore;
use crate::store::OutcomeStore;
use crate::types::{GraphError, PatternOutcome};

impl OutcomeStore for SqliteGraphStore {
    fn record_outcome(&mut self, pattern_id: &str, accepted: bool) -> Result<(), GraphError> {
        let (acc, rej) = if accepted { (1, 0) } else { (0, 1) };
        self.conn.execute(
            "INSERT INTO pattern_outcomes (pattern_id, accepted, rejected) VALUES (?1, ?2, ?3)
             ON CONFLICT(pattern_id) DO UPDATE SET
                accepted = accepted + excluded.accepted,
                rejected = rejected + excluded.rejected,
                updated_at = datetime('now')",
            params![pattern_id, acc, rej],
        )?;
        Ok(())
    }

    fn outcome(&self, pattern_id: &str) -> Result<PatternOutcome, GraphError> {
        let counts = self
            .conn
            .query_row(
                "SELECT accepted, rejected FROM pattern_outcomes WHERE pattern_id = ?1",
                params![pattern_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(counts
            .map(|(accepted, rejected)| PatternOutcome {
                accepted: accepted as u64,
                rejected: rejected as u64,
            })
            .unwrap_or_default())
    }

    fn all_outcomes(&self) -> Result<Vec<(String, PatternOutcome)>, GraphError> {
        let mut stmt = self.conn.prepare(
            "SELECT pattern_id, accepted, rejected FROM pattern_outcomes ORDER BY pattern_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    PatternOutcome {
                        accepted: row.get::<_, i64>(1)? as u64,
                        rejected: row.get::<_, i64>(2)? as u64,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
