//! Placement-test snapshots: one JSON array of questions per test id.

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::info;

use super::{Store, StoreError};

impl Store {
    /// Store `questions` under `test_id`, replacing any previous snapshot.
    pub fn save_placement_test(
        &self,
        test_id: &str,
        questions: &[Value],
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(questions)?;
        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO placement_tests (test_id, questions_json) VALUES (?1, ?2)
                 ON CONFLICT(test_id) DO UPDATE SET questions_json = excluded.questions_json",
                params![test_id, json],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        info!(test_id, count = questions.len(), "Saved placement test");
        Ok(())
    }

    pub fn placement_test(&self, test_id: &str) -> Result<Option<Vec<Value>>, StoreError> {
        let db = self.provider.acquire()?;
        let raw: Option<String> = db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT questions_json FROM placement_tests WHERE test_id = ?1",
                    params![test_id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    pub fn placement_test_ids(&self) -> Result<Vec<String>, StoreError> {
        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT test_id FROM placement_tests ORDER BY test_id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
    }
}
