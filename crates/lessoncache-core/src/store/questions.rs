//! Question bank: banked content grouped by level and skill.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{params, Connection, Row};
use serde_json::Value;
use tracing::{debug, info};

use super::models::{AnswerState, BankedQuestion, LevelStats};
use super::{Store, StoreError};

const SELECT_COLUMNS: &str =
    "key, question_id, skill_id, level_id, question_data, answered_correctly";

/// `{skill}-{unix millis}-{random}`; the UNIQUE constraint backs it up.
fn new_question_id(skill_id: &str) -> String {
    let suffix: u64 = rand::thread_rng().gen();
    format!("{}-{}-{:016x}", skill_id, Utc::now().timestamp_millis(), suffix)
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<BankedQuestion> {
    let raw: String = row.get(4)?;
    let question_data: Value = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(BankedQuestion {
        key: row.get(0)?,
        question_id: row.get(1)?,
        skill_id: row.get(2)?,
        level_id: row.get(3)?,
        question_data,
        answer: AnswerState::from_column(row.get(5)?),
    })
}

/// Unanswered questions of a level (optionally one skill), in key order.
fn unanswered(
    conn: &Connection,
    level_id: &str,
    skill_id: Option<&str>,
) -> Result<Vec<BankedQuestion>, StoreError> {
    let rows = match skill_id {
        Some(skill_id) => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM questions
                 WHERE level_id = ?1 AND skill_id = ?2 AND answered_correctly IS NULL
                 ORDER BY key"
            ))?;
            let rows = stmt
                .query_map(params![level_id, skill_id], question_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {SELECT_COLUMNS} FROM questions
                 WHERE level_id = ?1 AND answered_correctly IS NULL
                 ORDER BY skill_id, key"
            ))?;
            let rows = stmt
                .query_map(params![level_id], question_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };
    Ok(rows)
}

/// Uniform Fisher–Yates shuffle, then keep at most `limit`.
fn pick_random(mut candidates: Vec<BankedQuestion>, limit: usize) -> Vec<BankedQuestion> {
    candidates.shuffle(&mut rand::thread_rng());
    candidates.truncate(limit);
    candidates
}

impl Store {
    /// Bank `questions` for one level/skill in a single transaction.
    ///
    /// Either every question is stored or none is.
    pub fn add_questions(
        &self,
        level_id: &str,
        skill_id: &str,
        questions: &[Value],
    ) -> Result<usize, StoreError> {
        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO questions
                         (question_id, skill_id, level_id, question_data, answered_correctly)
                     VALUES (?1, ?2, ?3, ?4, NULL)",
                )?;
                for question in questions {
                    stmt.execute(params![
                        new_question_id(skill_id),
                        skill_id,
                        level_id,
                        serde_json::to_string(question)?,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        info!(level_id, skill_id, count = questions.len(), "Added questions to bank");
        Ok(questions.len())
    }

    /// Up to `limit` unanswered questions from any skill of the level, in random order.
    pub fn questions_for_level(
        &self,
        level_id: &str,
        limit: usize,
    ) -> Result<Vec<BankedQuestion>, StoreError> {
        let db = self.provider.acquire()?;
        let candidates = db.with_conn(|conn| unanswered(conn, level_id, None))?;
        debug!(level_id, available = candidates.len(), limit, "Selecting questions for level");
        Ok(pick_random(candidates, limit))
    }

    /// Up to `limit` unanswered questions for one skill, in random order.
    pub fn questions_for_skill(
        &self,
        level_id: &str,
        skill_id: &str,
        limit: usize,
    ) -> Result<Vec<BankedQuestion>, StoreError> {
        let db = self.provider.acquire()?;
        let candidates = db.with_conn(|conn| unanswered(conn, level_id, Some(skill_id)))?;
        Ok(pick_random(candidates, limit))
    }

    /// Unanswered questions banked for a level. Counts rows only.
    pub fn count_unanswered(&self, level_id: &str) -> Result<usize, StoreError> {
        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM questions
                 WHERE level_id = ?1 AND answered_correctly IS NULL",
                params![level_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Record the outcome of a practice attempt.
    ///
    /// Only an unanswered question can be marked; a second answer fails with
    /// [`StoreError::AlreadyAnswered`] and leaves the first one in place.
    pub fn record_answer(&self, question_id: &str, correct: bool) -> Result<(), StoreError> {
        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE questions SET answered_correctly = ?2
                 WHERE question_id = ?1 AND answered_correctly IS NULL",
                params![question_id, correct],
            )?;
            if changed == 0 {
                let exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM questions WHERE question_id = ?1",
                    params![question_id],
                    |row| row.get(0),
                )?;
                return Err(if exists > 0 {
                    StoreError::AlreadyAnswered(question_id.to_string())
                } else {
                    StoreError::NotFound(question_id.to_string())
                });
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!(question_id, correct, "Recorded answer");
        Ok(())
    }

    pub fn question(&self, question_id: &str) -> Result<Option<BankedQuestion>, StoreError> {
        use rusqlite::OptionalExtension;

        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM questions WHERE question_id = ?1"),
                    params![question_id],
                    question_from_row,
                )
                .optional()?)
        })
    }

    /// Totals per level, ordered by level id.
    pub fn stats(&self) -> Result<Vec<LevelStats>, StoreError> {
        let db = self.provider.acquire()?;
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT level_id,
                        COUNT(*),
                        SUM(CASE WHEN answered_correctly IS NULL THEN 1 ELSE 0 END)
                 FROM questions
                 GROUP BY level_id
                 ORDER BY level_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LevelStats {
                        level_id: row.get(0)?,
                        total: row.get::<_, i64>(1)? as usize,
                        unanswered: row.get::<_, i64>(2)? as usize,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}
