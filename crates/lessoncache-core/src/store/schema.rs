//! Schema definition and versioned migration for the question bank database.
//!
//! The schema version lives in `PRAGMA user_version`. Every step is
//! create-if-absent, so re-running an upgrade over a partially migrated file
//! is harmless.

use rusqlite::Connection;
use tracing::info;

use super::StoreError;

pub const SCHEMA_VERSION: u32 = 3;

pub const QUESTIONS_TABLE: &str = "questions";
pub const PLACEMENT_TESTS_TABLE: &str = "placement_tests";
pub const LEVEL_SKILL_INDEX: &str = "by_level_and_skill";
pub const UNANSWERED_INDEX: &str = "unanswered_by_level";

// answered_correctly: NULL = unanswered, 1 = correct, 0 = incorrect
const V1_QUESTIONS: &str = "
CREATE TABLE IF NOT EXISTS questions (
    key                INTEGER PRIMARY KEY AUTOINCREMENT,
    question_id        TEXT NOT NULL UNIQUE,
    skill_id           TEXT NOT NULL,
    level_id           TEXT NOT NULL,
    question_data      TEXT NOT NULL,
    answered_correctly INTEGER
);
CREATE INDEX IF NOT EXISTS by_level_and_skill ON questions(level_id, skill_id);
";

const V2_PLACEMENT_TESTS: &str = "
CREATE TABLE IF NOT EXISTS placement_tests (
    test_id        TEXT PRIMARY KEY,
    questions_json TEXT NOT NULL
);
";

// Covers the unanswered-count and draw queries, which only ever touch
// unanswered rows.
const V3_UNANSWERED_INDEX: &str = "
CREATE INDEX IF NOT EXISTS unanswered_by_level ON questions(level_id)
    WHERE answered_correctly IS NULL;
";

/// Step N brings a database to version N.
const MIGRATIONS: &[(u32, &str)] = &[
    (1, V1_QUESTIONS),
    (2, V2_PLACEMENT_TESTS),
    (3, V3_UNANSWERED_INDEX),
];

pub fn user_version(conn: &Connection) -> Result<u32, StoreError> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?)
}

/// Bring `conn` up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<u32, StoreError> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Bring `conn` up to `target` in a single transaction.
pub(crate) fn migrate_to(conn: &mut Connection, target: u32) -> Result<u32, StoreError> {
    let current = user_version(conn)?;
    if current > target {
        return Err(StoreError::VersionTooNew {
            found: current,
            supported: target,
        });
    }
    if current == target {
        return Ok(current);
    }

    let migration_err = |source| StoreError::Migration {
        from: current,
        to: target,
        source,
    };

    let tx = conn.transaction().map_err(migration_err)?;
    for (_, ddl) in MIGRATIONS.iter().filter(|(version, _)| *version <= target) {
        tx.execute_batch(ddl).map_err(migration_err)?;
    }
    tx.pragma_update(None, "user_version", target)
        .map_err(migration_err)?;
    tx.commit().map_err(migration_err)?;

    info!(from = current, to = target, "Upgraded database schema");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn test_fresh_database_gets_full_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);
        assert!(table_exists(&conn, QUESTIONS_TABLE));
        assert!(table_exists(&conn, PLACEMENT_TESTS_TABLE));
        assert!(table_exists(&conn, LEVEL_SKILL_INDEX));
        assert!(table_exists(&conn, UNANSWERED_INDEX));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(migrate(&mut conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_v1_database_upgrades_in_place() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, 1).unwrap();
        assert!(!table_exists(&conn, PLACEMENT_TESTS_TABLE));

        conn.execute(
            "INSERT INTO questions (question_id, skill_id, level_id, question_data)
             VALUES ('q', 's', 'l', '{}')",
            [],
        )
        .unwrap();

        migrate(&mut conn).unwrap();
        assert!(table_exists(&conn, PLACEMENT_TESTS_TABLE));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_v2_database_gains_partial_unanswered_index() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, 2).unwrap();
        assert!(!table_exists(&conn, UNANSWERED_INDEX));

        assert_eq!(migrate(&mut conn).unwrap(), 3);
        let sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'index' AND name = ?1",
                [UNANSWERED_INDEX],
                |row| row.get(0),
            )
            .unwrap();
        assert!(sql.contains("WHERE answered_correctly IS NULL"), "{sql}");
    }

    #[test]
    fn test_newer_database_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(
            migrate(&mut conn),
            Err(StoreError::VersionTooNew { .. })
        ));
    }
}
