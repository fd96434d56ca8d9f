use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema migration from v{from} to v{to} failed: {source}")]
    Migration {
        from: u32,
        to: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Database is at schema v{found}, newer than supported v{supported}")]
    VersionTooNew { found: u32, supported: u32 },

    #[error("Database connection is closed")]
    Closed,

    #[error("Question not found: {0}")]
    NotFound(String),

    #[error("Question {0} has already been answered")]
    AlreadyAnswered(String),

    #[error("Database I/O error: {0}")]
    Io(#[from] std::io::Error),
}
