//! Local structured store for offline practice content.
//!
//! SQLite database with two collections:
//! - `questions`: the question bank, indexed by `(level_id, skill_id)`
//! - `placement_tests`: one question snapshot per test id
//!
//! Every write runs in its own transaction that commits or rolls back before
//! the call returns.

pub mod error;
pub mod models;
mod placement;
pub mod provider;
mod questions;
pub mod schema;

pub use error::StoreError;
pub use models::{AnswerState, BankedQuestion, LevelStats};
pub use provider::{Database, DatabaseProvider, DB_FILE};
pub use schema::SCHEMA_VERSION;

/// Question bank and placement-test access. Clone is cheap.
///
/// Holds no connection of its own; each call acquires one from the provider.
#[derive(Clone)]
pub struct Store {
    provider: DatabaseProvider,
}

impl Store {
    pub fn new(provider: DatabaseProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &DatabaseProvider {
        &self.provider
    }
}
