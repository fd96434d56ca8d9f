//! Bulk synchronization of practice content.
//!
//! One request per level to the bulk-lessons endpoint, split by skill and
//! written to the question bank one transaction per skill. Placement tests
//! are downloaded verbatim into the snapshot collection.

pub mod events;
pub mod synchronizer;

pub use events::{SyncEvent, SyncEvents};
pub use synchronizer::{GroupOutcome, SyncError, SyncReport, Synchronizer};
