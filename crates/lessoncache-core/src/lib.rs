//! Offline cache and sync core for the lessoncache math practice client.
//!
//! Three pieces, composed as interceptor → store ← synchronizer:
//!
//! - [`interceptor`]: routes every outbound GET through stale-while-revalidate,
//!   network-only or cache-first handling, backed by versioned cache partitions.
//! - [`store`]: SQLite question bank and placement-test snapshots, behind a
//!   [`store::DatabaseProvider`] that reopens the handle after the host closes it.
//! - [`sync`]: one bulk fetch per level, split by skill into the store.

pub mod api;
pub mod config;
pub mod interceptor;
pub mod store;
pub mod sync;

pub use api::{ApiClient, ApiError};
pub use config::Config;
pub use interceptor::{CacheStorage, Interceptor, Request};
pub use store::{DatabaseProvider, Store};
pub use sync::{SyncEvent, SyncReport, Synchronizer};
