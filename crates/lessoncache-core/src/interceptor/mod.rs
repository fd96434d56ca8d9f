//! Request interception and HTTP response caching.
//!
//! Every GET from the application shell is routed by URL path:
//!
//! - the curriculum listing is served stale-while-revalidate from the
//!   metadata partition;
//! - lesson, bulk-lesson and placement-test calls go straight to the network;
//! - everything else is cache-first against the versioned shell partition.
//!
//! Partitions are directories of per-request entries under the cache directory. Activation deletes
//! any partition not in the current whitelist, which is how old shell
//! versions are dropped after an upgrade.

pub mod error;
pub mod handler;
pub mod policy;
pub mod storage;

pub use crate::api::Request;
pub use error::{CacheError, InterceptError};
pub use handler::{
    Intercepted, Interceptor, Lifecycle, ResponseSource, Revalidation, PRECACHE_MANIFEST,
};
pub use policy::{Route, RoutePolicy};
pub use storage::{CacheStorage, CachedData, CachedResponse, EntryInfo, EntryMeta, Partition};
