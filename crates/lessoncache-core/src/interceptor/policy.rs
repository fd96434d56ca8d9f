//! Route classification for intercepted requests.
//!
//! Matching is done on the request path relative to the API base path, so the
//! same policy works against any deployment host.

use reqwest::Method;

use crate::api::Request;

/// Curriculum listing, served stale-while-revalidate.
pub const METADATA_PATH: &str = "/math/curriculum";

/// Randomized or per-session payloads that must never be cached.
pub const NETWORK_ONLY_PREFIXES: &[&str] = &[
    "/math/lesson/",
    "/math/bulk-lessons/",
    "/math/placement-test/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StaleWhileRevalidate,
    NetworkOnly,
    CacheFirst,
}

#[derive(Debug, Clone)]
pub struct RoutePolicy {
    base_path: String,
    metadata_path: String,
    network_only_prefixes: Vec<String>,
}

impl RoutePolicy {
    /// `base_path` is the path component of the API base, e.g. `/api`.
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into().trim_end_matches('/').to_string(),
            metadata_path: METADATA_PATH.to_string(),
            network_only_prefixes: NETWORK_ONLY_PREFIXES.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Path below the API base, or `None` when the request is outside it.
    fn api_relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.base_path.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// `None` for requests the interceptor must leave alone: anything that is
    /// not a GET over http(s).
    pub fn classify(&self, request: &Request) -> Option<Route> {
        if request.method != Method::GET || !request.is_http() {
            return None;
        }

        let Some(relative) = self.api_relative(request.url.path()) else {
            return Some(Route::CacheFirst);
        };

        if relative == self.metadata_path {
            Some(Route::StaleWhileRevalidate)
        } else if self
            .network_only_prefixes
            .iter()
            .any(|prefix| relative.starts_with(prefix.as_str()))
        {
            Some(Route::NetworkOnly)
        } else {
            Some(Route::CacheFirst)
        }
    }
}
