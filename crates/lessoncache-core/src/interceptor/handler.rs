//! The request interceptor: install, activate, and per-request routing.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, HttpResponse, Request};
use crate::config::Config;

use super::error::InterceptError;
use super::policy::{Route, RoutePolicy};
use super::storage::{CacheStorage, Partition};

/// Core shell assets seeded into the shell partition on install.
pub const PRECACHE_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/logo192.png",
    "/logo512.png",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, shell not seeded yet. Requests are not intercepted.
    Pending,
    /// Shell partition seeded, waiting for activation.
    Installed,
    /// Old partitions purged; every request is intercepted.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
}

/// Background refresh of a stale-while-revalidate entry.
pub struct Revalidation {
    handle: JoinHandle<Result<HttpResponse, crate::api::ApiError>>,
}

impl Revalidation {
    /// Wait for the refresh; yields the network response that was written back.
    pub async fn wait(self) -> Result<HttpResponse, InterceptError> {
        Ok(self.handle.await??)
    }
}

/// Response handed back for an intercepted request.
pub struct Intercepted {
    pub response: HttpResponse,
    pub source: ResponseSource,
    /// Present when a cached response was served and a refresh is still running.
    pub revalidation: Option<Revalidation>,
}

struct Inner {
    api: ApiClient,
    storage: CacheStorage,
    policy: RoutePolicy,
    shell_partition: String,
    metadata_partition: String,
    whitelist: Vec<String>,
    precache: Vec<String>,
    state: Mutex<Lifecycle>,
}

/// Clone is cheap; clones share lifecycle state.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<Inner>,
}

impl Interceptor {
    pub fn new(config: &Config, api: ApiClient, storage: CacheStorage) -> Self {
        let policy = RoutePolicy::new(api.base_path());
        Self {
            inner: Arc::new(Inner {
                api,
                storage,
                policy,
                shell_partition: config.shell_partition(),
                metadata_partition: config.metadata_partition(),
                whitelist: config.partition_whitelist(),
                precache: PRECACHE_MANIFEST.iter().map(|p| p.to_string()).collect(),
                state: Mutex::new(Lifecycle::Pending),
            }),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn shell(&self) -> Partition {
        self.inner.storage.partition(&self.inner.shell_partition)
    }

    pub fn metadata(&self) -> Partition {
        self.inner.storage.partition(&self.inner.metadata_partition)
    }

    // ===== Lifecycle =====

    /// Seed the shell partition with the precache manifest.
    ///
    /// All assets are fetched before anything is written; one failed fetch or
    /// non-2xx status fails the install and leaves the partition untouched.
    pub async fn install(&self) -> Result<(), InterceptError> {
        info!(partition = %self.inner.shell_partition, "Caching app shell");

        let requests = self
            .inner
            .precache
            .iter()
            .map(|path| self.inner.api.asset_url(path).map(Request::get))
            .collect::<Result<Vec<_>, _>>()?;

        let results = join_all(requests.iter().map(|r| self.inner.api.fetch(r))).await;

        let mut pairs = Vec::with_capacity(requests.len());
        for (request, result) in requests.into_iter().zip(results) {
            let response = result?;
            if !response.is_success() {
                warn!(url = %request.url, status = response.status, "Precache fetch failed");
                return Err(InterceptError::Precache {
                    url: request.url.to_string(),
                    status: response.status,
                });
            }
            pairs.push((request, response));
        }

        self.shell().put_all(pairs).await?;
        self.set_lifecycle(Lifecycle::Installed);
        Ok(())
    }

    /// Purge every partition outside the whitelist and take control of all
    /// clients at once. Returns the deleted partition names.
    pub async fn activate(&self) -> Result<Vec<String>, InterceptError> {
        let state = self.lifecycle();
        if state == Lifecycle::Pending {
            return Err(InterceptError::Lifecycle(state));
        }

        let mut deleted = Vec::new();
        for name in self.inner.storage.partition_names().await? {
            if !self.inner.whitelist.contains(&name) {
                info!(partition = %name, "Deleting old cache partition");
                self.inner.storage.delete_partition(&name).await?;
                deleted.push(name);
            }
        }

        self.set_lifecycle(Lifecycle::Active);
        Ok(deleted)
    }

    /// Install, then activate immediately without waiting for clients to reload.
    pub async fn start(&self) -> Result<Vec<String>, InterceptError> {
        self.install().await?;
        self.activate().await
    }

    /// Activate from a shell partition seeded by an earlier install, without
    /// touching the network. Returns false, leaving the lifecycle alone, when
    /// any manifest asset is missing.
    pub async fn resume(&self) -> Result<bool, InterceptError> {
        let shell = self.shell();
        for path in &self.inner.precache {
            let request = Request::get(self.inner.api.asset_url(path)?);
            if shell.lookup(&request).await?.is_none() {
                debug!(asset = %path, "Shell asset missing, cannot resume");
                return Ok(false);
            }
        }
        self.set_lifecycle(Lifecycle::Installed);
        self.activate().await?;
        Ok(true)
    }

    // ===== Request Handling =====

    /// Route `request` through its policy.
    ///
    /// `Ok(None)` means the interceptor left the request alone and the caller
    /// should send it to the network itself.
    pub async fn handle(&self, request: &Request) -> Result<Option<Intercepted>, InterceptError> {
        if self.lifecycle() != Lifecycle::Active {
            return Ok(None);
        }

        match self.inner.policy.classify(request) {
            None => Ok(None),
            Some(Route::NetworkOnly) => {
                debug!(url = %request.url, "Network-only route, passing through");
                Ok(None)
            }
            Some(Route::StaleWhileRevalidate) => {
                self.stale_while_revalidate(request).await.map(Some)
            }
            Some(Route::CacheFirst) => self.cache_first(request).await.map(Some),
        }
    }

    /// Like [`handle`](Self::handle), falling back to a plain network fetch
    /// when the request is not intercepted.
    pub async fn fetch(&self, request: &Request) -> Result<Intercepted, InterceptError> {
        if let Some(intercepted) = self.handle(request).await? {
            return Ok(intercepted);
        }
        let response = self.inner.api.fetch(request).await?;
        Ok(Intercepted {
            response,
            source: ResponseSource::Network,
            revalidation: None,
        })
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
    ) -> Result<Intercepted, InterceptError> {
        let partition = self.metadata();
        let cached = partition.lookup(request).await.unwrap_or_else(|e| {
            warn!(url = %request.url, error = %e, "Failed to read metadata cache");
            None
        });

        let api = self.inner.api.clone();
        let refresh_request = request.clone();
        let handle = tokio::spawn(async move {
            let url = &refresh_request.url;
            let response = match api.fetch(&refresh_request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Background revalidation failed");
                    return Err(e);
                }
            };
            if response.is_success() {
                if let Err(e) = partition.put(&refresh_request, response.clone()).await {
                    warn!(url = %url, error = %e, "Failed to store revalidated response");
                }
            } else {
                debug!(
                    url = %url,
                    status = response.status,
                    "Not storing unsuccessful revalidation"
                );
            }
            Ok(response)
        });
        let revalidation = Revalidation { handle };

        match cached {
            Some(entry) => {
                debug!(
                    url = %request.url,
                    age = %entry.age_display(),
                    "Serving cached metadata, revalidating"
                );
                Ok(Intercepted {
                    response: entry.data,
                    source: ResponseSource::Cache,
                    revalidation: Some(revalidation),
                })
            }
            None => {
                let response = revalidation.wait().await?;
                Ok(Intercepted {
                    response,
                    source: ResponseSource::Network,
                    revalidation: None,
                })
            }
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Intercepted, InterceptError> {
        let partition = self.shell();
        match partition.lookup(request).await {
            Ok(Some(entry)) => {
                return Ok(Intercepted {
                    response: entry.data,
                    source: ResponseSource::Cache,
                    revalidation: None,
                });
            }
            Ok(None) => {}
            Err(e) => warn!(url = %request.url, error = %e, "Failed to read shell cache"),
        }

        let response = self.inner.api.fetch(request).await?;
        if response.is_cacheable() {
            // Caching is best-effort; the caller still gets the response.
            if let Err(e) = partition.put(request, response.clone()).await {
                warn!(url = %request.url, error = %e, "Failed to cache response");
            }
        }

        Ok(Intercepted {
            response,
            source: ResponseSource::Network,
            revalidation: None,
        })
    }
}
