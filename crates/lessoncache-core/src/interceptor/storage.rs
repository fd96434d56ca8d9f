//! Named cache partitions on disk.
//!
//! Each partition is a directory `<root>/<name>/` with one entry per request.
//! An entry is a small `<hash>.json` holding the response metadata plus a raw
//! body file it points to, where `<hash>` is the SHA-256 of the request's
//! cache key. A lookup reads one metadata file and one body no matter how
//! many other entries the partition holds.
//!
//! Writers put the body under a fresh name, then rename the metadata into
//! place, so readers see either the old or the new entry. `put_all` stages a
//! full copy of the partition and swaps the directories.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::api::{HttpResponse, Request, ResponseType};

use super::error::CacheError;

const META_EXT: &str = "json";
const BODY_EXT: &str = "bin";

// Dot-prefixed names are never valid partition or entry names.
const TMP_PREFIX: &str = ".tmp-";
const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

pub type CachedResponse = CachedData<HttpResponse>;

/// Metadata of a stored entry, without its body.
pub type EntryInfo = CachedData<EntryMeta>;

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Everything about a cached response except the body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key: String,
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub response_type: ResponseType,
    pub body_len: u64,
    body_file: String,
}

impl EntryMeta {
    fn split(key: String, response: HttpResponse, body_file: String) -> (Self, Vec<u8>) {
        let meta = Self {
            key,
            url: response.url,
            status: response.status,
            headers: response.headers,
            response_type: response.response_type,
            body_len: response.body.len() as u64,
            body_file,
        };
        (meta, response.body)
    }

    fn into_response(self, body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            url: self.url,
            status: self.status,
            headers: self.headers,
            body,
            response_type: self.response_type,
        }
    }
}

fn entry_stem(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn nonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Write to a temp file in the same directory, then rename over `path`.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_file_name(format!("{TMP_PREFIX}{}", nonce()));
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_meta(path: &Path) -> Result<Option<EntryInfo>, CacheError> {
    match fs::read(path).await {
        Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_file_if_exists(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Write one entry into `dir`, replacing any previous entry for `key`.
async fn write_entry(dir: &Path, key: String, response: HttpResponse) -> Result<(), CacheError> {
    let stem = entry_stem(&key);
    let meta_path = dir.join(format!("{stem}.{META_EXT}"));
    // An unreadable previous entry is simply replaced.
    let previous = read_meta(&meta_path).await.ok().flatten();

    let body_file = format!("{stem}-{}.{BODY_EXT}", nonce());
    let (meta, body) = EntryMeta::split(key, response, body_file);
    write_atomic(&dir.join(&meta.body_file), &body).await?;
    write_atomic(&meta_path, &serde_json::to_vec(&CachedData::new(meta))?).await?;

    if let Some(old) = previous {
        if let Err(e) = remove_file_if_exists(&dir.join(&old.data.body_file)).await {
            warn!(file = %old.data.body_file, error = %e, "Failed to remove replaced cache body");
        }
    }
    Ok(())
}

struct StorageInner {
    root: PathBuf,
    write_lock: Mutex<()>,
}

/// Directory of cache partitions. Clone is cheap and shares the write lock.
///
/// Reads take no lock; writers are serialized per storage instance.
#[derive(Clone)]
pub struct CacheStorage {
    inner: Arc<StorageInner>,
}

impl CacheStorage {
    /// Open (creating if needed) the storage root and clear out directories
    /// left behind by an interrupted `put_all` or partition delete.
    pub async fn open(root: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&root).await?;

        let mut dir = fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) || name.starts_with(RETIRED_PREFIX) {
                debug!(dir = %name, "Removing leftover cache directory");
                fs::remove_dir_all(entry.path()).await?;
            }
        }

        Ok(Self {
            inner: Arc::new(StorageInner {
                root,
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// Handle to a partition. The backing directory is created on first write.
    pub fn partition(&self, name: &str) -> Partition {
        Partition {
            storage: self.clone(),
            name: name.to_string(),
        }
    }

    /// Names of all partitions that exist on disk, sorted.
    pub async fn partition_names(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.inner.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_hidden(&name) && entry.file_type().await?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a partition. Returns false when it did not exist.
    pub async fn delete_partition(&self, name: &str) -> Result<bool, CacheError> {
        let dir = self.partition_dir(name)?;
        let _guard = self.lock().await;

        // Move it out of sight first; readers never see a half-deleted partition.
        let retired = self.retired_dir();
        match fs::rename(&dir, &retired).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        fs::remove_dir_all(&retired).await?;
        Ok(true)
    }

    fn partition_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        let valid = !name.is_empty()
            && !is_hidden(name)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CacheError::InvalidName(name.to_string()));
        }
        Ok(self.inner.root.join(name))
    }

    fn staging_dir(&self) -> PathBuf {
        self.inner.root.join(format!("{STAGING_PREFIX}{}", nonce()))
    }

    fn retired_dir(&self) -> PathBuf {
        self.inner.root.join(format!("{RETIRED_PREFIX}{}", nonce()))
    }

    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.write_lock.lock().await
    }
}

/// One named bucket of request key → cached response.
#[derive(Clone)]
pub struct Partition {
    storage: CacheStorage,
    name: String,
}

impl Partition {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn dir(&self) -> Result<PathBuf, CacheError> {
        self.storage.partition_dir(&self.name)
    }

    fn meta_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.{}", entry_stem(key), META_EXT))
    }

    pub async fn lookup(&self, request: &Request) -> Result<Option<CachedResponse>, CacheError> {
        let dir = self.dir()?;
        let key = request.cache_key();
        let Some(info) = read_meta(&Self::meta_path(&dir, &key)).await? else {
            return Ok(None);
        };
        if info.data.key != key {
            return Ok(None);
        }

        let body = match fs::read(dir.join(&info.data.body_file)).await {
            Ok(body) => body,
            // Replaced between reading the metadata and the body
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(key = %key, "Cache entry replaced during lookup");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(CachedData {
            data: info.data.into_response(body),
            cached_at: info.cached_at,
        }))
    }

    /// Store `response` under `request`, replacing any previous entry.
    pub async fn put(&self, request: &Request, response: HttpResponse) -> Result<(), CacheError> {
        let dir = self.dir()?;
        let key = request.cache_key();
        debug!(partition = %self.name, key = %key, "Caching response");

        let _guard = self.storage.lock().await;
        fs::create_dir_all(&dir).await?;
        write_entry(&dir, key, response).await
    }

    /// Store every pair at once: a staged copy of the partition replaces the
    /// live one, so either all pairs land or none do.
    pub async fn put_all(&self, pairs: Vec<(Request, HttpResponse)>) -> Result<(), CacheError> {
        let dir = self.dir()?;
        let _guard = self.storage.lock().await;

        let staging = self.storage.staging_dir();
        if let Err(e) = Self::stage(&dir, &staging, pairs).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        let retired = self.storage.retired_dir();
        let had_live = match fs::rename(&dir, &retired).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                return Err(e.into());
            }
        };
        if let Err(e) = fs::rename(&staging, &dir).await {
            if had_live {
                let _ = fs::rename(&retired, &dir).await;
            }
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }
        if had_live {
            if let Err(e) = fs::remove_dir_all(&retired).await {
                warn!(partition = %self.name, error = %e, "Failed to remove replaced partition");
            }
        }
        Ok(())
    }

    /// Copy the live entries into `staging`, then write `pairs` over them.
    async fn stage(
        live: &Path,
        staging: &Path,
        pairs: Vec<(Request, HttpResponse)>,
    ) -> Result<(), CacheError> {
        fs::create_dir_all(staging).await?;
        match fs::read_dir(live).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    let name = entry.file_name();
                    if is_hidden(&name.to_string_lossy()) {
                        continue;
                    }
                    fs::copy(entry.path(), staging.join(&name)).await?;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        for (request, response) in pairs {
            write_entry(staging, request.cache_key(), response).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, request: &Request) -> Result<bool, CacheError> {
        let dir = self.dir()?;
        let key = request.cache_key();
        let meta_path = Self::meta_path(&dir, &key);

        let _guard = self.storage.lock().await;
        let Some(info) = read_meta(&meta_path).await? else {
            return Ok(false);
        };
        remove_file_if_exists(&meta_path).await?;
        if let Err(e) = remove_file_if_exists(&dir.join(&info.data.body_file)).await {
            warn!(file = %info.data.body_file, error = %e, "Failed to remove cache body");
        }
        Ok(true)
    }

    async fn meta_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dir = match fs::read_dir(self.dir()?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let hidden = path
                .file_name()
                .map(|n| is_hidden(&n.to_string_lossy()))
                .unwrap_or(true);
            if !hidden && path.extension().and_then(|e| e.to_str()) == Some(META_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Metadata of every entry, without bodies, sorted by key.
    pub async fn entries(&self) -> Result<Vec<EntryInfo>, CacheError> {
        let mut entries = Vec::new();
        for path in self.meta_files().await? {
            if let Some(info) = read_meta(&path).await? {
                entries.push(info);
            }
        }
        entries.sort_by(|a, b| a.data.key.cmp(&b.data.key));
        Ok(entries)
    }

    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.entries().await?.into_iter().map(|e| e.data.key).collect())
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.meta_files().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len().await? == 0)
    }
}

// ============================================================================
// Tests
// ============================================================================
