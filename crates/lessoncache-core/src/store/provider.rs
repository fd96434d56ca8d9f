//! Lazily opened, self-healing database handle.
//!
//! [`DatabaseProvider`] owns the single open [`Database`] for a file. The
//! first `acquire()` opens the file and runs the schema migration; later calls
//! return the same handle. When the handle is closed (by the host under
//! resource pressure, or via [`Database::close`]) a close observer empties the
//! provider's slot, so the next `acquire()` reopens a fresh connection instead
//! of handing out a dead one.
//!
//! Callers should acquire per operation and not hold the `Arc<Database>`
//! across await points.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::schema;
use super::StoreError;

/// Database file name in the data directory
pub const DB_FILE: &str = "lessoncache.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type CloseObserver = Box<dyn FnOnce() + Send>;

pub struct Database {
    conn: Mutex<Option<Connection>>,
    observers: Mutex<Vec<CloseObserver>>,
    version: u32,
}

impl Database {
    fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        debug!(path = %path.display(), "Opening database connection");
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let version = schema::migrate(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            observers: Mutex::new(Vec::new()),
            version,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_closed(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run `f` against the live connection, or fail with [`StoreError::Closed`].
    pub fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Register `observer` to run once when the connection closes.
    pub fn on_close(&self, observer: impl FnOnce() + Send + 'static) {
        if self.is_closed() {
            observer();
            return;
        }
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(observer));
    }

    /// Close the connection and notify observers. Later calls are no-ops.
    pub fn close(&self) {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(conn) = conn else {
            return;
        };
        if let Err((_, e)) = conn.close() {
            warn!(error = %e, "Error while closing database connection");
        }

        let observers = std::mem::take(
            &mut *self.observers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for observer in observers {
            observer();
        }
    }
}

struct ProviderInner {
    path: PathBuf,
    slot: Mutex<Option<Arc<Database>>>,
}

impl ProviderInner {
    /// Empty the slot, but only if it still holds `db`.
    fn release(&self, db: &Weak<Database>) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let holds_db = slot
            .as_ref()
            .map(|current| Weak::ptr_eq(&Arc::downgrade(current), db))
            .unwrap_or(false);
        if holds_db {
            warn!("Database connection closed; handle will be reopened on next use");
            *slot = None;
        }
    }
}

/// Shared handle provider. Clone is cheap; clones share one connection.
#[derive(Clone)]
pub struct DatabaseProvider {
    inner: Arc<ProviderInner>,
}

impl DatabaseProvider {
    pub fn new(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                path,
                slot: Mutex::new(None),
            }),
        }
    }

    /// Provider for `<data_dir>/lessoncache.db`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(DB_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Live handle, opening and migrating the database if needed.
    ///
    /// A migration failure is returned to this caller; the slot stays empty,
    /// so every later caller retries the open and sees the same failure.
    pub fn acquire(&self) -> Result<Arc<Database>, StoreError> {
        let mut slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(db) = slot.as_ref() {
            if !db.is_closed() {
                return Ok(Arc::clone(db));
            }
        }

        let db = Arc::new(Database::open(&self.inner.path)?);
        info!(path = %self.inner.path.display(), version = db.version(), "Database opened");

        let provider = Arc::downgrade(&self.inner);
        let weak_db = Arc::downgrade(&db);
        db.on_close(move || {
            if let Some(provider) = provider.upgrade() {
                provider.release(&weak_db);
            }
        });

        *slot = Some(Arc::clone(&db));
        Ok(db)
    }

    /// Drop and close the cached handle, if any.
    pub fn invalidate(&self) {
        let db = self
            .inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(db) = db {
            db.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_returns_shared_handle() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DatabaseProvider::in_dir(dir.path());

        let a = provider.acquire().unwrap();
        let b = provider.clone().acquire().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.version(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_closed_handle_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DatabaseProvider::in_dir(dir.path());

        let first = provider.acquire().unwrap();
        first.close();
        assert!(first.is_closed());
        assert!(matches!(first.with_conn(|_| Ok(())), Err(StoreError::Closed)));

        let second = provider.acquire().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[test]
    fn test_stale_observer_does_not_evict_newer_handle() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DatabaseProvider::in_dir(dir.path());

        let first = provider.acquire().unwrap();
        provider.invalidate();
        let second = provider.acquire().unwrap();

        // Closing the old handle again must not touch the new one
        first.close();
        let third = provider.acquire().unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn test_close_runs_observers_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let provider = DatabaseProvider::in_dir(dir.path());
        let db = provider.acquire().unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        db.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        db.close();
        db.close();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
