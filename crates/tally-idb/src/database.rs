//! Database state and connections.

use crate::key::{Key, KeyRange};
use crate::store::IDBObjectStore;
use crate::transaction::{IDBTransaction, TransactionMode};
use crate::IDBError;
use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Committed contents of a database.
#[derive(Debug, Clone, Default)]
pub(crate) struct DatabaseState {
    pub(crate) name: String,
    pub(crate) version: u64,
    pub(crate) stores: HashMap<String, IDBObjectStore>,
}

impl DatabaseState {
    pub(crate) fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Underlying resource shared by every connection to the same database.
#[derive(Debug)]
pub(crate) struct SharedDatabase {
    pub(crate) state: Arc<RwLock<DatabaseState>>,
    pub(crate) snapshot_path: Option<PathBuf>,
    pub(crate) connections: AtomicUsize,
}

impl SharedDatabase {
    pub(crate) fn new(state: DatabaseState, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path,
            connections: AtomicUsize::new(0),
        }
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Connection {
    name: String,
    version: u64,
    shared: Arc<SharedDatabase>,
    closed: AtomicBool,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ==================== IDBDatabase ====================

/// An open connection to a database.
///
/// Cloning is cheap; all clones are the same connection. The connection is
/// released when [`close`](Self::close) is called or the last clone drops.
///
/// Holding a read-write transaction and then awaiting another transaction (or
/// one of the shortcut queries) on the same database from the same task waits
/// forever: finish the first transaction before starting the next.
#[derive(Debug, Clone)]
pub struct IDBDatabase {
    inner: Arc<Connection>,
}

impl IDBDatabase {
    pub(crate) fn connect(name: &str, version: u64, shared: Arc<SharedDatabase>) -> Self {
        shared.connections.fetch_add(1, Ordering::SeqCst);
        Self {
            inner: Arc::new(Connection {
                name: name.to_string(),
                version,
                shared,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Version the connection was opened at.
    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the connection. New transactions on it fail afterwards.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.shared.connections.fetch_sub(1, Ordering::SeqCst);
            debug!(db = %self.inner.name, "Connection closed");
        }
    }

    /// Object store names, sorted.
    pub async fn object_store_names(&self) -> Vec<String> {
        let state = self.inner.shared.state.read().await;
        let mut names: Vec<_> = state.stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a transaction over `stores`.
    ///
    /// Read-write transactions wait for every other transaction on the
    /// database to finish.
    pub async fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> Result<IDBTransaction, IDBError> {
        if self.is_closed() {
            return Err(IDBError::InvalidStateError(format!(
                "Connection to {} is closed",
                self.inner.name
            )));
        }
        if stores.is_empty() {
            return Err(IDBError::InvalidAccessError(
                "A transaction needs at least one object store".to_string(),
            ));
        }

        let scope: Vec<String> = stores.iter().map(|s| s.to_string()).collect();
        let shared = &self.inner.shared;

        let tx = match mode {
            TransactionMode::ReadOnly => {
                let guard = shared.state.clone().read_owned().await;
                validate_scope(&guard.stores, &scope)?;
                IDBTransaction::read_only(guard, scope)
            }
            TransactionMode::ReadWrite => {
                let guard = shared.state.clone().write_owned().await;
                validate_scope(&guard.stores, &scope)?;
                IDBTransaction::read_write(guard, scope, shared.snapshot_path.clone())
            }
            TransactionMode::VersionChange => {
                return Err(IDBError::InvalidAccessError(
                    "Versionchange transactions are only started by open()".to_string(),
                ));
            }
        };
        debug!(db = %self.inner.name, ?mode, scope = ?tx.scope(), "Transaction started");
        Ok(tx)
    }

    /// Number of records in a store.
    pub async fn count(&self, store: &str) -> Result<usize, IDBError> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadOnly).await?;
        let count = tx.object_store(store)?.count(None);
        Ok(count)
    }

    /// Number of records in a store whose index key falls in `range`.
    pub async fn count_from_index(
        &self,
        store: &str,
        index: &str,
        range: Option<KeyRange>,
    ) -> Result<usize, IDBError> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadOnly).await?;
        let store = tx.object_store(store)?;
        let count = store.index(index)?.count(range.as_ref());
        Ok(count)
    }

    /// Record by primary key.
    pub async fn get(&self, store: &str, key: impl Into<Key>) -> Result<Option<JsonValue>, IDBError> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadOnly).await?;
        let value = tx.object_store(store)?.get(key).cloned();
        Ok(value)
    }

    /// Records in primary key order.
    pub async fn get_all(
        &self,
        store: &str,
        range: Option<KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<JsonValue>, IDBError> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadOnly).await?;
        let values = tx
            .object_store(store)?
            .get_all(range.as_ref(), count)
            .into_iter()
            .cloned()
            .collect();
        Ok(values)
    }

    /// First record whose index key equals `key`.
    pub async fn get_from_index(
        &self,
        store: &str,
        index: &str,
        key: impl Into<Key>,
    ) -> Result<Option<JsonValue>, IDBError> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadOnly).await?;
        let store = tx.object_store(store)?;
        let value = store.index(index)?.get(key).cloned();
        Ok(value)
    }

    /// Records in index order.
    pub async fn get_all_from_index(
        &self,
        store: &str,
        index: &str,
        range: Option<KeyRange>,
        count: Option<usize>,
    ) -> Result<Vec<JsonValue>, IDBError> {
        let mut tx = self.transaction(&[store], TransactionMode::ReadOnly).await?;
        let store = tx.object_store(store)?;
        let values = store
            .index(index)?
            .get_all(range.as_ref(), count)
            .into_iter()
            .cloned()
            .collect();
        Ok(values)
    }
}

fn validate_scope(
    stores: &HashMap<String, IDBObjectStore>,
    scope: &[String],
) -> Result<(), IDBError> {
    for name in scope {
        if !stores.contains_key(name) {
            return Err(IDBError::NotFoundError(format!(
                "Object store not found: {}",
                name
            )));
        }
    }
    Ok(())
}
