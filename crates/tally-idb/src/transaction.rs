//! Transactions and the store/index views they hand out.

use crate::cursor::{CursorDirection, CursorEntry, IDBCursor};
use crate::database::DatabaseState;
use crate::key::{Key, KeyPath, KeyRange};
use crate::persist::{self, DatabaseSnapshot};
use crate::store::{IDBIndex, IDBObjectStore, IndexDef};
use crate::IDBError;
use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, warn};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    VersionChange,
}

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committing,
    Finished,
}

enum TxGuard {
    Read(OwnedRwLockReadGuard<DatabaseState>),
    Write(OwnedRwLockWriteGuard<DatabaseState>),
}

impl TxGuard {
    fn state(&self) -> &DatabaseState {
        match self {
            TxGuard::Read(g) => &**g,
            TxGuard::Write(g) => &**g,
        }
    }
}

// ==================== IDBTransaction ====================

/// A database transaction.
///
/// Read-only transactions share the database lock; read-write and
/// versionchange transactions hold it exclusively until they finish, so they
/// never interleave. Writes go to staged copies of the scoped stores and only
/// become visible (and durable) on [`commit`](Self::commit).
pub struct IDBTransaction {
    mode: TransactionMode,
    scope: Vec<String>,
    state: TransactionState,
    guard: TxGuard,
    staged: HashMap<String, IDBObjectStore>,
    old_version: u64,
    new_version: u64,
    snapshot_path: Option<PathBuf>,
}

impl IDBTransaction {
    pub(crate) fn read_only(guard: OwnedRwLockReadGuard<DatabaseState>, scope: Vec<String>) -> Self {
        let version = guard.version;
        Self {
            mode: TransactionMode::ReadOnly,
            scope,
            state: TransactionState::Active,
            guard: TxGuard::Read(guard),
            staged: HashMap::new(),
            old_version: version,
            new_version: version,
            snapshot_path: None,
        }
    }

    pub(crate) fn read_write(
        guard: OwnedRwLockWriteGuard<DatabaseState>,
        scope: Vec<String>,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let staged = scope
            .iter()
            .filter_map(|name| guard.stores.get(name).map(|s| (name.clone(), s.clone())))
            .collect();
        let version = guard.version;
        Self {
            mode: TransactionMode::ReadWrite,
            scope,
            state: TransactionState::Active,
            guard: TxGuard::Write(guard),
            staged,
            old_version: version,
            new_version: version,
            snapshot_path,
        }
    }

    pub(crate) fn version_change(
        guard: OwnedRwLockWriteGuard<DatabaseState>,
        new_version: u64,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        let staged = guard.stores.clone();
        let scope = staged.keys().cloned().collect();
        let old_version = guard.version;
        Self {
            mode: TransactionMode::VersionChange,
            scope,
            state: TransactionState::Active,
            guard: TxGuard::Write(guard),
            staged,
            old_version,
            new_version,
            snapshot_path,
        }
    }

    /// Transaction mode.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Object store names in scope.
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Check if store is in scope.
    pub fn has_store(&self, name: &str) -> bool {
        self.scope.iter().any(|s| s == name)
    }

    /// Version before this transaction.
    pub fn old_version(&self) -> u64 {
        self.old_version
    }

    /// Version after commit; differs from `old_version` only for
    /// versionchange transactions.
    pub fn new_version(&self) -> u64 {
        self.new_version
    }

    /// Names of the stores visible to this transaction, sorted.
    pub fn object_store_names(&self) -> Vec<String> {
        let mut names = self.scope.clone();
        names.sort();
        names
    }

    /// Access an object store in scope.
    pub fn object_store(&mut self, name: &str) -> Result<ObjectStoreTx<'_>, IDBError> {
        self.ensure_active()?;
        if !self.has_store(name) {
            return Err(IDBError::NotFoundError(format!(
                "Object store {} is not in the transaction scope",
                name
            )));
        }

        let mode = self.mode;
        let access = match mode {
            TransactionMode::ReadOnly => StoreAccess::Shared(
                self.guard
                    .state()
                    .stores
                    .get(name)
                    .ok_or_else(|| missing_store(name))?,
            ),
            TransactionMode::ReadWrite | TransactionMode::VersionChange => StoreAccess::Staged(
                self.staged.get_mut(name).ok_or_else(|| missing_store(name))?,
            ),
        };
        Ok(ObjectStoreTx { mode, access })
    }

    /// Create an object store (versionchange only).
    pub fn create_object_store(
        &mut self,
        name: &str,
        key_path: KeyPath,
        auto_increment: bool,
    ) -> Result<ObjectStoreTx<'_>, IDBError> {
        self.ensure_version_change()?;
        if self.staged.contains_key(name) {
            return Err(IDBError::ConstraintError(format!(
                "Object store already exists: {}",
                name
            )));
        }
        if auto_increment && matches!(key_path, KeyPath::Multiple(_)) {
            return Err(IDBError::InvalidAccessError(format!(
                "Object store {} cannot auto-increment with a compound key path",
                name
            )));
        }

        self.staged.insert(
            name.to_string(),
            IDBObjectStore::new(name, key_path, auto_increment),
        );
        self.scope.push(name.to_string());
        self.object_store(name)
    }

    /// Delete an object store (versionchange only).
    pub fn delete_object_store(&mut self, name: &str) -> Result<(), IDBError> {
        self.ensure_version_change()?;
        self.staged
            .remove(name)
            .ok_or_else(|| missing_store(name))?;
        self.scope.retain(|s| s != name);
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// For durable databases the new state is written to disk before it
    /// becomes visible; if that fails nothing is published and the error is
    /// returned.
    pub async fn commit(mut self) -> Result<(), IDBError> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;

        let result = self.publish().await;
        self.state = TransactionState::Finished;
        match &result {
            Ok(()) => debug!(mode = ?self.mode, scope = ?self.scope, "Transaction committed"),
            Err(e) => warn!(mode = ?self.mode, error = %e, "Transaction commit failed"),
        }
        result
    }

    /// Abort the transaction, discarding all writes.
    pub fn abort(mut self) {
        self.discard("aborted");
    }

    async fn publish(&mut self) -> Result<(), IDBError> {
        let staged = std::mem::take(&mut self.staged);
        let mode = self.mode;
        let new_version = self.new_version;
        let path = self.snapshot_path.clone();

        let TxGuard::Write(guard) = &mut self.guard else {
            // Read-only: nothing to publish.
            return Ok(());
        };

        if let Some(path) = path {
            let snapshot = match mode {
                TransactionMode::VersionChange => {
                    DatabaseSnapshot::capture(&guard.name, new_version, staged.values())
                }
                _ => DatabaseSnapshot::capture(
                    &guard.name,
                    guard.version,
                    guard
                        .stores
                        .iter()
                        .map(|(name, store)| staged.get(name).unwrap_or(store)),
                ),
            };
            persist::save(&path, &snapshot).await?;
        }

        match mode {
            TransactionMode::VersionChange => {
                guard.stores = staged;
                guard.version = new_version;
            }
            _ => guard.stores.extend(staged),
        }
        Ok(())
    }

    fn discard(&mut self, reason: &str) {
        if self.state != TransactionState::Finished {
            self.state = TransactionState::Finished;
            self.staged.clear();
            debug!(mode = ?self.mode, scope = ?self.scope, reason, "Transaction discarded");
        }
    }

    fn ensure_active(&self) -> Result<(), IDBError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(IDBError::TransactionInactiveError)
        }
    }

    fn ensure_version_change(&self) -> Result<(), IDBError> {
        self.ensure_active()?;
        if self.mode != TransactionMode::VersionChange {
            return Err(IDBError::InvalidStateError(
                "Schema changes require a versionchange transaction".to_string(),
            ));
        }
        Ok(())
    }
}

impl Drop for IDBTransaction {
    fn drop(&mut self) {
        self.discard("dropped before commit");
    }
}

impl std::fmt::Debug for IDBTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IDBTransaction")
            .field("mode", &self.mode)
            .field("scope", &self.scope)
            .field("state", &self.state)
            .finish()
    }
}

fn missing_store(name: &str) -> IDBError {
    IDBError::NotFoundError(format!("Object store not found: {}", name))
}

// ==================== Object store view ====================

enum StoreAccess<'a> {
    Shared(&'a IDBObjectStore),
    Staged(&'a mut IDBObjectStore),
}

/// An object store as seen through a transaction.
pub struct ObjectStoreTx<'a> {
    mode: TransactionMode,
    access: StoreAccess<'a>,
}

impl<'a> ObjectStoreTx<'a> {
    fn store(&self) -> &IDBObjectStore {
        match &self.access {
            StoreAccess::Shared(s) => *s,
            StoreAccess::Staged(s) => &**s,
        }
    }

    fn store_mut(&mut self) -> Result<&mut IDBObjectStore, IDBError> {
        match &mut self.access {
            StoreAccess::Staged(s) if self.mode != TransactionMode::ReadOnly => Ok(&mut **s),
            _ => Err(IDBError::ReadOnlyError),
        }
    }

    pub fn name(&self) -> &str {
        self.store().name()
    }

    pub fn key_path(&self) -> &KeyPath {
        self.store().key_path()
    }

    pub fn index_names(&self) -> Vec<&str> {
        self.store().index_names()
    }

    /// Get a record by primary key.
    pub fn get(&self, key: impl Into<Key>) -> Option<&JsonValue> {
        self.store().get(&key.into())
    }

    pub fn get_all(&self, range: Option<&KeyRange>, count: Option<usize>) -> Vec<&JsonValue> {
        self.store().get_all(range, count)
    }

    pub fn get_all_keys(&self, range: Option<&KeyRange>, count: Option<usize>) -> Vec<&Key> {
        self.store().get_all_keys(range, count)
    }

    pub fn count(&self, range: Option<&KeyRange>) -> usize {
        self.store().count(range)
    }

    /// Add a record with an in-line or generated key. Fails on duplicates.
    pub fn add(&mut self, value: JsonValue) -> Result<Key, IDBError> {
        self.store_mut()?.add(value, None)
    }

    /// Add a record under an explicit (out-of-line) key.
    pub fn add_with_key(&mut self, value: JsonValue, key: impl Into<Key>) -> Result<Key, IDBError> {
        self.store_mut()?.add(value, Some(key.into()))
    }

    /// Insert or replace a record.
    pub fn put(&mut self, value: JsonValue) -> Result<Key, IDBError> {
        self.store_mut()?.put(value, None)
    }

    pub fn put_with_key(&mut self, value: JsonValue, key: impl Into<Key>) -> Result<Key, IDBError> {
        self.store_mut()?.put(value, Some(key.into()))
    }

    /// Delete a record; returns whether it existed.
    pub fn delete(&mut self, key: impl Into<Key>) -> Result<bool, IDBError> {
        let key = key.into();
        Ok(self.store_mut()?.delete(&key))
    }

    pub fn clear(&mut self) -> Result<(), IDBError> {
        self.store_mut()?.clear();
        Ok(())
    }

    /// Create an index (versionchange only).
    pub fn create_index(&mut self, def: IndexDef) -> Result<(), IDBError> {
        if self.mode != TransactionMode::VersionChange {
            return Err(IDBError::InvalidStateError(
                "Indexes can only be created in a versionchange transaction".to_string(),
            ));
        }
        self.store_mut()?.create_index(def)
    }

    /// Delete an index (versionchange only).
    pub fn delete_index(&mut self, name: &str) -> Result<(), IDBError> {
        if self.mode != TransactionMode::VersionChange {
            return Err(IDBError::InvalidStateError(
                "Indexes can only be deleted in a versionchange transaction".to_string(),
            ));
        }
        self.store_mut()?.delete_index(name)
    }

    /// Access a secondary index.
    pub fn index(&self, name: &str) -> Result<IndexTx<'_>, IDBError> {
        let store = self.store();
        let index = store
            .index(name)
            .ok_or_else(|| IDBError::NotFoundError(format!("Index not found: {}", name)))?;
        Ok(IndexTx { store, index })
    }

    /// Cursor over records in primary key order.
    pub fn open_cursor(&self, range: Option<&KeyRange>, direction: CursorDirection) -> IDBCursor {
        let store = self.store();
        let entries = store
            .get_all_keys(range, None)
            .into_iter()
            .filter_map(|key| {
                store.get(key).map(|value| CursorEntry {
                    key: key.clone(),
                    primary_key: key.clone(),
                    value: value.clone(),
                })
            })
            .collect();
        IDBCursor::new(store.name(), entries, direction)
    }
}

// ==================== Index view ====================

/// A secondary index as seen through a transaction.
pub struct IndexTx<'a> {
    store: &'a IDBObjectStore,
    index: &'a IDBIndex,
}

impl<'a> IndexTx<'a> {
    pub fn name(&self) -> &str {
        self.index.name()
    }

    pub fn def(&self) -> &IndexDef {
        self.index.def()
    }

    /// First record (lowest primary key) whose index key equals `key`.
    pub fn get(&self, key: impl Into<Key>) -> Option<&'a JsonValue> {
        let key = key.into();
        self.index
            .get(&key)
            .and_then(|pks| pks.iter().next())
            .and_then(|pk| self.store.get(pk))
    }

    /// Records in index order.
    pub fn get_all(&self, range: Option<&KeyRange>, count: Option<usize>) -> Vec<&'a JsonValue> {
        let store = self.store;
        self.index
            .entries(range)
            .filter_map(|(_, pk)| store.get(pk))
            .take(count.unwrap_or(usize::MAX))
            .collect()
    }

    /// Primary keys in index order.
    pub fn get_all_keys(&self, range: Option<&KeyRange>, count: Option<usize>) -> Vec<&'a Key> {
        self.index
            .entries(range)
            .map(|(_, pk)| pk)
            .take(count.unwrap_or(usize::MAX))
            .collect()
    }

    pub fn count(&self, range: Option<&KeyRange>) -> usize {
        self.index.count(range)
    }

    /// Cursor over index entries.
    pub fn open_cursor(&self, range: Option<&KeyRange>, direction: CursorDirection) -> IDBCursor {
        let entries = self
            .index
            .entries(range)
            .filter_map(|(key, pk)| {
                self.store.get(pk).map(|value| CursorEntry {
                    key: key.clone(),
                    primary_key: pk.clone(),
                    value: value.clone(),
                })
            })
            .collect();
        IDBCursor::new(self.index.name(), entries, direction)
    }
}
