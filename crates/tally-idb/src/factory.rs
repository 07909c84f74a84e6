//! IDBFactory: opening, upgrading and deleting databases.

use crate::database::{DatabaseState, IDBDatabase, SharedDatabase};
use crate::persist;
use crate::transaction::IDBTransaction;
use crate::IDBError;
use hashbrown::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// IDBFactory events.
#[derive(Debug, Clone, PartialEq)]
pub enum IDBEvent {
    /// Upgrade needed.
    UpgradeNeeded {
        db_name: String,
        old_version: u64,
        new_version: u64,
    },
    /// Database opened.
    Success { db_name: String },
    /// Error occurred.
    Error { db_name: String, error: IDBError },
    /// Database blocked by other open connections.
    Blocked { db_name: String },
}

/// Database info for databases() API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Entry point for opening databases.
///
/// Databases opened through the same factory share their underlying state, so
/// opening the same name twice yields two connections to one database.
/// Clones share those databases.
#[derive(Debug, Clone)]
pub struct IDBFactory {
    /// Snapshot directory; `None` keeps everything in memory.
    root: Option<PathBuf>,

    databases: Arc<RwLock<HashMap<String, Arc<SharedDatabase>>>>,

    event_tx: mpsc::UnboundedSender<IDBEvent>,
}

impl IDBFactory {
    /// Create an in-memory factory.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<IDBEvent>) {
        Self::build(None)
    }

    /// Create a factory that persists every database under `root`.
    pub fn with_storage(root: impl Into<PathBuf>) -> (Self, mpsc::UnboundedReceiver<IDBEvent>) {
        Self::build(Some(root.into()))
    }

    fn build(root: Option<PathBuf>) -> (Self, mpsc::UnboundedReceiver<IDBEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                root,
                databases: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
            },
            event_rx,
        )
    }

    /// Snapshot directory, if durable.
    pub fn storage_root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Open a database at `version`, creating it if needed.
    ///
    /// When the stored version is lower than `version`, `upgrade` runs inside a
    /// versionchange transaction and receives the previous version. Its
    /// changes are published (and persisted) only if it returns `Ok`; on error
    /// the database stays at its previous version and the error is returned.
    pub async fn open<F>(&self, name: &str, version: u64, upgrade: F) -> Result<IDBDatabase, IDBError>
    where
        F: FnOnce(&mut IDBTransaction, u64) -> Result<(), IDBError>,
    {
        if version == 0 {
            return self.fail(name, IDBError::DataError("Version must be at least 1".to_string()));
        }

        let mut databases = self.databases.write().await;

        let shared = match databases.get(name) {
            Some(shared) => shared.clone(),
            None => {
                let snapshot_path = self.root.as_deref().map(|r| persist::snapshot_path(r, name));
                let state = match &snapshot_path {
                    Some(path) => match persist::load(path).await {
                        Ok(Some(state)) => {
                            debug!(db = name, path = %path.display(), "Loaded snapshot");
                            state
                        }
                        Ok(None) => DatabaseState::empty(name),
                        Err(e) => return self.fail(name, e),
                    },
                    None => DatabaseState::empty(name),
                };
                let shared = Arc::new(SharedDatabase::new(state, snapshot_path));
                databases.insert(name.to_string(), shared.clone());
                shared
            }
        };

        let guard = shared.state.clone().write_owned().await;
        let current_version = guard.version;

        if version < current_version {
            return self.fail(
                name,
                IDBError::VersionError(format!(
                    "Requested version {} is less than current version {}",
                    version, current_version
                )),
            );
        }

        if version > current_version {
            let others = shared.open_connections();
            if others > 0 {
                let _ = self.event_tx.send(IDBEvent::Blocked {
                    db_name: name.to_string(),
                });
                return self.fail(
                    name,
                    IDBError::Blocked(format!(
                        "Upgrade of {} to version {} blocked by {} open connection(s)",
                        name, version, others
                    )),
                );
            }

            let _ = self.event_tx.send(IDBEvent::UpgradeNeeded {
                db_name: name.to_string(),
                old_version: current_version,
                new_version: version,
            });
            info!(db = name, old_version = current_version, new_version = version, "Upgrading database");

            let mut tx = IDBTransaction::version_change(guard, version, shared.snapshot_path.clone());
            if let Err(e) = upgrade(&mut tx, current_version) {
                tx.abort();
                warn!(db = name, error = %e, "Upgrade failed; database left at version {}", current_version);
                return self.fail(name, e);
            }
            if let Err(e) = tx.commit().await {
                return self.fail(name, e);
            }
        } else {
            drop(guard);
        }

        let _ = self.event_tx.send(IDBEvent::Success {
            db_name: name.to_string(),
        });
        debug!(db = name, version, "Database opened");

        Ok(IDBDatabase::connect(name, version, shared))
    }

    fn fail<T>(&self, name: &str, error: IDBError) -> Result<T, IDBError> {
        let _ = self.event_tx.send(IDBEvent::Error {
            db_name: name.to_string(),
            error: error.clone(),
        });
        Err(error)
    }

    /// Delete a database. Fails with `Blocked` while connections are open.
    pub async fn delete_database(&self, name: &str) -> Result<(), IDBError> {
        let mut databases = self.databases.write().await;

        if let Some(shared) = databases.get(name) {
            let open = shared.open_connections();
            if open > 0 {
                let _ = self.event_tx.send(IDBEvent::Blocked {
                    db_name: name.to_string(),
                });
                return Err(IDBError::Blocked(format!(
                    "Cannot delete {} while {} connection(s) are open",
                    name, open
                )));
            }
        }

        databases.remove(name);
        if let Some(root) = &self.root {
            persist::remove(&persist::snapshot_path(root, name)).await?;
        }
        info!(db = name, "Database deleted");
        Ok(())
    }

    /// Databases opened through this factory.
    pub async fn databases(&self) -> Vec<DatabaseInfo> {
        let databases = self.databases.read().await;
        let mut infos = Vec::with_capacity(databases.len());
        for (name, shared) in databases.iter() {
            let version = shared.state.read().await.version;
            if version > 0 {
                infos.push(DatabaseInfo {
                    name: name.clone(),
                    version,
                });
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

impl Default for IDBFactory {
    fn default() -> Self {
        Self::new().0
    }
}
