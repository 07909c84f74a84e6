//! Snapshot persistence.
//!
//! A database is stored as one JSON document. Saving writes a sibling
//! temporary file, syncs it and renames it over the previous snapshot, so a
//! crash leaves either the old or the new version on disk.

use crate::database::DatabaseState;
use crate::key::KeyPath;
use crate::store::{IDBObjectStore, IndexDef, Record};
use crate::IDBError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const SNAPSHOT_FORMAT: u32 = 1;
const SNAPSHOT_EXTENSION: &str = "idb.json";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DatabaseSnapshot {
    format: u32,
    name: String,
    version: u64,
    stores: Vec<StoreSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    name: String,
    key_path: KeyPath,
    auto_increment: bool,
    next_key: u64,
    indexes: Vec<IndexDef>,
    records: Vec<Record>,
}

impl DatabaseSnapshot {
    pub(crate) fn capture<'a>(
        name: &str,
        version: u64,
        stores: impl IntoIterator<Item = &'a IDBObjectStore>,
    ) -> Self {
        let mut stores: Vec<StoreSnapshot> = stores
            .into_iter()
            .map(|store| StoreSnapshot {
                name: store.name().to_string(),
                key_path: store.key_path().clone(),
                auto_increment: store.auto_increment(),
                next_key: store.next_key(),
                indexes: store.index_defs(),
                records: store.records().collect(),
            })
            .collect();
        stores.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            format: SNAPSHOT_FORMAT,
            name: name.to_string(),
            version,
            stores,
        }
    }

    pub(crate) fn into_state(self) -> Result<DatabaseState, IDBError> {
        if self.format != SNAPSHOT_FORMAT {
            return Err(IDBError::StorageError(format!(
                "Unsupported snapshot format {} for {}",
                self.format, self.name
            )));
        }

        let mut stores = HashMap::new();
        for snapshot in self.stores {
            let store = IDBObjectStore::restore(
                &snapshot.name,
                snapshot.key_path,
                snapshot.auto_increment,
                snapshot.next_key,
                snapshot.indexes,
                snapshot.records,
            )?;
            stores.insert(snapshot.name, store);
        }

        Ok(DatabaseState {
            name: self.name,
            version: self.version,
            stores,
        })
    }
}

/// File holding the snapshot of database `name` under `root`.
pub(crate) fn snapshot_path(root: &Path, name: &str) -> PathBuf {
    let mut file = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            file.push(c);
        } else {
            file.push_str(&format!("%{:02X}", c as u32));
        }
    }
    root.join(format!("{}.{}", file, SNAPSHOT_EXTENSION))
}

/// Load a snapshot, `None` if the file does not exist.
pub(crate) async fn load(path: &Path) -> Result<Option<DatabaseState>, IDBError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(storage_error("read", path, e)),
    };

    let snapshot: DatabaseSnapshot = serde_json::from_slice(&bytes).map_err(|e| {
        IDBError::StorageError(format!("Corrupt snapshot {}: {}", path.display(), e))
    })?;
    snapshot.into_state().map(Some)
}

/// Atomically replace the snapshot at `path`.
pub(crate) async fn save(path: &Path, snapshot: &DatabaseSnapshot) -> Result<(), IDBError> {
    let bytes = serde_json::to_vec(snapshot)
        .map_err(|e| IDBError::StorageError(format!("Failed to encode snapshot: {}", e)))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| storage_error("create directory for", path, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| storage_error("create", &tmp, e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| storage_error("write", &tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| storage_error("sync", &tmp, e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| storage_error("replace", path, e))?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "Snapshot written");
    Ok(())
}

/// Remove a snapshot; a missing file is not an error.
pub(crate) async fn remove(path: &Path) -> Result<(), IDBError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_error("remove", path, e)),
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> IDBError {
    IDBError::StorageError(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_path_escapes_name() {
        let root = Path::new("/data");
        assert_eq!(snapshot_path(root, "test"), root.join("test.idb.json"));
        assert_eq!(snapshot_path(root, "a/b"), root.join("a%2Fb.idb.json"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), "test");

        let mut store = IDBObjectStore::new("items", KeyPath::single("id"), false);
        store
            .create_index(IndexDef::new("by-name", KeyPath::single("name")))
            .unwrap();
        store.add(json!({"id": "a", "name": "x"}), None).unwrap();

        save(&path, &DatabaseSnapshot::capture("test", 3, [&store]))
            .await
            .unwrap();

        let state = load(&path).await.unwrap().unwrap();
        assert_eq!(state.version, 3);
        let restored = &state.stores["items"];
        assert_eq!(restored.count(None), 1);
        assert_eq!(restored.index("by-name").unwrap().count(None), 1);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), "missing");
        assert!(load(&path).await.unwrap().is_none());
        remove(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot_path(dir.path(), "bad");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        assert!(matches!(load(&path).await, Err(IDBError::StorageError(_))));
    }
}
