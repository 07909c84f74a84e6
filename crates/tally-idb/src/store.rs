//! Object stores and their secondary indexes.

use crate::key::{Key, KeyPath, KeyRange};
use crate::IDBError;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

/// Start bound plus owned copies of the range for the stop and filter
/// closures of a forward scan.
fn scan_bounds(range: Option<&KeyRange>) -> (Bound<Key>, Option<KeyRange>, Option<KeyRange>) {
    let start = range.map(KeyRange::start).unwrap_or(Bound::Unbounded);
    (start, range.cloned(), range.cloned())
}

/// A stored record, as written to snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub key: JsonValue,
    pub value: JsonValue,
}

// ==================== IDBIndex ====================

/// Declaration of an index, persisted alongside the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexDef {
    /// A non-unique, single-entry index.
    pub fn new(name: impl Into<String>, key_path: KeyPath) -> Self {
        Self {
            name: name.into(),
            key_path,
            unique: false,
            multi_entry: false,
        }
    }

    /// Require index keys to be unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index each element of an array value separately.
    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }
}

/// An index on an object store.
#[derive(Debug, Clone)]
pub struct IDBIndex {
    def: IndexDef,

    /// Entries (index key -> primary keys), both ordered.
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IDBIndex {
    fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Index declaration.
    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Keys this value contributes to the index.
    fn keys_for(&self, value: &JsonValue) -> Vec<Key> {
        match self.def.key_path.extract(value) {
            Some(Key::Array(items)) if self.def.multi_entry => {
                let unique: BTreeSet<Key> = items.into_iter().collect();
                unique.into_iter().collect()
            }
            Some(key) => vec![key],
            None => Vec::new(),
        }
    }

    fn check_unique(&self, value: &JsonValue, primary_key: &Key) -> Result<(), IDBError> {
        if !self.def.unique {
            return Ok(());
        }
        for index_key in self.keys_for(value) {
            if let Some(owners) = self.entries.get(&index_key) {
                if owners.iter().any(|k| k != primary_key) {
                    return Err(IDBError::ConstraintError(format!(
                        "Duplicate key {} in unique index {}",
                        index_key, self.def.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn add_entries(&mut self, value: &JsonValue, primary_key: &Key) {
        for index_key in self.keys_for(value) {
            self.entries
                .entry(index_key)
                .or_default()
                .insert(primary_key.clone());
        }
    }

    fn delete_entries(&mut self, value: &JsonValue, primary_key: &Key) {
        for index_key in self.keys_for(value) {
            if let Some(keys) = self.entries.get_mut(&index_key) {
                keys.remove(primary_key);
                if keys.is_empty() {
                    self.entries.remove(&index_key);
                }
            }
        }
    }

    /// Primary keys for an exact index key.
    pub fn get(&self, index_key: &Key) -> Option<&BTreeSet<Key>> {
        self.entries.get(index_key)
    }

    /// `(index key, primary key)` pairs in index order, optionally restricted
    /// to a range.
    pub fn entries<'a>(
        &'a self,
        range: Option<&KeyRange>,
    ) -> impl Iterator<Item = (&'a Key, &'a Key)> + 'a {
        let (start, upper, filter) = scan_bounds(range);
        self.entries
            .range((start, Bound::Unbounded))
            .take_while(move |(k, _)| upper.as_ref().map_or(true, |r| !r.is_past(k)))
            .filter(move |(k, _)| filter.as_ref().map_or(true, |r| r.contains(k)))
            .flat_map(|(k, pks)| pks.iter().map(move |pk| (k, pk)))
    }

    /// Number of entries in range.
    pub fn count(&self, range: Option<&KeyRange>) -> usize {
        self.entries(range).count()
    }
}

// ==================== IDBObjectStore ====================

/// An object store.
#[derive(Debug, Clone)]
pub struct IDBObjectStore {
    name: String,
    key_path: KeyPath,
    auto_increment: bool,

    /// Records, ordered by primary key.
    records: BTreeMap<Key, JsonValue>,

    indexes: HashMap<String, IDBIndex>,

    /// Next auto-increment key.
    next_key: u64,
}

impl IDBObjectStore {
    /// Create a new object store.
    pub fn new(name: &str, key_path: KeyPath, auto_increment: bool) -> Self {
        Self {
            name: name.to_string(),
            key_path,
            auto_increment,
            records: BTreeMap::new(),
            indexes: HashMap::new(),
            next_key: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_path(&self) -> &KeyPath {
        &self.key_path
    }

    pub fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Get a record.
    pub fn get(&self, key: &Key) -> Option<&JsonValue> {
        self.records.get(key)
    }

    /// Records in key order, optionally restricted to a range and a count.
    pub fn get_all(&self, range: Option<&KeyRange>, count: Option<usize>) -> Vec<&JsonValue> {
        self.scan(range)
            .map(|(_, v)| v)
            .take(count.unwrap_or(usize::MAX))
            .collect()
    }

    /// Primary keys in order, optionally restricted to a range and a count.
    pub fn get_all_keys(&self, range: Option<&KeyRange>, count: Option<usize>) -> Vec<&Key> {
        self.scan(range)
            .map(|(k, _)| k)
            .take(count.unwrap_or(usize::MAX))
            .collect()
    }

    /// Count records.
    pub fn count(&self, range: Option<&KeyRange>) -> usize {
        match range {
            None => self.records.len(),
            Some(_) => self.scan(range).count(),
        }
    }

    fn scan<'a>(
        &'a self,
        range: Option<&KeyRange>,
    ) -> impl Iterator<Item = (&'a Key, &'a JsonValue)> + 'a {
        let (start, upper, filter) = scan_bounds(range);
        self.records
            .range((start, Bound::Unbounded))
            .take_while(move |(k, _)| upper.as_ref().map_or(true, |r| !r.is_past(k)))
            .filter(move |(k, _)| filter.as_ref().map_or(true, |r| r.contains(k)))
    }

    /// Add a record (fails if key exists).
    pub fn add(&mut self, value: JsonValue, key: Option<Key>) -> Result<Key, IDBError> {
        let key = self.resolve_key(&value, key)?;

        if self.records.contains_key(&key) {
            return Err(IDBError::ConstraintError(format!(
                "Key already exists in {}: {}",
                self.name, key
            )));
        }

        self.insert_record(key.clone(), value)?;
        Ok(key)
    }

    /// Put a record (overwrites if exists).
    pub fn put(&mut self, value: JsonValue, key: Option<Key>) -> Result<Key, IDBError> {
        let key = self.resolve_key(&value, key)?;

        for index in self.indexes.values() {
            index.check_unique(&value, &key)?;
        }
        if let Some(old) = self.records.remove(&key) {
            for index in self.indexes.values_mut() {
                index.delete_entries(&old, &key);
            }
        }

        self.insert_record(key.clone(), value)?;
        Ok(key)
    }

    /// Delete a record.
    pub fn delete(&mut self, key: &Key) -> bool {
        match self.records.remove(key) {
            Some(old) => {
                for index in self.indexes.values_mut() {
                    index.delete_entries(&old, key);
                }
                true
            }
            None => false,
        }
    }

    /// Clear all records.
    pub fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    /// Create an index, populating it from existing records.
    pub fn create_index(&mut self, def: IndexDef) -> Result<(), IDBError> {
        if self.indexes.contains_key(&def.name) {
            return Err(IDBError::ConstraintError(format!(
                "Index already exists: {}",
                def.name
            )));
        }
        if def.multi_entry && matches!(def.key_path, KeyPath::Multiple(_)) {
            return Err(IDBError::InvalidAccessError(format!(
                "Index {} cannot be multi-entry with a compound key path",
                def.name
            )));
        }

        let mut index = IDBIndex::new(def);
        for (primary_key, value) in &self.records {
            index.check_unique(value, primary_key)?;
            index.add_entries(value, primary_key);
        }

        self.indexes.insert(index.def.name.clone(), index);
        Ok(())
    }

    /// Delete an index.
    pub fn delete_index(&mut self, name: &str) -> Result<(), IDBError> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IDBError::NotFoundError(format!("Index not found: {}", name)))
    }

    /// Get an index.
    pub fn index(&self, name: &str) -> Option<&IDBIndex> {
        self.indexes.get(name)
    }

    /// Index names, sorted.
    pub fn index_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.indexes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Resolve key from value or explicit key.
    fn resolve_key(&mut self, value: &JsonValue, key: Option<Key>) -> Result<Key, IDBError> {
        match (&self.key_path, key, self.auto_increment) {
            (KeyPath::Single(_) | KeyPath::Multiple(_), Some(_), _) => Err(IDBError::DataError(
                "Explicit key given for a store with an in-line key path".to_string(),
            )),

            (KeyPath::None, Some(k), _) if !k.is_valid() => Err(IDBError::DataError(format!(
                "Invalid key {} for {}",
                k, self.name
            ))),

            (KeyPath::None, Some(k), _) => {
                if let Key::Number(n) = k {
                    if self.auto_increment && n >= self.next_key as f64 {
                        self.next_key = n.floor() as u64 + 1;
                    }
                }
                Ok(k)
            }

            (KeyPath::Single(_) | KeyPath::Multiple(_), None, _) => {
                self.key_path.extract(value).ok_or_else(|| {
                    IDBError::DataError(format!(
                        "Could not extract key from value for {}",
                        self.name
                    ))
                })
            }

            (KeyPath::None, None, true) => {
                let key = self.next_key;
                self.next_key += 1;
                Ok(Key::from(key))
            }

            (KeyPath::None, None, false) => Err(IDBError::DataError(
                "No key provided and no auto-increment".to_string(),
            )),
        }
    }

    /// Insert record and update indexes. Unique constraints are checked
    /// before anything is touched.
    fn insert_record(&mut self, key: Key, value: JsonValue) -> Result<(), IDBError> {
        for index in self.indexes.values() {
            index.check_unique(&value, &key)?;
        }
        for index in self.indexes.values_mut() {
            index.add_entries(&value, &key);
        }
        self.records.insert(key, value);
        Ok(())
    }

    // ==================== Snapshot support ====================

    pub(crate) fn index_defs(&self) -> Vec<IndexDef> {
        let mut defs: Vec<_> = self.indexes.values().map(|i| i.def.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.records.iter().map(|(k, v)| Record {
            key: k.to_json(),
            value: v.clone(),
        })
    }

    pub(crate) fn next_key(&self) -> u64 {
        self.next_key
    }

    pub(crate) fn restore(
        name: &str,
        key_path: KeyPath,
        auto_increment: bool,
        next_key: u64,
        indexes: Vec<IndexDef>,
        records: Vec<Record>,
    ) -> Result<Self, IDBError> {
        let mut store = Self::new(name, key_path, auto_increment);
        for record in records {
            let key = Key::from_json(&record.key).ok_or_else(|| {
                IDBError::DataError(format!("Invalid key in snapshot of {}", name))
            })?;
            store.records.insert(key, record.value);
        }
        for def in indexes {
            store.create_index(def)?;
        }
        store.next_key = next_key.max(1);
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_id() -> IDBObjectStore {
        IDBObjectStore::new("test", KeyPath::single("id"), false)
    }

    #[test]
    fn test_object_store_add() {
        let mut store = store_with_id();

        let key = store.add(json!({"id": "key1", "data": "hello"}), None).unwrap();

        assert_eq!(key, Key::from("key1"));
        assert!(store.get(&Key::from("key1")).is_some());
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut store = store_with_id();
        store.add(json!({"id": "key1"}), None).unwrap();

        let result = store.add(json!({"id": "key1"}), None);
        assert!(matches!(result, Err(IDBError::ConstraintError(_))));
        assert_eq!(store.count(None), 1);
    }

    #[test]
    fn test_non_finite_explicit_key_rejected() {
        let mut store = IDBObjectStore::new("kv", KeyPath::None, false);

        let nan = store.add(json!({"v": 1}), Some(Key::from(f64::NAN)));
        assert!(matches!(nan, Err(IDBError::DataError(_))));
        let inf = store.put(json!({"v": 2}), Some(Key::from(f64::NEG_INFINITY)));
        assert!(matches!(inf, Err(IDBError::DataError(_))));
        assert_eq!(store.count(None), 0);

        store.add(json!({"v": 3}), Some(Key::from(-0.0))).unwrap();
        assert!(store.get(&Key::from(0.0)).is_some());
    }

    #[test]
    fn test_object_store_put() {
        let mut store = store_with_id();
        store
            .create_index(IndexDef::new("by-data", KeyPath::single("data")))
            .unwrap();

        store.add(json!({"id": "key1", "data": "v1"}), None).unwrap();
        store.put(json!({"id": "key1", "data": "v2"}), None).unwrap();

        assert_eq!(store.get(&Key::from("key1")).unwrap()["data"], "v2");
        let index = store.index("by-data").unwrap();
        assert!(index.get(&Key::from("v1")).is_none());
        assert!(index.get(&Key::from("v2")).is_some());
    }

    #[test]
    fn test_object_store_auto_increment() {
        let mut store = IDBObjectStore::new("test", KeyPath::None, true);

        let key1 = store.add(json!({"data": "a"}), None).unwrap();
        let key2 = store.add(json!({"data": "b"}), None).unwrap();

        assert_eq!(key1, Key::Number(1.0));
        assert_eq!(key2, Key::Number(2.0));
    }

    #[test]
    fn test_object_store_delete() {
        let mut store = store_with_id();
        store
            .create_index(IndexDef::new("by-data", KeyPath::single("data")))
            .unwrap();

        let key = store.add(json!({"id": "a", "data": "x"}), None).unwrap();
        assert!(store.delete(&key));
        assert!(store.get(&key).is_none());
        assert_eq!(store.index("by-data").unwrap().count(None), 0);
        assert!(!store.delete(&key));
    }

    #[test]
    fn test_index_built_from_existing_records() {
        let mut store = store_with_id();
        store.add(json!({"id": "1", "name": "Alice"}), None).unwrap();
        store.add(json!({"id": "2", "name": "Bob"}), None).unwrap();

        store
            .create_index(IndexDef::new("by-name", KeyPath::single("name")))
            .unwrap();

        let index = store.index("by-name").unwrap();
        assert_eq!(index.count(None), 2);
        assert!(index.get(&Key::from("Alice")).is_some());
    }

    #[test]
    fn test_unique_index() {
        let mut store = store_with_id();
        store
            .create_index(IndexDef::new("by-email", KeyPath::single("email")).unique())
            .unwrap();

        store.add(json!({"id": "1", "email": "a@test.com"}), None).unwrap();

        let result = store.add(json!({"id": "2", "email": "a@test.com"}), None);
        assert!(result.is_err());
        // Nothing half-written.
        assert_eq!(store.count(None), 1);
        assert_eq!(store.index("by-email").unwrap().count(None), 1);
    }

    #[test]
    fn test_compound_index_order() {
        let mut store = store_with_id();
        store
            .create_index(IndexDef::new(
                "by-date-reference",
                KeyPath::compound(["date", "reference"]),
            ))
            .unwrap();

        store
            .add(json!({"id": "a", "date": "2024-02-01", "reference": "I00001"}), None)
            .unwrap();
        store
            .add(json!({"id": "b", "date": "2024-01-01", "reference": "I00003"}), None)
            .unwrap();
        store
            .add(json!({"id": "c", "date": "2024-01-01", "reference": "I00002"}), None)
            .unwrap();

        let order: Vec<_> = store
            .index("by-date-reference")
            .unwrap()
            .entries(None)
            .map(|(_, pk)| pk.as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_multi_entry_index() {
        let mut store = store_with_id();
        store
            .create_index(IndexDef::new("by-tag", KeyPath::single("tags")).multi_entry())
            .unwrap();

        store.add(json!({"id": "1", "tags": ["a", "b", "a"]}), None).unwrap();
        store.add(json!({"id": "2", "tags": ["b"]}), None).unwrap();

        let index = store.index("by-tag").unwrap();
        assert_eq!(index.get(&Key::from("a")).unwrap().len(), 1);
        assert_eq!(index.get(&Key::from("b")).unwrap().len(), 2);
    }

    #[test]
    fn test_get_all_with_range_and_count() {
        let mut store = store_with_id();
        for id in ["a", "b", "c", "d"] {
            store.add(json!({ "id": id }), None).unwrap();
        }

        let range = KeyRange::bound("b", "d", false, false);
        let keys: Vec<_> = store
            .get_all_keys(Some(&range), Some(2))
            .into_iter()
            .cloned()
            .collect();
        assert_eq!(keys, vec![Key::from("b"), Key::from("c")]);
        assert_eq!(store.count(Some(&range)), 3);
    }
}
