//! Keys, key paths and key ranges.
//!
//! Keys follow IndexedDB ordering: every number sorts before every string,
//! every string sorts before every array, and arrays compare element by
//! element with a shorter array sorting before any array it is a prefix of.
//! That last rule is what makes compound-index prefix scans contiguous.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

// ==================== Key ====================

/// A valid key for records and index entries.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// Convert a JSON value into a key.
    ///
    /// Returns `None` for `null`, booleans, objects, and arrays containing any
    /// of those.
    pub fn from_json(value: &JsonValue) -> Option<Key> {
        match value {
            JsonValue::Number(n) => n.as_f64().map(Key::from),
            JsonValue::String(s) => Some(Key::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Key::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    /// Convert back into JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Key::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Key::String(s) => JsonValue::String(s.clone()),
            Key::Array(items) => JsonValue::Array(items.iter().map(Key::to_json).collect()),
        }
    }

    /// Whether the key can be stored: every number in it is finite.
    ///
    /// NaN is never a valid key, and infinities have no JSON form in a
    /// snapshot.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) => n.is_finite(),
            Key::String(_) => true,
            Key::Array(items) => items.iter().all(Key::is_valid),
        }
    }

    /// String contents, if this is a string key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this is an array key whose leading elements equal `prefix`.
    pub fn starts_with(&self, prefix: &[Key]) -> bool {
        match self {
            Key::Array(items) => items.len() >= prefix.len() && items[..prefix.len()] == *prefix,
            _ => false,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // -0.0 and 0.0 are the same key
            (Key::Number(a), Key::Number(b)) => a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            // Lexicographic; on a common prefix the shorter array wins.
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::String(s) => write!(f, "{:?}", s),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<f64> for Key {
    fn from(n: f64) -> Self {
        // Stored as 0.0 so snapshots never carry -0
        Key::Number(if n == 0.0 { 0.0 } else { n })
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Number(n as f64)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

// ==================== KeyPath ====================

/// Key path for object stores and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPath {
    /// No key path (out-of-line keys).
    None,
    /// Single property. Dots walk into nested objects.
    Single(String),
    /// Multiple properties (compound key), in declaration order.
    Multiple(Vec<String>),
}

impl KeyPath {
    /// Shorthand for a single-property key path.
    pub fn single(path: impl Into<String>) -> Self {
        KeyPath::Single(path.into())
    }

    /// Shorthand for a compound key path.
    pub fn compound<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Multiple(paths.into_iter().map(Into::into).collect())
    }

    /// Extract key from value.
    pub fn extract(&self, value: &JsonValue) -> Option<Key> {
        match self {
            KeyPath::None => None,
            KeyPath::Single(path) => lookup(value, path).and_then(Key::from_json),
            KeyPath::Multiple(paths) => paths
                .iter()
                .map(|p| lookup(value, p).and_then(Key::from_json))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }
}

fn lookup<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

// ==================== KeyRange ====================

/// A range of keys to query.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRange {
    /// Keys between two bounds.
    Bounds { lower: Bound<Key>, upper: Bound<Key> },
    /// Array keys whose leading elements equal the given prefix.
    Prefix(Vec<Key>),
}

impl KeyRange {
    /// Exactly one key.
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        KeyRange::Bounds {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Keys between `lower` and `upper`.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> Self {
        KeyRange::Bounds {
            lower: make_bound(lower.into(), lower_open),
            upper: make_bound(upper.into(), upper_open),
        }
    }

    /// Keys at or above (`open`: strictly above) `lower`.
    pub fn lower_bound(lower: impl Into<Key>, open: bool) -> Self {
        KeyRange::Bounds {
            lower: make_bound(lower.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys at or below (`open`: strictly below) `upper`.
    pub fn upper_bound(upper: impl Into<Key>, open: bool) -> Self {
        KeyRange::Bounds {
            lower: Bound::Unbounded,
            upper: make_bound(upper.into(), open),
        }
    }

    /// Compound keys starting with `prefix`.
    pub fn prefix(prefix: Vec<Key>) -> Self {
        KeyRange::Prefix(prefix)
    }

    /// Whether `key` falls inside the range.
    pub fn contains(&self, key: &Key) -> bool {
        match self {
            KeyRange::Bounds { lower, upper } => {
                let above = match lower {
                    Bound::Included(l) => key >= l,
                    Bound::Excluded(l) => key > l,
                    Bound::Unbounded => true,
                };
                above && !self.is_past(key)
            }
            KeyRange::Prefix(prefix) => key.starts_with(prefix),
        }
    }

    /// Where a forward scan should start.
    pub(crate) fn start(&self) -> Bound<Key> {
        match self {
            KeyRange::Bounds { lower, .. } => lower.clone(),
            KeyRange::Prefix(prefix) => Bound::Included(Key::Array(prefix.clone())),
        }
    }

    /// Whether a forward scan has moved beyond the range for good.
    pub(crate) fn is_past(&self, key: &Key) -> bool {
        match self {
            KeyRange::Bounds { upper, .. } => match upper {
                Bound::Included(u) => key > u,
                Bound::Excluded(u) => key >= u,
                Bound::Unbounded => false,
            },
            KeyRange::Prefix(prefix) => !key.starts_with(prefix),
        }
    }
}

fn make_bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}
