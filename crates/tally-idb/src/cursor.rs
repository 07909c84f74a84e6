//! Cursors over store and index ranges.
//!
//! A cursor owns a snapshot of the entries it walks, so it stays valid after
//! the transaction that opened it is finished.

use crate::key::Key;
use serde_json::Value as JsonValue;

/// Cursor direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorDirection {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

/// One position of a cursor.
#[derive(Debug, Clone)]
pub struct CursorEntry {
    /// Index key (or primary key when iterating a store).
    pub key: Key,
    pub primary_key: Key,
    pub value: JsonValue,
}

/// A cursor for iterating records.
#[derive(Debug)]
pub struct IDBCursor {
    /// Direction.
    pub direction: CursorDirection,

    /// Source (store name or index name).
    pub source: String,

    entries: Vec<CursorEntry>,

    /// Index of the next entry to visit.
    position: usize,

    current: Option<usize>,

    /// Done.
    pub done: bool,
}

impl IDBCursor {
    /// Create a cursor from entries given in ascending `(key, primary_key)`
    /// order.
    pub(crate) fn new(source: &str, entries: Vec<CursorEntry>, direction: CursorDirection) -> Self {
        let mut entries = match direction {
            CursorDirection::NextUnique | CursorDirection::PrevUnique => {
                // Keep the lowest primary key for every distinct key.
                let mut unique: Vec<CursorEntry> = Vec::with_capacity(entries.len());
                for entry in entries {
                    if unique.last().map_or(true, |last| last.key != entry.key) {
                        unique.push(entry);
                    }
                }
                unique
            }
            _ => entries,
        };
        if matches!(direction, CursorDirection::Prev | CursorDirection::PrevUnique) {
            entries.reverse();
        }

        Self {
            direction,
            source: source.to_string(),
            entries,
            position: 0,
            current: None,
            done: false,
        }
    }

    /// Advance to next record.
    pub fn continue_cursor(&mut self) -> bool {
        if self.position < self.entries.len() {
            self.current = Some(self.position);
            self.position += 1;
            true
        } else {
            self.done = true;
            self.current = None;
            false
        }
    }

    /// Advance by count.
    pub fn advance(&mut self, count: usize) -> bool {
        for _ in 0..count {
            if !self.continue_cursor() {
                return false;
            }
        }
        true
    }

    /// Current entry.
    pub fn entry(&self) -> Option<&CursorEntry> {
        self.current.map(|i| &self.entries[i])
    }

    /// Current key.
    pub fn key(&self) -> Option<&Key> {
        self.entry().map(|e| &e.key)
    }

    /// Current primary key.
    pub fn primary_key(&self) -> Option<&Key> {
        self.entry().map(|e| &e.primary_key)
    }

    /// Current value.
    pub fn value(&self) -> Option<&JsonValue> {
        self.entry().map(|e| &e.value)
    }

    /// Entries not yet visited.
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.position
    }
}

impl Iterator for IDBCursor {
    type Item = CursorEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.continue_cursor() {
            self.entry().cloned()
        } else {
            None
        }
    }
}
