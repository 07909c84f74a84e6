//! # Tally IndexedDB
//!
//! Embedded, IndexedDB-shaped key-value store used by the Tally data layer.
//!
//! ## Features
//!
//! - **IDBFactory**: `open()` with an upgrade callback, `delete_database()`
//! - **IDBDatabase**: shared connection, transactions and shortcut queries
//! - **IDBObjectStore**: records ordered by primary key, in-line or out-of-line keys
//! - **IDBTransaction**: readonly, readwrite, versionchange; atomic commit/abort
//! - **IDBIndex**: single and compound secondary indexes, unique and multi-entry
//! - **IDBCursor**: iteration over index or store ranges in either direction
//! - **Persistence**: optional JSON snapshot per database, replaced atomically
//!
//! ## Architecture
//!
//! ```text
//! IDBFactory
//!     │
//!     └── IDBDatabase (cloneable connection)
//!             │
//!             ├── IDBTransaction ── staged IDBObjectStore copies
//!             │                         ├── IDBIndex
//!             │                         └── Records
//!             │
//!             └── snapshot file (<root>/<name>.idb.json)
//! ```
//!
//! Read-write transactions work on copies of the stores in their scope and
//! publish them on `commit()`. Dropping or aborting a transaction discards its
//! writes.

use thiserror::Error;

mod cursor;
mod database;
mod factory;
mod key;
mod persist;
mod store;
mod transaction;

pub use cursor::{CursorDirection, CursorEntry, IDBCursor};
pub use database::IDBDatabase;
pub use factory::{DatabaseInfo, IDBEvent, IDBFactory};
pub use key::{Key, KeyPath, KeyRange};
pub use store::{IDBIndex, IDBObjectStore, IndexDef, Record};
pub use transaction::{IDBTransaction, IndexTx, ObjectStoreTx, TransactionMode, TransactionState};

// ==================== Errors ====================

/// IndexedDB errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IDBError {
    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Constraint error: {0}")]
    ConstraintError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid state: {0}")]
    InvalidStateError(String),

    #[error("Invalid access: {0}")]
    InvalidAccessError(String),

    #[error("Transaction inactive")]
    TransactionInactiveError,

    #[error("Read only")]
    ReadOnlyError,

    #[error("Version error: {0}")]
    VersionError(String),

    #[error("Blocked: {0}")]
    Blocked(String),

    #[error("Abort error: {0}")]
    AbortError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Unknown error: {0}")]
    UnknownError(String),
}

impl IDBError {
    /// Short, stable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            IDBError::NotFoundError(_) => "NotFoundError",
            IDBError::ConstraintError(_) => "ConstraintError",
            IDBError::DataError(_) => "DataError",
            IDBError::InvalidStateError(_) => "InvalidStateError",
            IDBError::InvalidAccessError(_) => "InvalidAccessError",
            IDBError::TransactionInactiveError => "TransactionInactiveError",
            IDBError::ReadOnlyError => "ReadOnlyError",
            IDBError::VersionError(_) => "VersionError",
            IDBError::Blocked(_) => "Blocked",
            IDBError::AbortError(_) => "AbortError",
            IDBError::StorageError(_) => "StorageError",
            IDBError::UnknownError(_) => "UnknownError",
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, IDBError>;
