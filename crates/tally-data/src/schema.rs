//! Table and index layout, and the versioned upgrade path

use tally_idb::{IDBDatabase, IDBError, IDBFactory, IDBTransaction, IndexDef, KeyPath};
use tracing::{debug, info};

/// Schema version this crate opens the database at.
pub const DB_VERSION: u64 = 1;

pub const CUSTOMERS: &str = "customers";
pub const INVOICES: &str = "invoices";

pub const CUSTOMERS_BY_NAME: &str = "by-name";

pub const INVOICES_BY_CUSTOMER: &str = "by-customer";
pub const INVOICES_BY_STATUS: &str = "by-status";
pub const INVOICES_BY_REFERENCE: &str = "by-reference";
pub const INVOICES_BY_DATE_REFERENCE: &str = "by-date-reference";
pub const INVOICES_BY_CUSTOMER_REFERENCE: &str = "by-customer-reference";
pub const INVOICES_BY_CUSTOMER_DATE_REFERENCE: &str = "by-customer-date-reference";

/// One schema step, applied when upgrading past its version.
pub type UpgradeStep = fn(&mut IDBTransaction) -> Result<(), IDBError>;

/// Schema steps in ascending version order.
pub const UPGRADES: &[(u64, UpgradeStep)] = &[(1, create_v1)];

/// Indexes on `customers`.
pub fn customer_indexes() -> Vec<IndexDef> {
    vec![IndexDef::new(CUSTOMERS_BY_NAME, KeyPath::single("name"))]
}

/// Indexes on `invoices`.
pub fn invoice_indexes() -> Vec<IndexDef> {
    vec![
        IndexDef::new(INVOICES_BY_CUSTOMER, KeyPath::single("customerId")),
        IndexDef::new(INVOICES_BY_STATUS, KeyPath::single("status")),
        IndexDef::new(INVOICES_BY_REFERENCE, KeyPath::single("reference")),
        IndexDef::new(
            INVOICES_BY_DATE_REFERENCE,
            KeyPath::compound(["date", "reference"]),
        ),
        IndexDef::new(
            INVOICES_BY_CUSTOMER_REFERENCE,
            KeyPath::compound(["customerId", "reference"]),
        ),
        IndexDef::new(
            INVOICES_BY_CUSTOMER_DATE_REFERENCE,
            KeyPath::compound(["customerId", "date", "reference"]),
        ),
    ]
}

fn create_v1(tx: &mut IDBTransaction) -> Result<(), IDBError> {
    let mut customers = tx.create_object_store(CUSTOMERS, KeyPath::single("id"), false)?;
    for def in customer_indexes() {
        customers.create_index(def)?;
    }

    let mut invoices = tx.create_object_store(INVOICES, KeyPath::single("id"), false)?;
    for def in invoice_indexes() {
        invoices.create_index(def)?;
    }
    Ok(())
}

/// Upgrade callback for [`IDBFactory::open`].
///
/// Applies every step whose version is above `old_version` and at most the
/// transaction's target version.
pub fn upgrade(tx: &mut IDBTransaction, old_version: u64) -> Result<(), IDBError> {
    let target = tx.new_version();
    for &(version, step) in UPGRADES {
        if version <= old_version || version > target {
            continue;
        }
        info!(version, old_version, "Applying schema step");
        step(tx)?;
    }
    Ok(())
}

/// Open `name` at [`DB_VERSION`], creating or upgrading the schema.
pub async fn open(factory: &IDBFactory, name: &str) -> Result<IDBDatabase, IDBError> {
    let db = factory.open(name, DB_VERSION, upgrade).await?;
    debug!(db = name, version = db.version(), "Schema ready");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_idb::TransactionMode;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let (factory, _events) = IDBFactory::new();
        let db = open(&factory, "schema").await.unwrap();

        assert_eq!(db.version(), DB_VERSION);
        assert_eq!(db.object_store_names().await, vec![CUSTOMERS, INVOICES]);

        let mut tx = db
            .transaction(&[CUSTOMERS, INVOICES], TransactionMode::ReadOnly)
            .await
            .unwrap();
        assert_eq!(tx.object_store(CUSTOMERS).unwrap().index_names(), vec![CUSTOMERS_BY_NAME]);
        assert_eq!(
            tx.object_store(INVOICES).unwrap().index_names(),
            vec![
                INVOICES_BY_CUSTOMER,
                INVOICES_BY_CUSTOMER_DATE_REFERENCE,
                INVOICES_BY_CUSTOMER_REFERENCE,
                INVOICES_BY_DATE_REFERENCE,
                INVOICES_BY_REFERENCE,
                INVOICES_BY_STATUS,
            ]
        );
    }

    #[tokio::test]
    async fn test_reopen_skips_applied_steps() {
        let (factory, _events) = IDBFactory::new();
        let first = open(&factory, "schema").await.unwrap();
        first.close();

        // create_v1 would fail with ConstraintError if it ran again
        let second = open(&factory, "schema").await.unwrap();
        assert_eq!(second.version(), DB_VERSION);
    }

    #[test]
    fn test_steps_ascend() {
        assert!(UPGRADES.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(UPGRADES.last().map(|(v, _)| *v), Some(DB_VERSION));
    }

    #[test]
    fn test_no_index_is_unique() {
        assert!(customer_indexes()
            .iter()
            .chain(invoice_indexes().iter())
            .all(|def| !def.unique && !def.multi_entry));
    }
}
