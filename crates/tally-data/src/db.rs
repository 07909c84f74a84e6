//! Typed handle over the invoicing database

use std::ops::Deref;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tally_idb::{CursorDirection, IDBDatabase, Key, KeyRange, TransactionMode};

use crate::error::{DataError, DataResult};
use crate::model::{Customer, Invoice, InvoiceStatus, DATE_FORMAT};
use crate::schema::{
    CUSTOMERS, CUSTOMERS_BY_NAME, INVOICES, INVOICES_BY_CUSTOMER_DATE_REFERENCE,
    INVOICES_BY_CUSTOMER_REFERENCE, INVOICES_BY_DATE_REFERENCE, INVOICES_BY_REFERENCE,
    INVOICES_BY_STATUS,
};
use crate::seed::{SeedGate, SeedVolumes};

const MAX_SORTABLE_YEAR: i32 = 9999;

/// Connection to the invoicing database plus the seeding state it shares
/// with its provider.
///
/// Derefs to [`IDBDatabase`] for raw transactions.
#[derive(Debug, Clone)]
pub struct InvoiceDb {
    db: IDBDatabase,
    volumes: SeedVolumes,
    gate: Arc<SeedGate>,
}

impl InvoiceDb {
    /// Wrap a connection opened with [`crate::schema::open`].
    pub fn new(db: IDBDatabase, volumes: SeedVolumes) -> Self {
        Self::with_gate(db, volumes, Arc::new(SeedGate::new()))
    }

    pub(crate) fn with_gate(db: IDBDatabase, volumes: SeedVolumes, gate: Arc<SeedGate>) -> Self {
        Self { db, volumes, gate }
    }

    pub fn connection(&self) -> &IDBDatabase {
        &self.db
    }

    /// Volumes a seed of this database creates.
    pub fn volumes(&self) -> SeedVolumes {
        self.volumes
    }

    pub fn seed_gate(&self) -> &SeedGate {
        &self.gate
    }

    pub async fn count_customers(&self) -> DataResult<usize> {
        Ok(self.db.count(CUSTOMERS).await?)
    }

    pub async fn count_invoices(&self) -> DataResult<usize> {
        Ok(self.db.count(INVOICES).await?)
    }

    /// All customers, ordered by name.
    pub async fn customers(&self) -> DataResult<Vec<Customer>> {
        let values = self
            .db
            .get_all_from_index(CUSTOMERS, CUSTOMERS_BY_NAME, None, None)
            .await?;
        decode_all(values)
    }

    pub async fn customer(&self, id: &str) -> DataResult<Option<Customer>> {
        decode_opt(self.db.get(CUSTOMERS, id).await?)
    }

    pub async fn customer_by_name(&self, name: &str) -> DataResult<Option<Customer>> {
        decode_opt(self.db.get_from_index(CUSTOMERS, CUSTOMERS_BY_NAME, name).await?)
    }

    pub async fn invoice(&self, id: &str) -> DataResult<Option<Invoice>> {
        decode_opt(self.db.get(INVOICES, id).await?)
    }

    pub async fn invoice_by_reference(&self, reference: &str) -> DataResult<Option<Invoice>> {
        decode_opt(
            self.db
                .get_from_index(INVOICES, INVOICES_BY_REFERENCE, reference)
                .await?,
        )
    }

    /// A customer's invoices, ordered by reference.
    pub async fn invoices_for_customer(&self, customer_id: &str) -> DataResult<Vec<Invoice>> {
        let range = KeyRange::prefix(vec![Key::from(customer_id)]);
        let values = self
            .db
            .get_all_from_index(INVOICES, INVOICES_BY_CUSTOMER_REFERENCE, Some(range), None)
            .await?;
        decode_all(values)
    }

    /// A customer's invoices, ordered by date then reference.
    pub async fn invoices_for_customer_by_date(&self, customer_id: &str) -> DataResult<Vec<Invoice>> {
        let range = KeyRange::prefix(vec![Key::from(customer_id)]);
        let values = self
            .db
            .get_all_from_index(
                INVOICES,
                INVOICES_BY_CUSTOMER_DATE_REFERENCE,
                Some(range),
                None,
            )
            .await?;
        decode_all(values)
    }

    /// A customer's `limit` latest invoices, newest first.
    pub async fn recent_invoices_for_customer(
        &self,
        customer_id: &str,
        limit: usize,
    ) -> DataResult<Vec<Invoice>> {
        let mut tx = self.db.transaction(&[INVOICES], TransactionMode::ReadOnly).await?;
        let store = tx.object_store(INVOICES)?;
        let range = KeyRange::prefix(vec![Key::from(customer_id)]);
        let cursor = store
            .index(INVOICES_BY_CUSTOMER_DATE_REFERENCE)?
            .open_cursor(Some(&range), CursorDirection::Prev);
        cursor
            .take(limit)
            .map(|entry| serde_json::from_value(entry.value).map_err(DataError::from))
            .collect()
    }

    /// Invoices with `status`, in primary key order.
    pub async fn invoices_by_status(&self, status: InvoiceStatus) -> DataResult<Vec<Invoice>> {
        let values = self
            .db
            .get_all_from_index(
                INVOICES,
                INVOICES_BY_STATUS,
                Some(KeyRange::only(status.as_str())),
                None,
            )
            .await?;
        decode_all(values)
    }

    pub async fn count_by_status(&self, status: InvoiceStatus) -> DataResult<usize> {
        Ok(self
            .db
            .count_from_index(INVOICES, INVOICES_BY_STATUS, Some(KeyRange::only(status.as_str())))
            .await?)
    }

    /// Invoices dated `from..=to`, ordered by date then reference.
    pub async fn invoices_between(&self, from: NaiveDate, to: NaiveDate) -> DataResult<Vec<Invoice>> {
        // Past year 9999 the formatted date gains a sign and no longer sorts
        // after four-digit years.
        if from > to || from.year() > MAX_SORTABLE_YEAR {
            return Ok(Vec::new());
        }
        let day = |d: NaiveDate| Key::Array(vec![Key::from(d.format(DATE_FORMAT).to_string())]);
        // [to + 1 day] sorts after every [to, reference]
        let range = match to.succ_opt().filter(|next| next.year() <= MAX_SORTABLE_YEAR) {
            Some(next) => KeyRange::bound(day(from), day(next), false, true),
            None => KeyRange::lower_bound(day(from), false),
        };
        let values = self
            .db
            .get_all_from_index(INVOICES, INVOICES_BY_DATE_REFERENCE, Some(range), None)
            .await?;
        decode_all(values)
    }
}

impl Deref for InvoiceDb {
    type Target = IDBDatabase;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

fn decode_opt<T: DeserializeOwned>(value: Option<JsonValue>) -> DataResult<Option<T>> {
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(DataError::from)
}

fn decode_all<T: DeserializeOwned>(values: Vec<JsonValue>) -> DataResult<Vec<T>> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).map_err(DataError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use serde_json::json;
    use tally_idb::IDBFactory;

    async fn fixture() -> InvoiceDb {
        let (factory, _events) = IDBFactory::new();
        let db = schema::open(&factory, "db-tests").await.unwrap();
        let handle = InvoiceDb::new(db, SeedVolumes::default());

        let mut tx = handle
            .transaction(&[CUSTOMERS, INVOICES], TransactionMode::ReadWrite)
            .await
            .unwrap();
        {
            let mut customers = tx.object_store(CUSTOMERS).unwrap();
            customers.add(json!({ "id": "cust0000b", "name": "C002" })).unwrap();
            customers.add(json!({ "id": "cust0000a", "name": "C001" })).unwrap();
        }
        {
            let mut invoices = tx.object_store(INVOICES).unwrap();
            for (id, reference, customer, date, status) in [
                ("inv00001x", "I00001", "cust0000a", "2024-01-05", "paid"),
                ("inv00002x", "I00002", "cust0000b", "2024-01-03", "draft"),
                ("inv00003x", "I00003", "cust0000a", "2024-01-03", "draft"),
                ("inv00004x", "I00004", "cust0000a", "2024-01-09", "edited"),
            ] {
                invoices
                    .add(json!({
                        "id": id,
                        "reference": reference,
                        "customerId": customer,
                        "date": date,
                        "status": status
                    }))
                    .unwrap();
            }
        }
        tx.commit().await.unwrap();
        handle
    }

    fn references(invoices: &[Invoice]) -> Vec<&str> {
        invoices.iter().map(|i| i.reference.as_str()).collect()
    }

    #[tokio::test]
    async fn test_customer_lookups() {
        let db = fixture().await;

        let names: Vec<_> = db.customers().await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["C001", "C002"]);

        assert_eq!(db.customer("cust0000b").await.unwrap().unwrap().name, "C002");
        assert_eq!(db.customer_by_name("C001").await.unwrap().unwrap().id, "cust0000a");
        assert!(db.customer("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invoices_for_customer() {
        let db = fixture().await;

        let by_reference = db.invoices_for_customer("cust0000a").await.unwrap();
        assert_eq!(references(&by_reference), vec!["I00001", "I00003", "I00004"]);

        let by_date = db.invoices_for_customer_by_date("cust0000a").await.unwrap();
        assert_eq!(references(&by_date), vec!["I00003", "I00001", "I00004"]);

        assert!(db.invoices_for_customer("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_invoices_newest_first() {
        let db = fixture().await;

        let recent = db.recent_invoices_for_customer("cust0000a", 2).await.unwrap();
        assert_eq!(references(&recent), vec!["I00004", "I00001"]);

        let all = db.recent_invoices_for_customer("cust0000a", 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_status_queries() {
        let db = fixture().await;

        assert_eq!(db.count_by_status(InvoiceStatus::Draft).await.unwrap(), 2);
        assert_eq!(db.count_by_status(InvoiceStatus::Paid).await.unwrap(), 1);
        let edited = db.invoices_by_status(InvoiceStatus::Edited).await.unwrap();
        assert_eq!(references(&edited), vec!["I00004"]);
    }

    #[tokio::test]
    async fn test_invoices_between() {
        let db = fixture().await;
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();

        let hits = db.invoices_between(day(3), day(5)).await.unwrap();
        assert_eq!(references(&hits), vec!["I00002", "I00003", "I00001"]);

        let single = db.invoices_between(day(9), day(9)).await.unwrap();
        assert_eq!(references(&single), vec!["I00004"]);

        assert!(db.invoices_between(day(5), day(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invoices_between_open_ended() {
        let db = fixture().await;
        let from = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

        let hits = db.invoices_between(from, NaiveDate::MAX).await.unwrap();
        assert_eq!(references(&hits), vec!["I00001", "I00004"]);

        let last = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
        assert_eq!(db.invoices_between(from, last).await.unwrap().len(), 2);
        assert!(db.invoices_between(NaiveDate::MAX, NaiveDate::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reference_lookup_and_counts() {
        let db = fixture().await;

        let invoice = db.invoice_by_reference("I00002").await.unwrap().unwrap();
        assert_eq!(invoice.customer_id, "cust0000b");
        assert_eq!(db.invoice("inv00002x").await.unwrap(), Some(invoice));
        assert_eq!(db.count_customers().await.unwrap(), 2);
        assert_eq!(db.count_invoices().await.unwrap(), 4);
    }
}
