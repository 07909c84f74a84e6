//! Seeding: one atomic transaction populating both tables
//!
//! Concurrent callers are turned away by a [`SeedGate`], a compare-and-swap
//! tri-state (idle, seeding, seeded). The gate is advisory: it keeps one
//! process from running two seeds, it does not coordinate processes.

use std::sync::atomic::{AtomicU8, Ordering};

use tally_common::StoreConfig;
use tally_idb::{IDBTransaction, TransactionMode};
use tracing::{debug, info, warn};

use crate::db::InvoiceDb;
use crate::error::{DataError, DataResult};
use crate::generate::{customer_name, invoice_reference, RandomSource, RecordSource};
use crate::model::{Customer, Invoice, InvoiceStatus};
use crate::schema::{CUSTOMERS, INVOICES};

/// How many records a seed creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedVolumes {
    pub customers: usize,
    pub invoices: usize,
}

impl Default for SeedVolumes {
    fn default() -> Self {
        Self {
            customers: 100,
            invoices: 10_000,
        }
    }
}

impl From<&StoreConfig> for SeedVolumes {
    fn from(config: &StoreConfig) -> Self {
        Self {
            customers: config.customer_count,
            invoices: config.invoice_count,
        }
    }
}

/// What a call to [`seed`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Records were committed.
    Seeded { customers: usize, invoices: usize },
    /// Another seed holds the gate.
    AlreadyRunning,
    /// A seed already completed through this gate.
    AlreadySeeded,
}

const IDLE: u8 = 0;
const SEEDING: u8 = 1;
const SEEDED: u8 = 2;

/// Non-blocking, non-reentrant seed guard.
#[derive(Debug, Default)]
pub struct SeedGate {
    state: AtomicU8,
}

impl SeedGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate, or report why it can't be claimed.
    pub fn try_begin(&self) -> Result<SeedPermit<'_>, SeedOutcome> {
        match self
            .state
            .compare_exchange(IDLE, SEEDING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(SeedPermit {
                gate: self,
                finished: false,
            }),
            Err(SEEDED) => Err(SeedOutcome::AlreadySeeded),
            Err(_) => Err(SeedOutcome::AlreadyRunning),
        }
    }

    pub fn is_seeding(&self) -> bool {
        self.state.load(Ordering::Acquire) == SEEDING
    }

    pub fn is_seeded(&self) -> bool {
        self.state.load(Ordering::Acquire) == SEEDED
    }

    /// Forget a completed seed. A seed in progress is left alone.
    pub fn reset(&self) {
        let _ = self
            .state
            .compare_exchange(SEEDED, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Held while seeding. Dropping it without [`SeedPermit::finish`] reopens
/// the gate.
#[derive(Debug)]
pub struct SeedPermit<'a> {
    gate: &'a SeedGate,
    finished: bool,
}

impl SeedPermit<'_> {
    /// Mark the seed as committed.
    pub fn finish(mut self) {
        self.finished = true;
        self.gate.state.store(SEEDED, Ordering::Release);
    }
}

impl Drop for SeedPermit<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.state.store(IDLE, Ordering::Release);
        }
    }
}

/// Seed `db` with random records.
pub async fn seed(db: &InvoiceDb) -> DataResult<SeedOutcome> {
    let mut source = RandomSource::new();
    seed_with(db, &mut source).await
}

/// Seed `db` with records drawn from `source`.
///
/// Everything is written in one read-write transaction over both tables.
/// If any insert fails the transaction is aborted, nothing from this
/// attempt is kept, and the gate is reopened for a retry.
///
/// Waits for the write lock: callers must not hold another transaction on
/// the same database while awaiting this.
pub async fn seed_with<S: RecordSource>(db: &InvoiceDb, source: &mut S) -> DataResult<SeedOutcome> {
    let permit = match db.seed_gate().try_begin() {
        Ok(permit) => permit,
        Err(outcome) => {
            debug!(db = db.name(), ?outcome, "Seed skipped");
            return Ok(outcome);
        }
    };

    let volumes = db.volumes();
    info!(
        db = db.name(),
        customers = volumes.customers,
        invoices = volumes.invoices,
        "Seeding"
    );

    let mut tx = db
        .transaction(&[CUSTOMERS, INVOICES], TransactionMode::ReadWrite)
        .await?;

    if let Err(e) = populate(&mut tx, volumes, source) {
        tx.abort();
        warn!(db = db.name(), error = %e, "Seeding aborted");
        return Err(e);
    }
    tx.commit().await?;
    permit.finish();

    info!(db = db.name(), "Seeding complete");
    Ok(SeedOutcome::Seeded {
        customers: volumes.customers,
        invoices: volumes.invoices,
    })
}

fn populate<S: RecordSource>(
    tx: &mut IDBTransaction,
    volumes: SeedVolumes,
    source: &mut S,
) -> DataResult<()> {
    let mut customer_ids = Vec::with_capacity(volumes.customers);

    {
        let mut customers = tx.object_store(CUSTOMERS)?;
        for ordinal in 1..=volumes.customers {
            let customer = Customer {
                id: source.id()?,
                name: customer_name(ordinal),
            };
            customers.add(serde_json::to_value(&customer)?)?;
            customer_ids.push(customer.id);
        }
    }

    let mut invoices = tx.object_store(INVOICES)?;
    for ordinal in 1..=volumes.invoices {
        let customer_id = source
            .pick(customer_ids.as_slice())
            .ok_or(DataError::EmptyCandidates("customer ids"))?
            .clone();
        let status = *source
            .pick(&InvoiceStatus::ALL)
            .ok_or(DataError::EmptyCandidates("invoice statuses"))?;
        let invoice = Invoice {
            id: source.id()?,
            reference: invoice_reference(ordinal),
            customer_id,
            date: source.date(),
            status,
        };
        invoices.add(serde_json::to_value(&invoice)?)?;
    }

    debug!(
        customers = customer_ids.len(),
        invoices = volumes.invoices,
        "Staged seed records"
    );
    Ok(())
}
