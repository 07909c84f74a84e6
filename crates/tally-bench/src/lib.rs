//! # Tally Bench
//!
//! Fixtures shared by the criterion benchmarks in `benches/tally.rs`.
//!
//! Run with: cargo bench -p tally-bench

use tally_data::schema;
use tally_data::{seed_with, DataResult, InvoiceDb, RandomSource, SeedVolumes};
use tally_idb::IDBFactory;
use tokio::runtime::{Builder, Runtime};

/// Single-threaded runtime for driving async store calls from `b.iter`.
pub fn runtime() -> std::io::Result<Runtime> {
    Builder::new_current_thread().enable_all().build()
}

/// Fresh in-memory database with the schema applied and no records.
pub async fn empty(volumes: SeedVolumes) -> DataResult<InvoiceDb> {
    let (factory, _events) = IDBFactory::new();
    let connection = schema::open(&factory, "bench").await?;
    Ok(InvoiceDb::new(connection, volumes))
}

/// In-memory database seeded deterministically from `seed`.
pub async fn seeded(volumes: SeedVolumes, seed: u64) -> DataResult<InvoiceDb> {
    let db = empty(volumes).await?;
    seed_with(&db, &mut RandomSource::seeded(seed)).await?;
    Ok(db)
}
