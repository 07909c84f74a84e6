//! # Tally Data
//!
//! Demo invoicing data layer on top of [`tally_idb`].
//!
//! ## Features
//!
//! - Two tables, `customers` and `invoices`, with name, status, reference,
//!   customer and date indexes (including compound ones)
//! - A lazily-opened, process-wide handle ([`get_handle`])
//! - Idempotent seeding of 100 customers and 10,000 invoices in one atomic
//!   transaction
//!
//! ## Example
//!
//! ```no_run
//! # async fn run() -> tally_data::DataResult<()> {
//! let db = tally_data::get_handle().await?;
//! for customer in db.customers().await?.iter().take(3) {
//!     let invoices = db.invoices_for_customer(&customer.id).await?;
//!     println!("{}: {} invoices", customer.name, invoices.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod generate;
pub mod model;
pub mod provider;
pub mod schema;
pub mod seed;

pub use db::InvoiceDb;
pub use error::{DataError, DataResult};
pub use generate::{RandomSource, RecordSource};
pub use model::{Customer, Invoice, InvoiceStatus};
pub use provider::{get_handle, global, install, DatabaseProvider};
pub use seed::{seed, seed_with, SeedGate, SeedOutcome, SeedVolumes};
