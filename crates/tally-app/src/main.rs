//! Tally demo CLI.
//!
//! Opens (and on first run seeds) the invoicing database, then answers a few
//! queries through its indexes.
//!
//! ## Usage
//!
//! ```bash
//! # Counts and per-status breakdown
//! tally summary
//!
//! # One customer's invoices, oldest first
//! tally customer C042
//!
//! # Its three latest invoices
//! tally customer C042 --recent 3
//!
//! # Invoices dated within a range
//! tally between 2024-01-01 2024-01-31 --memory
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tally_common::{init_logging, LogConfig, LogFormat, Persistence, StoreConfig};
use tally_data::model::DATE_FORMAT;
use tally_data::{DatabaseProvider, Invoice, InvoiceDb, InvoiceStatus};
use tracing::info;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Seeded invoicing demo on an embedded IndexedDB-style store")]
struct Cli {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Keep everything in memory
    #[arg(long)]
    memory: bool,

    /// Log output format: pretty, compact or json
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record counts and invoices per status
    Summary,

    /// Invoices of one customer, ordered by date
    Customer {
        /// Customer name, e.g. C001
        name: String,
        /// Only the N latest invoices, newest first
        #[arg(short, long)]
        recent: Option<usize>,
    },

    /// Invoices with the given status
    Status {
        /// draft, edited or paid
        status: InvoiceStatus,
        /// Maximum rows to print
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Invoices dated between two days, inclusive
    Between {
        /// First day (YYYY-MM-DD)
        from: NaiveDate,
        /// Last day (YYYY-MM-DD)
        to: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log = LogConfig::for_cli(cli.verbose)?;
    if let Some(format) = cli.log_format {
        log = log.with_format(format);
    }
    init_logging(log)?;

    let config = load_config(&cli)?;
    info!(
        db = %config.database_name,
        persistence = ?config.persistence,
        "Starting Tally"
    );

    let provider = DatabaseProvider::new(config);
    let db = provider.handle().await.context("opening database")?;

    match cli.command.unwrap_or(Commands::Summary) {
        Commands::Summary => summary(&db).await?,
        Commands::Customer { name, recent } => customer(&db, &name, recent).await?,
        Commands::Status { status, limit } => {
            let invoices = db.invoices_by_status(status).await?;
            println!("{} {} invoices", invoices.len(), status);
            print_invoices(invoices.iter().take(limit));
        }
        Commands::Between { from, to } => {
            if from > to {
                bail!("{} is after {}", from, to);
            }
            let invoices = db.invoices_between(from, to).await?;
            println!(
                "{} invoices from {} to {}",
                invoices.len(),
                from.format(DATE_FORMAT),
                to.format(DATE_FORMAT)
            );
            print_invoices(invoices.iter());
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
        config.persistence = Persistence::Durable;
    }
    if cli.memory {
        config.persistence = Persistence::Memory;
    }
    Ok(config)
}

async fn summary(db: &InvoiceDb) -> Result<()> {
    println!("Database: {} (version {})", db.name(), db.version());
    println!("  Customers: {}", db.count_customers().await?);
    println!("  Invoices:  {}", db.count_invoices().await?);
    for status in InvoiceStatus::ALL {
        println!("    {:<7} {}", status.as_str(), db.count_by_status(status).await?);
    }

    if let Some(first) = db.customers().await?.first() {
        let invoices = db.invoices_for_customer_by_date(&first.id).await?;
        println!();
        println!("{} ({}): {} invoices", first.name, first.id, invoices.len());
        print_invoices(invoices.iter().take(5));
    }
    Ok(())
}

async fn customer(db: &InvoiceDb, name: &str, recent: Option<usize>) -> Result<()> {
    let Some(customer) = db.customer_by_name(name).await? else {
        bail!("no customer named {}", name);
    };
    let invoices = match recent {
        Some(limit) => db.recent_invoices_for_customer(&customer.id, limit).await?,
        None => db.invoices_for_customer_by_date(&customer.id).await?,
    };
    println!("{} ({}): {} invoices", customer.name, customer.id, invoices.len());
    print_invoices(invoices.iter());
    Ok(())
}

fn print_invoices<'a>(invoices: impl Iterator<Item = &'a Invoice>) {
    for invoice in invoices {
        println!(
            "  {}  {}  {:<6}  {}",
            invoice.reference, invoice.date, invoice.status, invoice.id
        );
    }
}
