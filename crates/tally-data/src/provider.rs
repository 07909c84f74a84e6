//! Lazily-opened, cached database handle

use std::sync::{Arc, OnceLock};

use tally_common::StoreConfig;
use tally_idb::{IDBEvent, IDBFactory};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::db::InvoiceDb;
use crate::error::{DataError, DataResult};
use crate::schema;
use crate::seed::{self, SeedGate, SeedVolumes};

/// Opens the database on first use, seeds it if it is short of invoices,
/// and hands out clones of the cached handle afterwards.
///
/// Only the first successful call checks the invoice count; later calls
/// return the cached handle without touching the store.
#[derive(Debug)]
pub struct DatabaseProvider {
    config: StoreConfig,
    factory: IDBFactory,
    events: Option<Mutex<UnboundedReceiver<IDBEvent>>>,
    gate: Arc<SeedGate>,
    cached: RwLock<Option<InvoiceDb>>,
}

impl DatabaseProvider {
    pub fn new(config: StoreConfig) -> Self {
        let (factory, events) = match config.storage_root() {
            Some(root) => IDBFactory::with_storage(root),
            None => IDBFactory::new(),
        };
        let mut provider = Self::with_factory(config, factory);
        provider.events = Some(Mutex::new(events));
        provider
    }

    /// Use an existing factory, e.g. one shared with other providers.
    pub fn with_factory(config: StoreConfig, factory: IDBFactory) -> Self {
        Self {
            config,
            factory,
            events: None,
            gate: Arc::new(SeedGate::new()),
            cached: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn factory(&self) -> &IDBFactory {
        &self.factory
    }

    /// The cached handle, opening and seeding the database if needed.
    pub async fn handle(&self) -> DataResult<InvoiceDb> {
        if let Some(db) = self.cached.read().await.as_ref() {
            return Ok(db.clone());
        }

        let db = {
            let mut slot = self.cached.write().await;
            if let Some(db) = slot.as_ref() {
                return Ok(db.clone());
            }
            let opened = schema::open(&self.factory, &self.config.database_name).await;
            self.drain_events().await;
            let connection = opened?;
            let db = InvoiceDb::with_gate(
                connection,
                SeedVolumes::from(&self.config),
                self.gate.clone(),
            );
            *slot = Some(db.clone());
            db
        };

        let invoices = db.count_invoices().await?;
        let target = db.volumes().invoices;
        if invoices < target {
            info!(db = db.name(), invoices, target, "Store below seed volume");
            seed::seed(&db).await?;
        } else {
            debug!(db = db.name(), invoices, "Store already seeded");
        }
        Ok(db)
    }

    async fn drain_events(&self) {
        let Some(events) = &self.events else {
            return;
        };
        let mut events = events.lock().await;
        while let Ok(event) = events.try_recv() {
            debug!(?event, "Store event");
        }
    }

    /// Close and forget the cached handle. The next [`handle`](Self::handle)
    /// call reopens the database and re-checks the seed volume.
    pub async fn reset(&self) {
        if let Some(db) = self.cached.write().await.take() {
            db.close();
            debug!(db = db.name(), "Handle reset");
        }
        self.gate.reset();
    }
}

static GLOBAL: OnceLock<DatabaseProvider> = OnceLock::new();

/// Install the process-wide provider. Fails if one is already in place.
pub fn install(config: StoreConfig) -> DataResult<&'static DatabaseProvider> {
    config.validate()?;
    GLOBAL
        .set(DatabaseProvider::new(config))
        .map_err(|_| DataError::ProviderInstalled)?;
    GLOBAL.get().ok_or(DataError::ProviderInstalled)
}

/// The process-wide provider. Created on first use from the default
/// config and environment overrides unless [`install`] ran first.
pub fn global() -> DataResult<&'static DatabaseProvider> {
    if let Some(provider) = GLOBAL.get() {
        return Ok(provider);
    }
    let config = StoreConfig::default().with_env_overrides()?;
    Ok(GLOBAL.get_or_init(|| DatabaseProvider::new(config)))
}

/// Handle from the process-wide provider.
pub async fn get_handle() -> DataResult<InvoiceDb> {
    global()?.handle().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_idb::IDBError;

    fn small() -> StoreConfig {
        StoreConfig::in_memory().with_volumes(5, 40)
    }

    #[tokio::test]
    async fn test_handle_seeds_once() {
        let provider = DatabaseProvider::new(small());

        let first = provider.handle().await.unwrap();
        assert_eq!(first.count_customers().await.unwrap(), 5);
        assert_eq!(first.count_invoices().await.unwrap(), 40);

        let second = provider.handle().await.unwrap();
        assert_eq!(second.count_invoices().await.unwrap(), 40);
        assert!(second.seed_gate().is_seeded());
    }

    #[tokio::test]
    async fn test_reset_reopens() {
        let provider = DatabaseProvider::new(small());
        let first = provider.handle().await.unwrap();

        provider.reset().await;
        assert!(first.is_closed());

        let second = provider.handle().await.unwrap();
        assert!(!second.is_closed());
        // Same in-memory database, already at volume
        assert_eq!(second.count_invoices().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_concurrent_handles_share_one_connection() {
        let provider = DatabaseProvider::new(small());

        let (a, b) = tokio::join!(provider.handle(), provider.handle());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.count_invoices().await.unwrap(), 40);
        assert_eq!(b.count_invoices().await.unwrap(), 40);
        assert_eq!(provider.factory().databases().await.len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let (factory, _events) = IDBFactory::new();
        let newer = factory
            .open("ahead", schema::DB_VERSION + 1, |_, _| Ok(()))
            .await
            .unwrap();
        newer.close();

        let mut config = small();
        config.database_name = "ahead".to_string();
        let provider = DatabaseProvider::with_factory(config, factory);

        let err = provider.handle().await.unwrap_err();
        assert!(matches!(err.as_store_error(), Some(IDBError::VersionError(_))));
        // Nothing was cached; the next call tries again and fails the same way
        assert!(matches!(provider.handle().await, Err(DataError::Store(_))));
    }
}
