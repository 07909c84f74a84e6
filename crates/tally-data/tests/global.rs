//! Process-wide provider. Kept in its own test binary since it installs a
//! static.

use tally_common::StoreConfig;
use tally_data::{get_handle, global, install, DataError};

#[tokio::test]
async fn test_installed_provider_serves_handles() {
    let provider = install(StoreConfig::in_memory().with_volumes(3, 20)).unwrap();
    assert_eq!(provider.config().customer_count, 3);

    let db = get_handle().await.unwrap();
    assert_eq!(db.count_customers().await.unwrap(), 3);
    assert_eq!(db.count_invoices().await.unwrap(), 20);

    let again = get_handle().await.unwrap();
    assert_eq!(again.name(), db.name());
    assert!(std::ptr::eq(global().unwrap(), provider));

    assert!(matches!(
        install(StoreConfig::in_memory()),
        Err(DataError::ProviderInstalled)
    ));
}
