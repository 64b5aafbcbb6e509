use std::sync::Arc;

use thiserror::Error;

use paybook_infra::store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError};
use paybook_infra::{ConfigError, EngineConfig, JsonDocumentRenderer, PaymentLedger};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database setup failed: {0}")]
    Database(#[from] StoreError),
}

/// Everything handlers need, shared behind an `Arc`.
#[derive(Clone)]
pub struct AppServices {
    pub ledger: PaymentLedger,
    /// `"in_memory"` or `"postgres"`.
    pub backend: &'static str,
}

/// In-memory wiring (dev/test).
pub fn build_in_memory_services(config: EngineConfig) -> AppServices {
    let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
    AppServices {
        ledger: PaymentLedger::new(store, Arc::new(JsonDocumentRenderer), config),
        backend: "in_memory",
    }
}

async fn build_persistent_services(config: EngineConfig) -> Result<AppServices, ServiceError> {
    let database_url = config
        .database_url
        .clone()
        .ok_or(ConfigError::Missing("DATABASE_URL"))?;

    let store = PostgresLedgerStore::connect(&database_url, config.database_max_connections).await?;
    store.run_migrations().await?;
    tracing::info!("postgres ledger store ready");

    let store: Arc<dyn LedgerStore> = Arc::new(store);
    Ok(AppServices {
        ledger: PaymentLedger::new(store, Arc::new(JsonDocumentRenderer), config),
        backend: "postgres",
    })
}

/// Pick the backend from `USE_PERSISTENT_STORES` (already folded into `config`).
pub async fn build_services(config: EngineConfig) -> Result<AppServices, ServiceError> {
    if config.use_persistent_stores {
        build_persistent_services(config).await
    } else {
        tracing::info!("using in-memory ledger store");
        Ok(build_in_memory_services(config))
    }
}
