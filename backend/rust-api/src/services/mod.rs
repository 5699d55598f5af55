use std::sync::Arc;

use crate::config::{BackendKind, Config};
use catalog::Catalog;
use durable_store::{DurableStore, ProgressBackend};
use memory_backend::MemoryBackend;
use mongo_backend::MongoBackend;
use session_orchestrator::SessionOrchestrator;

pub struct AppState {
    pub config: Config,
    pub store: Arc<DurableStore>,
    pub orchestrator: Arc<SessionOrchestrator>,
}

impl AppState {
    pub fn new(config: Config, catalog: Catalog, backend: Arc<dyn ProgressBackend>) -> Self {
        let store = Arc::new(DurableStore::new(backend, &config.store));
        let orchestrator = Arc::new(SessionOrchestrator::new(
            Arc::new(catalog),
            store.clone(),
            &config,
        ));

        Self {
            config,
            store,
            orchestrator,
        }
    }

    /// Opens the backend selected by `database.backend`.
    pub async fn connect_backend(config: &Config) -> anyhow::Result<Arc<dyn ProgressBackend>> {
        match config.database.backend {
            BackendKind::Mongo => {
                tracing::info!("Connecting to MongoDB...");
                let backend = tokio::time::timeout(
                    std::time::Duration::from_secs(30),
                    MongoBackend::connect(&config.database, config.store.pool_size),
                )
                .await
                .map_err(|_| anyhow::anyhow!("MongoDB connection timeout after 30s"))??;
                Ok(Arc::new(backend))
            }
            BackendKind::Memory => {
                tracing::warn!("Using in-memory progress backend; progress is lost on restart");
                Ok(Arc::new(MemoryBackend::new()))
            }
        }
    }
}

pub mod cache;
pub mod catalog;
pub mod durable_store;
pub mod maintenance_worker;
pub mod memory_backend;
pub mod mongo_backend;
pub mod question_source;
pub mod rate_limiter;
pub mod scheduler;
pub mod session_orchestrator;
