//! Scoped construction of repository managers.
//!
//! [`RepositoryServices`] is built once per process from configuration.
//! Each call to [`RepositoryServices::scope`] opens a fresh persistence
//! context, so units of work never share staged state.

use std::sync::Arc;

use tracing::{debug, info};

use repokit_core::config::AppConfig;
use repokit_core::error::AppError;
use repokit_core::result::AppResult;
use repokit_core::traits::context::PersistenceContext;

use crate::connection::DatabasePool;
use crate::context::memory::MemoryStore;
use crate::manager::RepositoryManager;

/// Where new persistence contexts are opened.
#[derive(Debug, Clone)]
pub enum ContextSource {
    /// PostgreSQL through a shared pool.
    Postgres(DatabasePool),
    /// A shared in-memory store.
    Memory(Arc<MemoryStore>),
}

/// Process-wide factory for per-scope repository managers.
#[derive(Debug, Clone)]
pub struct RepositoryServices {
    source: ContextSource,
    default_tracking: bool,
}

impl RepositoryServices {
    /// Build services for the provider named in `config.repository`.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let source = match config.repository.provider.as_str() {
            "postgres" => {
                info!("Initializing PostgreSQL persistence provider");
                ContextSource::Postgres(DatabasePool::connect(&config.database).await?)
            }
            "memory" => {
                info!("Initializing in-memory persistence provider");
                ContextSource::Memory(MemoryStore::new())
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unknown repository provider: '{other}'. Supported: memory, postgres"
                )));
            }
        };

        Ok(Self {
            source,
            default_tracking: config.repository.default_tracking,
        })
    }

    /// Services over an existing in-memory store.
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            source: ContextSource::Memory(store),
            default_tracking: false,
        }
    }

    /// Services over an existing PostgreSQL pool.
    pub fn from_pool(pool: DatabasePool) -> Self {
        Self {
            source: ContextSource::Postgres(pool),
            default_tracking: false,
        }
    }

    /// Set the tracking default handed to every scope.
    pub fn with_default_tracking(mut self, tracking: bool) -> Self {
        self.default_tracking = tracking;
        self
    }

    /// The configured context source.
    pub fn source(&self) -> &ContextSource {
        &self.source
    }

    /// Open a new unit of work.
    pub fn scope(&self) -> RepositoryManager {
        let context: Arc<dyn PersistenceContext> = match &self.source {
            ContextSource::Postgres(pool) => Arc::new(pool.open_context()),
            ContextSource::Memory(store) => Arc::new(store.open_context()),
        };
        debug!("Opened repository scope");
        RepositoryManager::new(context).with_default_tracking(self.default_tracking)
    }

    /// Check that the backing store is reachable.
    pub async fn health_check(&self) -> AppResult<()> {
        match &self.source {
            ContextSource::Postgres(pool) => pool.health_check().await,
            ContextSource::Memory(_) => Ok(()),
        }
    }
}
