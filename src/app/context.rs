use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{FlowError, Result};
use crate::config::Config;
use crate::fetcher::{HttpFetcher, SourceFetcher};
use crate::ingest::{IngestionScheduler, IngestionWorker, Notifier, RetentionSweeper};
use crate::store::SqliteStore;

/// Wires the store and fetcher to the settings they run under.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub fetcher: Arc<dyn SourceFetcher + Send + Sync>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match &config.database.path {
            Some(p) => p.clone(),
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let fetcher: Arc<dyn SourceFetcher + Send + Sync> = Arc::new(HttpFetcher::new()?);

        Ok(Self::with_parts(config, store, fetcher))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn SourceFetcher + Send + Sync>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
        }
    }

    pub fn worker(&self, notifier: Arc<dyn Notifier + Send + Sync>) -> IngestionWorker<SqliteStore> {
        IngestionWorker::new(
            self.store.clone(),
            self.fetcher.clone(),
            notifier,
            self.config.scheduler.fetch_timeout,
        )
    }

    pub fn scheduler(&self, notifier: Arc<dyn Notifier + Send + Sync>) -> IngestionScheduler<SqliteStore> {
        IngestionScheduler::new(self.worker(notifier), self.config.scheduler.clone())
    }

    pub fn sweeper(&self) -> RetentionSweeper<SqliteStore> {
        RetentionSweeper::new(
            self.store.clone(),
            self.config.retention.interval,
            self.config.retention.max_age,
        )
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| FlowError::Config("Could not find data directory".into()))?;
        let flowcast_dir = data_dir.join("flowcast");
        std::fs::create_dir_all(&flowcast_dir)?;
        Ok(flowcast_dir.join("flowcast.db"))
    }
}
