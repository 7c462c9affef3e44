use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::app::Result;
use crate::ingest::lifecycle::cutoff;
use crate::ingest::{Cycle, PeriodicRunner};
use crate::store::ContentStore;

struct Prune<S> {
    store: Arc<S>,
    max_age: Duration,
}

impl<S: ContentStore + Send + Sync + 'static> Prune<S> {
    fn prune(&self) -> Result<usize> {
        self.store.delete_older_than(cutoff(self.max_age)?)
    }
}

#[async_trait]
impl<S: ContentStore + Send + Sync + 'static> Cycle for Prune<S> {
    async fn run_cycle(&self, _cancel: watch::Receiver<bool>) {
        match self.prune() {
            Ok(0) => tracing::debug!("Nothing to prune"),
            Ok(deleted) => tracing::info!(deleted, "Pruned old items"),
            Err(e) => tracing::error!(error = %e, "Pruning failed"),
        }
    }
}

/// Periodically deletes items stored longer than `max_age` ago.
pub struct RetentionSweeper<S> {
    prune: Arc<Prune<S>>,
    runner: PeriodicRunner,
}

impl<S: ContentStore + Send + Sync + 'static> RetentionSweeper<S> {
    pub fn new(store: Arc<S>, interval: Duration, max_age: Duration) -> Self {
        Self {
            prune: Arc::new(Prune { store, max_age }),
            runner: PeriodicRunner::new("retention", interval),
        }
    }

    pub fn start(&mut self) {
        self.runner.start(self.prune.clone());
    }

    pub async fn stop(&mut self) {
        self.runner.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    /// Returns how many items were deleted.
    pub fn run_once(&self) -> Result<usize> {
        self.prune.prune()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::app::FlowError;
    use crate::domain::{AccountId, ContentItem, Source};
    use crate::store::{SourceStore, SqliteStore};

    fn store_with_items() -> (Arc<SqliteStore>, i64) {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let source_id = store
            .add_source(&Source::new(AccountId(1), "https://example.com/feed".into()))
            .unwrap();

        let mut old = ContentItem::new(source_id, "old");
        old.created_at = Utc::now() - TimeDelta::days(45);
        let mut old_favorite = ContentItem::new(source_id, "old-favorite");
        old_favorite.created_at = Utc::now() - TimeDelta::days(40);
        let fresh = ContentItem::new(source_id, "fresh");

        store.add_items(&[old, old_favorite.clone(), fresh]).unwrap();
        store.toggle_favorite(&old_favorite.id).unwrap();
        (store, source_id)
    }

    #[test]
    fn test_run_once_deletes_only_old_items() {
        let (store, source_id) = store_with_items();
        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(86_400),
            Duration::from_secs(30 * 86_400),
        );

        assert_eq!(sweeper.run_once().unwrap(), 2);
        assert_eq!(sweeper.run_once().unwrap(), 0);

        let left = store.list_by_source(source_id, 10, 0).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].guid, "fresh");
    }

    #[test]
    fn test_out_of_range_max_age_is_an_error() {
        let (store, source_id) = store_with_items();
        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(86_400),
            Duration::from_secs(300_000_000 * 86_400),
        );

        assert!(matches!(sweeper.run_once(), Err(FlowError::Config(_))));
        assert_eq!(store.list_by_source(source_id, 10, 0).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_start_prunes_immediately_and_stops() {
        let (store, source_id) = store_with_items();
        let mut sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(86_400),
            Duration::from_secs(30 * 86_400),
        );

        sweeper.start();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while store.list_by_source(source_id, 10, 0).unwrap().len() > 1
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sweeper.stop().await;

        assert!(!sweeper.is_running());
        assert_eq!(store.list_by_source(source_id, 10, 0).unwrap().len(), 1);
    }
}
