use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::app::{FlowError, Result};
use crate::domain::{ContentItem, Event, NewArticles, NEW_ARTICLES};
use crate::fetcher::SourceFetcher;
use crate::ingest::Notifier;
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub source_id: i64,
    pub fetched: usize,
    pub new_items: usize,
}

/// Runs one fetch cycle for one source.
pub struct IngestionWorker<S> {
    store: Arc<S>,
    fetcher: Arc<dyn SourceFetcher + Send + Sync>,
    notifier: Arc<dyn Notifier + Send + Sync>,
    fetch_timeout: Duration,
}

impl<S> Clone for IngestionWorker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            fetcher: self.fetcher.clone(),
            notifier: self.notifier.clone(),
            fetch_timeout: self.fetch_timeout,
        }
    }
}

impl<S: Store + Send + Sync + 'static> IngestionWorker<S> {
    pub fn new(
        store: Arc<S>,
        fetcher: Arc<dyn SourceFetcher + Send + Sync>,
        notifier: Arc<dyn Notifier + Send + Sync>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            notifier,
            fetch_timeout,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Fetch, store and announce one source.
    ///
    /// Success is recorded only after the items are committed, so a run that
    /// fails part-way leaves the source due for the next cycle.
    pub async fn run(&self, source_id: i64) -> Result<IngestOutcome> {
        let source = self
            .store
            .get_source(source_id)?
            .ok_or(FlowError::SourceNotFound(source_id))?;

        let fetched = tokio::time::timeout(
            self.fetch_timeout,
            self.fetcher.fetch(&source.url, self.fetch_timeout),
        )
        .await
        .unwrap_or(Err(FlowError::Timeout(self.fetch_timeout)));

        let parsed = match fetched {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(source_id, url = %source.url, error = %e, "Fetch failed");
                if let Err(store_err) =
                    self.store
                        .update_fetch_status(source_id, None, Some(&e.to_string()))
                {
                    tracing::error!(source_id, error = %store_err, "Failed to record fetch error");
                }
                return Err(e);
            }
        };

        let update = parsed.meta.to_update(&source);
        let source_title = update.title.clone().unwrap_or_else(|| source.title.clone());
        if let Err(e) = self.store.update_metadata(source_id, &update) {
            tracing::warn!(source_id, error = %e, "Failed to refresh source metadata");
        }

        let fetched = parsed.items.len();
        let items: Vec<ContentItem> = parsed
            .items
            .into_iter()
            .filter(|item| !item.guid.is_empty())
            .map(|item| ContentItem::from_parsed(source_id, item))
            .collect();
        if items.len() < fetched {
            tracing::debug!(
                source_id,
                skipped = fetched - items.len(),
                "Skipped items without id, link or title"
            );
        }

        let new_items = self.store.add_items(&items)?;

        if new_items > 0 {
            self.announce(source_id, source_title, new_items).await;
        }

        self.store.update_fetch_status(source_id, Some(Utc::now()), None)?;

        tracing::info!(source_id, fetched, new_items, "Source ingested");

        Ok(IngestOutcome {
            source_id,
            fetched,
            new_items,
        })
    }

    async fn announce(&self, source_id: i64, source_title: String, count: usize) {
        let payload = NewArticles {
            source_id,
            source_title,
            count,
        };
        let result = match Event::new(NEW_ARTICLES, payload) {
            Ok(event) => self.notifier.notify(event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(source_id, error = %e, "Failed to announce new items");
        }
    }
}
