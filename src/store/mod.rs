pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{AccountId, ContentItem, Source, SourceUpdate};

pub use sqlite::SqliteStore;

pub trait SourceStore {
    fn add_source(&self, source: &Source) -> Result<i64>;
    fn get_source(&self, id: i64) -> Result<Option<Source>>;
    fn get_source_by_url(&self, account: AccountId, url: &str) -> Result<Option<Source>>;
    fn list_sources(&self) -> Result<Vec<Source>>;
    /// Sources never fetched or last fetched before `stale_before`,
    /// never-fetched first.
    fn list_due(&self, stale_before: DateTime<Utc>, limit: usize) -> Result<Vec<Source>>;
    fn update_metadata(&self, id: i64, update: &SourceUpdate) -> Result<()>;
    /// `fetched_at: None` leaves the stored timestamp untouched;
    /// `error: None` clears the stored error.
    fn update_fetch_status(
        &self,
        id: i64,
        fetched_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()>;
    fn delete_source(&self, id: i64) -> Result<()>;
}

pub trait ContentStore {
    /// Returns false when `(source_id, guid)` already existed.
    fn add_item(&self, item: &ContentItem) -> Result<bool>;
    /// All-or-nothing; returns how many items were new.
    fn add_items(&self, items: &[ContentItem]) -> Result<usize>;
    fn get_item(&self, id: &str) -> Result<Option<ContentItem>>;
    fn get_item_by_guid(&self, source_id: i64, guid: &str) -> Result<Option<ContentItem>>;
    fn list_by_source(&self, source_id: i64, limit: usize, offset: usize)
        -> Result<Vec<ContentItem>>;
    fn set_read(&self, id: &str, is_read: bool) -> Result<()>;
    fn mark_all_read(&self, source_id: i64) -> Result<usize>;
    /// Returns the new favorite state.
    fn toggle_favorite(&self, id: &str) -> Result<bool>;
    fn count_unread(&self, source_id: i64) -> Result<i64>;
    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// Everything the ingestion pipeline needs from persistence.
pub trait Store: SourceStore + ContentStore {}

impl<T: SourceStore + ContentStore> Store for T {}
