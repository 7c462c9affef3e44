use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{FlowError, Result};
use crate::domain::{AccountId, ContentItem, Source, SourceUpdate};
use crate::store::{ContentStore, SourceStore};

const SOURCE_COLUMNS: &str = "id, account_id, url, title, description, site_url, image_url, \
                              last_fetched_at, fetch_error, created_at";

const ITEM_COLUMNS: &str = "id, source_id, guid, title, link, content, summary, author, \
                            image_url, published_at, is_read, is_favorite, created_at";

const INSERT_ITEM: &str = "INSERT OR IGNORE INTO items
    (id, source_id, guid, title, link, content, summary, author, image_url, published_at, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FlowError::LockPoisoned(e.to_string()))
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations.to_latest(&mut conn)?;

        Ok(())
    }

    /// Fixed-width UTC so that string order matches time order in SQL.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
        Ok(Source {
            id: row.get(0)?,
            account_id: AccountId(row.get(1)?),
            url: row.get(2)?,
            title: row.get(3)?,
            description: row.get(4)?,
            site_url: row.get(5)?,
            image_url: row.get(6)?,
            last_fetched_at: row
                .get::<_, Option<String>>(7)?
                .and_then(|s| Self::parse_datetime(&s)),
            fetch_error: row.get(8)?,
            created_at: row
                .get::<_, String>(9)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ContentItem> {
        Ok(ContentItem {
            id: row.get(0)?,
            source_id: row.get(1)?,
            guid: row.get(2)?,
            title: row.get(3)?,
            link: row.get(4)?,
            content: row.get(5)?,
            summary: row.get(6)?,
            author: row.get(7)?,
            image_url: row.get(8)?,
            published_at: row
                .get::<_, Option<String>>(9)?
                .and_then(|s| Self::parse_datetime(&s)),
            is_read: row.get::<_, i32>(10)? != 0,
            is_favorite: row.get::<_, i32>(11)? != 0,
            created_at: row
                .get::<_, String>(12)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn insert_item(conn: &Connection, item: &ContentItem) -> rusqlite::Result<usize> {
        conn.execute(
            INSERT_ITEM,
            params![
                item.id,
                item.source_id,
                item.guid,
                item.title,
                item.link,
                item.content,
                item.summary,
                item.author,
                item.image_url,
                item.published_at.as_ref().map(Self::format_datetime),
                Self::format_datetime(&item.created_at),
            ],
        )
    }
}

impl SourceStore for SqliteStore {
    fn add_source(&self, source: &Source) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO sources (account_id, url, title, description, site_url, image_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source.account_id.0,
                source.url,
                source.title,
                source.description,
                source.site_url,
                source.image_url,
                Self::format_datetime(&source.created_at),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
                params![id],
                Self::source_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn get_source_by_url(&self, account: AccountId, url: &str) -> Result<Option<Source>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE account_id = ?1 AND url = ?2"),
                params![account.0, url],
                Self::source_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn list_sources(&self) -> Result<Vec<Source>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY title, url"
        ))?;

        let sources = stmt
            .query_map([], Self::source_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sources)
    }

    fn list_due(&self, stale_before: DateTime<Utc>, limit: usize) -> Result<Vec<Source>> {
        let conn = self.conn()?;

        // NULLs sort first under ASC, so never-fetched sources lead.
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources
             WHERE last_fetched_at IS NULL OR last_fetched_at < ?1
             ORDER BY last_fetched_at ASC, id ASC
             LIMIT ?2"
        ))?;

        let sources = stmt
            .query_map(
                params![Self::format_datetime(&stale_before), limit as i64],
                Self::source_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sources)
    }

    fn update_metadata(&self, id: i64, update: &SourceUpdate) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE sources SET
                 title = COALESCE(?2, title),
                 description = COALESCE(?3, description),
                 site_url = COALESCE(?4, site_url),
                 image_url = COALESCE(?5, image_url)
             WHERE id = ?1",
            params![
                id,
                update.title,
                update.description,
                update.site_url,
                update.image_url
            ],
        )?;

        Ok(())
    }

    fn update_fetch_status(
        &self,
        id: i64,
        fetched_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "UPDATE sources SET
                 last_fetched_at = COALESCE(?2, last_fetched_at),
                 fetch_error = ?3
             WHERE id = ?1",
            params![id, fetched_at.as_ref().map(Self::format_datetime), error],
        )?;

        Ok(())
    }

    fn delete_source(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
        Ok(())
    }
}

impl ContentStore for SqliteStore {
    fn add_item(&self, item: &ContentItem) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = Self::insert_item(&conn, item)?;
        Ok(inserted > 0)
    }

    fn add_items(&self, items: &[ContentItem]) -> Result<usize> {
        let mut conn = self.conn()?;

        // Dropping the transaction on error rolls the whole batch back.
        let tx = conn.transaction()?;
        let mut count = 0;

        for item in items {
            count += Self::insert_item(&tx, item)?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn get_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                params![id],
                Self::item_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn get_item_by_guid(&self, source_id: i64, guid: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE source_id = ?1 AND guid = ?2"),
                params![source_id, guid],
                Self::item_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn list_by_source(
        &self,
        source_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ContentItem>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE source_id = ?1
             ORDER BY published_at IS NULL, published_at DESC, created_at DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let items = stmt
            .query_map(
                params![source_id, limit as i64, offset as i64],
                Self::item_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn set_read(&self, id: &str, is_read: bool) -> Result<()> {
        let conn = self.conn()?;

        let read_at = is_read.then(|| Self::format_datetime(&Utc::now()));
        let updated = conn.execute(
            "UPDATE items SET is_read = ?2, read_at = ?3 WHERE id = ?1",
            params![id, is_read as i32, read_at],
        )?;

        if updated == 0 {
            return Err(FlowError::ItemNotFound(id.to_string()));
        }
        Ok(())
    }

    fn mark_all_read(&self, source_id: i64) -> Result<usize> {
        let conn = self.conn()?;

        let updated = conn.execute(
            "UPDATE items SET is_read = 1, read_at = ?2 WHERE source_id = ?1 AND is_read = 0",
            params![source_id, Self::format_datetime(&Utc::now())],
        )?;

        Ok(updated)
    }

    fn toggle_favorite(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;

        let state = conn
            .query_row(
                "UPDATE items SET is_favorite = 1 - is_favorite WHERE id = ?1 RETURNING is_favorite",
                params![id],
                |row| row.get::<_, i32>(0),
            )
            .optional()?;

        match state {
            Some(v) => Ok(v != 0),
            None => Err(FlowError::ItemNotFound(id.to_string())),
        }
    }

    fn count_unread(&self, source_id: i64) -> Result<i64> {
        let conn = self.conn()?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM items WHERE source_id = ?1 AND is_read = 0",
            params![source_id],
            |row| row.get(0),
        )?;

        Ok(count)
    }

    fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;

        let deleted = conn.execute(
            "DELETE FROM items WHERE created_at < ?1",
            params![Self::format_datetime(&cutoff)],
        )?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Duration;

    use super::*;

    const URL: &str = "https://example.com/feed.xml";

    fn store_with_source() -> (SqliteStore, i64) {
        let store = SqliteStore::in_memory().unwrap();
        let id = store.add_source(&Source::new(AccountId(1), URL.into())).unwrap();
        (store, id)
    }

    #[test]
    fn test_add_and_get_source() {
        let (store, id) = store_with_source();

        let retrieved = store.get_source(id).unwrap().unwrap();
        assert_eq!(retrieved.url, URL);
        assert_eq!(retrieved.title, URL);
        assert_eq!(retrieved.account_id, AccountId(1));
        assert!(retrieved.last_fetched_at.is_none());
    }

    #[test]
    fn test_get_source_by_url_is_per_account() {
        let (store, _) = store_with_source();

        assert!(store.get_source_by_url(AccountId(1), URL).unwrap().is_some());
        assert!(store.get_source_by_url(AccountId(2), URL).unwrap().is_none());
        assert!(store
            .get_source_by_url(AccountId(1), "https://example.com/other.xml")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_list_sources_ordering() {
        let store = SqliteStore::in_memory().unwrap();
        for url in ["https://c.example/f", "https://a.example/f", "https://b.example/f"] {
            store.add_source(&Source::new(AccountId(1), url.into())).unwrap();
        }

        let urls: Vec<String> = store
            .list_sources()
            .unwrap()
            .into_iter()
            .map(|s| s.url)
            .collect();
        assert_eq!(
            urls,
            vec!["https://a.example/f", "https://b.example/f", "https://c.example/f"]
        );
    }

    #[test]
    fn test_list_due_selects_stale_and_never_fetched() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();

        let fresh = store
            .add_source(&Source::new(AccountId(1), "https://fresh.example/f".into()))
            .unwrap();
        let stale = store
            .add_source(&Source::new(AccountId(1), "https://stale.example/f".into()))
            .unwrap();
        let never = store
            .add_source(&Source::new(AccountId(1), "https://never.example/f".into()))
            .unwrap();

        store
            .update_fetch_status(fresh, Some(now - Duration::minutes(1)), None)
            .unwrap();
        store
            .update_fetch_status(stale, Some(now - Duration::hours(2)), None)
            .unwrap();

        let due = store.list_due(now - Duration::minutes(15), 10).unwrap();
        let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![never, stale]);

        let capped = store.list_due(now - Duration::minutes(15), 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, never);
    }

    #[test]
    fn test_update_metadata_partial() {
        let (store, id) = store_with_source();

        store
            .update_metadata(
                id,
                &SourceUpdate {
                    title: Some("Example".into()),
                    description: Some("About".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .update_metadata(
                id,
                &SourceUpdate {
                    site_url: Some("https://example.com".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let source = store.get_source(id).unwrap().unwrap();
        assert_eq!(source.title, "Example");
        assert_eq!(source.description.as_deref(), Some("About"));
        assert_eq!(source.site_url.as_deref(), Some("https://example.com"));
        assert_eq!(source.image_url, None);
    }

    #[test]
    fn test_fetch_status_failure_keeps_timestamp() {
        let (store, id) = store_with_source();
        let at = Utc::now() - Duration::hours(1);

        store.update_fetch_status(id, Some(at), None).unwrap();
        store
            .update_fetch_status(id, None, Some("connection refused"))
            .unwrap();

        let source = store.get_source(id).unwrap().unwrap();
        assert_eq!(source.fetch_error.as_deref(), Some("connection refused"));
        let stored = source.last_fetched_at.unwrap();
        assert_eq!(stored.timestamp_millis(), at.timestamp_millis());

        store.update_fetch_status(id, Some(Utc::now()), None).unwrap();
        let source = store.get_source(id).unwrap().unwrap();
        assert!(source.fetch_error.is_none());
        assert!(source.last_fetched_at.unwrap() > stored);
    }

    #[test]
    fn test_add_items_batch_and_dedup() {
        let (store, source_id) = store_with_source();

        let items: Vec<ContentItem> = (0..3)
            .map(|i| ContentItem::new(source_id, &format!("entry-{}", i)))
            .collect();

        assert_eq!(store.add_items(&items).unwrap(), 3);
        // Duplicate batch: INSERT OR IGNORE means 0 new rows
        assert_eq!(store.add_items(&items).unwrap(), 0);

        let stored = store.list_by_source(source_id, 100, 0).unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn test_add_duplicate_item_ignored() {
        let (store, source_id) = store_with_source();

        let mut item = ContentItem::new(source_id, "entry-1");
        item.title = Some("Original Title".into());
        assert!(store.add_item(&item).unwrap());

        let mut dup = ContentItem::new(source_id, "entry-1");
        dup.title = Some("Different Title".into());
        assert!(!store.add_item(&dup).unwrap());

        let retrieved = store.get_item_by_guid(source_id, "entry-1").unwrap().unwrap();
        assert_eq!(retrieved.title, Some("Original Title".into()));
    }

    #[test]
    fn test_same_guid_under_different_sources_is_distinct() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store
            .add_source(&Source::new(AccountId(1), "https://a.example/f".into()))
            .unwrap();
        let b = store
            .add_source(&Source::new(AccountId(1), "https://b.example/f".into()))
            .unwrap();

        assert!(store.add_item(&ContentItem::new(a, "shared")).unwrap());
        assert!(store.add_item(&ContentItem::new(b, "shared")).unwrap());
    }

    #[test]
    fn test_batch_and_single_path_race_collapse_to_one() {
        let (store, source_id) = store_with_source();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let item = ContentItem::new(source_id, "contested");
                    if i % 2 == 0 {
                        store.add_item(&item).map(usize::from).unwrap()
                    } else {
                        store.add_items(&[item]).unwrap()
                    }
                })
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 1);
        assert_eq!(store.list_by_source(source_id, 10, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_batch_commits_nothing() {
        let (store, source_id) = store_with_source();

        // The second item references a missing source and violates the
        // foreign key, which INSERT OR IGNORE does not swallow.
        let items = vec![
            ContentItem::new(source_id, "good-1"),
            ContentItem::new(source_id + 1000, "orphan"),
            ContentItem::new(source_id, "good-2"),
        ];

        assert!(store.add_items(&items).is_err());
        assert!(store.list_by_source(source_id, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_read_flags_and_unread_count() {
        let (store, source_id) = store_with_source();

        for i in 0..5 {
            store
                .add_item(&ContentItem::new(source_id, &format!("entry-{}", i)))
                .unwrap();
        }
        assert_eq!(store.count_unread(source_id).unwrap(), 5);

        let items = store.list_by_source(source_id, 10, 0).unwrap();
        store.set_read(&items[0].id, true).unwrap();
        store.set_read(&items[1].id, true).unwrap();
        assert_eq!(store.count_unread(source_id).unwrap(), 3);

        store.set_read(&items[0].id, false).unwrap();
        assert_eq!(store.count_unread(source_id).unwrap(), 4);

        assert_eq!(store.mark_all_read(source_id).unwrap(), 4);
        assert_eq!(store.count_unread(source_id).unwrap(), 0);
    }

    #[test]
    fn test_toggle_favorite() {
        let (store, source_id) = store_with_source();
        let item = ContentItem::new(source_id, "entry-1");
        store.add_item(&item).unwrap();

        assert!(store.toggle_favorite(&item.id).unwrap());
        assert!(store.get_item(&item.id).unwrap().unwrap().is_favorite);
        assert!(!store.toggle_favorite(&item.id).unwrap());
        assert!(!store.get_item(&item.id).unwrap().unwrap().is_favorite);
    }

    #[test]
    fn test_flags_on_missing_item() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.toggle_favorite("nope"),
            Err(FlowError::ItemNotFound(_))
        ));
        assert!(matches!(
            store.set_read("nope", true),
            Err(FlowError::ItemNotFound(_))
        ));
    }

    #[test]
    fn test_delete_source_cascades_items() {
        let (store, source_id) = store_with_source();

        let item = ContentItem::new(source_id, "entry-1");
        store.add_item(&item).unwrap();

        store.delete_source(source_id).unwrap();

        assert!(store.get_source(source_id).unwrap().is_none());
        assert!(store.get_item(&item.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_older_than() {
        let (store, source_id) = store_with_source();
        let now = Utc::now();

        let mut old = ContentItem::new(source_id, "old");
        old.created_at = now - Duration::days(45);
        let mut recent = ContentItem::new(source_id, "recent");
        recent.created_at = now - Duration::days(2);
        store.add_items(&[old.clone(), recent.clone()]).unwrap();

        assert_eq!(store.delete_older_than(now - Duration::days(30)).unwrap(), 1);
        assert!(store.get_item(&old.id).unwrap().is_none());
        assert!(store.get_item(&recent.id).unwrap().is_some());
    }

    #[test]
    fn test_list_by_source_pages() {
        let (store, source_id) = store_with_source();
        let base = Utc::now() - Duration::days(1);

        let items: Vec<ContentItem> = (0..5)
            .map(|i| {
                let mut item = ContentItem::new(source_id, &format!("entry-{}", i));
                item.published_at = Some(base + Duration::minutes(i));
                item
            })
            .collect();
        store.add_items(&items).unwrap();

        let page = store.list_by_source(source_id, 2, 1).unwrap();
        let guids: Vec<&str> = page.iter().map(|i| i.guid.as_str()).collect();
        assert_eq!(guids, vec!["entry-3", "entry-2"]);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowcast.db");

        let id = {
            let store = SqliteStore::new(&path).unwrap();
            store.add_source(&Source::new(AccountId(1), URL.into())).unwrap()
        };

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(reopened.get_source(id).unwrap().unwrap().url, URL);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_source(999).unwrap().is_none());
        assert!(store.get_item("nonexistent-id").unwrap().is_none());
        assert!(store.get_item_by_guid(1, "missing").unwrap().is_none());
    }
}
