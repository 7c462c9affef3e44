use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One entry as produced by the fetcher, before it belongs to a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ParsedItem {
    /// Pick the item guid: explicit id, then link, then title.
    pub fn derive_guid(id: Option<&str>, link: Option<&str>, title: Option<&str>) -> String {
        [id, link, title]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    }
}

/// A stored content item, unique per `(source_id, guid)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub source_id: i64,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub image_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(source_id: i64, guid: &str) -> Self {
        Self {
            id: Self::generate_id(source_id, guid),
            source_id,
            guid: guid.to_string(),
            title: None,
            link: None,
            content: None,
            summary: None,
            author: None,
            image_url: None,
            published_at: None,
            is_read: false,
            is_favorite: false,
            created_at: Utc::now(),
        }
    }

    pub fn from_parsed(source_id: i64, parsed: ParsedItem) -> Self {
        let mut item = Self::new(source_id, &parsed.guid);
        item.title = parsed.title;
        item.link = parsed.link;
        item.content = parsed.content;
        item.summary = parsed.summary;
        item.author = parsed.author;
        item.image_url = parsed.image_url;
        item.published_at = parsed.published_at;
        item
    }

    /// Generate a deterministic ID from the source id and guid
    pub fn generate_id(source_id: i64, guid: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source_id.to_be_bytes());
        hasher.update(guid.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation_deterministic() {
        let id1 = ContentItem::generate_id(1, "entry-123");
        let id2 = ContentItem::generate_id(1, "entry-123");
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_id_generation_different_inputs() {
        let id1 = ContentItem::generate_id(1, "entry-123");
        let id2 = ContentItem::generate_id(1, "entry-456");
        let id3 = ContentItem::generate_id(2, "entry-123");
        assert_ne!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_id_is_hex_sha256() {
        let id = ContentItem::generate_id(7, "entry-123");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_guid_prefers_explicit_id() {
        let guid = ParsedItem::derive_guid(
            Some("urn:entry:1"),
            Some("https://example.com/1"),
            Some("First"),
        );
        assert_eq!(guid, "urn:entry:1");
    }

    #[test]
    fn test_guid_falls_back_to_link_then_title() {
        assert_eq!(
            ParsedItem::derive_guid(Some(""), Some("https://example.com/1"), Some("First")),
            "https://example.com/1"
        );
        assert_eq!(ParsedItem::derive_guid(None, None, Some("First")), "First");
        assert_eq!(ParsedItem::derive_guid(None, Some("  "), None), "");
    }

    #[test]
    fn test_from_parsed_copies_fields() {
        let parsed = ParsedItem {
            guid: "g1".into(),
            title: Some("Title".into()),
            image_url: Some("https://example.com/a.png".into()),
            ..Default::default()
        };
        let item = ContentItem::from_parsed(3, parsed);
        assert_eq!(item.source_id, 3);
        assert_eq!(item.guid, "g1");
        assert_eq!(item.id, ContentItem::generate_id(3, "g1"));
        assert_eq!(item.display_title(), "Title");
        assert_eq!(item.image_url.as_deref(), Some("https://example.com/a.png"));
        assert!(!item.is_read);
    }
}
