use chrono::Utc;
use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;
use html_escape::decode_html_entities;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app::{FlowError, Result};
use crate::domain::{ParsedItem, ParsedSource, SourceMeta};

static FIRST_IMG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("img regex")
});

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Parse RSS, Atom or JSON Feed bytes into source metadata and items.
    pub fn normalize(&self, body: &[u8]) -> Result<ParsedSource> {
        // An empty generated id lets the guid fallback chain see which
        // entries really lacked one.
        let feed = parser::Builder::new()
            .id_generator(|_, _, _| String::new())
            .build()
            .parse(body)
            .map_err(|e| FlowError::FeedParse(e.to_string()))?;

        let meta = Self::meta(&feed);
        let items = feed.entries.into_iter().map(Self::item).collect();

        Ok(ParsedSource { meta, items })
    }

    fn meta(feed: &Feed) -> SourceMeta {
        SourceMeta {
            title: feed
                .title
                .as_ref()
                .map(|t| decode_html_entities(&t.content).trim().to_string()),
            description: feed
                .description
                .as_ref()
                .map(|d| decode_html_entities(&d.content).trim().to_string()),
            site_url: alternate_link(&feed.links),
            image_url: feed
                .logo
                .as_ref()
                .or(feed.icon.as_ref())
                .map(|image| image.uri.clone()),
        }
    }

    fn item(entry: Entry) -> ParsedItem {
        let title = entry
            .title
            .as_ref()
            .map(|t| decode_html_entities(&t.content).trim().to_string());
        let link = alternate_link(&entry.links);
        let guid = ParsedItem::derive_guid(Some(&entry.id), link.as_deref(), title.as_deref());
        let image_url = find_image(&entry);

        ParsedItem {
            guid,
            title,
            link,
            content: entry.content.and_then(|c| c.body),
            summary: entry.summary.map(|s| s.content),
            author: entry
                .authors
                .first()
                .map(|a| decode_html_entities(&a.name).to_string()),
            image_url,
            published_at: entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// The page link: first `alternate` (or unlabeled) link, else the first link.
fn alternate_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

/// Image-typed enclosure or media content, then a media thumbnail, then the
/// first `<img>` in the body.
fn find_image(entry: &Entry) -> Option<String> {
    let enclosure = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find(|c| {
            c.content_type
                .as_ref()
                .is_some_and(|t| t.ty() == "image")
        })
        .and_then(|c| c.url.as_ref())
        .map(|u| u.to_string());

    if enclosure.is_some() {
        return enclosure;
    }

    let thumbnail = entry
        .media
        .iter()
        .flat_map(|m| m.thumbnails.iter())
        .map(|t| t.image.uri.clone())
        .find(|uri| !uri.is_empty());

    if thumbnail.is_some() {
        return thumbnail;
    }

    let html = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .or(entry.summary.as_ref().map(|s| s.content.as_str()))?;

    first_image_src(html)
}

fn first_image_src(html: &str) -> Option<String> {
    FIRST_IMG
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| decode_html_entities(m.as_str()).to_string())
}
