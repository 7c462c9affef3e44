use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AccountId;

/// A polled external feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub account_id: AccountId,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub image_url: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub fetch_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    /// A not-yet-stored source. The URL doubles as the title until the
    /// first successful fetch learns a real one.
    pub fn new(account_id: AccountId, url: String) -> Self {
        Self {
            id: 0,
            account_id,
            title: url.clone(),
            url,
            description: None,
            site_url: None,
            image_url: None,
            last_fetched_at: None,
            fetch_error: None,
            created_at: Utc::now(),
        }
    }

    /// True while the title is still the placeholder assigned at creation.
    pub fn has_placeholder_title(&self) -> bool {
        self.title.is_empty() || self.title == self.url
    }
}

/// Descriptive metadata written back after a successful fetch.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub image_url: Option<String>,
}

/// Metadata learned from the upstream document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_url: Option<String>,
    pub image_url: Option<String>,
}

impl SourceMeta {
    /// Build the update for `source`, keeping a title that was already
    /// learned or edited by the user.
    pub fn to_update(&self, source: &Source) -> SourceUpdate {
        let title = if source.has_placeholder_title() {
            self.title.clone().filter(|t| !t.trim().is_empty())
        } else {
            None
        };

        SourceUpdate {
            title,
            description: self.description.clone(),
            site_url: self.site_url.clone(),
            image_url: self.image_url.clone(),
        }
    }
}
