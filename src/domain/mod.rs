pub mod event;
pub mod item;
pub mod source;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use event::{Event, NewArticles, NEW_ARTICLES};
pub use item::{ContentItem, ParsedItem};
pub use source::{Source, SourceMeta, SourceUpdate};

/// Identity of the account that owns sources and live connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fetcher's normalized view of one upstream document.
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub meta: SourceMeta,
    pub items: Vec<ParsedItem>,
}
