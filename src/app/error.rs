use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status code: {0}")]
    HttpStatus(u16),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source not found: {0}")]
    SourceNotFound(i64),

    #[error("No source with URL {0}")]
    SourceUrlNotFound(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Distribution hub is not running")]
    HubUnavailable,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
