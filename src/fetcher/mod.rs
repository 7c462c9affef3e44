pub mod http_fetcher;

use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;
use crate::domain::ParsedSource;

pub use http_fetcher::HttpFetcher;

/// Retrieves one upstream document and normalizes it.
///
/// Implementations must give up once `deadline` has elapsed.
#[async_trait]
pub trait SourceFetcher {
    async fn fetch(&self, url: &str, deadline: Duration) -> Result<ParsedSource>;
}
