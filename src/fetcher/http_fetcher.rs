use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;

use crate::app::{FlowError, Result};
use crate::domain::ParsedSource;
use crate::fetcher::SourceFetcher;
use crate::normalizer::Normalizer;

const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/feed+json, application/xml;q=0.9, */*;q=0.8";

pub struct HttpFetcher {
    client: Client,
    normalizer: Normalizer,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FEED_ACCEPT));

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("flowcast/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            normalizer: Normalizer::new(),
        })
    }

    async fn download(&self, url: &str, deadline: Duration) -> Result<Vec<u8>> {
        let response = self.client.get(url).timeout(deadline).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::HttpStatus(status.as_u16()));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, deadline: Duration) -> Result<ParsedSource> {
        url::Url::parse(url)?;

        let body = tokio::time::timeout(deadline, self.download(url, deadline))
            .await
            .map_err(|_| FlowError::Timeout(deadline))??;

        tracing::debug!(url, bytes = body.len(), "Downloaded source");

        self.normalizer.normalize(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_invalid_url() {
        let fetcher = HttpFetcher::new().unwrap();
        let result = fetcher.fetch("not a url", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(FlowError::InvalidUrl(_))));
    }
}
