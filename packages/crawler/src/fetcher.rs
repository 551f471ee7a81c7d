//! Page fetcher: the default, in-scope implementation of the "render
//! target URL" primitive. The browser-automation rendering itself is an
//! opaque external collaborator; this crate satisfies the contract with a
//! plain HTTP GET plus a `scraper`-based HTML parse rather than a headless
//! browser.

use async_trait::async_trait;
use scraper::Html;

use crate::error::CrawlerError;

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;

/// A fetched and parsed page, handed to the per-job-type extractor.
pub struct FetchedPage {
    pub final_url: String,
    pub status: u16,
    pub document: Html,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CrawlerError>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
                .user_agent("datashelf-crawler/0.1")
                .build()
                .expect("reqwest client config is static and known-valid"),
        }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, CrawlerError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CrawlerError::Fetch { url: url.to_string(), source })?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();

        if status >= 500 {
            return Err(CrawlerError::Transient(format!("{url} returned {status}")));
        }
        if status >= 400 {
            return Err(CrawlerError::Validation(format!("{url} returned {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|source| CrawlerError::Fetch { url: url.to_string(), source })?;

        Ok(FetchedPage {
            final_url,
            status,
            document: Html::parse_document(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_document() {
        let html = Html::parse_document("<html><body><h1>Widgets</h1></body></html>");
        let selector = scraper::Selector::parse("h1").unwrap();
        let text: String = html.select(&selector).next().unwrap().text().collect();
        assert_eq!(text, "Widgets");
    }
}
