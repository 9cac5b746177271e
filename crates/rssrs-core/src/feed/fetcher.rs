use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Proxy};
use url::Url;

use super::parser::{parse_feed, ParsedFeed};
use crate::config::AppConfig;
use crate::{Error, Result};

const MAX_FEED_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("rssrs/", env!("CARGO_PKG_VERSION"));

/// How outgoing feed requests reach the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    /// Use proxies from the environment
    System,
    /// Connect directly, ignoring environment proxies
    Direct,
    /// Route everything through the given proxy URL
    Url(String),
}

impl ProxyMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "" | "system" | "sys" => Ok(Self::System),
            "none" | "direct" => Ok(Self::Direct),
            other => {
                Url::parse(other)
                    .map_err(|e| Error::Config(format!("Invalid proxy URL '{}': {}", other, e)))?;
                Ok(Self::Url(other.to_string()))
            }
        }
    }
}

/// Feed fetcher with a configured HTTP client
pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    /// Create a new feed fetcher with configuration
    pub fn new(config: &AppConfig) -> Result<Self> {
        let proxy = ProxyMode::parse(&config.sync.proxy)?;
        let client = Self::build_client(config.sync.request_timeout_secs, &proxy)?;
        Ok(Self { client })
    }

    fn build_client(timeout_secs: u64, proxy: &ProxyMode) -> Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/rss+xml,application/atom+xml,application/xml;q=0.9,text/xml;q=0.8,*/*;q=0.5",
            ),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10));

        match proxy {
            ProxyMode::System => {}
            ProxyMode::Direct => {
                builder = builder.no_proxy();
            }
            ProxyMode::Url(url) => {
                let proxy = Proxy::all(url)
                    .map_err(|e| Error::Config(format!("Invalid proxy URL: {}", e)))?;
                builder = builder.proxy(proxy);
                tracing::info!("Using proxy for feed fetching");
            }
        }

        Ok(builder.build()?)
    }

    /// Fetch and parse a feed from URL
    pub async fn fetch(&self, url: &str, feed_id: i64) -> Result<ParsedFeed> {
        let url = Url::parse(url)?;

        tracing::debug!("Fetching feed from: {}", url);

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::FeedParse(format!("HTTP {} for URL: {}", status, url)));
        }

        let content = response.bytes().await?;
        if content.len() > MAX_FEED_BYTES {
            return Err(Error::FeedParse(format!(
                "Feed too large ({} bytes) for URL: {}",
                content.len(),
                url
            )));
        }

        parse_feed(&content, feed_id)
    }
}
