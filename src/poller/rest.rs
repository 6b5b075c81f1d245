//! REST snapshot fetcher for the fallback poller.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::SnapshotFetcher;
use crate::config::{FeedKind, SyncConfig};
use crate::subscription::SubscriptionKey;

/// `GET {url}?symbol=..&expiry=..` (or `&interval=..` for charts).
#[derive(Debug, Clone)]
pub struct RestSnapshotFetcher {
    client: Client,
    url: String,
    feed: FeedKind,
}

impl RestSnapshotFetcher {
    pub fn new(url: impl Into<String>, feed: FeedKind, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            feed,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            config.rest_url.clone(),
            config.feed,
            Duration::from_millis(config.poll.request_timeout_ms),
        )
    }
}

#[async_trait]
impl SnapshotFetcher for RestSnapshotFetcher {
    async fn fetch(&self, key: &SubscriptionKey) -> Result<Value> {
        debug!(url = %self.url, subscription = %key, "polling snapshot");

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("symbol", key.symbol.as_str()),
                (self.feed.selector_param(), key.selector.as_str()),
            ])
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("API error {}: {}", status, text);
        }

        response
            .json::<Value>()
            .await
            .context("Failed to parse snapshot response")
    }
}
