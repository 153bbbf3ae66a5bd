//! HTTP page fetcher.
//!
//! Plain reqwest GET with a timeout, a fixed user agent and at most five
//! redirects. No JavaScript rendering: pages that build their content
//! client-side should be monitored through an API URL instead.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use sitewatch_core::traits::PageFetcher;
use sitewatch_core::WatchError;

use crate::config::FetchConfig;

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> sitewatch_core::Result<String> {
        tracing::debug!(url, "fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WatchError::fetch(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::fetch(format!("HTTP {} for {}", status, url)));
        }

        response
            .text()
            .await
            .map_err(|e| WatchError::fetch(format!("failed to read body of {}: {}", url, e)))
    }
}
