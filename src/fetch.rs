//! Artifact retrieval
//!
//! Workflows never talk to the network directly. They go through a
//! [`Fetcher`], so tests and embedders can substitute their own transport.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{Error, Result};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the response body. Transport errors and
    /// non-success statuses are reported as [`Error::FetchFailed`].
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`Fetcher`] backed by a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tinfoil-verifier/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::FetchFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "GET");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::FetchFailed(format!("HTTP request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FetchFailed(format!(
                "HTTP {}: {} ({})",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error"),
                url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::FetchFailed(format!("Failed to read body from {}: {}", url, e)))?;

        Ok(body.to_vec())
    }
}
