//! P2P network client.
//!
//! The network itself is reached through a local gateway daemon that keeps the
//! peer session and exposes search and transfer over HTTP.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A file offered by a peer in answer to a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedFile {
    /// Remote path, with the peer's own separators
    pub filename: String,
    pub size: u64,
    /// Kbps, when the peer reports it
    #[serde(default)]
    pub bit_rate: Option<u32>,
}

/// One peer's answer to a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub peer: String,
    #[serde(default)]
    pub has_free_slot: bool,
    /// Bytes per second
    #[serde(default)]
    pub upload_speed: u64,
    #[serde(default)]
    pub files: Vec<SharedFile>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait P2pNetwork: Send + Sync {
    async fn connect(&self, username: &str, password: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn search(&self, query: &str, timeout: Duration) -> Result<Vec<SearchResponse>>;

    /// Open a transfer. Resolves once the peer started sending.
    async fn download(&self, peer: &str, path: &str) -> Result<ByteStream>;
}

pub struct HttpP2pGateway {
    http_client: Client,
    base_url: String,
}

impl HttpP2pGateway {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl P2pNetwork for HttpP2pGateway {
    async fn connect(&self, username: &str, password: &str) -> Result<()> {
        self.http_client
            .post(format!("{}/api/session", self.base_url))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?
            .error_for_status()
            .context("P2P gateway refused the session")?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.http_client
            .delete(format!("{}/api/session", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn search(&self, query: &str, timeout: Duration) -> Result<Vec<SearchResponse>> {
        let response = self
            .http_client
            .post(format!("{}/api/searches", self.base_url))
            .json(&serde_json::json!({
                "query": query,
                "timeout_ms": timeout.as_millis() as u64,
            }))
            // The gateway collects responses for the whole search window.
            .timeout(timeout + Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn download(&self, peer: &str, path: &str) -> Result<ByteStream> {
        let response = self
            .http_client
            .get(format!("{}/api/transfers", self.base_url))
            .query(&[("peer", peer), ("path", path)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes_stream().map_err(anyhow::Error::from).boxed())
    }
}
