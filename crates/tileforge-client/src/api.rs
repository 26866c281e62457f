//! Chunk API client.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::Deserialize;
use tileforge_common::{ChunkKey, ChunkResponse, ClearErrorResponse, QueueStatus};
use tracing::debug;

use crate::error::{LoadError, LoadResult};

/// Server operations the streaming client depends on.
#[async_trait]
pub trait ChunkApi: Send + Sync + 'static {
    /// Requests a chunk, starting generation when none exists.
    ///
    /// A billing halt is reported as [`LoadError::Billing`].
    async fn request_chunk(&self, key: &ChunkKey) -> LoadResult<ChunkResponse>;

    /// Downloads a completed chunk's asset.
    async fn fetch_asset(&self, url: &str) -> LoadResult<Bytes>;

    /// Server queue snapshot, including any halt reason.
    async fn queue_status(&self) -> LoadResult<QueueStatus>;

    /// Clears a server-side billing halt.
    async fn clear_error(&self) -> LoadResult<()>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// [`ChunkApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChunkApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChunkApi {
    /// Creates a client for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> LoadResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolves a server-relative asset URL.
    #[must_use]
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            url.to_string()
        }
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| format!("{status}: {text}"))
    }
}

#[async_trait]
impl ChunkApi for HttpChunkApi {
    async fn request_chunk(&self, key: &ChunkKey) -> LoadResult<ChunkResponse> {
        let mut query = vec![("x", key.x().to_string()), ("y", key.y().to_string())];
        if !key.prompt.is_empty() {
            query.push(("prompt", key.prompt.clone()));
        }
        let response = self
            .client
            .get(format!("{}/api/chunk", self.base_url))
            .query(&query)
            .send()
            .await?;

        match response.status() {
            StatusCode::PAYMENT_REQUIRED => {
                Err(LoadError::Billing(Self::error_message(response).await))
            },
            status if status.is_success() => {
                let body = response.json::<ChunkResponse>().await?;
                debug!(chunk = %key, "chunk status {:?}", body.status);
                Ok(body)
            },
            _ => Err(LoadError::Transport(Self::error_message(response).await)),
        }
    }

    async fn fetch_asset(&self, url: &str) -> LoadResult<Bytes> {
        let response = self.client.get(self.resolve(url)).send().await?;
        if !response.status().is_success() {
            return Err(LoadError::Transport(Self::error_message(response).await));
        }
        Ok(response.bytes().await?)
    }

    async fn queue_status(&self) -> LoadResult<QueueStatus> {
        let response = self
            .client
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn clear_error(&self) -> LoadResult<()> {
        let response = self
            .client
            .post(format!("{}/api/clear-error", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let body: ClearErrorResponse = response.json().await?;
        if body.ok {
            Ok(())
        } else {
            Err(LoadError::Transport(
                body.api_error.unwrap_or_else(|| "clear-error refused".to_string()),
            ))
        }
    }
}
