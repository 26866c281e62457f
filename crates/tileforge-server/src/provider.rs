//! Client for the external world-generation service.
//!
//! The service is slow (tens of seconds per world), billed per call and rate
//! limited. Every failure is classified here so the queue can decide between
//! halting, backing off and simply marking the chunk for retry.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Header carrying the provider credential.
pub const API_KEY_HEADER: &str = "WLT-Api-Key";

/// Splat variants preferred over full resolution, smallest last.
pub const REDUCED_VARIANTS: [&str; 2] = ["500k", "100k"];

/// Full resolution splat variant.
pub const FULL_RES_VARIANT: &str = "full_res";

/// Classified provider failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Account-level payment failure; never retried automatically.
    #[error("Billing error: {0}")]
    Billing(String),
    /// HTTP 429.
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// Network failure, 5xx, or a failed operation.
    #[error("Transient provider error: {0}")]
    Transient(String),
    /// Response did not have the expected shape.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
    /// Operation completed without a usable splat URL.
    #[error("Provider returned no asset for operation {0}")]
    MissingAsset(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Transient(e.to_string())
        }
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Maps an unsuccessful HTTP status and body to a failure class.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("HTTP {status}: {body}");
    match status {
        StatusCode::PAYMENT_REQUIRED => ProviderError::Billing(detail),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(detail),
        _ if mentions_billing(body) => ProviderError::Billing(detail),
        _ => ProviderError::Transient(detail),
    }
}

fn mentions_billing(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["billing", "payment", "insufficient credit", "insufficient funds"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Base64 image used to bias generation toward a neighbour's look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSeed {
    /// Encoded image bytes
    pub data_base64: String,
    /// Image format extension
    pub extension: &'static str,
}

/// Poll result of a generation operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationStatus {
    /// Whether the operation finished
    #[serde(default)]
    pub done: bool,
    /// Error payload when the operation failed
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    /// Generated world once done
    #[serde(default)]
    pub response: Option<WorldResponse>,
}

/// Generated world description.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldResponse {
    /// Provider world id
    #[serde(default)]
    pub id: Option<String>,
    /// Downloadable assets
    #[serde(default)]
    pub assets: Option<WorldAssets>,
}

/// Assets of a generated world.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorldAssets {
    /// Gaussian splat files
    #[serde(default)]
    pub splats: Option<SplatAssets>,
    /// Panorama imagery
    #[serde(default)]
    pub imagery: Option<ImageryAssets>,
}

/// Splat variants by resolution name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplatAssets {
    /// Variant name to URL
    #[serde(default)]
    pub spz_urls: BTreeMap<String, String>,
}

/// Imagery assets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageryAssets {
    /// Equirectangular panorama
    #[serde(default)]
    pub pano_url: Option<String>,
}

impl OperationStatus {
    /// Provider world id, if reported.
    #[must_use]
    pub fn world_id(&self) -> Option<&str> {
        self.response.as_ref()?.id.as_deref()
    }

    /// Preferred asset URL: a reduced variant, else full resolution, else any.
    #[must_use]
    pub fn asset_url(&self) -> Option<&str> {
        let urls = &self.response.as_ref()?.assets.as_ref()?.splats.as_ref()?.spz_urls;
        REDUCED_VARIANTS
            .iter()
            .chain(std::iter::once(&FULL_RES_VARIANT))
            .find_map(|variant| urls.get(*variant))
            .or_else(|| urls.values().next())
            .map(String::as_str)
    }

    /// Panorama URL, if reported.
    #[must_use]
    pub fn panorama_url(&self) -> Option<&str> {
        self.response
            .as_ref()?
            .assets
            .as_ref()?
            .imagery
            .as_ref()?
            .pano_url
            .as_deref()
    }

    /// Classifies the embedded error, if any.
    #[must_use]
    pub fn failure(&self) -> Option<ProviderError> {
        let error = self.error.as_ref()?;
        if error.is_null() {
            return None;
        }
        let message = error
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        let code = error.get("code").and_then(serde_json::Value::as_u64);
        Some(match code {
            Some(402) => ProviderError::Billing(message),
            Some(429) => ProviderError::RateLimited(message),
            _ if mentions_billing(&message) => ProviderError::Billing(message),
            _ => ProviderError::Transient(message),
        })
    }
}

/// The external generation service.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Starts generating a world and returns the operation handle.
    async fn start_generation(
        &self,
        prompt: &str,
        seed: Option<&ImageSeed>,
    ) -> ProviderResult<String>;

    /// Fetches the current state of an operation.
    async fn poll_operation(&self, operation_id: &str) -> ProviderResult<OperationStatus>;

    /// Downloads a URL returned by the provider (asset or panorama).
    async fn download(&self, url: &str) -> ProviderResult<Bytes>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    display_name: &'a str,
    world_prompt: WorldPrompt<'a>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorldPrompt<'a> {
    Text {
        text_prompt: &'a str,
    },
    Image {
        text_prompt: &'a str,
        image_prompt: ImagePrompt<'a>,
    },
}

#[derive(Serialize)]
struct ImagePrompt<'a> {
    source: &'static str,
    data_base64: &'a str,
    extension: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(alias = "id")]
    operation_id: String,
}

/// HTTP implementation of [`GenerationProvider`].
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    /// Creates a provider client.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn check(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    async fn start_generation(
        &self,
        prompt: &str,
        seed: Option<&ImageSeed>,
    ) -> ProviderResult<String> {
        let world_prompt = match seed {
            Some(seed) => WorldPrompt::Image {
                text_prompt: prompt,
                image_prompt: ImagePrompt {
                    source: "data_base64",
                    data_base64: &seed.data_base64,
                    extension: seed.extension,
                },
            },
            None => WorldPrompt::Text {
                text_prompt: prompt,
            },
        };
        let body = GenerateRequest {
            display_name: prompt,
            world_prompt,
        };

        let response = self
            .client
            .post(format!("{}/worlds:generate", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let started: GenerateResponse = Self::check(response).await?.json().await?;
        debug!(operation = %started.operation_id, seeded = seed.is_some(), "generation started");
        Ok(started.operation_id)
    }

    async fn poll_operation(&self, operation_id: &str) -> ProviderResult<OperationStatus> {
        let response = self
            .client
            .get(format!("{}/operations/{operation_id}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn download(&self, url: &str) -> ProviderResult<Bytes> {
        let response = self.client.get(url).send().await?;
        Ok(Self::check(response).await?.bytes().await?)
    }
}
