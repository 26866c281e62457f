//! JSON payloads of the chunk HTTP API.
//!
//! Field names follow the wire format consumed by existing clients
//! (`spzUrl`, `apiError`), so a few fields are renamed explicitly.

use serde::{Deserialize, Serialize};

use crate::status::ChunkStatus;

/// Status reported by `GET /api/chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkRequestStatus {
    /// A new job was enqueued by this request.
    Started,
    /// A job is already in flight.
    Generating,
    /// Asset ready, see `spzUrl`.
    Completed,
    /// Last attempt failed; the next request retries.
    Error,
    /// Generation is halted for billing reasons.
    BillingError,
}

impl From<ChunkStatus> for ChunkRequestStatus {
    fn from(status: ChunkStatus) -> Self {
        match status {
            ChunkStatus::Generating => Self::Generating,
            ChunkStatus::Completed => Self::Completed,
            ChunkStatus::Error => Self::Error,
            ChunkStatus::BillingError => Self::BillingError,
        }
    }
}

/// Body of `GET /api/chunk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResponse {
    /// Current status
    pub status: ChunkRequestStatus,
    /// URL of the renderable asset once completed
    #[serde(rename = "spzUrl", default, skip_serializing_if = "Option::is_none")]
    pub spz_url: Option<String>,
}

impl ChunkResponse {
    /// A response carrying only a status.
    #[must_use]
    pub const fn status(status: ChunkRequestStatus) -> Self {
        Self {
            status,
            spz_url: None,
        }
    }

    /// A completed response.
    #[must_use]
    pub fn completed(spz_url: impl Into<String>) -> Self {
        Self {
            status: ChunkRequestStatus::Completed,
            spz_url: Some(spz_url.into()),
        }
    }
}

/// One entry of `GET /api/chunks/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStatusEntry {
    /// X coordinate
    pub x: i32,
    /// Y coordinate
    pub y: i32,
    /// Stored status
    pub status: ChunkStatus,
}

/// One entry of `GET /api/prompts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSummary {
    /// Prompt text
    pub prompt: String,
    /// Completed chunks under this prompt
    pub chunk_count: u64,
    /// RFC 3339 time of the latest completion
    pub last_used: String,
}

/// Body of `POST /api/chunks/reset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRequest {
    /// Only reset this prompt; all chunks when absent
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Body of `POST /api/chunks/reset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    /// Always true
    pub ok: bool,
}

/// Body of `POST /api/clear-error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearErrorResponse {
    /// Always true
    pub ok: bool,
    /// Remaining halt reason (always null after a clear)
    #[serde(rename = "apiError")]
    pub api_error: Option<String>,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Billing halt reason, if halted
    #[serde(rename = "apiError")]
    pub api_error: Option<String>,
    /// Jobs waiting for a worker slot
    pub pending: usize,
    /// Jobs currently running
    pub active: usize,
    /// Milliseconds until rate-limit backoff expires
    #[serde(rename = "backoffRemainingMs")]
    pub backoff_remaining_ms: u64,
}
