//! HTTP surface over the chunk store and generation queue.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tileforge_common::{
    parse_coordinate, ChunkCoord, ChunkKey, ChunkRequestStatus, ChunkResponse, ChunkStatus,
    ChunkStatusEntry, ClearErrorResponse, OkResponse, PromptSummary, QueueStatus, ResetRequest,
    TileforgeError,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::assets::{AssetError, AssetStore, ASSET_ROUTE};
use crate::queue::GenerationQueue;
use crate::store::{ChunkStore, StoreError};

/// Errors returned to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request parameters
    #[error(transparent)]
    Validation(#[from] TileforgeError),
    /// Provider credential missing
    #[error("Generation provider is not configured")]
    NotConfigured,
    /// Billing halt in effect
    #[error("{0}")]
    BillingHalted(String),
    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Asset failure
    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            Self::Validation(_) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            },
            Self::NotConfigured => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": message })))
                    .into_response()
            },
            Self::BillingHalted(_) => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({ "status": ChunkRequestStatus::BillingError, "error": message })),
            )
                .into_response(),
            Self::Store(_) | Self::Asset(_) => {
                warn!("Request failed: {message}");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message })))
                    .into_response()
            },
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Chunk records
    pub store: ChunkStore,
    /// Downloaded assets
    pub assets: AssetStore,
    /// Generation queue; `None` when no provider credential is set
    pub queue: Option<GenerationQueue>,
    /// Prompt used when a request omits one
    pub default_prompt: String,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let assets = ServeDir::new(state.assets.base_path());
    Router::new()
        .route("/api/chunk", get(get_chunk))
        .route("/api/chunks/status", get(list_statuses))
        .route("/api/prompts", get(list_prompts))
        .route("/api/chunks/reset", post(reset_chunks))
        .route("/api/clear-error", post(clear_error))
        .route("/api/status", get(queue_status))
        .nest_service(ASSET_ROUTE, assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ChunkQuery {
    x: Option<String>,
    y: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptQuery {
    prompt: Option<String>,
}

fn billing_message(queue: &GenerationQueue) -> String {
    queue
        .halt_reason()
        .unwrap_or_else(|| "Generation halted: billing error".to_string())
}

async fn get_chunk(
    State(state): State<AppState>,
    Query(query): Query<ChunkQuery>,
) -> ApiResult<Json<ChunkResponse>> {
    let x = parse_coordinate("x", query.x.as_deref().unwrap_or_default())?;
    let y = parse_coordinate("y", query.y.as_deref().unwrap_or_default())?;
    let prompt = query
        .prompt
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.default_prompt.clone());
    let key = ChunkKey::new(ChunkCoord::new(x, y), prompt);

    let existing = state.store.get(&key).await?;
    if let Some(record) = &existing {
        if record.status == ChunkStatus::Completed {
            if let Some(asset) = &record.asset_path {
                return Ok(Json(ChunkResponse::completed(AssetStore::public_url(asset))));
            }
        }
    }

    let queue = state.queue.as_ref().ok_or(ApiError::NotConfigured)?;
    if queue.is_halted() {
        return Err(ApiError::BillingHalted(billing_message(queue)));
    }

    if let Some(record) = existing {
        return match record.status {
            ChunkStatus::Generating => Ok(Json(ChunkResponse::status(record.status.into()))),
            ChunkStatus::BillingError => Err(ApiError::BillingHalted(billing_message(queue))),
            // A completed row without an asset is as good as failed.
            ChunkStatus::Error | ChunkStatus::Completed => {
                // The failure is reported once; the next request starts afresh.
                if state.store.delete_if_status(&key, record.status).await? {
                    info!(chunk = %key, "reported failed chunk, next request retries");
                }
                Ok(Json(ChunkResponse::status(ChunkRequestStatus::Error)))
            },
        };
    }

    if state.store.insert_if_absent(&key).await? {
        queue.enqueue(key);
        Ok(Json(ChunkResponse::status(ChunkRequestStatus::Started)))
    } else {
        Ok(Json(ChunkResponse::status(ChunkRequestStatus::Generating)))
    }
}

async fn list_statuses(
    State(state): State<AppState>,
    Query(query): Query<PromptQuery>,
) -> ApiResult<Json<Vec<ChunkStatusEntry>>> {
    let entries = state
        .store
        .list_statuses(query.prompt.as_deref())
        .await?
        .into_iter()
        .map(|(coord, status)| ChunkStatusEntry {
            x: coord.x,
            y: coord.y,
            status,
        })
        .collect();
    Ok(Json(entries))
}

async fn list_prompts(State(state): State<AppState>) -> ApiResult<Json<Vec<PromptSummary>>> {
    Ok(Json(state.store.list_prompt_summaries().await?))
}

async fn reset_chunks(
    State(state): State<AppState>,
    body: Option<Json<ResetRequest>>,
) -> ApiResult<Json<OkResponse>> {
    let prompt = body.and_then(|Json(req)| req.prompt);
    let removed = state.store.reset(prompt.as_deref()).await?;
    let mut files = 0;
    for asset in removed.iter().filter_map(|r| r.asset_path.as_deref()) {
        if state.assets.delete(asset).await? {
            files += 1;
        }
    }
    info!(
        prompt = prompt.as_deref().unwrap_or("<all>"),
        "Reset {} chunks ({files} asset files)",
        removed.len()
    );
    Ok(Json(OkResponse { ok: true }))
}

async fn clear_error(State(state): State<AppState>) -> ApiResult<Json<ClearErrorResponse>> {
    if let Some(queue) = &state.queue {
        queue.clear_halt();
    }
    let removed = state.store.delete_by_status(ChunkStatus::BillingError).await?;
    info!("Cleared billing error ({removed} chunk rows removed)");
    Ok(Json(ClearErrorResponse {
        ok: true,
        api_error: None,
    }))
}

async fn queue_status(State(state): State<AppState>) -> Json<QueueStatus> {
    Json(state.queue.as_ref().map_or(
        QueueStatus {
            api_error: None,
            pending: 0,
            active: 0,
            backoff_remaining_ms: 0,
        },
        GenerationQueue::status,
    ))
}
