//! Per-chunk load routine: request, poll until ready, instantiate.

use bytes::Bytes;
use glam::Vec3;
use std::time::Duration;
use tileforge_common::{ChunkCoord, ChunkKey, ChunkRequestStatus};
use tracing::{debug, info};

use crate::api::ChunkApi;
use crate::config::ClientConfig;
use crate::error::{LoadError, LoadResult};

/// A scene object backed by one chunk's asset.
pub trait Renderable: Send + 'static {
    /// Applies the current fade value in `[0, 1]`.
    fn set_opacity(&mut self, opacity: f32);

    /// Shows or hides the object.
    fn set_visible(&mut self, visible: bool);

    /// Frees any resources held by the object.
    fn release(&mut self) {}
}

/// Builds renderables from downloaded assets.
pub trait RenderableFactory: Send + Sync + 'static {
    /// Object produced for each chunk
    type Output: Renderable;

    /// Turns asset bytes into an object placed at `position`.
    fn instantiate(
        &self,
        coord: ChunkCoord,
        asset: Bytes,
        position: Vec3,
    ) -> LoadResult<Self::Output>;
}

/// Loads single chunks through a [`ChunkApi`].
pub struct ChunkLoader<A, F> {
    api: A,
    factory: F,
    tile_size: f32,
    poll_interval: Duration,
    max_attempts: u32,
}

impl<A: ChunkApi, F: RenderableFactory> ChunkLoader<A, F> {
    /// Creates a loader.
    pub fn new(api: A, factory: F, config: &ClientConfig) -> Self {
        Self {
            api,
            factory,
            tile_size: config.tile_size,
            poll_interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts.max(1),
        }
    }

    /// The underlying API client.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Requests `key`, waits for it to complete, downloads and instantiates it.
    pub async fn load_chunk(&self, key: &ChunkKey) -> LoadResult<F::Output> {
        let url = self.wait_until_ready(key).await?;
        let asset = self.api.fetch_asset(&url).await?;
        let size = asset.len();
        let position = key.coord.world_center(self.tile_size);
        let renderable = self.factory.instantiate(key.coord, asset, position)?;
        info!(chunk = %key, bytes = size, "Chunk loaded");
        Ok(renderable)
    }

    /// Polls the chunk endpoint until it yields an asset URL.
    pub async fn wait_until_ready(&self, key: &ChunkKey) -> LoadResult<String> {
        for attempt in 1..=self.max_attempts {
            let response = self.api.request_chunk(key).await?;
            match response.status {
                ChunkRequestStatus::Completed => {
                    return response.spz_url.ok_or_else(|| {
                        LoadError::Generation(format!("{key} completed without an asset URL"))
                    });
                },
                ChunkRequestStatus::BillingError => {
                    return Err(LoadError::Billing("generation halted".to_string()));
                },
                ChunkRequestStatus::Error => {
                    return Err(LoadError::Generation(format!(
                        "server reported an error for {key}"
                    )));
                },
                ChunkRequestStatus::Started | ChunkRequestStatus::Generating => {
                    debug!(chunk = %key, attempt, "Chunk not ready");
                },
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        Err(LoadError::Timeout {
            attempts: self.max_attempts,
        })
    }
}
