//! Execution of a single chunk generation job.
//!
//! A job is an explicit state machine:
//!
//! ```text
//! Seeding -> Starting -> Polling (repeats) -> Downloading -> Done
//! ```
//!
//! Each transition is one awaited step. The driver races every step against
//! the job deadline and the queue's shutdown signal, so a stuck provider can
//! neither hang a worker slot forever nor block shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tileforge_common::{ChunkKey, ChunkStatus};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info};

use crate::assets::{AssetError, AssetStore};
use crate::provider::{GenerationProvider, ImageSeed, ProviderError};
use crate::seeder::ContinuitySeeder;
use crate::store::{ChunkStore, ChunkUpdate, StoreError};

/// Errors that end a job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Classified provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Store write failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Asset write failed
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
    /// Job ran past its deadline
    #[error("Job exceeded its deadline of {0:?}")]
    Timeout(Duration),
    /// Queue is shutting down
    #[error("Job cancelled by shutdown")]
    Cancelled,
}

/// Result type for jobs.
pub type JobResult<T> = Result<T, JobError>;

/// Fields persisted when a job completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedChunk {
    /// Provider operation handle
    pub operation_id: String,
    /// Provider world id
    pub world_id: Option<String>,
    /// Asset file name
    pub asset_path: String,
    /// Panorama URL
    pub panorama_url: Option<String>,
}

/// Where a job currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    /// Looking for a neighbour seed.
    Seeding,
    /// Calling start-generation.
    Starting {
        /// Optional continuity seed
        seed: Option<ImageSeed>,
    },
    /// Waiting on the provider.
    Polling {
        /// Operation handle
        operation_id: String,
        /// Polls made so far
        attempts: u32,
    },
    /// Fetching the asset.
    Downloading {
        /// Operation handle
        operation_id: String,
        /// Provider world id
        world_id: Option<String>,
        /// Selected splat URL
        asset_url: String,
        /// Panorama URL
        panorama_url: Option<String>,
    },
    /// Persisted as completed.
    Done(CompletedChunk),
}

/// Everything a job needs from the outside world.
#[derive(Clone)]
pub struct Worker {
    store: ChunkStore,
    provider: Arc<dyn GenerationProvider>,
    assets: AssetStore,
    seeder: ContinuitySeeder,
    poll_interval: Duration,
}

impl Worker {
    /// Creates a worker.
    pub fn new(
        store: ChunkStore,
        provider: Arc<dyn GenerationProvider>,
        assets: AssetStore,
        poll_interval: Duration,
    ) -> Self {
        let seeder = ContinuitySeeder::new(store.clone(), Arc::clone(&provider));
        Self {
            store,
            provider,
            assets,
            seeder,
            poll_interval,
        }
    }

    /// The store this worker writes to.
    #[must_use]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Advances a job by one transition.
    pub async fn step(&self, key: &ChunkKey, phase: JobPhase) -> JobResult<JobPhase> {
        match phase {
            JobPhase::Seeding => Ok(JobPhase::Starting {
                seed: self.seeder.seed_for(key).await,
            }),
            JobPhase::Starting { seed } => {
                let operation_id = self
                    .provider
                    .start_generation(&key.prompt, seed.as_ref())
                    .await?;
                self.store
                    .update(
                        key,
                        ChunkStatus::Generating,
                        &ChunkUpdate {
                            operation_id: Some(operation_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(
                    chunk = %key,
                    operation = %operation_id,
                    seeded = seed.is_some(),
                    "generation started"
                );
                Ok(JobPhase::Polling {
                    operation_id,
                    attempts: 0,
                })
            },
            JobPhase::Polling {
                operation_id,
                attempts,
            } => {
                let status = self.provider.poll_operation(&operation_id).await?;
                if let Some(failure) = status.failure() {
                    return Err(failure.into());
                }
                if !status.done {
                    debug!(chunk = %key, operation = %operation_id, attempts, "still generating");
                    sleep(self.poll_interval).await;
                    return Ok(JobPhase::Polling {
                        operation_id,
                        attempts: attempts + 1,
                    });
                }
                let asset_url = status
                    .asset_url()
                    .ok_or_else(|| ProviderError::MissingAsset(operation_id.clone()))?
                    .to_string();
                Ok(JobPhase::Downloading {
                    world_id: status.world_id().map(str::to_string),
                    panorama_url: status.panorama_url().map(str::to_string),
                    operation_id,
                    asset_url,
                })
            },
            JobPhase::Downloading {
                operation_id,
                world_id,
                asset_url,
                panorama_url,
            } => {
                let bytes = self.provider.download(&asset_url).await?;
                let asset_path = AssetStore::file_name(key);
                self.assets.write(&asset_path, &bytes).await?;
                self.store
                    .update(
                        key,
                        ChunkStatus::Completed,
                        &ChunkUpdate {
                            operation_id: Some(operation_id.clone()),
                            world_id: world_id.clone(),
                            asset_path: Some(asset_path.clone()),
                            panorama_url: panorama_url.clone(),
                        },
                    )
                    .await?;
                info!(chunk = %key, bytes = bytes.len(), "chunk completed");
                Ok(JobPhase::Done(CompletedChunk {
                    operation_id,
                    world_id,
                    asset_path,
                    panorama_url,
                }))
            },
            done @ JobPhase::Done(_) => Ok(done),
        }
    }

    /// Runs a job to completion, bounded by `deadline` and `shutdown`.
    pub async fn generate_chunk(
        &self,
        key: &ChunkKey,
        timeout: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JobResult<CompletedChunk> {
        let deadline = Instant::now() + timeout;
        let mut phase = JobPhase::Seeding;
        loop {
            if let JobPhase::Done(done) = phase {
                return Ok(done);
            }
            phase = tokio::select! {
                biased;
                () = cancelled(&mut shutdown) => return Err(JobError::Cancelled),
                () = sleep_until(deadline) => return Err(JobError::Timeout(timeout)),
                next = self.step(key, phase) => next?,
            };
        }
    }
}

/// Resolves once the shutdown flag is raised; never if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
