//! Single-flight, concurrency-capped generation queue.
//!
//! The queue owns the only path to the provider. It keeps:
//! - a FIFO of pending keys (re-enqueuing a queued key is a no-op)
//! - the number of jobs in flight, never above `concurrency`; a job that
//!   panics still gives its slot back
//! - a rate-limit backoff deadline; nothing dispatches before it passes
//! - a billing halt reason; while set, every pending job is discarded
//!
//! State sits behind one short-lived lock that is never held across an
//! await, so each drain step is atomic with respect to other callers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tileforge_common::{ChunkKey, ChunkStatus, QueueStatus};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::job::{JobError, Worker};
use crate::provider::ProviderError;
use crate::store::ChunkUpdate;

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum jobs in flight
    pub concurrency: usize,
    /// Delay before new dispatches after a 429
    pub rate_limit_backoff: Duration,
    /// Upper bound on one job's wall time
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_limit_backoff: Duration::from_secs(60),
            job_timeout: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<ChunkKey>,
    active: usize,
    backoff_until: Option<Instant>,
    halt: Option<String>,
    recheck_scheduled: bool,
}

struct QueueInner {
    worker: Worker,
    config: QueueConfig,
    state: Mutex<QueueState>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the generation queue. Cheap to clone.
#[derive(Clone)]
pub struct GenerationQueue {
    inner: Arc<QueueInner>,
}

impl GenerationQueue {
    /// Creates an idle queue.
    pub fn new(worker: Worker, mut config: QueueConfig) -> Self {
        config.concurrency = config.concurrency.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(QueueInner {
                worker,
                config,
                state: Mutex::new(QueueState::default()),
                shutdown,
            }),
        }
    }

    /// Queues a job unless the same key is already waiting, then drains.
    pub fn enqueue(&self, key: ChunkKey) {
        {
            let mut state = self.inner.state.lock();
            if state.pending.contains(&key) {
                return;
            }
            info!(chunk = %key, depth = state.pending.len() + 1, "job enqueued");
            state.pending.push_back(key);
        }
        self.inner.drain();
    }

    /// Billing halt reason, if halted.
    #[must_use]
    pub fn halt_reason(&self) -> Option<String> {
        self.inner.state.lock().halt.clone()
    }

    /// Whether dispatch is halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.inner.state.lock().halt.is_some()
    }

    /// Clears a billing halt. Billing rows are removed by the caller.
    pub fn clear_halt(&self) {
        let previous = self.inner.state.lock().halt.take();
        if let Some(reason) = previous {
            info!("Billing halt cleared (was: {reason})");
        }
        self.inner.drain();
    }

    /// Snapshot for status reporting.
    #[must_use]
    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        let now = Instant::now();
        QueueStatus {
            api_error: state.halt.clone(),
            pending: state.pending.len(),
            active: state.active,
            backoff_remaining_ms: state
                .backoff_until
                .map_or(0, |until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }

    /// Signals in-flight jobs to abandon.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }
}

impl QueueInner {
    fn drain(self: &Arc<Self>) {
        let mut dispatch = Vec::new();
        let mut discarded = Vec::new();
        {
            let mut state = self.state.lock();
            if state.halt.is_some() {
                discarded.extend(state.pending.drain(..));
            } else {
                while state.active < self.config.concurrency && !state.pending.is_empty() {
                    if let Some(until) = state.backoff_until {
                        if Instant::now() < until {
                            if !state.recheck_scheduled {
                                state.recheck_scheduled = true;
                                let inner = Arc::clone(self);
                                tokio::spawn(async move {
                                    tokio::time::sleep_until(until).await;
                                    inner.state.lock().recheck_scheduled = false;
                                    inner.drain();
                                });
                            }
                            break;
                        }
                        state.backoff_until = None;
                    }
                    if let Some(key) = state.pending.pop_front() {
                        state.active += 1;
                        dispatch.push(key);
                    }
                }
            }
        }

        if !discarded.is_empty() {
            warn!("Generation halted; discarding {} queued jobs", discarded.len());
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                for key in discarded {
                    inner.persist(&key, ChunkStatus::BillingError).await;
                }
            });
        }

        for key in dispatch {
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let job = tokio::spawn({
                    let inner = Arc::clone(&inner);
                    let key = key.clone();
                    async move { inner.run_job(key).await }
                });
                if let Err(e) = job.await {
                    error!(chunk = %key, "Generation job aborted: {e}");
                    inner.fail_unfinished(&key).await;
                }
                inner.state.lock().active -= 1;
                inner.drain();
            });
        }
    }

    /// Marks a job that died without recording an outcome as failed.
    async fn fail_unfinished(&self, key: &ChunkKey) {
        match self.worker.store().get(key).await {
            Ok(Some(record)) if !record.status.is_terminal() => {
                self.persist(key, ChunkStatus::Error).await;
            },
            Ok(_) => {},
            Err(e) => error!(chunk = %key, "Failed to read chunk after abort: {e}"),
        }
    }

    async fn run_job(&self, key: ChunkKey) {
        let result = self
            .worker
            .generate_chunk(&key, self.config.job_timeout, self.shutdown.subscribe())
            .await;

        let error = match result {
            Ok(_) => return,
            Err(e) => e,
        };

        match &error {
            JobError::Provider(ProviderError::Billing(reason)) => {
                error!(chunk = %key, "Provider billing failure, halting generation: {reason}");
                self.state.lock().halt = Some(format!("Generation halted: {reason}"));
                self.persist(&key, ChunkStatus::BillingError).await;
            },
            JobError::Provider(ProviderError::RateLimited(reason)) => {
                let until = Instant::now() + self.config.rate_limit_backoff;
                warn!(
                    chunk = %key,
                    "Rate limited, pausing dispatch for {:?}: {reason}",
                    self.config.rate_limit_backoff
                );
                self.state.lock().backoff_until = Some(until);
                self.persist(&key, ChunkStatus::Error).await;
            },
            JobError::Cancelled => {
                info!(chunk = %key, "job abandoned at shutdown");
            },
            other => {
                warn!(chunk = %key, "Chunk generation failed: {other}");
                self.persist(&key, ChunkStatus::Error).await;
            },
        }
    }

    async fn persist(&self, key: &ChunkKey, status: ChunkStatus) {
        if let Err(e) = self
            .worker
            .store()
            .update(key, status, &ChunkUpdate::default())
            .await
        {
            error!(chunk = %key, "Failed to record {status}: {e}");
        }
    }
}
