//! Spatial cache of resident chunks.
//!
//! Each frame the manager:
//! - Applies finished loads
//! - Requests the viewer's chunk, the active square around it and the
//!   predicted look-ahead set
//! - Moves every resident chunk's fade toward the target for its distance
//! - Purges chunks beyond the cached radius
//!
//! Zones form two rings around the viewer: `active` chunks are fully
//! visible, `cached` chunks stay resident at zero opacity so walking back
//! does not refetch them. The zone label only flips once the fade has
//! settled, which keeps a viewer lingering on a ring boundary from
//! flickering.

use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use glam::Vec3;
use tileforge_common::{ChunkCoord, ChunkKey};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::ChunkApi;
use crate::config::ClientConfig;
use crate::error::LoadResult;
use crate::loader::{ChunkLoader, Renderable, RenderableFactory};
use crate::prefetch::PredictiveFetcher;

/// Fade above which a chunk is drawn.
pub const VISIBILITY_EPSILON: f32 = 0.01;

/// Residency zone of a loaded chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Within the active radius, drawn
    Active,
    /// Between the active and cached radii, resident but hidden
    Cached,
}

/// Target fade for a chunk at Chebyshev distance `distance`, or `None` when
/// it lies beyond the cached radius and must be purged.
#[must_use]
pub fn target_fade(distance: u32, active_radius: u32, cached_radius: u32) -> Option<f32> {
    if distance <= active_radius {
        Some(1.0)
    } else if distance <= cached_radius {
        Some(0.0)
    } else {
        None
    }
}

/// Moves `current` toward `target` by at most `rate * dt`.
#[must_use]
pub fn step_fade(current: f32, target: f32, rate: f32, dt: Duration) -> f32 {
    let max_step = (rate * dt.as_secs_f32()).max(0.0);
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}

/// A resident chunk.
#[derive(Debug)]
pub struct ClientChunk<R> {
    /// Grid coordinate
    pub coord: ChunkCoord,
    /// Scene object
    pub renderable: R,
    /// Current residency zone
    pub zone: Zone,
    /// Current opacity in `[0, 1]`
    pub fade: f32,
}

impl<R: Renderable> ClientChunk<R> {
    fn new(coord: ChunkCoord, renderable: R) -> Self {
        Self {
            coord,
            renderable,
            zone: Zone::Active,
            fade: 0.0,
        }
    }

    fn is_visible(&self) -> bool {
        self.fade > VISIBILITY_EPSILON
    }

    fn apply_fade(&mut self, target: f32, rate: f32, dt: Duration) {
        self.fade = step_fade(self.fade, target, rate, dt);
        if (self.fade - target).abs() <= f32::EPSILON {
            self.zone = if target >= 1.0 { Zone::Active } else { Zone::Cached };
        }
        self.renderable.set_opacity(self.fade);
        self.renderable.set_visible(self.is_visible());
    }
}

/// Counts from one [`ChunkManager::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Loads dispatched this frame
    pub requested: usize,
    /// Finished loads made resident this frame
    pub applied: usize,
    /// Chunks released this frame
    pub purged: usize,
    /// Resident chunks currently drawn
    pub visible: usize,
    /// Resident chunks after this frame
    pub resident: usize,
    /// Loads still in flight
    pub pending: usize,
}

struct LoadOutcome<R> {
    epoch: u64,
    coord: ChunkCoord,
    result: LoadResult<R>,
}

/// Owns resident chunks and drives loads for a moving viewer.
///
/// Must be used from within a tokio runtime; loads run as spawned tasks and
/// report back through a channel drained by [`update`](Self::update).
pub struct ChunkManager<A, F: RenderableFactory> {
    loader: Arc<ChunkLoader<A, F>>,
    config: ClientConfig,
    prompt: String,
    resident: AHashMap<ChunkCoord, ClientChunk<F::Output>>,
    pending: AHashSet<ChunkCoord>,
    cooldowns: AHashMap<ChunkCoord, Instant>,
    halted: Option<String>,
    epoch: u64,
    fetcher: PredictiveFetcher,
    tx: mpsc::UnboundedSender<LoadOutcome<F::Output>>,
    rx: mpsc::UnboundedReceiver<LoadOutcome<F::Output>>,
}

impl<A: ChunkApi, F: RenderableFactory> ChunkManager<A, F> {
    /// Creates a manager streaming `config.prompt`.
    pub fn new(loader: ChunkLoader<A, F>, config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            loader: Arc::new(loader),
            prompt: config.prompt.clone(),
            fetcher: PredictiveFetcher::new(config.prefetch.clone()),
            config,
            resident: AHashMap::new(),
            pending: AHashSet::new(),
            cooldowns: AHashMap::new(),
            halted: None,
            epoch: 0,
            tx,
            rx,
        }
    }

    /// Prompt currently streamed.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Billing halt reason, if requests are stopped.
    pub fn halted(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// Resident chunk at `coord`.
    pub fn chunk(&self, coord: ChunkCoord) -> Option<&ClientChunk<F::Output>> {
        self.resident.get(&coord)
    }

    /// All resident chunks.
    pub fn chunks(&self) -> impl Iterator<Item = &ClientChunk<F::Output>> {
        self.resident.values()
    }

    /// Number of resident chunks.
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Number of loads in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of coordinates still inside their retry cooldown.
    pub fn cooldown_count(&self) -> usize {
        self.cooldowns.len()
    }

    /// True when a load for `coord` is in flight.
    pub fn is_pending(&self, coord: ChunkCoord) -> bool {
        self.pending.contains(&coord)
    }

    /// Starts loading `coord` unless gated. Returns true if a load was
    /// dispatched.
    ///
    /// Gated when halted, when the chunk is resident or already pending,
    /// when it failed within the retry cooldown, or when the pending cap is
    /// reached.
    pub fn request_chunk(&mut self, coord: ChunkCoord) -> bool {
        if self.halted.is_some()
            || self.resident.contains_key(&coord)
            || self.pending.contains(&coord)
        {
            return false;
        }
        if let Some(failed_at) = self.cooldowns.get(&coord) {
            if failed_at.elapsed() < self.config.retry_cooldown() {
                return false;
            }
            self.cooldowns.remove(&coord);
        }
        if self.pending.len() >= self.config.max_pending {
            return false;
        }

        self.pending.insert(coord);
        let loader = Arc::clone(&self.loader);
        let tx = self.tx.clone();
        let epoch = self.epoch;
        let key = ChunkKey::new(coord, self.prompt.clone());
        tokio::spawn(async move {
            let result = loader.load_chunk(&key).await;
            // The manager may already be gone.
            let _ = tx.send(LoadOutcome {
                epoch,
                coord,
                result,
            });
        });
        debug!(%coord, "Requested chunk");
        true
    }

    /// Runs one frame for a viewer at `position` moving at `velocity`.
    pub fn update(&mut self, position: Vec3, velocity: Vec3, dt: Duration) -> FrameReport {
        let mut report = FrameReport {
            applied: self.apply_finished_loads(),
            ..FrameReport::default()
        };
        let cooldown = self.config.retry_cooldown();
        self.cooldowns.retain(|_, failed_at| failed_at.elapsed() < cooldown);

        let tile_size = self.config.tile_size;
        let center = ChunkCoord::from_world(position, tile_size);
        if self.request_chunk(center) {
            report.requested += 1;
        }

        if !self.resident.is_empty() {
            let around: Vec<_> = center.square(self.config.active_radius).collect();
            let ahead = self.fetcher.update(position, velocity, tile_size).to_vec();
            for coord in around.into_iter().chain(ahead) {
                if self.request_chunk(coord) {
                    report.requested += 1;
                }
            }
        }

        let (active, cached, rate) = (
            self.config.active_radius,
            self.config.cached_radius,
            self.config.fade_rate,
        );
        let mut purge = Vec::new();
        for (coord, chunk) in &mut self.resident {
            match target_fade(coord.chebyshev(center), active, cached) {
                Some(target) => chunk.apply_fade(target, rate, dt),
                None => purge.push(*coord),
            }
        }
        for coord in purge {
            if let Some(mut chunk) = self.resident.remove(&coord) {
                chunk.renderable.release();
                report.purged += 1;
                debug!(%coord, "Purged chunk");
            }
        }

        report.visible = self.resident.values().filter(|c| c.is_visible()).count();
        report.resident = self.resident.len();
        report.pending = self.pending.len();
        report
    }

    fn apply_finished_loads(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(outcome) = self.rx.try_recv() {
            if outcome.epoch != self.epoch {
                if let Ok(mut stale) = outcome.result {
                    stale.release();
                }
                debug!(coord = %outcome.coord, "Discarded load from a previous prompt");
                continue;
            }
            self.pending.remove(&outcome.coord);

            match outcome.result {
                Ok(renderable) => {
                    self.resident
                        .insert(outcome.coord, ClientChunk::new(outcome.coord, renderable));
                    applied += 1;
                },
                Err(e) if e.is_billing() => {
                    if self.halted.is_none() {
                        warn!("Chunk requests halted: {e}");
                    }
                    self.halted = Some(e.to_string());
                },
                Err(e) => {
                    warn!(coord = %outcome.coord, "Chunk load failed: {e}");
                    self.cooldowns.insert(outcome.coord, Instant::now());
                },
            }
        }
        applied
    }

    /// Releases every resident chunk and forgets pending loads; loads still
    /// in flight are discarded when they finish.
    pub fn purge_all(&mut self) {
        let released = self.release_resident();
        self.pending.clear();
        self.cooldowns.clear();
        self.fetcher.reset();
        self.epoch += 1;
        info!("Purged {released} chunks");
    }

    /// Releases resident chunks so they are fetched again; pending loads are
    /// left alone.
    pub fn reload_active_chunks(&mut self) {
        let released = self.release_resident();
        info!("Reloading {released} chunks");
    }

    /// Switches to another prompt. Server-side chunks are kept.
    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        if prompt == self.prompt {
            return;
        }
        self.purge_all();
        info!(from = %self.prompt, to = %prompt, "Switched prompt");
        self.prompt = prompt;
    }

    /// Clears the server's billing halt and resumes requests.
    pub async fn clear_halt(&mut self) -> LoadResult<()> {
        self.loader.api().clear_error().await?;
        if self.halted.take().is_some() {
            info!("Chunk requests resumed");
        }
        Ok(())
    }

    fn release_resident(&mut self) -> usize {
        let count = self.resident.len();
        for (_, mut chunk) in self.resident.drain() {
            chunk.renderable.release();
        }
        count
    }
}

impl<A, F: RenderableFactory> std::fmt::Debug for ChunkManager<A, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkManager")
            .field("prompt", &self.prompt)
            .field("resident", &self.resident.len())
            .field("pending", &self.pending.len())
            .field("halted", &self.halted)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
