//! # Tileforge Walk
//!
//! Headless viewer: walks a straight line through the world at a fixed
//! speed, driving the chunk manager at 60 Hz and logging residency once a
//! second. Useful for exercising a server end to end without a renderer.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use glam::Vec3;
use parking_lot::Mutex;
use tileforge_client::{
    ChunkApi, ChunkLoader, ChunkManager, ClientConfig, HttpChunkApi, LoadError, LoadResult,
    Renderable, RenderableFactory,
};
use tileforge_common::ChunkCoord;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Walking speed, world units per second.
const WALK_SPEED: f32 = 4.0;

/// Frame duration at 60 Hz.
const FRAME: Duration = Duration::from_micros(16_667);

/// Asset bytes held by live chunks.
#[derive(Debug, Default)]
struct Residency {
    bytes: usize,
}

/// Stand-in for a GPU splat: keeps only the asset size.
struct HeadlessSplat {
    size: usize,
    residency: Arc<Mutex<Residency>>,
}

impl Renderable for HeadlessSplat {
    fn set_opacity(&mut self, _opacity: f32) {}

    fn set_visible(&mut self, _visible: bool) {}

    fn release(&mut self) {
        let mut residency = self.residency.lock();
        residency.bytes = residency.bytes.saturating_sub(self.size);
    }
}

struct HeadlessFactory {
    residency: Arc<Mutex<Residency>>,
}

impl RenderableFactory for HeadlessFactory {
    type Output = HeadlessSplat;

    fn instantiate(
        &self,
        coord: ChunkCoord,
        asset: Bytes,
        _position: Vec3,
    ) -> LoadResult<HeadlessSplat> {
        if asset.is_empty() {
            return Err(LoadError::Instantiate(format!("empty asset for {coord}")));
        }
        self.residency.lock().bytes += asset.len();
        Ok(HeadlessSplat {
            size: asset.len(),
            residency: Arc::clone(&self.residency),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tileforge=info".parse()?))
        .init();

    info!("Tileforge walk starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::load_from(path),
        None => ClientConfig::load(),
    };

    let api = HttpChunkApi::new(&config.server_url, config.request_timeout())?;
    match api.queue_status().await {
        Ok(status) => info!(
            "Server at {}: {} pending, {} active",
            config.server_url, status.pending, status.active
        ),
        Err(e) => warn!("Server at {} not reachable yet: {e}", config.server_url),
    }

    let residency = Arc::new(Mutex::new(Residency::default()));
    let factory = HeadlessFactory {
        residency: Arc::clone(&residency),
    };
    let loader = ChunkLoader::new(api, factory, &config);
    let mut manager = ChunkManager::new(loader, config);

    let velocity = Vec3::new(WALK_SPEED, 0.0, 0.0);
    let mut position = Vec3::ZERO;
    let mut frames: u64 = 0;
    let mut ticker = tokio::time::interval(FRAME);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = &mut shutdown => break,
        }

        let report = manager.update(position, velocity, FRAME);
        position += velocity * FRAME.as_secs_f32();
        frames += 1;

        if frames % 60 == 0 {
            info!(
                x = position.x,
                resident = report.resident,
                visible = report.visible,
                pending = report.pending,
                kib = residency.lock().bytes / 1024,
                "Walking"
            );
            if let Some(reason) = manager.halted() {
                warn!("Requests stopped: {reason}");
            }
        }
    }

    manager.purge_all();
    info!("Tileforge walk stopped after {frames} frames");
    Ok(())
}
