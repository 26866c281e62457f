//! Shared fixtures for client integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use glam::Vec3;
use parking_lot::Mutex;
use tileforge_client::{
    ChunkApi, ChunkLoader, ChunkManager, ClientConfig, LoadError, LoadResult, Renderable,
    RenderableFactory,
};
use tileforge_common::{ChunkCoord, ChunkKey, ChunkRequestStatus, ChunkResponse, QueueStatus};
use tokio::sync::Semaphore;

/// One scripted answer from the mock server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Completed,
    CompletedWithoutUrl,
    Generating,
    Error,
    Billing,
    Transport,
}

#[derive(Default)]
struct ApiState {
    scripts: Mutex<HashMap<ChunkCoord, VecDeque<Reply>>>,
    fallback: Mutex<Option<Reply>>,
    requests: Mutex<Vec<ChunkKey>>,
    fetches: AtomicUsize,
    cleared: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

/// In-process chunk API. Unscripted coordinates complete immediately.
#[derive(Clone, Default)]
pub struct MockApi {
    state: Arc<ApiState>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies for the next requests of `coord`.
    pub fn script(&self, coord: ChunkCoord, replies: &[Reply]) -> &Self {
        self.state
            .scripts
            .lock()
            .entry(coord)
            .or_default()
            .extend(replies.iter().copied());
        self
    }

    /// Reply used once a coordinate's script runs out.
    pub fn fallback(&self, reply: Reply) -> &Self {
        *self.state.fallback.lock() = Some(reply);
        self
    }

    /// Requests block until the semaphore hands out a permit.
    pub fn gate(&self, gate: Arc<Semaphore>) -> &Self {
        *self.state.gate.lock() = Some(gate);
        self
    }

    pub fn requests(&self) -> Vec<ChunkKey> {
        self.state.requests.lock().clone()
    }

    pub fn requests_for(&self, coord: ChunkCoord) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|k| k.coord == coord)
            .count()
    }

    pub fn fetches(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    pub fn cleared(&self) -> usize {
        self.state.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkApi for MockApi {
    async fn request_chunk(&self, key: &ChunkKey) -> LoadResult<ChunkResponse> {
        let gate = self.state.gate.lock().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.state.requests.lock().push(key.clone());
        let scripted = self
            .state
            .scripts
            .lock()
            .get_mut(&key.coord)
            .and_then(VecDeque::pop_front);
        let reply = scripted
            .or(*self.state.fallback.lock())
            .unwrap_or(Reply::Completed);

        match reply {
            Reply::Completed => Ok(ChunkResponse::completed(format!(
                "/chunks/{}_{}.spz",
                key.x(),
                key.y()
            ))),
            Reply::CompletedWithoutUrl => Ok(ChunkResponse::status(ChunkRequestStatus::Completed)),
            Reply::Generating => Ok(ChunkResponse::status(ChunkRequestStatus::Generating)),
            Reply::Error => Ok(ChunkResponse::status(ChunkRequestStatus::Error)),
            Reply::Billing => Err(LoadError::Billing("payment required".into())),
            Reply::Transport => Err(LoadError::Transport("connection refused".into())),
        }
    }

    async fn fetch_asset(&self, url: &str) -> LoadResult<Bytes> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(url.to_string()))
    }

    async fn queue_status(&self) -> LoadResult<QueueStatus> {
        Ok(QueueStatus {
            api_error: None,
            pending: 0,
            active: 0,
            backoff_remaining_ms: 0,
        })
    }

    async fn clear_error(&self) -> LoadResult<()> {
        self.state.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Renderable that records what the manager did to it.
#[derive(Debug)]
pub struct MockSplat {
    pub coord: ChunkCoord,
    pub position: Vec3,
    pub asset: Bytes,
    pub opacity: f32,
    pub visible: bool,
    released: Arc<Mutex<Vec<ChunkCoord>>>,
}

impl Renderable for MockSplat {
    fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity;
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn release(&mut self) {
        self.released.lock().push(self.coord);
    }
}

#[derive(Clone, Default)]
pub struct MockFactory {
    pub released: Arc<Mutex<Vec<ChunkCoord>>>,
    pub broken: Arc<Mutex<Vec<ChunkCoord>>>,
}

impl MockFactory {
    pub fn released(&self) -> Vec<ChunkCoord> {
        self.released.lock().clone()
    }
}

impl RenderableFactory for MockFactory {
    type Output = MockSplat;

    fn instantiate(
        &self,
        coord: ChunkCoord,
        asset: Bytes,
        position: Vec3,
    ) -> LoadResult<MockSplat> {
        if self.broken.lock().contains(&coord) {
            return Err(LoadError::Instantiate("corrupt asset".into()));
        }
        Ok(MockSplat {
            coord,
            position,
            asset,
            opacity: 0.0,
            visible: false,
            released: Arc::clone(&self.released),
        })
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        prompt: "P".into(),
        ..ClientConfig::default()
    }
}

pub fn loader(
    api: &MockApi,
    factory: &MockFactory,
    config: &ClientConfig,
) -> ChunkLoader<MockApi, MockFactory> {
    ChunkLoader::new(api.clone(), factory.clone(), config)
}

pub fn manager(
    api: &MockApi,
    factory: &MockFactory,
    config: ClientConfig,
) -> ChunkManager<MockApi, MockFactory> {
    ChunkManager::new(loader(api, factory, &config), config)
}

/// Lets spawned loads run until they block. Requires a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// World position of the center of chunk `(x, y)` with the default tile.
pub fn at(x: i32, y: i32) -> Vec3 {
    ChunkCoord::new(x, y).world_center(20.0)
}

pub const FRAME: Duration = Duration::from_millis(100);
