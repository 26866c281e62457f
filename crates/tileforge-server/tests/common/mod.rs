//! Shared fixtures for server integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, RgbImage};
use parking_lot::Mutex;
use tempfile::TempDir;
use tileforge_common::{ChunkCoord, ChunkKey, ChunkStatus};
use tileforge_server::{
    router, AppState, AssetStore, ChunkStore, ChunkUpdate, GenerationProvider, GenerationQueue,
    ImageSeed, OperationStatus, ProviderError, QueueConfig, Worker,
};
use tokio::sync::Semaphore;

/// What the mock does for one start-generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Billing,
    RateLimit,
    NoAsset,
    Panic,
}

/// Scripted in-process generation provider.
pub struct MockProvider {
    script: Mutex<VecDeque<Behavior>>,
    operations: Mutex<HashMap<String, Behavior>>,
    gate: Option<Arc<Semaphore>>,
    pub starts: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub seeds: Mutex<Vec<Option<ImageSeed>>>,
    pub downloads: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            operations: Mutex::new(HashMap::new()),
            gate: None,
            starts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seeds: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// Behaviours for the first start calls; later calls succeed.
    pub fn with_script(self, script: &[Behavior]) -> Self {
        *self.script.lock() = script.iter().copied().collect();
        self
    }

    /// Polls block until the semaphore hands out a permit.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn panorama_png() -> Vec<u8> {
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(40, 20))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .expect("encode panorama");
    png
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn start_generation(
        &self,
        _prompt: &str,
        seed: Option<&ImageSeed>,
    ) -> Result<String, ProviderError> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        self.seeds.lock().push(seed.cloned());
        let behavior = self.script.lock().pop_front().unwrap_or(Behavior::Succeed);
        match behavior {
            Behavior::Billing => Err(ProviderError::Billing("payment required".into())),
            Behavior::RateLimit => Err(ProviderError::RateLimited("slow down".into())),
            Behavior::Panic => panic!("provider client crashed"),
            other => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                let id = format!("op-{n}");
                self.operations.lock().insert(id.clone(), other);
                Ok(id)
            },
        }
    }

    async fn poll_operation(&self, operation_id: &str) -> Result<OperationStatus, ProviderError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let behavior = self
            .operations
            .lock()
            .get(operation_id)
            .copied()
            .unwrap_or(Behavior::Succeed);
        let json = match behavior {
            Behavior::NoAsset => {
                self.finish();
                format!(r#"{{"done":true,"response":{{"id":"{operation_id}"}}}}"#)
            },
            _ => format!(
                r#"{{"done":true,"response":{{"id":"{operation_id}","assets":{{
                    "splats":{{"spz_urls":{{
                        "full_res":"mock://full/{operation_id}",
                        "500k":"mock://500k/{operation_id}"}}}},
                    "imagery":{{"pano_url":"mock://pano/{operation_id}"}}}}}}}}"#
            ),
        };
        Ok(serde_json::from_str(&json).expect("mock json"))
    }

    async fn download(&self, url: &str) -> Result<Bytes, ProviderError> {
        self.downloads.lock().push(url.to_string());
        if url.starts_with("mock://pano") {
            return Ok(Bytes::from(panorama_png()));
        }
        self.finish();
        Ok(Bytes::from_static(b"SPZ"))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: ChunkStore,
    pub assets: AssetStore,
    pub provider: Arc<MockProvider>,
    pub queue: GenerationQueue,
}

pub async fn harness(provider: MockProvider, config: QueueConfig) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = ChunkStore::open(dir.path().join("chunks.db"))
        .await
        .expect("open store");
    let assets = AssetStore::new(dir.path().join("assets"));
    let provider = Arc::new(provider);
    let worker = Worker::new(
        store.clone(),
        Arc::clone(&provider) as Arc<dyn GenerationProvider>,
        assets.clone(),
        Duration::from_millis(10),
    );
    let queue = GenerationQueue::new(worker, config);
    Harness {
        dir,
        store,
        assets,
        provider,
        queue,
    }
}

pub fn key(x: i32, y: i32, prompt: &str) -> ChunkKey {
    ChunkKey::new(ChunkCoord::new(x, y), prompt)
}

impl Harness {
    /// Router over this harness; without a queue it behaves as if no
    /// provider credential were set.
    pub fn app(&self, with_queue: bool) -> Router {
        router(AppState {
            store: self.store.clone(),
            assets: self.assets.clone(),
            queue: with_queue.then(|| self.queue.clone()),
            default_prompt: "default".into(),
        })
    }

    /// Waits until no job holds a worker slot.
    pub async fn wait_idle(&self) {
        let queue = self.queue.clone();
        let idle = wait_until(move || {
            let queue = queue.clone();
            async move { queue.status().active == 0 }
        })
        .await;
        assert!(idle, "queue never went idle");
    }

    /// Inserts the row and queues the job, as the API does.
    pub async fn request(&self, key: &ChunkKey) -> bool {
        let created = self.store.insert_if_absent(key).await.expect("insert");
        if created {
            self.queue.enqueue(key.clone());
        }
        created
    }

    pub async fn status(&self, key: &ChunkKey) -> Option<ChunkStatus> {
        self.store.get(key).await.expect("get").map(|r| r.status)
    }

    pub async fn mark_completed(&self, key: &ChunkKey, panorama: &str) {
        self.store.insert_if_absent(key).await.expect("insert");
        self.store
            .update(
                key,
                ChunkStatus::Completed,
                &ChunkUpdate {
                    asset_path: Some(AssetStore::file_name(key)),
                    panorama_url: Some(panorama.to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
    }

    pub async fn wait_for_status(&self, key: &ChunkKey, status: ChunkStatus) {
        let found = wait_until(move || async move { self.status(key).await == Some(status) }).await;
        assert!(found, "{key} never reached {status}");
    }
}

/// Polls `condition` for up to five seconds.
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn fast_config(concurrency: usize) -> QueueConfig {
    QueueConfig {
        concurrency,
        rate_limit_backoff: Duration::from_millis(300),
        job_timeout: Duration::from_secs(30),
    }
}
