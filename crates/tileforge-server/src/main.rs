//! # Tileforge Server
//!
//! Entry point: opens the chunk store, builds the generation queue when a
//! provider credential is available, and serves the chunk API.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tileforge_server::{
    router, AppState, AssetStore, ChunkStore, GenerationQueue, HttpProvider, ServerConfig, Worker,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tileforge=info".parse()?))
        .init();

    info!("Tileforge server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load_from(path),
        None => ServerConfig::load(),
    };

    let store = ChunkStore::open(&config.database_path)
        .await
        .context("opening chunk store")?;
    store.sweep_incomplete().await?;

    let assets = AssetStore::new(&config.asset_dir);
    assets.ensure_dir().await?;

    let queue = match config.api_key() {
        Some(key) => {
            let provider = HttpProvider::new(&config.provider_url, key, config.request_timeout())?;
            let worker = Worker::new(
                store.clone(),
                Arc::new(provider),
                assets.clone(),
                config.poll_interval(),
            );
            Some(GenerationQueue::new(worker, config.queue_config()))
        },
        None => {
            warn!(
                "{} is not set; serving cached chunks only, generation disabled",
                config.api_key_env
            );
            None
        },
    };

    let app = router(AppState {
        store: store.clone(),
        assets,
        queue: queue.clone(),
        default_prompt: config.default_prompt.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!("Listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await?;

    if let Some(queue) = queue {
        queue.shutdown();
    }
    store.close().await;

    info!("Tileforge server shutdown complete");
    Ok(())
}
