//! # Tileforge Server
//!
//! Incrementally materializes a grid-tiled world by asking a slow, billed,
//! rate-limited generation service for one tile at a time.
//!
//! This crate handles:
//! - Durable per-chunk status records (`store`, `migrations`)
//! - The single-flight generation queue and its jobs (`queue`, `job`)
//! - Visual continuity seeding from finished neighbours (`seeder`)
//! - The provider client (`provider`) and local asset files (`assets`)
//! - The HTTP API consumed by streaming clients (`api`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod assets;
pub mod config;
pub mod job;
pub mod migrations;
pub mod provider;
pub mod queue;
pub mod seeder;
pub mod store;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::api::{router, ApiError, AppState};
    pub use crate::assets::AssetStore;
    pub use crate::config::ServerConfig;
    pub use crate::job::{CompletedChunk, JobError, JobPhase, Worker};
    pub use crate::provider::{
        GenerationProvider, HttpProvider, ImageSeed, OperationStatus, ProviderError,
    };
    pub use crate::queue::{GenerationQueue, QueueConfig};
    pub use crate::seeder::ContinuitySeeder;
    pub use crate::store::{ChunkRecord, ChunkStore, ChunkUpdate, StoreError};
}

pub use prelude::*;
