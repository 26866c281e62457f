//! # Tileforge Client
//!
//! Streams generated chunks to a moving viewer.
//!
//! This crate handles:
//! - Talking to the chunk API (`api`)
//! - Requesting, polling and instantiating one chunk (`loader`)
//! - Look-ahead coordinates from viewer velocity (`prefetch`)
//! - Residency zones, fades and purges for resident chunks (`manager`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod config;
pub mod error;
pub mod loader;
pub mod manager;
pub mod prefetch;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::api::{ChunkApi, HttpChunkApi};
    pub use crate::config::{ClientConfig, PrefetchConfig};
    pub use crate::error::{LoadError, LoadResult};
    pub use crate::loader::{ChunkLoader, Renderable, RenderableFactory};
    pub use crate::manager::{
        step_fade, target_fade, ChunkManager, ClientChunk, FrameReport, Zone, VISIBILITY_EPSILON,
    };
    pub use crate::prefetch::{predict, PredictiveFetcher};
}

pub use prelude::*;
