//! # Tileforge Common
//!
//! Common types shared by the Tileforge chunk server and streaming client.
//!
//! This crate provides:
//! - Grid coordinates and chunk keys
//! - Chunk generation statuses and their wire names
//! - JSON payloads exchanged over the chunk API
//! - Schema versions for the chunk store
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod status;
pub mod version;
pub mod wire;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::status::*;
    pub use crate::version::*;
    pub use crate::wire::*;
}

pub use prelude::*;
