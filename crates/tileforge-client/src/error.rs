//! Client-side load failures.

use thiserror::Error;

/// Why a chunk could not be loaded.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Generation is halted server-side for billing reasons
    #[error("Billing halt: {0}")]
    Billing(String),

    /// The server reported a failed generation
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Polling gave up before the chunk completed
    #[error("Chunk not ready after {attempts} polls")]
    Timeout {
        /// Poll attempts made
        attempts: u32,
    },

    /// HTTP or decode failure talking to the server
    #[error("Transport error: {0}")]
    Transport(String),

    /// The asset could not be turned into a renderable
    #[error("Failed to instantiate chunk: {0}")]
    Instantiate(String),
}

impl LoadError {
    /// True for failures that should halt all further requests.
    #[must_use]
    pub const fn is_billing(&self) -> bool {
        matches!(self, Self::Billing(_))
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result type for chunk loading.
pub type LoadResult<T> = Result<T, LoadError>;
