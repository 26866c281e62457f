//! Generation status of a chunk record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted generation status.
///
/// A record moves `Generating` to exactly one of the other three. `Error`
/// rows are deleted to retry; `BillingError` rows only leave through an
/// explicit clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// A job owns the record and the provider is working on it.
    Generating,
    /// Asset downloaded and available.
    Completed,
    /// Retryable failure.
    Error,
    /// Provider refused for payment reasons; generation is halted.
    BillingError,
}

impl ChunkStatus {
    /// Returns the stored / wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::BillingError => "billing_error",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generating" => Some(Self::Generating),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "billing_error" => Some(Self::BillingError),
            _ => None,
        }
    }

    /// Whether no further provider work will touch the record.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Generating)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
