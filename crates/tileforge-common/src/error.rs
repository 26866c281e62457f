//! Error types shared across Tileforge crates.

use thiserror::Error;

/// Errors raised while interpreting shared types.
#[derive(Debug, Error)]
pub enum TileforgeError {
    /// Coordinate query parameter is not an integer
    #[error("Invalid coordinate {name}: {value:?}")]
    InvalidCoordinate {
        /// Parameter name
        name: &'static str,
        /// Raw value received
        value: String,
    },

    /// Stored status string is unknown
    #[error("Unknown chunk status: {0}")]
    UnknownStatus(String),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected at most {expected}, got {actual}")]
    VersionMismatch {
        /// Newest version this build understands
        expected: String,
        /// Version found
        actual: String,
    },
}

/// Result type alias for shared operations.
pub type TileforgeResult<T> = Result<T, TileforgeError>;

/// Parses an integer coordinate query parameter.
pub fn parse_coordinate(name: &'static str, value: &str) -> TileforgeResult<i32> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| TileforgeError::InvalidCoordinate {
            name,
            value: value.to_string(),
        })
}
