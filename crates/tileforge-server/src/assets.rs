//! Local storage of downloaded chunk assets.
//!
//! Assets live flat in one directory, named from a short hash of the prompt
//! plus the chunk coordinates, and are served statically under
//! [`ASSET_ROUTE`].

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tileforge_common::ChunkKey;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// URL prefix under which assets are served.
pub const ASSET_ROUTE: &str = "/chunks";

/// Asset file extension.
pub const ASSET_EXTENSION: &str = "spz";

/// Errors raised by asset storage.
#[derive(Debug, Error)]
pub enum AssetError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Name escapes the asset directory.
    #[error("Invalid asset name: {0}")]
    InvalidName(String),
}

/// Result type for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;

/// Filesystem-backed asset directory.
#[derive(Debug, Clone)]
pub struct AssetStore {
    /// Base directory for assets.
    base_path: PathBuf,
}

impl AssetStore {
    /// Creates an asset store rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Returns the base path.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Deterministic file name for a chunk's asset.
    #[must_use]
    pub fn file_name(key: &ChunkKey) -> String {
        let digest = Sha256::digest(key.prompt.as_bytes());
        let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
        format!("{short}_{}_{}.{ASSET_EXTENSION}", key.x(), key.y())
    }

    /// Public URL of a stored asset.
    #[must_use]
    pub fn public_url(name: &str) -> String {
        format!("{ASSET_ROUTE}/{name}")
    }

    /// Full path for a file name.
    fn key_path(&self, name: &str) -> AssetResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(AssetError::InvalidName(name.to_string()));
        }
        Ok(self.base_path.join(name))
    }

    /// Ensures the base directory exists.
    pub async fn ensure_dir(&self) -> AssetResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    /// Writes an asset and syncs it to disk.
    pub async fn write(&self, name: &str, data: &[u8]) -> AssetResult<PathBuf> {
        self.ensure_dir().await?;
        let path = self.key_path(name)?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(path)
    }

    /// Deletes an asset; a missing file is not an error.
    pub async fn delete(&self, name: &str) -> AssetResult<bool> {
        let path = self.key_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(true)
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Checks if an asset exists.
    pub async fn exists(&self, name: &str) -> AssetResult<bool> {
        Ok(fs::try_exists(self.key_path(name)?).await?)
    }
}
