//! Cross-chunk continuity seeding.
//!
//! A new chunk is biased toward its surroundings by handing the provider the
//! strip of an already generated neighbour's panorama that touches the shared
//! edge. Seeding is best-effort: any failure means "no seed".

use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;
use tileforge_common::{ChunkKey, Direction};
use tracing::{debug, warn};

use crate::provider::{GenerationProvider, ImageSeed, ProviderError};
use crate::store::{ChunkStore, StoreError};

/// Share of the panorama width taken from an east/west neighbour.
pub const SIDE_STRIP_FRACTION: f32 = 0.25;

/// Share of the panorama height taken from a north/south neighbour.
pub const VERTICAL_STRIP_FRACTION: f32 = 0.30;

/// Seeding failures. Logged, never propagated into a job.
#[derive(Debug, Error)]
pub enum SeedError {
    /// Store lookup failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// Panorama download failed
    #[error("Download failed: {0}")]
    Download(#[from] ProviderError),
    /// Panorama could not be decoded or re-encoded
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// Panorama has no pixels
    #[error("Empty panorama")]
    Empty,
}

/// Result type for seeding.
pub type SeedResult<T> = Result<T, SeedError>;

/// Pixel rectangle `(x, y, width, height)` of the strip adjacent to the new
/// chunk, given which side of it the source neighbour sits on.
#[must_use]
pub fn border_region(direction: Direction, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let strip_w = ((width as f32 * SIDE_STRIP_FRACTION) as u32).clamp(1, width.max(1));
    let strip_h = ((height as f32 * VERTICAL_STRIP_FRACTION) as u32).clamp(1, height.max(1));
    match direction {
        Direction::West => (width - strip_w, 0, strip_w, height),
        Direction::East => (0, 0, strip_w, height),
        Direction::South => (0, 0, width, strip_h),
        Direction::North => (0, height - strip_h, width, strip_h),
    }
}

/// Crops the border strip out of a decoded panorama.
#[must_use]
pub fn extract_border(panorama: &DynamicImage, direction: Direction) -> DynamicImage {
    let (x, y, w, h) = border_region(direction, panorama.width(), panorama.height());
    panorama.crop_imm(x, y, w, h)
}

/// Decodes a panorama, crops the strip and encodes it as a PNG seed.
pub fn encode_seed(panorama: &[u8], direction: Direction) -> SeedResult<ImageSeed> {
    let image = image::load_from_memory(panorama)?;
    if image.width() == 0 || image.height() == 0 {
        return Err(SeedError::Empty);
    }
    let strip = extract_border(&image, direction);

    let mut png = Vec::new();
    strip.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(ImageSeed {
        data_base64: BASE64.encode(&png),
        extension: "png",
    })
}

/// Looks up neighbours and builds seeds.
#[derive(Clone)]
pub struct ContinuitySeeder {
    store: ChunkStore,
    provider: Arc<dyn GenerationProvider>,
}

impl ContinuitySeeder {
    /// Creates a seeder.
    pub fn new(store: ChunkStore, provider: Arc<dyn GenerationProvider>) -> Self {
        Self { store, provider }
    }

    /// Seed for `key`, or `None` when no neighbour qualifies or anything fails.
    pub async fn seed_for(&self, key: &ChunkKey) -> Option<ImageSeed> {
        match self.try_seed(key).await {
            Ok(seed) => seed,
            Err(e) => {
                warn!(chunk = %key, "Continuity seeding skipped: {e}");
                None
            },
        }
    }

    async fn try_seed(&self, key: &ChunkKey) -> SeedResult<Option<ImageSeed>> {
        let Some((direction, neighbor)) = self.store.find_completed_neighbor(key).await? else {
            return Ok(None);
        };
        let Some(url) = neighbor.panorama_url.as_deref() else {
            return Ok(None);
        };

        let bytes = self.provider.download(url).await?;
        let seed = encode_seed(&bytes, direction)?;
        debug!(
            chunk = %key,
            neighbor = %neighbor.key.coord,
            ?direction,
            "seeding from neighbour panorama"
        );
        Ok(Some(seed))
    }
}
