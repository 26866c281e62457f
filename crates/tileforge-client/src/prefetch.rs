//! Velocity-based look-ahead.
//!
//! Generation can take tens of seconds, so chunks along the viewer's path
//! are requested early enough to be ready on arrival.

use ahash::AHashSet;
use glam::{Vec2, Vec3};
use tileforge_common::{ground_velocity, ChunkCoord};

use crate::config::PrefetchConfig;

/// Perpendicular offsets (in chunks) covered around each forward step.
const SPREAD: [f32; 3] = [-1.0, 0.0, 1.0];

/// Computes look-ahead coordinates for a viewer at `position` moving at
/// `velocity`.
///
/// Slow viewers get the four cardinal neighbours of their chunk. Otherwise
/// the reach is `ceil(speed * latency / tile_size)` clamped to the configured
/// range, and every forward step is widened by one chunk on each side.
/// The result is deterministic and free of duplicates.
#[must_use]
pub fn predict(
    position: Vec3,
    velocity: Vec3,
    tile_size: f32,
    config: &PrefetchConfig,
) -> Vec<ChunkCoord> {
    let center = ChunkCoord::from_world(position, tile_size);
    let ground = ground_velocity(velocity);
    let speed = ground.length();
    if !speed.is_finite() || speed < config.speed_threshold || speed <= f32::EPSILON {
        return center.cardinal_neighbors().collect::<Vec<_>>();
    }

    let forward = ground / speed;
    let side = forward.perp();
    let reach = (speed * config.worst_case_latency_secs / tile_size).ceil() as u32;
    let reach = reach.clamp(config.min_reach, config.max_reach.max(config.min_reach));

    let origin = Vec2::new(position.x, position.z);
    let mut seen = AHashSet::new();
    let mut coords = Vec::new();
    for step in 1..=reach {
        let ahead = origin + forward * (step as f32 * tile_size);
        for offset in SPREAD {
            let point = ahead + side * (offset * tile_size);
            let coord = ChunkCoord::from_world(Vec3::new(point.x, 0.0, point.y), tile_size);
            if seen.insert(coord) {
                coords.push(coord);
            }
        }
    }
    coords
}

/// Recomputes [`predict`] every `interval_ticks` updates and returns the
/// previous result in between.
#[derive(Debug, Clone)]
pub struct PredictiveFetcher {
    config: PrefetchConfig,
    tick: u32,
    current: Vec<ChunkCoord>,
}

impl PredictiveFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(config: PrefetchConfig) -> Self {
        Self {
            config,
            tick: 0,
            current: Vec::new(),
        }
    }

    /// Advances one tick and returns the current look-ahead set.
    pub fn update(&mut self, position: Vec3, velocity: Vec3, tile_size: f32) -> &[ChunkCoord] {
        if self.tick % self.config.interval_ticks.max(1) == 0 {
            self.current = predict(position, velocity, tile_size, &self.config);
        }
        self.tick = self.tick.wrapping_add(1);
        &self.current
    }

    /// Forgets the cached result; the next update recomputes.
    pub fn reset(&mut self) {
        self.tick = 0;
        self.current.clear();
    }
}
