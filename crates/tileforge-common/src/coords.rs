//! Coordinate types for the chunk grid.

use std::fmt;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Chunk coordinate (identifies a tile in the infinite world grid).
///
/// Chunk `(x, y)` is centered on world position `(x * tile, 0, y * tile)`;
/// grid `y` runs along world `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Y coordinate in chunk space
    pub y: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the chunk containing a world position (ground plane `x`/`z`).
    #[must_use]
    pub fn from_world(position: Vec3, tile_size: f32) -> Self {
        Self {
            x: (position.x / tile_size).round() as i32,
            y: (position.z / tile_size).round() as i32,
        }
    }

    /// Returns the world-space center of this chunk.
    #[must_use]
    pub fn world_center(self, tile_size: f32) -> Vec3 {
        Vec3::new(self.x as f32 * tile_size, 0.0, self.y as f32 * tile_size)
    }

    /// Returns the coordinate offset by `(dx, dy)`, or `None` past the edge
    /// of the `i32` grid.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        match (self.x.checked_add(dx), self.y.checked_add(dy)) {
            (Some(x), Some(y)) => Some(Self { x, y }),
            _ => None,
        }
    }

    /// Chebyshev (chessboard) distance between two chunks.
    #[must_use]
    pub const fn chebyshev(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        if dx > dy {
            dx
        } else {
            dy
        }
    }

    /// The axis-aligned neighbours in west/east/south/north order. Neighbours
    /// past the grid edge are left out.
    pub fn cardinal_neighbors(self) -> impl Iterator<Item = Self> {
        Direction::ALL.into_iter().filter_map(move |dir| dir.step(self))
    }

    /// All chunks within a Chebyshev radius, including this one, clipped to
    /// the grid.
    pub fn square(self, radius: u32) -> impl Iterator<Item = Self> {
        let r = radius.min(i32::MAX as u32) as i32;
        (-r..=r).flat_map(move |dy| (-r..=r).filter_map(move |dx| self.offset(dx, dy)))
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Axis-aligned neighbour direction on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// -x
    West,
    /// +x
    East,
    /// -y
    South,
    /// +y
    North,
}

impl Direction {
    /// All directions in neighbour probe order.
    pub const ALL: [Self; 4] = [Self::West, Self::East, Self::South, Self::North];

    /// Returns the neighbour of `coord` in this direction, if it exists.
    #[must_use]
    pub const fn step(self, coord: ChunkCoord) -> Option<ChunkCoord> {
        match self {
            Self::West => coord.offset(-1, 0),
            Self::East => coord.offset(1, 0),
            Self::South => coord.offset(0, -1),
            Self::North => coord.offset(0, 1),
        }
    }
}

/// A chunk coordinate together with the prompt that generated it.
///
/// The same coordinate under two prompts is two unrelated worlds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    /// Grid coordinate
    pub coord: ChunkCoord,
    /// Generation prompt
    pub prompt: String,
}

impl ChunkKey {
    /// Creates a new chunk key.
    #[must_use]
    pub fn new(coord: ChunkCoord, prompt: impl Into<String>) -> Self {
        Self {
            coord,
            prompt: prompt.into(),
        }
    }

    /// X coordinate.
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.coord.x
    }

    /// Y coordinate.
    #[must_use]
    pub const fn y(&self) -> i32 {
        self.coord.y
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.coord, self.prompt)
    }
}

/// Normalized ground-plane heading from a 3D velocity (`x`/`z`).
#[must_use]
pub fn ground_velocity(velocity: Vec3) -> Vec2 {
    Vec2::new(velocity.x, velocity.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_world_rounds_to_center() {
        assert_eq!(
            ChunkCoord::from_world(Vec3::new(9.0, 3.0, -9.0), 20.0),
            ChunkCoord::new(0, 0)
        );
        assert_eq!(
            ChunkCoord::from_world(Vec3::new(31.0, 0.0, -11.0), 20.0),
            ChunkCoord::new(2, -1)
        );
    }

    #[test]
    fn test_world_center() {
        let center = ChunkCoord::new(2, -1).world_center(20.0);
        assert_eq!(center, Vec3::new(40.0, 0.0, -20.0));
    }

    #[test]
    fn test_chebyshev() {
        let a = ChunkCoord::new(0, 0);
        assert_eq!(a.chebyshev(ChunkCoord::new(2, -1)), 2);
        assert_eq!(a.chebyshev(ChunkCoord::new(-3, 3)), 3);
        assert_eq!(a.chebyshev(a), 0);
    }

    #[test]
    fn test_neighbor_order() {
        let n: Vec<_> = ChunkCoord::new(2, -1).cardinal_neighbors().collect();
        assert_eq!(
            n,
            vec![
                ChunkCoord::new(1, -1),
                ChunkCoord::new(3, -1),
                ChunkCoord::new(2, -2),
                ChunkCoord::new(2, 0),
            ]
        );
    }

    #[test]
    fn test_square_covers_radius() {
        let center = ChunkCoord::new(5, 5);
        let cells: Vec<_> = center.square(1).collect();
        assert_eq!(cells.len(), 9);
        assert!(cells.iter().all(|c| c.chebyshev(center) <= 1));
    }

    #[test]
    fn test_neighbors_at_grid_edge() {
        let corner = ChunkCoord::new(i32::MAX, i32::MIN);
        let n: Vec<_> = corner.cardinal_neighbors().collect();
        assert_eq!(
            n,
            vec![
                ChunkCoord::new(i32::MAX - 1, i32::MIN),
                ChunkCoord::new(i32::MAX, i32::MIN + 1),
            ]
        );
        assert_eq!(Direction::East.step(corner), None);
        assert_eq!(Direction::South.step(corner), None);
        assert_eq!(corner.square(1).count(), 4);
    }

    #[test]
    fn test_chebyshev_across_whole_grid() {
        let a = ChunkCoord::new(i32::MIN, 0);
        let b = ChunkCoord::new(i32::MAX, 0);
        assert_eq!(a.chebyshev(b), u32::MAX);
    }
}
