//! Tile groups
//!
//! A group is the set of tiles that run one kernel launch. Members share a
//! single tile-group origin so kernels can address each other relative to it.

use std::collections::BTreeSet;

use manycore_chip::TileCoordinate;

use crate::error::{ConfigError, Result};

/// Ordered set of tiles sharing one origin.
///
/// Members iterate in row-major order. The origin is the first member in that
/// order and is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGroup {
    members: BTreeSet<TileCoordinate>,
    origin: TileCoordinate,
}

impl TileGroup {
    /// Group from an explicit list of tiles. Duplicates collapse.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyGroup` if `tiles` is empty.
    pub fn from_tiles(tiles: impl IntoIterator<Item = TileCoordinate>) -> Result<Self> {
        let members: BTreeSet<_> = tiles.into_iter().collect();
        let origin = *members.first().ok_or(ConfigError::EmptyGroup)?;
        Ok(Self { members, origin })
    }

    /// Group covering the half-open rectangle `[x1, x2) × [y1, y2)`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyGroup` if the rectangle has no area.
    pub fn rectangle(x1: u8, y1: u8, x2: u8, y2: u8) -> Result<Self> {
        Self::from_tiles((y1..y2).flat_map(|y| (x1..x2).map(move |x| TileCoordinate::new(x, y))))
    }

    /// Origin shared by every member.
    pub const fn origin(&self) -> TileCoordinate {
        self.origin
    }

    /// Members in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoordinate> + '_ {
        self.members.iter().copied()
    }

    /// True if `tile` is a member.
    pub fn contains(&self, tile: TileCoordinate) -> bool {
        self.members.contains(&tile)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; a group has at least one member.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
