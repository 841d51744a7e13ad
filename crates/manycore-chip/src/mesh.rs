//! Tile coordinates and mesh geometry.
//!
//! ```text
//!          x=0   x=1   x=2   x=3
//! y=0     [io]  [io]  [io]  [io]     I/O row — never frozen, loaded or run
//! y=1     [ t ] [ t ] [ t ] [ t ]
//! y=2     [ t ] [ t ] [ t ] [ t ]    compute rows
//! y=3     [ t ] [ t ] [ t ] [ t ]
//! y=4     [d0]  [d1]  [d2]  [d3]     DRAM banks (last compute row + 1)
//! ```
//!
//! The geometry is configuration, not a constant: every component that needs
//! to know where the I/O row or the DRAM row sits receives a [`MeshGeometry`].

use std::cmp::Ordering;
use std::fmt;

/// Physical (x, y) position of a tile on the mesh.
///
/// Coordinates are 8 bits wide, matching the packet fields that carry them.
/// Ordering is row-major: `y` first, then `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    /// Column.
    pub x: u8,
    /// Row. Row 0 is the I/O row.
    pub y: u8,
}

impl TileCoordinate {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

impl Ord for TileCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.y, self.x).cmp(&(other.y, other.x))
    }
}

impl PartialOrd for TileCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(u8, u8)> for TileCoordinate {
    fn from((x, y): (u8, u8)) -> Self {
        Self { x, y }
    }
}

/// Mesh dimensions and reserved rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshGeometry {
    /// Number of columns.
    pub columns: u8,
    /// Number of rows, including the I/O row.
    pub rows: u8,
    /// Row reserved for I/O tiles.
    pub io_row: u8,
    /// Where the host itself attaches; source of every host request packet.
    pub host: TileCoordinate,
}

impl MeshGeometry {
    /// The 4×4 reference mesh: one I/O row, three compute rows, DRAM on row 4.
    pub const REFERENCE_4X4: Self = Self::new(4, 4);

    /// Create a geometry with the I/O row at `y = 0` and the host on `(0, 0)`.
    #[must_use]
    pub const fn new(columns: u8, rows: u8) -> Self {
        Self {
            columns,
            rows,
            io_row: 0,
            host: TileCoordinate::new(0, 0),
        }
    }

    /// Last row that holds compute tiles.
    #[must_use]
    pub const fn last_compute_row(&self) -> u8 {
        self.rows.saturating_sub(1)
    }

    /// Row that DRAM banks are addressed on.
    #[must_use]
    pub const fn dram_row(&self) -> u8 {
        self.last_compute_row().saturating_add(1)
    }

    /// True if `tile` sits on the I/O row.
    #[must_use]
    pub const fn is_io_tile(&self, tile: TileCoordinate) -> bool {
        tile.y == self.io_row
    }

    /// True if `tile` is inside the mesh (any row, I/O included).
    #[must_use]
    pub const fn contains(&self, tile: TileCoordinate) -> bool {
        tile.x < self.columns && tile.y < self.rows
    }

    /// True if `tile` is a compute tile a kernel may run on.
    #[must_use]
    pub const fn is_compute_tile(&self, tile: TileCoordinate) -> bool {
        self.contains(tile) && !self.is_io_tile(tile)
    }

    /// True if `tile` is a DRAM bank endpoint.
    #[must_use]
    pub const fn is_dram_bank(&self, tile: TileCoordinate) -> bool {
        tile.y == self.dram_row() && tile.x < self.columns
    }

    /// All compute tiles, row-major.
    #[must_use]
    pub fn compute_tiles(&self) -> Vec<TileCoordinate> {
        (0..self.rows)
            .filter(|&y| y != self.io_row)
            .flat_map(|y| (0..self.columns).map(move |x| TileCoordinate::new(x, y)))
            .collect()
    }

    /// Number of compute tiles.
    #[must_use]
    pub const fn compute_tile_count(&self) -> u32 {
        (self.columns as u32) * (self.rows.saturating_sub(1) as u32)
    }
}

impl Default for MeshGeometry {
    fn default() -> Self {
        Self::REFERENCE_4X4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_mesh_rows() {
        let mesh = MeshGeometry::REFERENCE_4X4;
        assert_eq!(mesh.last_compute_row(), 3);
        assert_eq!(mesh.dram_row(), 4);
        assert_eq!(mesh.compute_tile_count(), 12);
        assert_eq!(mesh.compute_tiles().len(), 12);
    }

    #[test]
    fn io_row_is_not_compute() {
        let mesh = MeshGeometry::REFERENCE_4X4;
        assert!(mesh.is_io_tile(TileCoordinate::new(2, 0)));
        assert!(!mesh.is_compute_tile(TileCoordinate::new(2, 0)));
        assert!(mesh.is_compute_tile(TileCoordinate::new(3, 3)));
        assert!(!mesh.is_compute_tile(TileCoordinate::new(4, 1)));
        assert!(mesh.is_dram_bank(TileCoordinate::new(1, 4)));
    }

    #[test]
    fn ordering_is_row_major() {
        let mut tiles = vec![
            TileCoordinate::new(1, 2),
            TileCoordinate::new(3, 1),
            TileCoordinate::new(0, 2),
            TileCoordinate::new(0, 1),
        ];
        tiles.sort();
        assert_eq!(
            tiles,
            vec![
                TileCoordinate::new(0, 1),
                TileCoordinate::new(3, 1),
                TileCoordinate::new(0, 2),
                TileCoordinate::new(1, 2),
            ]
        );
    }

    #[test]
    fn compute_tiles_start_after_io_row() {
        let tiles = MeshGeometry::new(2, 3).compute_tiles();
        assert_eq!(tiles.first(), Some(&TileCoordinate::new(0, 1)));
        assert_eq!(tiles.last(), Some(&TileCoordinate::new(1, 2)));
    }
}
