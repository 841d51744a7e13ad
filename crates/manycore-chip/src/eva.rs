//! EVA (virtual address) classification.
//!
//! ```text
//!  31  30 29 28                                   0
//! ┌───┬─────┬────────────────────────────────────┐
//! │ 1 │ bx  │ offset inside DRAM bank bx          │   DRAM / global
//! └───┴─────┴────────────────────────────────────┘
//! ┌───┬──────────────────────────────────────────┐
//! │ 0 │ offset inside the owning tile             │   scratchpad (tile-local)
//! └───┴──────────────────────────────────────────┘
//! ```
//!
//! A scratchpad EVA carries no coordinate, so classification needs the tile
//! the address was resolved relative to. DRAM banks live one row below the
//! last compute row.

use crate::mesh::{MeshGeometry, TileCoordinate};

/// 32-bit virtual address as produced by a program's symbol table.
pub type Eva = u32;

/// Bit selecting DRAM (set) or scratchpad (clear).
pub const DRAM_BIT: u32 = 31;
/// Lowest bit of the DRAM bank x field.
pub const DRAM_BANK_SHIFT: u32 = 29;
/// Width mask of the DRAM bank x field.
pub const DRAM_BANK_MASK: u32 = 0b11;
/// Bytes addressable inside one DRAM bank (bits [28:0]).
pub const DRAM_BANK_BYTES: u32 = 1 << DRAM_BANK_SHIFT;

/// Memory space an EVA lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Tile-local scratchpad.
    Scratchpad,
    /// Shared DRAM, reached through a bank on the DRAM row.
    Dram,
}

/// Result of classifying an EVA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaLocation {
    /// Memory space.
    pub space: MemorySpace,
    /// Endpoint that owns the address.
    pub coord: TileCoordinate,
}

/// True if `eva` addresses DRAM.
#[must_use]
pub const fn is_dram(eva: Eva) -> bool {
    (eva >> DRAM_BIT) & 1 == 1
}

/// DRAM bank x coordinate encoded in bits [30:29].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn dram_bank_x(eva: Eva) -> u8 {
    ((eva >> DRAM_BANK_SHIFT) & DRAM_BANK_MASK) as u8
}

/// Classify `eva`, resolved relative to `context`, on `mesh`.
///
/// Total and side-effect free: every 32-bit input classifies.
#[must_use]
pub const fn classify(eva: Eva, context: TileCoordinate, mesh: &MeshGeometry) -> EvaLocation {
    if is_dram(eva) {
        EvaLocation {
            space: MemorySpace::Dram,
            coord: TileCoordinate::new(dram_bank_x(eva), mesh.dram_row()),
        }
    } else {
        EvaLocation {
            space: MemorySpace::Scratchpad,
            coord: context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH: MeshGeometry = MeshGeometry::REFERENCE_4X4;
    const CTX: TileCoordinate = TileCoordinate::new(2, 3);

    #[test]
    fn scratchpad_keeps_context() {
        let loc = classify(0x0000_1000, CTX, &MESH);
        assert_eq!(loc.space, MemorySpace::Scratchpad);
        assert_eq!(loc.coord, CTX);
    }

    #[test]
    fn dram_bank_from_bits_30_29() {
        let loc = classify(0xC000_0040, CTX, &MESH);
        assert_eq!(loc.space, MemorySpace::Dram);
        assert_eq!(loc.coord, TileCoordinate::new(2, 4));

        assert_eq!(classify(0x8000_0000, CTX, &MESH).coord.x, 0);
        assert_eq!(classify(0xA000_0000, CTX, &MESH).coord.x, 1);
        assert_eq!(classify(0xE000_0000, CTX, &MESH).coord.x, 3);
    }

    #[test]
    fn dram_row_follows_geometry() {
        let tall = MeshGeometry::new(4, 8);
        assert_eq!(classify(0x8000_0000, CTX, &tall).coord.y, 8);
    }

    #[test]
    fn bit_31_decides_space_across_the_range() {
        // Walk the address space with an odd stride so every bit pattern
        // region gets sampled.
        let mut eva: u32 = 0;
        loop {
            let loc = classify(eva, CTX, &MESH);
            if eva & 0x8000_0000 == 0 {
                assert_eq!(loc.space, MemorySpace::Scratchpad);
                assert_eq!(loc.coord, CTX);
            } else {
                assert_eq!(loc.space, MemorySpace::Dram);
                assert_eq!(u32::from(loc.coord.x), (eva >> 29) & 0b11);
                assert_eq!(loc.coord.y, MESH.dram_row());
            }
            assert_eq!(loc, classify(eva, CTX, &MESH));
            match eva.checked_add(0x0123_4567) {
                Some(next) => eva = next,
                None => break,
            }
        }
    }
}
