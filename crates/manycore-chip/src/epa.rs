//! Endpoint address (EPA) map of a tile and of the host I/O endpoint.
//!
//! Byte addresses. Packets carry word addresses (`epa >> 2`); use [`word`].
//!
//! ```text
//! 0x0000_1000 – 0x0000_1FFF   DMEM (scratchpad)
//! 0x0000_EAD0                 finish  (tile → host I/O endpoint)
//! 0x0000_EAD8                 fail    (tile → host I/O endpoint)
//! 0x0002_0000                 CSR: freeze
//! 0x0002_0004                 CSR: tile-group origin x
//! 0x0002_0008                 CSR: tile-group origin y
//! 0x0100_0000 +               instruction memory window
//! ```

/// Scratchpad base.
pub const DMEM_BASE: u32 = 0x0000_1000;
/// Scratchpad size in bytes.
pub const DMEM_BYTES: u32 = 0x0000_1000;

/// Host I/O endpoint address a tile stores to when its kernel finishes.
pub const FINISH: u32 = 0x0000_EAD0;
/// Host I/O endpoint address a tile stores to when its kernel fails.
pub const FAIL: u32 = 0x0000_EAD8;

/// CSR block base.
pub const CSR_BASE: u32 = 0x0002_0000;
/// Freeze CSR. Write [`csr::FREEZE`] or [`csr::UNFREEZE`].
pub const CSR_FREEZE: u32 = CSR_BASE;
/// Tile-group origin x CSR.
pub const CSR_TILE_GROUP_ORIGIN_X: u32 = CSR_BASE + 0x4;
/// Tile-group origin y CSR.
pub const CSR_TILE_GROUP_ORIGIN_Y: u32 = CSR_BASE + 0x8;

/// Instruction memory window. Executable segments are written at
/// `ICACHE_BASE + vaddr`.
pub const ICACHE_BASE: u32 = 0x0100_0000;
/// Span of the instruction memory window in bytes.
pub const ICACHE_BYTES: u32 = 0x0100_0000;

/// CSR values.
pub mod csr {
    /// Halt instruction fetch.
    pub const FREEZE: u32 = 1;
    /// Resume instruction fetch.
    pub const UNFREEZE: u32 = 0;
}

/// Word address of a byte endpoint address.
#[must_use]
pub const fn word(epa: u32) -> u32 {
    epa >> 2
}
