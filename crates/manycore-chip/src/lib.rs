//! Silicon model for the tiled manycore mesh.
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the silicon as the host sees it: mesh geometry, the EVA
//! (virtual address) map, the endpoint address map of a tile, and the
//! bit-exact layout of the packets that cross the host interface.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`mesh`] | Tile coordinates and mesh geometry (I/O row, compute rows, DRAM row) |
//! | [`eva`] | EVA classification: scratchpad vs. DRAM, owning coordinate |
//! | [`epa`] | Endpoint addresses inside a tile (CSRs, DMEM, instruction window, finish/fail) |
//! | [`packet`] | 16-byte request / response packet layout |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod epa;
pub mod eva;
pub mod mesh;
pub mod packet;

pub use eva::{classify, Eva, EvaLocation, MemorySpace};
pub use mesh::{MeshGeometry, TileCoordinate};
pub use packet::{Opcode, PacketDecodeError, RequestPacket, ResponsePacket, PACKET_BYTES};
