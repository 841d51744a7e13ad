//! Host-side driver for packet-connected manycore tile meshes.
//!
//! The host reaches the mesh only through 16-byte request/response packets.
//! This crate layers memcpy, tile lifecycle control and completion
//! synchronization on top of that narrow channel.
//!
//! # Layers
//!
//! ```text
//! Manycore (host)            launch / run / read_symbol / write_symbol
//!   ├── TileLifecycle        freeze → origin → load → unfreeze, per tile or group
//!   ├── TransferEngine       byte buffers ⇄ word packets, load-id correlation
//!   └── CompletionSynchronizer   drain finish / fail signals
//!         │
//!         ▼
//! Transport (trait)
//!   ├── FifoDevice           packet FIFO character device (rustix)
//!   └── SoftwareMesh         in-memory mesh for CI
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use manycore_driver::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let config = HostConfig::from_env();
//! let mut host = Manycore::<dyn Transport>::open(TransportSelection::Auto, "0", config)?;
//!
//! let image = ProgramImage::from_file("vvadd.riscv")?;
//! let group = TileGroup::rectangle(0, 1, 4, 4)?;
//! host.launch(&group, &image)?;
//!
//! let src: Vec<i32> = (0..160).collect();
//! for tile in group.tiles() {
//!     host.write_symbol(&image, tile, "g_src0", &src)?;
//!     host.write_symbol(&image, tile, "g_src1", &src)?;
//! }
//! host.run(&group)?;
//!
//! let mut dest = vec![0i32; 160];
//! host.read_symbol(&image, group.origin(), "g_dest", &mut dest)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
mod completion;
mod config;
mod error;
mod group;
mod host;
mod io;
mod lifecycle;
mod program;
mod transfer;
mod transport;

/// Mesh and packet definitions (re-exported from manycore-chip).
pub mod chip {
    pub use manycore_chip::{
        classify, epa, Eva, EvaLocation, MemorySpace, MeshGeometry, Opcode, RequestPacket,
        ResponsePacket, TileCoordinate, PACKET_BYTES,
    };
}

pub use backends::{FifoDevice, SoftwareMesh, TileContext};
pub use completion::{CompletionReport, CompletionSynchronizer};
pub use config::{HostConfig, DEFAULT_COMPLETION_TIMEOUT};
pub use error::{ConfigError, HostError, Result, SyncError, TransferError};
pub use group::TileGroup;
pub use host::Manycore;
pub use io::IoHandle;
pub use lifecycle::{TileLifecycle, TileOperation, TileState};
pub use program::{ProgramImage, Segment, Symbol, SymbolResolver, SymbolTable};
pub use transfer::{Direction, TransferEngine, TransferMetrics};
pub use transport::{
    select_transport, Transport, TransportSelection, TransportType, MAX_LOADS_PER_BATCH,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::chip::{MeshGeometry, TileCoordinate};
    pub use crate::{
        CompletionSynchronizer, HostConfig, HostError, Manycore, ProgramImage, Result,
        SymbolResolver, TileGroup, TileLifecycle, TransferEngine, Transport, TransportSelection,
    };
}
