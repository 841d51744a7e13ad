//! Transport abstraction for the host interface
//!
//! The transport is the only thing that touches the mesh. Everything above it
//! (transfer engine, lifecycle controller, completion synchronizer) receives
//! the transport as an explicit `&mut` argument; nothing keeps a hidden handle.

use std::fmt::Debug;
use std::time::Duration;

use manycore_chip::{MeshGeometry, RequestPacket, ResponsePacket, TileCoordinate};

use crate::backends::{for_each_run, shared_stores, STORE_RUN_WORDS};
use crate::error::Result;
use crate::program::ProgramImage;

/// Most loads a single [`Transport::copy_from_tile`] call may carry.
///
/// The response load-id field is 8 bits wide.
pub const MAX_LOADS_PER_BATCH: usize = 256;

/// Packet-level primitives provided by a driver for the mesh.
///
/// Every call blocks until the transport reports success or failure.
pub trait Transport: Debug {
    /// Open the host channel.
    ///
    /// # Errors
    ///
    /// Returns `HostError::TransportInit` if the channel cannot be opened.
    fn open(device: &str, mesh: &MeshGeometry) -> Result<Self>
    where
        Self: Sized;

    /// Geometry of the mesh behind this transport.
    fn mesh(&self) -> &MeshGeometry;

    /// Store `words` at consecutive word addresses starting at `word_address`.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::IoFailure` if any store cannot be issued.
    fn copy_to_tile(
        &mut self,
        tile: TileCoordinate,
        word_address: u32,
        words: &[u32],
    ) -> Result<()>;

    /// Load `count` consecutive words starting at `word_address`.
    ///
    /// `count` is at most [`MAX_LOADS_PER_BATCH`]. The load for
    /// `word_address + i` carries load id `i`. Responses are returned in
    /// arrival order, which need not be request order.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::IoFailure` if the loads cannot be issued or
    /// answered.
    fn copy_from_tile(
        &mut self,
        tile: TileCoordinate,
        word_address: u32,
        count: usize,
    ) -> Result<Vec<ResponsePacket>>;

    /// Halt instruction fetch on `tile`.
    ///
    /// # Errors
    ///
    /// Returns an error if the freeze cannot be delivered.
    fn freeze_tile(&mut self, tile: TileCoordinate) -> Result<()>;

    /// Resume instruction fetch on `tile`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unfreeze cannot be delivered.
    fn unfreeze_tile(&mut self, tile: TileCoordinate) -> Result<()>;

    /// Configure the tile-group origin `tile` uses for group-relative addressing.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be delivered.
    fn set_group_origin(&mut self, tile: TileCoordinate, origin: TileCoordinate) -> Result<()>;

    /// Copy the tile-resident part of `image` (instructions and scratchpad
    /// data) into `tile`'s memories.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Program` if a segment does not fit its space, or
    /// an error if any part of the image cannot be written.
    fn load_program(&mut self, tile: TileCoordinate, image: &ProgramImage) -> Result<()>;

    /// Write the DRAM segments of `image` to their banks.
    ///
    /// DRAM is shared by every tile, so a group launch calls this once rather
    /// than once per member.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Program` if a segment does not fit its bank, or
    /// the first store failure.
    fn load_shared_segments(&mut self, image: &ProgramImage) -> Result<()> {
        let mesh = *self.mesh();
        let stores = shared_stores(image, &mesh)?;
        for_each_run(stores, STORE_RUN_WORDS, |bank, word_address, words| {
            self.copy_to_tile(bank, word_address, words)
        })
    }

    /// Receive one tile-to-host request packet.
    ///
    /// Blocks for at most `timeout` (`None` blocks indefinitely). Returns
    /// `Ok(None)` when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the receive channel fails.
    fn receive_packet(&mut self, timeout: Option<Duration>) -> Result<Option<RequestPacket>>;

    /// Transport type for diagnostics.
    fn transport_type(&self) -> TransportType;
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Packet FIFO character device
    Fifo,

    /// In-memory simulated mesh
    Software,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fifo => write!(f, "FIFO device"),
            Self::Software => write!(f, "Software (simulated mesh)"),
        }
    }
}

/// Transport selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSelection {
    /// Use the FIFO device if it opens, otherwise the simulated mesh
    Auto,

    /// Force the FIFO device
    Fifo,

    /// Force the simulated mesh
    Software,
}

/// Open a transport according to `selection`
///
/// # Errors
///
/// Returns error if no suitable transport can be opened for `device`.
pub fn select_transport(
    selection: TransportSelection,
    device: &str,
    mesh: &MeshGeometry,
) -> Result<Box<dyn Transport>> {
    use crate::backends::fifo::FifoDevice;
    use crate::backends::software::SoftwareMesh;

    match selection {
        TransportSelection::Auto => match FifoDevice::open(device, mesh) {
            Ok(fifo) => {
                tracing::info!("Using FIFO transport for {device}");
                Ok(Box::new(fifo))
            }
            Err(e) => {
                tracing::info!("FIFO device {device} unavailable ({e}), using simulated mesh");
                SoftwareMesh::open(device, mesh).map(|t| Box::new(t) as Box<dyn Transport>)
            }
        },

        TransportSelection::Fifo => {
            FifoDevice::open(device, mesh).map(|t| Box::new(t) as Box<dyn Transport>)
        }

        TransportSelection::Software => {
            SoftwareMesh::open(device, mesh).map(|t| Box::new(t) as Box<dyn Transport>)
        }
    }
}
