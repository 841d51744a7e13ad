//! Error types for manycore host operations

use manycore_chip::TileCoordinate;
use thiserror::Error;

use crate::lifecycle::{TileOperation, TileState};

/// Result type alias for manycore host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur during host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// The host could not open its channel to the mesh
    #[error("Transport initialization failed: {reason}")]
    TransportInit {
        /// Reason for failure
        reason: String,
    },

    /// A memcpy to or from a tile failed
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A lifecycle or group operation was invoked on the wrong tile or out of order
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Waiting for kernel completion failed
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A program image could not be parsed
    #[error("Invalid program image: {reason}")]
    Program {
        /// Reason for failure
        reason: String,
    },

    /// I/O error outside a tile transfer
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl HostError {
    /// Create a transport initialization error
    pub fn transport_init(reason: impl Into<String>) -> Self {
        Self::TransportInit {
            reason: reason.into(),
        }
    }

    /// Create a program image error
    pub fn program(reason: impl Into<String>) -> Self {
        Self::Program {
            reason: reason.into(),
        }
    }

    /// Create an I/O failure for a transfer touching `tile` at `word_address`
    pub fn io_failure(tile: TileCoordinate, word_address: u32, reason: impl Into<String>) -> Self {
        Self::Transfer(TransferError::IoFailure {
            tile,
            word_address,
            reason: reason.into(),
        })
    }
}

/// Transfer engine failures
#[derive(Debug, Error)]
pub enum TransferError {
    /// The copy primitive reported failure; destination contents are unspecified
    #[error("Transfer to/from tile {tile} at word {word_address:#x} failed: {reason}")]
    IoFailure {
        /// Endpoint being copied to or from
        tile: TileCoordinate,
        /// First word address of the failing batch
        word_address: u32,
        /// Reason reported by the transport
        reason: String,
    },

    /// Symbol absent from the program image
    #[error("Symbol '{symbol}' not found in {image}")]
    SymbolNotFound {
        /// Symbol that was looked up
        symbol: String,
        /// Program image searched
        image: String,
    },

    /// Buffer length is not a whole number of words
    #[error("Transfer length {len} is not a multiple of 4 bytes")]
    LengthNotWordMultiple {
        /// Offending byte length
        len: usize,
    },

    /// Target address is not word aligned
    #[error("Transfer address {address:#x} is not 4-byte aligned")]
    Misaligned {
        /// Offending byte address
        address: u32,
    },

    /// Load responses could not be matched to their requests
    #[error("Response mismatch from tile {tile}: {reason}")]
    ResponseMismatch {
        /// Endpoint that was read
        tile: TileCoordinate,
        /// What was wrong with the responses
        reason: String,
    },
}

/// Lifecycle and group configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Tried to freeze, load or unfreeze a tile on the I/O row
    #[error("Cannot {operation} I/O tile {tile}")]
    IoTileTargeted {
        /// Offending tile
        tile: TileCoordinate,
        /// Operation attempted
        operation: TileOperation,
    },

    /// Tile lies outside the configured mesh
    #[error("Tile {tile} is outside the mesh")]
    OutsideMesh {
        /// Offending tile
        tile: TileCoordinate,
    },

    /// Operation not valid in the tile's current lifecycle state
    #[error("Cannot {operation} tile {tile} while it is {state}")]
    InvalidTransition {
        /// Offending tile
        tile: TileCoordinate,
        /// Operation attempted
        operation: TileOperation,
        /// State the tile was in
        state: TileState,
    },

    /// A tile group needs at least one member
    #[error("Tile group has no members")]
    EmptyGroup,
}

/// Completion synchronizer failures
#[derive(Debug, Error)]
pub enum SyncError {
    /// Not every expected completion signal arrived in time
    #[error("Timed out after {waited_ms}ms with {received} of {expected} completion signals")]
    Timeout {
        /// Signals expected
        expected: usize,
        /// Signals received before the deadline
        received: usize,
        /// Time spent waiting (ms)
        waited_ms: u64,
    },

    /// Completion signal from a tile that is not outstanding (duplicate or unknown)
    #[error("Unexpected completion signal from tile {tile}")]
    UnexpectedSignal {
        /// Source of the signal
        tile: TileCoordinate,
    },

    /// A tile reported kernel failure
    #[error("Kernel failed on tile {tile}")]
    KernelFailed {
        /// Source of the failure signal
        tile: TileCoordinate,
    },
}
