//! Packetized transfer engine
//!
//! Moves byte buffers between host memory and a tile's (or DRAM bank's)
//! memory, one 16-byte packet per 32-bit word.
//!
//! - **Validation first**: alignment and length are checked before any packet
//!   is issued, so a rejected transfer never touches the mesh.
//! - **Load-id correlation**: reads are issued in windows of at most
//!   [`MAX_LOADS_PER_BATCH`] words; within a window load `i` carries id `i`
//!   and each response lands at the offset its id names, whatever order the
//!   responses arrive in.
//! - **No retry**: a transport failure is reported with the tile and word
//!   address it hit; the destination buffer is then unspecified.

use std::time::{Duration, Instant};

use bytemuck::Pod;
use manycore_chip::{classify, Opcode, ResponsePacket, TileCoordinate};
use tracing::debug;

use crate::error::{HostError, Result, TransferError};
use crate::program::SymbolResolver;
use crate::transport::{Transport, MAX_LOADS_PER_BATCH};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host memory → tile memory (stores).
    HostToDevice,
    /// Tile memory → host memory (loads).
    DeviceToHost,
}

/// Transfer operation metrics
#[derive(Debug, Clone, PartialEq)]
pub struct TransferMetrics {
    /// Total bytes moved
    pub bytes_transferred: usize,

    /// Request packets issued
    pub packets: usize,

    /// Total duration
    pub duration: Duration,

    /// Throughput (MB/s)
    pub throughput_mbps: f64,
}

impl TransferMetrics {
    const fn empty() -> Self {
        Self {
            bytes_transferred: 0,
            packets: 0,
            duration: Duration::from_secs(0),
            throughput_mbps: 0.0,
        }
    }

    fn finish(bytes: usize, packets: usize, start: Instant) -> Self {
        let duration = start.elapsed();
        Self {
            bytes_transferred: bytes,
            packets,
            duration,
            throughput_mbps: calculate_throughput(bytes, duration.as_secs_f64()),
        }
    }
}

/// Calculate throughput in MB/s
fn calculate_throughput(bytes: usize, seconds: f64) -> f64 {
    if seconds == 0.0 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let megabytes = bytes as f64 / 1_048_576.0;
    megabytes / seconds
}

/// Packetized memcpy between host and mesh.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    read_window: usize,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferEngine {
    /// Engine issuing reads in full-size windows.
    pub const fn new() -> Self {
        Self {
            read_window: MAX_LOADS_PER_BATCH,
        }
    }

    /// Limit reads to `words` outstanding loads (clamped to `1..=256`).
    #[must_use]
    pub fn with_read_window(mut self, words: usize) -> Self {
        self.read_window = words.clamp(1, MAX_LOADS_PER_BATCH);
        self
    }

    /// Copy `data` to `byte_address` on `tile`.
    ///
    /// # Errors
    ///
    /// Returns `Misaligned` or `LengthNotWordMultiple` before any packet is
    /// issued, or `IoFailure` if the transport fails.
    pub fn write(
        &self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        byte_address: u32,
        data: &[u8],
    ) -> Result<TransferMetrics> {
        validate(byte_address, data.len())?;
        if data.is_empty() {
            return Ok(TransferMetrics::empty());
        }

        let start = Instant::now();
        let word_address = byte_address >> 2;
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        debug!("Write {} words to {tile} at word {word_address:#x}", words.len());
        transport
            .copy_to_tile(tile, word_address, &words)
            .map_err(|e| as_io_failure(e, tile, word_address))?;

        Ok(TransferMetrics::finish(data.len(), words.len(), start))
    }

    /// Fill `buf` from `byte_address` on `tile`.
    ///
    /// # Errors
    ///
    /// Returns `Misaligned` or `LengthNotWordMultiple` before any packet is
    /// issued, `IoFailure` if the transport fails, or `ResponseMismatch` if
    /// the responses cannot be matched to the loads.
    pub fn read(
        &self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        byte_address: u32,
        buf: &mut [u8],
    ) -> Result<TransferMetrics> {
        validate(byte_address, buf.len())?;
        if buf.is_empty() {
            return Ok(TransferMetrics::empty());
        }

        let start = Instant::now();
        let word_address = byte_address >> 2;
        let total_words = buf.len() / 4;
        debug!("Read {total_words} words from {tile} at word {word_address:#x}");

        let mut window_address = word_address;
        for window in buf.chunks_mut(self.read_window * 4) {
            let count = window.len() / 4;
            let responses = transport
                .copy_from_tile(tile, window_address, count)
                .map_err(|e| as_io_failure(e, tile, window_address))?;
            place_responses(tile, window_address, &responses, window)?;

            #[allow(clippy::cast_possible_truncation)]
            let advance = count as u32;
            window_address = window_address.wrapping_add(advance);
        }

        Ok(TransferMetrics::finish(buf.len(), total_words, start))
    }

    /// Direction-tagged transfer: `buf` is the source for
    /// [`Direction::HostToDevice`] and the destination otherwise.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write) or [`read`](Self::read).
    pub fn transfer(
        &self,
        transport: &mut (impl Transport + ?Sized),
        direction: Direction,
        tile: TileCoordinate,
        byte_address: u32,
        buf: &mut [u8],
    ) -> Result<TransferMetrics> {
        match direction {
            Direction::HostToDevice => self.write(transport, tile, byte_address, buf),
            Direction::DeviceToHost => self.read(transport, tile, byte_address, buf),
        }
    }

    /// Copy `data` to `symbol`, as seen from `context`.
    ///
    /// A scratchpad symbol lands on `context`; a DRAM symbol lands on the bank
    /// its address selects.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` if `resolver` lacks the symbol, otherwise as
    /// [`write`](Self::write).
    pub fn write_symbol(
        &self,
        transport: &mut (impl Transport + ?Sized),
        resolver: &dyn SymbolResolver,
        context: TileCoordinate,
        symbol: &str,
        data: &[u8],
    ) -> Result<TransferMetrics> {
        let eva = resolver.resolve(symbol)?;
        let loc = classify(eva, context, transport.mesh());
        debug!("Symbol {symbol} = {eva:#x} -> {:?} on {}", loc.space, loc.coord);
        self.write(transport, loc.coord, eva, data)
    }

    /// Fill `buf` from `symbol`, as seen from `context`.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` if `resolver` lacks the symbol, otherwise as
    /// [`read`](Self::read).
    pub fn read_symbol(
        &self,
        transport: &mut (impl Transport + ?Sized),
        resolver: &dyn SymbolResolver,
        context: TileCoordinate,
        symbol: &str,
        buf: &mut [u8],
    ) -> Result<TransferMetrics> {
        let eva = resolver.resolve(symbol)?;
        let loc = classify(eva, context, transport.mesh());
        debug!("Symbol {symbol} = {eva:#x} -> {:?} on {}", loc.space, loc.coord);
        self.read(transport, loc.coord, eva, buf)
    }

    /// Copy a slice of plain-old-data values.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write).
    pub fn write_slice<T: Pod>(
        &self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        byte_address: u32,
        values: &[T],
    ) -> Result<TransferMetrics> {
        self.write(transport, tile, byte_address, bytemuck::cast_slice(values))
    }

    /// Fill a slice of plain-old-data values.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read).
    pub fn read_slice<T: Pod>(
        &self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        byte_address: u32,
        values: &mut [T],
    ) -> Result<TransferMetrics> {
        self.read(transport, tile, byte_address, bytemuck::cast_slice_mut(values))
    }
}

fn validate(byte_address: u32, len: usize) -> Result<()> {
    if byte_address % 4 != 0 {
        return Err(TransferError::Misaligned {
            address: byte_address,
        }
        .into());
    }
    if len % 4 != 0 {
        return Err(TransferError::LengthNotWordMultiple { len }.into());
    }
    Ok(())
}

/// Transport failures surface as `IoFailure` naming the batch they hit.
fn as_io_failure(err: HostError, tile: TileCoordinate, word_address: u32) -> HostError {
    match err {
        e @ HostError::Transfer(TransferError::IoFailure { .. }) => e,
        other => HostError::io_failure(tile, word_address, other.to_string()),
    }
}

fn place_responses(
    tile: TileCoordinate,
    word_address: u32,
    responses: &[ResponsePacket],
    window: &mut [u8],
) -> Result<()> {
    let count = window.len() / 4;
    let mismatch = |reason: String| -> HostError {
        TransferError::ResponseMismatch {
            tile,
            reason: format!("window at word {word_address:#x}: {reason}"),
        }
        .into()
    };

    let mut seen = vec![false; count];
    for rsp in responses {
        let id = usize::from(rsp.load_id);
        if rsp.op == Opcode::Store {
            return Err(mismatch(format!("store response with load id {id}")));
        }
        if id >= count {
            return Err(mismatch(format!("load id {id} outside {count}-word window")));
        }
        if std::mem::replace(&mut seen[id], true) {
            return Err(mismatch(format!("duplicate load id {id}")));
        }
        window[id * 4..id * 4 + 4].copy_from_slice(&rsp.data.to_le_bytes());
    }

    if let Some(missing) = seen.iter().position(|&s| !s) {
        return Err(mismatch(format!(
            "{} of {count} responses, first missing load id {missing}",
            responses.len()
        )));
    }
    Ok(())
}
