//! Software (simulated mesh) transport
//!
//! Implements [`Transport`] entirely in host memory so every layer above the
//! transport runs in CI without hardware:
//!
//! - **Memory**: sparse word memory per endpoint (compute tiles and DRAM
//!   banks), addressed exactly like the real packets address it.
//! - **Lifecycle**: per-tile freeze / origin / program state.
//! - **Kernels**: the tile instruction set is not simulated. Instead, a host
//!   closure registered under a program name runs when a tile holding that
//!   program is unfrozen, then the tile signals finish (or fail) through the
//!   request FIFO, just as a real kernel would.
//!
//! Test hooks inject transport faults, reorder load responses and push
//! arbitrary tile→host traffic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use manycore_chip::{
    classify, epa, Eva, MeshGeometry, RequestPacket, ResponsePacket, TileCoordinate,
};
use tracing::{debug, info, warn};

use crate::error::{HostError, Result};
use crate::program::{ProgramImage, SymbolResolver};
use crate::transport::{Transport, TransportType, MAX_LOADS_PER_BATCH};

use super::tile_stores;

/// Host-side stand-in for a kernel running on one tile.
///
/// Runs to completion; an error makes the tile signal failure instead of
/// finish.
pub type Kernel = dyn Fn(&mut TileContext<'_>) -> Result<()> + Send + Sync;

/// What a simulated kernel can see: its own coordinate, its group origin, the
/// symbols of its program and the mesh memory.
pub struct TileContext<'a> {
    coord: TileCoordinate,
    origin: TileCoordinate,
    mesh: &'a MeshGeometry,
    image: &'a ProgramImage,
    memory: &'a mut Memory,
}

impl TileContext<'_> {
    /// Tile this kernel runs on.
    pub const fn coord(&self) -> TileCoordinate {
        self.coord
    }

    /// Tile-group origin configured before load.
    pub const fn origin(&self) -> TileCoordinate {
        self.origin
    }

    /// Word at `eva`, as this tile sees it.
    pub fn read_word(&self, eva: Eva) -> u32 {
        let loc = classify(eva, self.coord, self.mesh);
        self.memory.load(loc.coord, epa::word(eva))
    }

    /// Store `value` at `eva`, as this tile sees it.
    pub fn write_word(&mut self, eva: Eva, value: u32) {
        let loc = classify(eva, self.coord, self.mesh);
        self.memory.store(loc.coord, epa::word(eva), value);
    }

    /// `count` words starting at `symbol`.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` if the program has no such symbol.
    pub fn read_symbol(&self, symbol: &str, count: usize) -> Result<Vec<u32>> {
        let base = self.image.resolve(symbol)?;
        Ok((0..count).map(|i| self.read_word(word_offset(base, i))).collect())
    }

    /// Store `words` starting at `symbol`.
    ///
    /// # Errors
    ///
    /// Returns `SymbolNotFound` if the program has no such symbol.
    pub fn write_symbol(&mut self, symbol: &str, words: &[u32]) -> Result<()> {
        let base = self.image.resolve(symbol)?;
        for (i, &w) in words.iter().enumerate() {
            self.write_word(word_offset(base, i), w);
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn word_offset(base: Eva, index: usize) -> Eva {
    base.wrapping_add((index as u32).wrapping_mul(4))
}

/// Packet counters, for asserting what reached the mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshStats {
    /// Store requests delivered by memcpy.
    pub stores: usize,
    /// Load requests delivered by memcpy.
    pub loads: usize,
    /// Freeze, unfreeze, origin and load-program operations.
    pub control_ops: usize,
    /// Kernels run.
    pub kernels_run: usize,
}

#[derive(Debug, Default)]
struct Memory {
    words: HashMap<(TileCoordinate, u32), u32>,
}

impl Memory {
    fn load(&self, endpoint: TileCoordinate, word_address: u32) -> u32 {
        self.words.get(&(endpoint, word_address)).copied().unwrap_or(0)
    }

    fn store(&mut self, endpoint: TileCoordinate, word_address: u32, value: u32) {
        self.words.insert((endpoint, word_address), value);
    }
}

#[derive(Debug, Clone)]
struct SimTile {
    frozen: bool,
    origin: TileCoordinate,
    program: Option<ProgramImage>,
}

/// In-memory mesh.
pub struct SoftwareMesh {
    mesh: MeshGeometry,
    memory: Memory,
    tiles: HashMap<TileCoordinate, SimTile>,
    kernels: HashMap<String, Arc<Kernel>>,
    requests: VecDeque<RequestPacket>,
    faulty: HashSet<TileCoordinate>,
    reorder_responses: bool,
    stats: MeshStats,
}

impl fmt::Debug for SoftwareMesh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kernels: Vec<_> = self.kernels.keys().collect();
        kernels.sort();
        f.debug_struct("SoftwareMesh")
            .field("mesh", &self.mesh)
            .field("kernels", &kernels)
            .field("pending_requests", &self.requests.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl SoftwareMesh {
    /// Empty mesh of the given geometry. Every tile starts running with no
    /// program; all memory reads as zero.
    pub fn new(mesh: MeshGeometry) -> Self {
        Self {
            mesh,
            memory: Memory::default(),
            tiles: HashMap::new(),
            kernels: HashMap::new(),
            requests: VecDeque::new(),
            faulty: HashSet::new(),
            reorder_responses: false,
            stats: MeshStats::default(),
        }
    }

    /// Run `kernel` on any tile whose loaded program is named `program`.
    pub fn register_kernel<F>(&mut self, program: impl Into<String>, kernel: F)
    where
        F: Fn(&mut TileContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let program = program.into();
        debug!("Registered simulated kernel for {program}");
        self.kernels.insert(program, Arc::new(kernel));
    }

    /// Make every memcpy touching `endpoint` fail.
    pub fn inject_fault(&mut self, endpoint: TileCoordinate) {
        self.faulty.insert(endpoint);
    }

    /// Deliver load responses in reverse order.
    pub fn set_reorder_responses(&mut self, reorder: bool) {
        self.reorder_responses = reorder;
    }

    /// Queue an arbitrary tile→host request packet.
    pub fn inject_packet(&mut self, packet: RequestPacket) {
        self.requests.push_back(packet);
    }

    /// Packet counters since creation.
    pub const fn stats(&self) -> MeshStats {
        self.stats
    }

    /// True if `tile` is currently frozen.
    pub fn is_frozen(&self, tile: TileCoordinate) -> bool {
        self.tiles.get(&tile).is_some_and(|t| t.frozen)
    }

    /// Origin configured on `tile`, if any.
    pub fn origin_of(&self, tile: TileCoordinate) -> Option<TileCoordinate> {
        self.tiles.get(&tile).map(|t| t.origin)
    }

    fn check_endpoint(&self, endpoint: TileCoordinate, word_address: u32) -> Result<()> {
        if self.faulty.contains(&endpoint) {
            return Err(HostError::io_failure(endpoint, word_address, "injected fault"));
        }
        if !self.mesh.is_compute_tile(endpoint) && !self.mesh.is_dram_bank(endpoint) {
            return Err(HostError::io_failure(
                endpoint,
                word_address,
                "no memory endpoint at this coordinate",
            ));
        }
        Ok(())
    }

    fn tile_mut(&mut self, tile: TileCoordinate) -> &mut SimTile {
        self.tiles.entry(tile).or_insert(SimTile {
            frozen: false,
            origin: tile,
            program: None,
        })
    }

    fn run_kernel(&mut self, tile: TileCoordinate, origin: TileCoordinate, image: &ProgramImage) {
        let signal = match self.kernels.get(image.name()).cloned() {
            Some(kernel) => {
                let mut ctx = TileContext {
                    coord: tile,
                    origin,
                    mesh: &self.mesh,
                    image,
                    memory: &mut self.memory,
                };
                match kernel(&mut ctx) {
                    Ok(()) => epa::FINISH,
                    Err(e) => {
                        warn!("Simulated kernel {} failed on {tile}: {e}", image.name());
                        epa::FAIL
                    }
                }
            }
            None => {
                debug!("No simulated kernel for {}, {tile} finishes immediately", image.name());
                epa::FINISH
            }
        };
        self.stats.kernels_run += 1;
        self.requests.push_back(RequestPacket::store(
            tile,
            self.mesh.host,
            epa::word(signal),
            0,
        ));
    }
}

impl Transport for SoftwareMesh {
    fn open(device: &str, mesh: &MeshGeometry) -> Result<Self> {
        info!(
            "Opening simulated {}x{} mesh (requested device {device})",
            mesh.columns, mesh.rows
        );
        Ok(Self::new(*mesh))
    }

    fn mesh(&self) -> &MeshGeometry {
        &self.mesh
    }

    fn copy_to_tile(
        &mut self,
        tile: TileCoordinate,
        word_address: u32,
        words: &[u32],
    ) -> Result<()> {
        self.check_endpoint(tile, word_address)?;
        for (addr, &w) in (word_address..).zip(words) {
            self.memory.store(tile, addr, w);
        }
        self.stats.stores += words.len();
        Ok(())
    }

    fn copy_from_tile(
        &mut self,
        tile: TileCoordinate,
        word_address: u32,
        count: usize,
    ) -> Result<Vec<ResponsePacket>> {
        self.check_endpoint(tile, word_address)?;
        if count > MAX_LOADS_PER_BATCH {
            return Err(HostError::io_failure(
                tile,
                word_address,
                format!("{count} loads exceed the {MAX_LOADS_PER_BATCH}-entry load-id space"),
            ));
        }

        #[allow(clippy::cast_possible_truncation)]
        let mut responses: Vec<_> = (word_address..)
            .take(count)
            .enumerate()
            .map(|(i, addr)| {
                ResponsePacket::load(self.mesh.host, i as u8, self.memory.load(tile, addr))
            })
            .collect();
        if self.reorder_responses {
            responses.reverse();
        }
        self.stats.loads += count;
        Ok(responses)
    }

    fn freeze_tile(&mut self, tile: TileCoordinate) -> Result<()> {
        self.stats.control_ops += 1;
        self.tile_mut(tile).frozen = true;
        Ok(())
    }

    fn unfreeze_tile(&mut self, tile: TileCoordinate) -> Result<()> {
        self.stats.control_ops += 1;
        let state = self.tile_mut(tile);
        let was_frozen = std::mem::replace(&mut state.frozen, false);
        let origin = state.origin;
        let program = state.program.clone();

        if let (true, Some(image)) = (was_frozen, program) {
            self.run_kernel(tile, origin, &image);
        }
        Ok(())
    }

    fn set_group_origin(&mut self, tile: TileCoordinate, origin: TileCoordinate) -> Result<()> {
        self.stats.control_ops += 1;
        self.tile_mut(tile).origin = origin;
        Ok(())
    }

    fn load_program(&mut self, tile: TileCoordinate, image: &ProgramImage) -> Result<()> {
        let stores = tile_stores(tile, image)?;
        self.stats.control_ops += 1;
        for store in stores {
            self.memory.store(store.endpoint, store.word_address, store.data);
        }
        self.tile_mut(tile).program = Some(image.clone());
        Ok(())
    }

    fn receive_packet(&mut self, _timeout: Option<Duration>) -> Result<Option<RequestPacket>> {
        // Nothing else can produce traffic, so an empty FIFO stays empty.
        Ok(self.requests.pop_front())
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Software
    }
}
