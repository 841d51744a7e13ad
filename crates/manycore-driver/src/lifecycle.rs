//! Tile lifecycle controller
//!
//! Tracks, on the host, where each tile is in its launch sequence and refuses
//! anything out of order before a packet is sent:
//!
//! ```text
//!   Running ──freeze──▶ Frozen ──set_origin──▶ OriginSet ──load_program──▶ ProgramLoaded
//!      ▲                  │                                                   │
//!      └────unfreeze──────┴───────────────────unfreeze────────────────────────┘
//! ```
//!
//! `freeze` is accepted from any state. A tile the controller has never seen
//! is assumed `Running`.

use std::collections::HashMap;
use std::fmt;

use manycore_chip::{MeshGeometry, TileCoordinate};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::group::TileGroup;
use crate::program::ProgramImage;
use crate::transport::Transport;

/// Host-side view of a tile's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileState {
    /// Fetching instructions (or idle after finishing).
    #[default]
    Running,
    /// Instruction fetch halted.
    Frozen,
    /// Frozen with its tile-group origin configured.
    OriginSet,
    /// Frozen with a program loaded; ready to run.
    ProgramLoaded,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Frozen => write!(f, "frozen"),
            Self::OriginSet => write!(f, "origin-set"),
            Self::ProgramLoaded => write!(f, "program-loaded"),
        }
    }
}

/// Lifecycle operation, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOperation {
    /// Halt the tile.
    Freeze,
    /// Configure the tile-group origin.
    SetOrigin,
    /// Copy a program image into the tile.
    LoadProgram,
    /// Release the tile.
    Unfreeze,
}

impl fmt::Display for TileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Freeze => write!(f, "freeze"),
            Self::SetOrigin => write!(f, "set origin of"),
            Self::LoadProgram => write!(f, "load program onto"),
            Self::Unfreeze => write!(f, "unfreeze"),
        }
    }
}

/// Drives tiles through freeze → origin → load → unfreeze.
#[derive(Debug, Clone)]
pub struct TileLifecycle {
    mesh: MeshGeometry,
    states: HashMap<TileCoordinate, TileState>,
}

impl TileLifecycle {
    /// Controller for `mesh`; every tile starts `Running`.
    pub fn new(mesh: MeshGeometry) -> Self {
        Self {
            mesh,
            states: HashMap::new(),
        }
    }

    /// Current state of `tile`.
    pub fn state(&self, tile: TileCoordinate) -> TileState {
        self.states.get(&tile).copied().unwrap_or_default()
    }

    /// Halt `tile`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::IoTileTargeted` for I/O row tiles and
    /// `ConfigError::OutsideMesh` for tiles outside the mesh, in both cases
    /// without touching the transport. Transport errors propagate.
    pub fn freeze(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
    ) -> Result<()> {
        self.check(tile, TileOperation::Freeze, |_| true)?;
        transport.freeze_tile(tile)?;
        self.set(tile, TileState::Frozen);
        Ok(())
    }

    /// Configure `tile`'s group origin. `tile` must be `Frozen`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the tile is invalid or not frozen.
    pub fn set_origin(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        origin: TileCoordinate,
    ) -> Result<()> {
        self.check(tile, TileOperation::SetOrigin, |s| s == TileState::Frozen)?;
        if !self.mesh.contains(origin) {
            return Err(ConfigError::OutsideMesh { tile: origin }.into());
        }
        transport.set_group_origin(tile, origin)?;
        self.set(tile, TileState::OriginSet);
        Ok(())
    }

    /// Load `image` onto `tile`, DRAM segments included. `tile` must be in
    /// `OriginSet`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the tile is invalid or its origin is not
    /// set. Transport errors propagate.
    pub fn load_program(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        image: &ProgramImage,
    ) -> Result<()> {
        self.load_member(transport, tile, image)?;
        transport.load_shared_segments(image)
    }

    /// Release `tile`. `tile` must be `Frozen` or `ProgramLoaded`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the tile is invalid, already running or
    /// half configured. Transport errors propagate.
    pub fn unfreeze(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
    ) -> Result<()> {
        self.check(tile, TileOperation::Unfreeze, |s| {
            matches!(s, TileState::Frozen | TileState::ProgramLoaded)
        })?;
        transport.unfreeze_tile(tile)?;
        self.set(tile, TileState::Running);
        Ok(())
    }

    /// Freeze every member of `group`, row-major. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first member failure; earlier members stay frozen.
    pub fn freeze_group(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        group: &TileGroup,
    ) -> Result<()> {
        debug!("Freezing {} tiles", group.len());
        for tile in group.tiles() {
            self.freeze(transport, tile)?;
        }
        Ok(())
    }

    /// Set the origin and load `image` on every (frozen) member of `group`.
    ///
    /// # Errors
    ///
    /// Returns the first member failure; the group is left partially
    /// configured.
    pub fn load_group(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        group: &TileGroup,
        image: &ProgramImage,
    ) -> Result<()> {
        let origin = group.origin();
        info!(
            "Loading {} onto {} tiles, origin {origin}",
            image.name(),
            group.len()
        );
        for tile in group.tiles() {
            self.set_origin(transport, tile, origin)?;
            self.load_member(transport, tile, image)?;
        }
        transport.load_shared_segments(image)
    }

    /// Freeze, set origin and load `image` on each member in turn.
    ///
    /// Unlike [`freeze_group`](Self::freeze_group) followed by
    /// [`load_group`](Self::load_group), each tile is fully prepared before the
    /// next one is touched.
    ///
    /// # Errors
    ///
    /// Returns the first member failure.
    pub fn prepare_group(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        group: &TileGroup,
        image: &ProgramImage,
    ) -> Result<()> {
        let origin = group.origin();
        info!(
            "Preparing {} tiles with {}, origin {origin}",
            group.len(),
            image.name()
        );
        for tile in group.tiles() {
            self.freeze(transport, tile)?;
            self.set_origin(transport, tile, origin)?;
            self.load_member(transport, tile, image)?;
        }
        transport.load_shared_segments(image)
    }

    /// Unfreeze every member of `group`, row-major.
    ///
    /// # Errors
    ///
    /// Returns the first member failure; earlier members are already running.
    pub fn unfreeze_group(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        group: &TileGroup,
    ) -> Result<()> {
        debug!("Unfreezing {} tiles", group.len());
        for tile in group.tiles() {
            self.unfreeze(transport, tile)?;
        }
        Ok(())
    }

    /// Tile-resident part of a load; DRAM segments are the caller's job.
    fn load_member(
        &mut self,
        transport: &mut (impl Transport + ?Sized),
        tile: TileCoordinate,
        image: &ProgramImage,
    ) -> Result<()> {
        self.check(tile, TileOperation::LoadProgram, |s| s == TileState::OriginSet)?;
        transport.load_program(tile, image)?;
        self.set(tile, TileState::ProgramLoaded);
        Ok(())
    }

    fn check(
        &self,
        tile: TileCoordinate,
        operation: TileOperation,
        allowed: impl Fn(TileState) -> bool,
    ) -> Result<()> {
        if !self.mesh.contains(tile) {
            return Err(ConfigError::OutsideMesh { tile }.into());
        }
        if self.mesh.is_io_tile(tile) {
            return Err(ConfigError::IoTileTargeted { tile, operation }.into());
        }
        let state = self.state(tile);
        if !allowed(state) {
            return Err(ConfigError::InvalidTransition {
                tile,
                operation,
                state,
            }
            .into());
        }
        Ok(())
    }

    fn set(&mut self, tile: TileCoordinate, state: TileState) {
        debug!("Tile {tile}: {} -> {state}", self.state(tile));
        self.states.insert(tile, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareMesh;
    use crate::error::HostError;

    fn setup() -> (TileLifecycle, SoftwareMesh, ProgramImage) {
        let mesh = MeshGeometry::REFERENCE_4X4;
        let image = ProgramImage::from_symbols("noop", [("x", 0x1000)]);
        (TileLifecycle::new(mesh), SoftwareMesh::new(mesh), image)
    }

    #[test]
    fn full_sequence() {
        let (mut lc, mut t, image) = setup();
        let tile = TileCoordinate::new(1, 1);
        assert_eq!(lc.state(tile), TileState::Running);

        lc.freeze(&mut t, tile).unwrap();
        lc.set_origin(&mut t, tile, tile).unwrap();
        lc.load_program(&mut t, tile, &image).unwrap();
        assert_eq!(lc.state(tile), TileState::ProgramLoaded);
        lc.unfreeze(&mut t, tile).unwrap();
        assert_eq!(lc.state(tile), TileState::Running);
    }

    #[test]
    fn io_row_rejected_without_transport_call() {
        let (mut lc, mut t, _) = setup();
        let err = lc.freeze(&mut t, TileCoordinate::new(2, 0)).unwrap_err();
        assert!(matches!(
            err,
            HostError::Config(ConfigError::IoTileTargeted {
                operation: TileOperation::Freeze,
                ..
            })
        ));
        assert_eq!(t.stats().control_ops, 0);
    }

    #[test]
    fn outside_mesh_rejected() {
        let (mut lc, mut t, _) = setup();
        let err = lc.freeze(&mut t, TileCoordinate::new(4, 1)).unwrap_err();
        assert!(matches!(err, HostError::Config(ConfigError::OutsideMesh { .. })));
    }

    #[test]
    fn out_of_order_calls_rejected() {
        let (mut lc, mut t, image) = setup();
        let tile = TileCoordinate::new(0, 2);

        let err = lc.load_program(&mut t, tile, &image).unwrap_err();
        assert!(matches!(
            err,
            HostError::Config(ConfigError::InvalidTransition {
                state: TileState::Running,
                operation: TileOperation::LoadProgram,
                ..
            })
        ));

        let err = lc.unfreeze(&mut t, tile).unwrap_err();
        assert!(matches!(
            err,
            HostError::Config(ConfigError::InvalidTransition { state: TileState::Running, .. })
        ));

        lc.freeze(&mut t, tile).unwrap();
        lc.set_origin(&mut t, tile, tile).unwrap();
        let err = lc.unfreeze(&mut t, tile).unwrap_err();
        assert!(matches!(
            err,
            HostError::Config(ConfigError::InvalidTransition { state: TileState::OriginSet, .. })
        ));
        assert_eq!(t.stats().control_ops, 2);
    }

    #[test]
    fn frozen_tile_can_be_released_without_program() {
        let (mut lc, mut t, _) = setup();
        let tile = TileCoordinate::new(3, 3);
        lc.freeze(&mut t, tile).unwrap();
        lc.unfreeze(&mut t, tile).unwrap();
        assert_eq!(lc.state(tile), TileState::Running);
    }

    #[test]
    fn group_failure_leaves_earlier_members_configured() {
        let (mut lc, mut t, image) = setup();
        let group = TileGroup::from_tiles([
            TileCoordinate::new(0, 1),
            TileCoordinate::new(1, 1),
            TileCoordinate::new(2, 0),
        ])
        .unwrap();

        // (2, 0) sorts first (row 0) and is rejected before anything happens.
        assert!(lc.prepare_group(&mut t, &group, &image).is_err());
        assert_eq!(lc.state(TileCoordinate::new(0, 1)), TileState::Running);

        let group = TileGroup::rectangle(0, 1, 2, 2).unwrap();
        lc.prepare_group(&mut t, &group, &image).unwrap();
        for tile in group.tiles() {
            assert_eq!(lc.state(tile), TileState::ProgramLoaded);
        }
    }

    #[test]
    fn staged_group_launch() {
        let (mut lc, mut t, image) = setup();
        let group = TileGroup::rectangle(1, 1, 3, 3).unwrap();

        lc.freeze_group(&mut t, &group).unwrap();
        for tile in group.tiles() {
            assert_eq!(lc.state(tile), TileState::Frozen);
            assert!(t.is_frozen(tile));
        }

        lc.load_group(&mut t, &group, &image).unwrap();
        for tile in group.tiles() {
            assert_eq!(lc.state(tile), TileState::ProgramLoaded);
            assert_eq!(t.origin_of(tile), Some(group.origin()));
        }

        lc.unfreeze_group(&mut t, &group).unwrap();
        for tile in group.tiles() {
            assert_eq!(lc.state(tile), TileState::Running);
            assert!(!t.is_frozen(tile));
        }
        assert_eq!(t.stats().kernels_run, 4);
    }

    #[test]
    fn load_group_needs_frozen_members() {
        let (mut lc, mut t, image) = setup();
        let group = TileGroup::rectangle(0, 2, 2, 3).unwrap();

        let err = lc.load_group(&mut t, &group, &image).unwrap_err();
        assert!(matches!(
            err,
            HostError::Config(ConfigError::InvalidTransition {
                state: TileState::Running,
                operation: TileOperation::SetOrigin,
                ..
            })
        ));
        assert_eq!(t.stats().control_ops, 0);
        assert_eq!(lc.state(TileCoordinate::new(1, 2)), TileState::Running);
    }

    #[test]
    fn freeze_group_stops_at_first_failure() {
        let (mut lc, mut t, _) = setup();
        // Row-major: (0, 1), then (5, 1) outside the 4-column mesh, then (1, 2).
        let group = TileGroup::from_tiles([
            TileCoordinate::new(1, 2),
            TileCoordinate::new(5, 1),
            TileCoordinate::new(0, 1),
        ])
        .unwrap();

        let err = lc.freeze_group(&mut t, &group).unwrap_err();
        assert!(matches!(err, HostError::Config(ConfigError::OutsideMesh { tile })
            if tile == TileCoordinate::new(5, 1)));
        assert_eq!(lc.state(TileCoordinate::new(0, 1)), TileState::Frozen);
        assert_eq!(lc.state(TileCoordinate::new(1, 2)), TileState::Running);
        assert_eq!(t.stats().control_ops, 1);
    }

    #[test]
    fn dram_segments_are_written_once_per_group() {
        use crate::program::test_elf;

        let (mut lc, mut t, _) = setup();
        let elf = test_elf::build(&[], Some((0x8000_0100, &[1, 0, 0, 0, 2, 0, 0, 0], false)));
        let image = ProgramImage::from_elf("shared", elf).unwrap();

        let group = TileGroup::rectangle(0, 1, 3, 2).unwrap();
        lc.prepare_group(&mut t, &group, &image).unwrap();
        assert_eq!(t.stats().stores, 2);

        lc.freeze_group(&mut t, &group).unwrap();
        lc.load_group(&mut t, &group, &image).unwrap();
        assert_eq!(t.stats().stores, 4);

        // A single-tile load still carries the shared data.
        let tile = TileCoordinate::new(3, 3);
        lc.freeze(&mut t, tile).unwrap();
        lc.set_origin(&mut t, tile, tile).unwrap();
        lc.load_program(&mut t, tile, &image).unwrap();
        assert_eq!(t.stats().stores, 6);

        let bank = TileCoordinate::new(0, 4);
        let words = t.copy_from_tile(bank, 0x8000_0100 >> 2, 2).unwrap();
        assert_eq!(words.iter().map(|r| r.data).collect::<Vec<_>>(), [1, 2]);
    }

    #[test]
    fn oversized_image_is_rejected_before_any_store() {
        use crate::program::test_elf;

        let (mut lc, mut t, _) = setup();
        let elf = test_elf::build_with_mem_size(&[], (0x1000, &[], false), 0x0400_0000);
        let image = ProgramImage::from_elf("bloated", elf).unwrap();
        let group = TileGroup::rectangle(0, 1, 2, 2).unwrap();

        let err = lc.prepare_group(&mut t, &group, &image).unwrap_err();
        assert!(matches!(err, HostError::Program { .. }));
        assert_eq!(t.stats().stores, 0);
        assert_eq!(lc.state(TileCoordinate::new(0, 1)), TileState::OriginSet);
    }
}
