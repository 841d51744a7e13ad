//! Orchestration driver
//!
//! [`Manycore`] owns the one transport handle of the process and threads it
//! through the lifecycle controller, the transfer engine and the completion
//! synchronizer. A typical launch:
//!
//! ```text
//! launch(group, image)      freeze + origin + load, per member
//! write_symbol(...)         populate inputs
//! run(group)                unfreeze all, await one finish per member
//! read_symbol(...)          retrieve outputs
//! ```

use bytemuck::Pod;
use manycore_chip::TileCoordinate;
use tracing::info;

use crate::completion::{CompletionReport, CompletionSynchronizer};
use crate::config::HostConfig;
use crate::error::Result;
use crate::group::TileGroup;
use crate::lifecycle::TileLifecycle;
use crate::program::{ProgramImage, SymbolResolver};
use crate::transfer::{TransferEngine, TransferMetrics};
use crate::transport::{select_transport, Transport, TransportSelection};

/// Host-side handle on one mesh.
#[derive(Debug)]
pub struct Manycore<T: Transport + ?Sized> {
    transport: Box<T>,
    config: HostConfig,
    lifecycle: TileLifecycle,
    engine: TransferEngine,
}

impl Manycore<dyn Transport> {
    /// Open the transport `selection` picks for `device`.
    ///
    /// # Errors
    ///
    /// Returns `HostError::TransportInit` if no transport can be opened.
    pub fn open(selection: TransportSelection, device: &str, config: HostConfig) -> Result<Self> {
        let transport = select_transport(selection, device, &config.mesh)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport + ?Sized> Manycore<T> {
    /// Wrap an open transport.
    pub fn new(transport: Box<T>, config: HostConfig) -> Self {
        info!(
            "Host ready: {} transport, {}x{} mesh",
            transport.transport_type(),
            config.mesh.columns,
            config.mesh.rows
        );
        Self {
            lifecycle: TileLifecycle::new(config.mesh),
            transport,
            config,
            engine: TransferEngine::new(),
        }
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably (for backend-specific hooks).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Active configuration.
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Host-side tile states.
    pub const fn lifecycle(&self) -> &TileLifecycle {
        &self.lifecycle
    }

    /// Lifecycle controller and transport together, for single-tile control.
    pub fn lifecycle_mut(&mut self) -> (&mut TileLifecycle, &mut T) {
        (&mut self.lifecycle, &mut *self.transport)
    }

    /// Freeze, configure and load `image` onto every member of `group`.
    ///
    /// # Errors
    ///
    /// Returns the first lifecycle or transport failure.
    pub fn launch(&mut self, group: &TileGroup, image: &ProgramImage) -> Result<()> {
        self.lifecycle.prepare_group(&mut *self.transport, group, image)
    }

    /// Release every member of `group` and wait for each to finish.
    ///
    /// # Errors
    ///
    /// Returns the first unfreeze failure, or any completion failure
    /// (timeout, kernel failure, unexpected signal).
    pub fn run(&mut self, group: &TileGroup) -> Result<CompletionReport> {
        self.lifecycle.unfreeze_group(&mut *self.transport, group)?;
        CompletionSynchronizer::for_group(group)
            .with_timeout(self.config.completion_timeout)
            .await_completion(&mut *self.transport)
    }

    /// Release every member of `group` and wait for `expected` finish signals
    /// from any tiles.
    ///
    /// # Errors
    ///
    /// As [`run`](Self::run).
    pub fn run_counting(&mut self, group: &TileGroup, expected: usize) -> Result<CompletionReport> {
        self.lifecycle.unfreeze_group(&mut *self.transport, group)?;
        CompletionSynchronizer::counting(expected)
            .with_timeout(self.config.completion_timeout)
            .await_completion(&mut *self.transport)
    }

    /// Copy `values` to `symbol` as seen from `tile`.
    ///
    /// # Errors
    ///
    /// Returns any transfer error.
    pub fn write_symbol<E: Pod>(
        &mut self,
        resolver: &dyn SymbolResolver,
        tile: TileCoordinate,
        symbol: &str,
        values: &[E],
    ) -> Result<TransferMetrics> {
        self.engine.write_symbol(
            &mut *self.transport,
            resolver,
            tile,
            symbol,
            bytemuck::cast_slice(values),
        )
    }

    /// Fill `values` from `symbol` as seen from `tile`.
    ///
    /// # Errors
    ///
    /// Returns any transfer error.
    pub fn read_symbol<E: Pod>(
        &mut self,
        resolver: &dyn SymbolResolver,
        tile: TileCoordinate,
        symbol: &str,
        values: &mut [E],
    ) -> Result<TransferMetrics> {
        self.engine.read_symbol(
            &mut *self.transport,
            resolver,
            tile,
            symbol,
            bytemuck::cast_slice_mut(values),
        )
    }

    /// Copy `values` to `byte_address` on `tile`.
    ///
    /// # Errors
    ///
    /// Returns any transfer error.
    pub fn write<E: Pod>(
        &mut self,
        tile: TileCoordinate,
        byte_address: u32,
        values: &[E],
    ) -> Result<TransferMetrics> {
        self.engine.write_slice(&mut *self.transport, tile, byte_address, values)
    }

    /// Fill `values` from `byte_address` on `tile`.
    ///
    /// # Errors
    ///
    /// Returns any transfer error.
    pub fn read<E: Pod>(
        &mut self,
        tile: TileCoordinate,
        byte_address: u32,
        values: &mut [E],
    ) -> Result<TransferMetrics> {
        self.engine.read_slice(&mut *self.transport, tile, byte_address, values)
    }
}
