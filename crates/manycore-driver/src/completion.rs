//! Completion synchronizer
//!
//! Kernels report completion by storing to the host I/O endpoint: a store to
//! [`epa::FINISH`] means done, a store to [`epa::FAIL`] means the kernel gave
//! up. The synchronizer drains the tile→host request FIFO until every expected
//! tile has reported.
//!
//! Two modes:
//!
//! - **Counting**: wait for `n` finish signals, whoever sends them.
//! - **Tracking**: wait for one finish signal from each member of a group; a
//!   signal from a tile that is not (or no longer) outstanding is an error.
//!
//! Any other tile→host packet is logged and ignored.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use manycore_chip::{epa, RequestPacket, TileCoordinate};
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::group::TileGroup;
use crate::transport::Transport;

#[derive(Debug, Clone)]
enum Expected {
    Count(usize),
    Tiles(BTreeSet<TileCoordinate>),
}

/// Outcome of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    /// Tiles that signalled finish, in arrival order.
    pub finished: Vec<TileCoordinate>,
    /// Non-completion packets seen (and ignored) while waiting.
    pub ignored_packets: usize,
    /// Time spent waiting.
    pub elapsed: Duration,
}

/// Blocks until the expected completion signals arrive.
#[derive(Debug, Clone)]
pub struct CompletionSynchronizer {
    expected: Expected,
    timeout: Option<Duration>,
}

impl CompletionSynchronizer {
    /// Wait for `n` finish signals from any tiles. No timeout.
    pub const fn counting(n: usize) -> Self {
        Self {
            expected: Expected::Count(n),
            timeout: None,
        }
    }

    /// Wait for one finish signal from every member of `group`. No timeout.
    pub fn for_group(group: &TileGroup) -> Self {
        Self {
            expected: Expected::Tiles(group.tiles().collect()),
            timeout: None,
        }
    }

    /// Give up after `timeout` (`None` waits forever).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of signals still awaited.
    pub fn expected(&self) -> usize {
        match &self.expected {
            Expected::Count(n) => *n,
            Expected::Tiles(tiles) => tiles.len(),
        }
    }

    /// Drain the request FIFO until every expected tile has finished.
    ///
    /// # Errors
    ///
    /// - `SyncError::Timeout` if the deadline passes first
    /// - `SyncError::KernelFailed` on a fail signal
    /// - `SyncError::UnexpectedSignal` (tracking mode) on a finish signal from
    ///   a tile that is not outstanding
    /// - transport receive errors
    pub fn await_completion(
        &self,
        transport: &mut (impl Transport + ?Sized),
    ) -> Result<CompletionReport> {
        let expected = self.expected();
        let start = Instant::now();
        let deadline = self.timeout.map(|t| start + t);
        let mut outstanding = self.expected.clone();
        let mut finished = Vec::with_capacity(expected);
        let mut ignored_packets = 0;

        info!("Awaiting {expected} completion signals");

        while !is_done(&outstanding) {
            let remaining = match deadline {
                Some(d) => match d.checked_duration_since(Instant::now()) {
                    Some(r) if !r.is_zero() => Some(r),
                    _ => return Err(timeout_error(expected, finished.len(), start)),
                },
                None => None,
            };

            let Some(pkt) = transport.receive_packet(remaining)? else {
                return Err(timeout_error(expected, finished.len(), start));
            };

            match classify_signal(&pkt) {
                Signal::Finish => {
                    let tile = pkt.src;
                    match &mut outstanding {
                        Expected::Count(n) => *n -= 1,
                        Expected::Tiles(tiles) => {
                            if !tiles.remove(&tile) {
                                warn!("Finish signal from {tile}, which is not outstanding");
                                return Err(SyncError::UnexpectedSignal { tile }.into());
                            }
                        }
                    }
                    debug!("Tile {tile} finished ({} of {expected})", finished.len() + 1);
                    finished.push(tile);
                }
                Signal::Fail => {
                    warn!("Tile {} reported kernel failure", pkt.src);
                    return Err(SyncError::KernelFailed { tile: pkt.src }.into());
                }
                Signal::Other => {
                    debug!("Ignoring {pkt}");
                    ignored_packets += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        info!("All {expected} tiles finished in {elapsed:?}");
        Ok(CompletionReport {
            finished,
            ignored_packets,
            elapsed,
        })
    }
}

enum Signal {
    Finish,
    Fail,
    Other,
}

fn classify_signal(pkt: &RequestPacket) -> Signal {
    if pkt.is_store_to(epa::FINISH) {
        Signal::Finish
    } else if pkt.is_store_to(epa::FAIL) {
        Signal::Fail
    } else {
        Signal::Other
    }
}

fn is_done(outstanding: &Expected) -> bool {
    match outstanding {
        Expected::Count(n) => *n == 0,
        Expected::Tiles(tiles) => tiles.is_empty(),
    }
}

fn timeout_error(expected: usize, received: usize, start: Instant) -> crate::error::HostError {
    let waited_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    warn!("Completion timed out: {received} of {expected} signals after {waited_ms}ms");
    SyncError::Timeout {
        expected,
        received,
        waited_ms,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareMesh;
    use crate::error::HostError;
    use manycore_chip::MeshGeometry;

    const HOST: TileCoordinate = TileCoordinate::new(0, 0);

    fn finish(tile: TileCoordinate) -> RequestPacket {
        RequestPacket::store(tile, HOST, epa::word(epa::FINISH), 0)
    }

    fn sim_with(packets: impl IntoIterator<Item = RequestPacket>) -> SoftwareMesh {
        let mut sim = SoftwareMesh::new(MeshGeometry::REFERENCE_4X4);
        for p in packets {
            sim.inject_packet(p);
        }
        sim
    }

    #[test]
    fn counting_accepts_any_order() {
        let group = TileGroup::rectangle(0, 1, 4, 4).unwrap();
        let mut tiles: Vec<_> = group.tiles().collect();
        tiles.reverse();
        tiles.swap(2, 9);
        let mut sim = sim_with(tiles.iter().map(|&t| finish(t)));

        let report = CompletionSynchronizer::counting(12).await_completion(&mut sim).unwrap();
        assert_eq!(report.finished.len(), 12);
        assert_eq!(report.finished[0], TileCoordinate::new(3, 3));
    }

    #[test]
    fn zero_expected_returns_immediately() {
        let mut sim = SoftwareMesh::new(MeshGeometry::REFERENCE_4X4);
        let report = CompletionSynchronizer::counting(0).await_completion(&mut sim).unwrap();
        assert!(report.finished.is_empty());
    }

    #[test]
    fn missing_signal_times_out() {
        let mut sim = sim_with([finish(TileCoordinate::new(1, 1))]);
        let err = CompletionSynchronizer::counting(2)
            .with_timeout(Some(Duration::from_millis(50)))
            .await_completion(&mut sim)
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Sync(SyncError::Timeout {
                expected: 2,
                received: 1,
                ..
            })
        ));
    }

    #[test]
    fn tracking_rejects_duplicates() {
        let group = TileGroup::rectangle(0, 1, 2, 2).unwrap();
        let dup = TileCoordinate::new(0, 1);
        let mut sim = sim_with([finish(dup), finish(dup)]);
        let err = CompletionSynchronizer::for_group(&group)
            .await_completion(&mut sim)
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Sync(SyncError::UnexpectedSignal { tile }) if tile == dup
        ));
    }

    #[test]
    fn tracking_rejects_strangers() {
        let group = TileGroup::rectangle(0, 1, 1, 2).unwrap();
        let mut sim = sim_with([finish(TileCoordinate::new(3, 3))]);
        assert!(CompletionSynchronizer::for_group(&group)
            .await_completion(&mut sim)
            .is_err());
    }

    #[test]
    fn fail_signal_surfaces_tile() {
        let bad = TileCoordinate::new(2, 2);
        let mut sim = sim_with([RequestPacket::store(bad, HOST, epa::word(epa::FAIL), 1)]);
        let err = CompletionSynchronizer::counting(1).await_completion(&mut sim).unwrap_err();
        assert!(matches!(
            err,
            HostError::Sync(SyncError::KernelFailed { tile }) if tile == bad
        ));
    }

    #[test]
    fn other_traffic_is_ignored() {
        let t = TileCoordinate::new(1, 3);
        let print = RequestPacket::store(t, HOST, epa::word(0xEAD4), u32::from(b'A'));
        let mut sim = sim_with([print, finish(t)]);
        let report = CompletionSynchronizer::counting(1).await_completion(&mut sim).unwrap();
        assert_eq!(report.ignored_packets, 1);
        assert_eq!(report.finished, vec![t]);
    }
}
