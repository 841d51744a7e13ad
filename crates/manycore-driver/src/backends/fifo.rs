//! Packet FIFO device transport
//!
//! The host interface exposes three character-device channels per mesh:
//!
//! ```text
//! {base}-tx       host → mesh request packets            (write)
//! {base}-rx-rsp   mesh → host load responses             (read)
//! {base}-rx-req   tile → host requests (finish, fail...) (read)
//! ```
//!
//! `base` is `/dev/manycore{N}` when the device is given as an index, or the
//! device string itself otherwise.
//!
//! Control operations are ordinary stores to endpoint addresses on the tile:
//! freeze / unfreeze write the freeze CSR, the group origin is two CSR writes,
//! and program load writes every word of every loadable segment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use manycore_chip::{epa, MeshGeometry, RequestPacket, ResponsePacket, TileCoordinate};
use rustix::fd::OwnedFd;
use rustix::fs::OFlags;
use tracing::{debug, info};

use crate::error::{HostError, Result};
use crate::io::IoHandle;
use crate::program::ProgramImage;
use crate::transport::{Transport, TransportType, MAX_LOADS_PER_BATCH};

use super::tile_stores;

/// How long to wait for each load response before declaring the read failed.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Transport over the packet FIFO device.
#[derive(Debug)]
pub struct FifoDevice {
    mesh: MeshGeometry,
    tx: IoHandle,
    rx_response: IoHandle,
    rx_request: IoHandle,
    response_timeout: Duration,
}

impl FifoDevice {
    /// Build from already-open channels.
    pub fn from_channels(
        mesh: MeshGeometry,
        tx: OwnedFd,
        rx_response: OwnedFd,
        rx_request: OwnedFd,
    ) -> Self {
        Self {
            mesh,
            tx: IoHandle::new(tx),
            rx_response: IoHandle::new(rx_response),
            rx_request: IoHandle::new(rx_request),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Override the per-response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Channel path prefix for `device`.
    pub fn base_path(device: &str) -> PathBuf {
        if device.parse::<u32>().is_ok() {
            PathBuf::from(format!("/dev/manycore{device}"))
        } else {
            PathBuf::from(device)
        }
    }

    fn channel_path(base: &Path, suffix: &str) -> PathBuf {
        let mut name = base.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn store(&mut self, tile: TileCoordinate, word_address: u32, data: u32) -> Result<()> {
        let pkt = RequestPacket::store(self.mesh.host, tile, word_address, data);
        self.tx
            .write_packet(&pkt.encode())
            .map_err(|e| HostError::io_failure(tile, word_address, format!("store: {e}")))
    }
}

impl Transport for FifoDevice {
    fn open(device: &str, mesh: &MeshGeometry) -> Result<Self> {
        let base = Self::base_path(device);
        let open = |suffix: &str, flags: OFlags| {
            let path = Self::channel_path(&base, suffix);
            IoHandle::open(&path, flags)
                .map_err(|e| HostError::transport_init(format!("{}: {e}", path.display())))
        };

        let tx = open("-tx", OFlags::WRONLY)?;
        let rx_response = open("-rx-rsp", OFlags::RDONLY)?;
        let rx_request = open("-rx-req", OFlags::RDONLY)?;

        info!(
            "FIFO transport opened on {} for a {}x{} mesh",
            base.display(),
            mesh.columns,
            mesh.rows
        );

        Ok(Self {
            mesh: *mesh,
            tx,
            rx_response,
            rx_request,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        })
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
        for (addr, &w) in (word_address..).zip(words) {
            self.store(tile, addr, w)?;
        }
        Ok(())
    }

    fn copy_from_tile(
        &mut self,
        tile: TileCoordinate,
        word_address: u32,
        count: usize,
    ) -> Result<Vec<ResponsePacket>> {
        if count > MAX_LOADS_PER_BATCH {
            return Err(HostError::io_failure(
                tile,
                word_address,
                format!("{count} loads exceed the {MAX_LOADS_PER_BATCH}-entry load-id space"),
            ));
        }

        #[allow(clippy::cast_possible_truncation)]
        for (i, addr) in (word_address..).take(count).enumerate() {
            let pkt = RequestPacket::load(self.mesh.host, tile, addr, i as u8);
            self.tx
                .write_packet(&pkt.encode())
                .map_err(|e| HostError::io_failure(tile, addr, format!("load: {e}")))?;
        }

        let mut responses = Vec::with_capacity(count);
        while responses.len() < count {
            let ready = self
                .rx_response
                .wait_readable(Some(self.response_timeout))
                .map_err(|e| HostError::io_failure(tile, word_address, e.to_string()))?;
            if !ready {
                return Err(HostError::io_failure(
                    tile,
                    word_address,
                    format!(
                        "{} of {count} responses after {:?}",
                        responses.len(),
                        self.response_timeout
                    ),
                ));
            }
            let raw = self
                .rx_response
                .read_packet()
                .map_err(|e| HostError::io_failure(tile, word_address, e.to_string()))?;
            let rsp = ResponsePacket::decode(&raw)
                .map_err(|e| HostError::io_failure(tile, word_address, e.to_string()))?;
            responses.push(rsp);
        }
        Ok(responses)
    }

    fn freeze_tile(&mut self, tile: TileCoordinate) -> Result<()> {
        debug!("Freeze {tile}");
        self.store(tile, epa::word(epa::CSR_FREEZE), epa::csr::FREEZE)
    }

    fn unfreeze_tile(&mut self, tile: TileCoordinate) -> Result<()> {
        debug!("Unfreeze {tile}");
        self.store(tile, epa::word(epa::CSR_FREEZE), epa::csr::UNFREEZE)
    }

    fn set_group_origin(&mut self, tile: TileCoordinate, origin: TileCoordinate) -> Result<()> {
        debug!("Origin of {tile} = {origin}");
        self.store(tile, epa::word(epa::CSR_TILE_GROUP_ORIGIN_X), u32::from(origin.x))?;
        self.store(tile, epa::word(epa::CSR_TILE_GROUP_ORIGIN_Y), u32::from(origin.y))
    }

    fn load_program(&mut self, tile: TileCoordinate, image: &ProgramImage) -> Result<()> {
        let mut words = 0usize;
        for s in tile_stores(tile, image)? {
            self.store(s.endpoint, s.word_address, s.data)?;
            words += 1;
        }
        debug!("Loaded {} onto {tile}: {words} words", image.name());
        Ok(())
    }

    fn receive_packet(&mut self, timeout: Option<Duration>) -> Result<Option<RequestPacket>> {
        if !self.rx_request.wait_readable(timeout)? {
            return Ok(None);
        }
        let raw = self.rx_request.read_packet()?;
        let pkt = RequestPacket::decode(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(pkt))
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Fifo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manycore_chip::{Opcode, PACKET_BYTES};
    use rustix::pipe::pipe;

    struct Rig {
        dev: FifoDevice,
        sent: IoHandle,
        responses: IoHandle,
        requests: IoHandle,
    }

    fn rig() -> Rig {
        let (sent, tx) = pipe().unwrap();
        let (rx_response, responses) = pipe().unwrap();
        let (rx_request, requests) = pipe().unwrap();
        Rig {
            dev: FifoDevice::from_channels(MeshGeometry::REFERENCE_4X4, tx, rx_response, rx_request)
                .with_response_timeout(Duration::from_millis(50)),
            sent: IoHandle::new(sent),
            responses: IoHandle::new(responses),
            requests: IoHandle::new(requests),
        }
    }

    fn next_sent(rig: &Rig) -> RequestPacket {
        RequestPacket::decode(&rig.sent.read_packet().unwrap()).unwrap()
    }

    #[test]
    fn base_path_from_index_or_path() {
        assert_eq!(FifoDevice::base_path("2"), PathBuf::from("/dev/manycore2"));
        assert_eq!(FifoDevice::base_path("/tmp/mc"), PathBuf::from("/tmp/mc"));
    }

    #[test]
    fn open_missing_device_is_init_error() {
        let err = FifoDevice::open("/nonexistent/manycore", &MeshGeometry::default()).unwrap_err();
        assert!(matches!(err, HostError::TransportInit { .. }));
    }

    #[test]
    fn stores_one_packet_per_word() {
        let mut rig = rig();
        let tile = TileCoordinate::new(1, 1);
        rig.dev.copy_to_tile(tile, 0x400, &[5, 6]).unwrap();

        let a = next_sent(&rig);
        let b = next_sent(&rig);
        assert_eq!(
            (a.op, a.dst, a.src, a.addr, a.data),
            (Opcode::Store, tile, TileCoordinate::new(0, 0), 0x400, 5)
        );
        assert_eq!((b.addr, b.data), (0x401, 6));
    }

    #[test]
    fn loads_carry_ids_and_collect_responses() {
        let mut rig = rig();
        let host = TileCoordinate::new(0, 0);
        for (id, data) in [(1u8, 0xBBu32), (0, 0xAA)] {
            rig.responses
                .write_packet(&ResponsePacket::load(host, id, data).encode())
                .unwrap();
        }

        let rsp = rig.dev.copy_from_tile(TileCoordinate::new(2, 3), 0x10, 2).unwrap();
        assert_eq!(rsp.len(), 2);
        assert_eq!((rsp[0].load_id, rsp[0].data), (1, 0xBB));

        let l0 = next_sent(&rig);
        let l1 = next_sent(&rig);
        assert_eq!((l0.op, l0.addr, l0.data), (Opcode::Load, 0x10, 0));
        assert_eq!((l1.addr, l1.data), (0x11, 1));
    }

    #[test]
    fn missing_response_times_out() {
        let mut rig = rig();
        let err = rig.dev.copy_from_tile(TileCoordinate::new(1, 1), 0, 1).unwrap_err();
        assert!(matches!(
            err,
            HostError::Transfer(crate::error::TransferError::IoFailure { .. })
        ));
    }

    #[test]
    fn control_ops_are_csr_stores() {
        let mut rig = rig();
        let tile = TileCoordinate::new(3, 2);
        rig.dev.freeze_tile(tile).unwrap();
        rig.dev.set_group_origin(tile, TileCoordinate::new(1, 1)).unwrap();
        rig.dev.unfreeze_tile(tile).unwrap();

        let freeze = next_sent(&rig);
        assert!(freeze.is_store_to(epa::CSR_FREEZE));
        assert_eq!(freeze.data, epa::csr::FREEZE);
        assert!(next_sent(&rig).is_store_to(epa::CSR_TILE_GROUP_ORIGIN_X));
        assert!(next_sent(&rig).is_store_to(epa::CSR_TILE_GROUP_ORIGIN_Y));
        assert_eq!(next_sent(&rig).data, epa::csr::UNFREEZE);
    }

    #[test]
    fn receives_tile_requests() {
        let mut rig = rig();
        assert!(rig.dev.receive_packet(Some(Duration::from_millis(5))).unwrap().is_none());

        let finish = RequestPacket::store(
            TileCoordinate::new(1, 2),
            TileCoordinate::new(0, 0),
            epa::word(epa::FINISH),
            0,
        );
        rig.requests.write_packet(&finish.encode()).unwrap();
        let got = rig.dev.receive_packet(None).unwrap().unwrap();
        assert_eq!(got, finish);
    }

    #[test]
    fn undecodable_request_is_io_error() {
        let mut rig = rig();
        let mut raw = [0u8; PACKET_BYTES];
        raw[9] = 0xFF;
        rig.requests.write_packet(&raw).unwrap();
        assert!(matches!(rig.dev.receive_packet(None), Err(HostError::Io { .. })));
    }
}
