//! Wire packets crossing the host interface.
//!
//! Both packet kinds are 16 bytes, little-endian, no padding between fields.
//!
//! ```text
//! request   0     1     2     3     4..8   8      9    10..14  14..16
//!          x_dst y_dst x_src y_src  data  op_ex  op    addr    reserved
//!
//! response  0     1     2        3..7   7    8..16
//!          x_dst y_dst load_id   data  op   reserved
//! ```
//!
//! `addr` is a word address. For loads, `data` carries the load id the
//! matching response echoes back.

use std::fmt;

use crate::mesh::TileCoordinate;

/// Size of every packet on the wire.
pub const PACKET_BYTES: usize = 16;

/// Byte mask selecting all four bytes of a word.
pub const FULL_WORD_MASK: u8 = 0xF;

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Remote load; answered by a response packet.
    Load = 0,
    /// Remote store.
    Store = 1,
    /// Remote load with an extended (atomic) operation selected by `op_ex`.
    Atomic = 2,
}

impl TryFrom<u8> for Opcode {
    type Error = PacketDecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Load),
            1 => Ok(Self::Store),
            2 => Ok(Self::Atomic),
            other => Err(PacketDecodeError::UnknownOpcode(other)),
        }
    }
}

/// Packet bytes that do not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDecodeError {
    /// Opcode field holds an unassigned value.
    UnknownOpcode(u8),
}

impl fmt::Display for PacketDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOpcode(op) => write!(f, "unknown packet opcode {op:#x}"),
        }
    }
}

impl std::error::Error for PacketDecodeError {}

/// Request packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPacket {
    /// Destination endpoint.
    pub dst: TileCoordinate,
    /// Source endpoint.
    pub src: TileCoordinate,
    /// Store data, or the load id for loads.
    pub data: u32,
    /// Byte mask / extended opcode.
    pub op_ex: u8,
    /// Opcode.
    pub op: Opcode,
    /// Word address at the destination.
    pub addr: u32,
}

impl RequestPacket {
    /// Full-word store of `data` to `word_addr` on `dst`.
    #[must_use]
    pub const fn store(src: TileCoordinate, dst: TileCoordinate, word_addr: u32, data: u32) -> Self {
        Self {
            dst,
            src,
            data,
            op_ex: FULL_WORD_MASK,
            op: Opcode::Store,
            addr: word_addr,
        }
    }

    /// Full-word load of `word_addr` on `dst`, tagged with `load_id`.
    #[must_use]
    pub const fn load(src: TileCoordinate, dst: TileCoordinate, word_addr: u32, load_id: u8) -> Self {
        Self {
            dst,
            src,
            data: load_id as u32,
            op_ex: FULL_WORD_MASK,
            op: Opcode::Load,
            addr: word_addr,
        }
    }

    /// True if this is a store to the byte endpoint address `epa`.
    #[must_use]
    pub fn is_store_to(&self, epa: u32) -> bool {
        self.op == Opcode::Store && self.addr == crate::epa::word(epa)
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_BYTES] {
        let mut raw = [0u8; PACKET_BYTES];
        raw[0] = self.dst.x;
        raw[1] = self.dst.y;
        raw[2] = self.src.x;
        raw[3] = self.src.y;
        raw[4..8].copy_from_slice(&self.data.to_le_bytes());
        raw[8] = self.op_ex;
        raw[9] = self.op as u8;
        raw[10..14].copy_from_slice(&self.addr.to_le_bytes());
        raw
    }

    /// Parse wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PacketDecodeError::UnknownOpcode`] for an unassigned opcode.
    pub fn decode(raw: &[u8; PACKET_BYTES]) -> Result<Self, PacketDecodeError> {
        Ok(Self {
            dst: TileCoordinate::new(raw[0], raw[1]),
            src: TileCoordinate::new(raw[2], raw[3]),
            data: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            op_ex: raw[8],
            op: Opcode::try_from(raw[9])?,
            addr: u32::from_le_bytes([raw[10], raw[11], raw[12], raw[13]]),
        })
    }
}

impl fmt::Display for RequestPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request {:?} addr {:#x} at {} from {}, op_ex {:#x}, data {:#x}",
            self.op, self.addr, self.dst, self.src, self.op_ex, self.data
        )
    }
}

/// Response packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePacket {
    /// Destination endpoint (the requester).
    pub dst: TileCoordinate,
    /// Load id copied from the request.
    pub load_id: u8,
    /// Loaded word.
    pub data: u32,
    /// Opcode of the request being answered.
    pub op: Opcode,
}

impl ResponsePacket {
    /// Response to a load.
    #[must_use]
    pub const fn load(dst: TileCoordinate, load_id: u8, data: u32) -> Self {
        Self {
            dst,
            load_id,
            data,
            op: Opcode::Load,
        }
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; PACKET_BYTES] {
        let mut raw = [0u8; PACKET_BYTES];
        raw[0] = self.dst.x;
        raw[1] = self.dst.y;
        raw[2] = self.load_id;
        raw[3..7].copy_from_slice(&self.data.to_le_bytes());
        raw[7] = self.op as u8;
        raw
    }

    /// Parse wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PacketDecodeError::UnknownOpcode`] for an unassigned opcode.
    pub fn decode(raw: &[u8; PACKET_BYTES]) -> Result<Self, PacketDecodeError> {
        Ok(Self {
            dst: TileCoordinate::new(raw[0], raw[1]),
            load_id: raw[2],
            data: u32::from_le_bytes([raw[3], raw[4], raw[5], raw[6]]),
            op: Opcode::try_from(raw[7])?,
        })
    }
}

impl fmt::Display for ResponsePacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "response {:?} to {}, load_id {:#x}, data {:#x}",
            self.op, self.dst, self.load_id, self.data
        )
    }
}
