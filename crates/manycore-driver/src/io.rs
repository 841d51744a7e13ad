//! Low-level packet I/O on FIFO channels
//!
//! Each channel is a file descriptor carrying whole 16-byte packets. Reads
//! and writes are retried until a full packet has moved; short transfers never
//! reach the caller.

use std::io;
use std::path::Path;
use std::time::Duration;

use manycore_chip::PACKET_BYTES;
use rustix::event::{poll, PollFd, PollFlags};
use rustix::fd::{AsFd, OwnedFd};
use rustix::fs::{open, Mode, OFlags};
use rustix::io::{read, write, Errno};

/// One packet channel.
///
/// Owns its file descriptor.
#[derive(Debug)]
pub struct IoHandle {
    fd: OwnedFd,
}

impl IoHandle {
    /// Wrap an already-open descriptor.
    #[must_use]
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Open `path` for `flags` (close-on-exec is always added).
    ///
    /// # Errors
    ///
    /// Returns the OS error if the open fails.
    pub fn open(path: &Path, flags: OFlags) -> io::Result<Self> {
        let fd = open(path, flags | OFlags::CLOEXEC, Mode::empty())?;
        Ok(Self { fd })
    }

    /// Write one packet.
    ///
    /// # Errors
    ///
    /// Returns the OS error, or `WriteZero` if the channel stops accepting data.
    pub fn write_packet(&self, packet: &[u8; PACKET_BYTES]) -> io::Result<()> {
        let mut sent = 0;
        while sent < PACKET_BYTES {
            match write(self.fd.as_fd(), &packet[sent..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => sent += n,
                Err(Errno::INTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read one packet, blocking.
    ///
    /// # Errors
    ///
    /// Returns the OS error, or `UnexpectedEof` if the channel closes
    /// mid-packet or before one arrives.
    pub fn read_packet(&self) -> io::Result<[u8; PACKET_BYTES]> {
        let mut raw = [0u8; PACKET_BYTES];
        let mut got = 0;
        while got < PACKET_BYTES {
            match read(self.fd.as_fd(), &mut raw[got..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => got += n,
                Err(Errno::INTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(raw)
    }

    /// Wait until a packet can be read, for at most `timeout`
    /// (`None` waits forever). Returns `false` on timeout.
    ///
    /// # Errors
    ///
    /// Returns the OS error if polling fails.
    pub fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout_ms = poll_timeout_ms(timeout);
        let mut fds = [PollFd::new(&self.fd, PollFlags::IN)];
        loop {
            match poll(&mut fds, timeout_ms) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    let revents = fds[0].revents();
                    // HUP with nothing left to read surfaces as EOF on the next read.
                    return Ok(revents.intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR));
                }
                Err(Errno::INTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// `poll` timeout in milliseconds, rounded up so a wait never ends before
/// `timeout` has passed. `-1` blocks.
fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    timeout.map_or(-1, |t| {
        i32::try_from(t.as_nanos().div_ceil(1_000_000)).unwrap_or(i32::MAX)
    })
}
