//! Transport implementations
//!
//! - **Fifo**: packet FIFO character device driven with `rustix`
//! - **Software**: in-memory mesh with host-side kernels (CI, no hardware)

pub mod fifo;
pub mod software;

pub use fifo::FifoDevice;
pub use software::{Kernel, MeshStats, SoftwareMesh, TileContext};

use manycore_chip::{epa, eva, MeshGeometry, TileCoordinate};

use crate::error::{HostError, Result};
use crate::program::{ProgramImage, Segment};

/// Longest run of consecutive words handed to one `copy_to_tile` call while
/// loading shared segments.
pub(crate) const STORE_RUN_WORDS: usize = 1024;

/// One word store needed to place a program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImageStore {
    /// Endpoint receiving the word (the tile, or a DRAM bank).
    pub endpoint: TileCoordinate,
    /// Word address at the endpoint.
    pub word_address: u32,
    /// Word value.
    pub data: u32,
}

/// Stores placing the tile-resident part of `image` on `tile`.
///
/// Executable segments go to the instruction window at `ICACHE_BASE + vaddr`;
/// scratchpad data segments go to `tile` at their own address. DRAM segments
/// are left to [`shared_stores`]. Each segment is zero-padded to `mem_size`.
///
/// # Errors
///
/// Returns `HostError::Program` if any segment of the image does not fit the
/// space it targets. Nothing is yielded in that case.
pub(crate) fn tile_stores(
    tile: TileCoordinate,
    image: &ProgramImage,
) -> Result<impl Iterator<Item = ImageStore> + '_> {
    check_segments(image)?;
    Ok(image
        .segments()
        .iter()
        .filter(|seg| !is_shared(seg))
        .flat_map(move |seg| {
            let base = if seg.executable {
                epa::ICACHE_BASE + seg.vaddr
            } else {
                seg.vaddr
            };
            segment_words(seg, tile, base)
        }))
}

/// Stores placing the DRAM segments of `image` on their banks.
///
/// These do not depend on the tile being loaded, so a group launch issues
/// them once.
///
/// # Errors
///
/// As [`tile_stores`].
pub(crate) fn shared_stores<'a>(
    image: &'a ProgramImage,
    mesh: &MeshGeometry,
) -> Result<impl Iterator<Item = ImageStore> + 'a> {
    check_segments(image)?;
    let mesh = *mesh;
    Ok(image
        .segments()
        .iter()
        .filter(|seg| is_shared(seg))
        .flat_map(move |seg| {
            let bank = eva::classify(seg.vaddr, mesh.host, &mesh).coord;
            segment_words(seg, bank, seg.vaddr)
        }))
}

/// Group `stores` into runs of consecutive words on one endpoint, at most
/// `max_words` long, and hand each run to `write`.
pub(crate) fn for_each_run(
    stores: impl Iterator<Item = ImageStore>,
    max_words: usize,
    mut write: impl FnMut(TileCoordinate, u32, &[u32]) -> Result<()>,
) -> Result<()> {
    let mut run: Vec<u32> = Vec::with_capacity(max_words);
    let mut start: Option<(TileCoordinate, u32)> = None;

    for s in stores {
        if let Some((endpoint, first)) = start {
            #[allow(clippy::cast_possible_truncation)]
            let next = first.wrapping_add(run.len() as u32);
            if endpoint != s.endpoint || next != s.word_address || run.len() == max_words {
                write(endpoint, first, &run)?;
                run.clear();
                start = None;
            }
        }
        if start.is_none() {
            start = Some((s.endpoint, s.word_address));
        }
        run.push(s.data);
    }
    if let Some((endpoint, first)) = start {
        write(endpoint, first, &run)?;
    }
    Ok(())
}

fn is_shared(seg: &Segment) -> bool {
    !seg.executable && eva::is_dram(seg.vaddr)
}

fn segment_bytes(seg: &Segment) -> u64 {
    (seg.data.len() as u64).max(u64::from(seg.mem_size))
}

/// Every segment must lie inside the space it is written to: the
/// instruction window, the scratchpad, or a single DRAM bank.
fn check_segments(image: &ProgramImage) -> Result<()> {
    for seg in image.segments() {
        let size = segment_bytes(seg);
        let (offset, limit, space) = if seg.executable {
            (Some(seg.vaddr), epa::ICACHE_BYTES, "instruction window")
        } else if eva::is_dram(seg.vaddr) {
            (
                Some(seg.vaddr & (eva::DRAM_BANK_BYTES - 1)),
                eva::DRAM_BANK_BYTES,
                "DRAM bank",
            )
        } else {
            (seg.vaddr.checked_sub(epa::DMEM_BASE), epa::DMEM_BYTES, "scratchpad")
        };

        let fits = offset.is_some_and(|off| u64::from(off) + size <= u64::from(limit));
        if !fits {
            return Err(HostError::program(format!(
                "{}: segment at {:#x} ({size} bytes) does not fit the {space}",
                image.name(),
                seg.vaddr
            )));
        }
    }
    Ok(())
}

/// Little-endian words of `seg`, zero-padded to its memory size, stored from
/// byte address `base` on `endpoint`.
fn segment_words(
    seg: &Segment,
    endpoint: TileCoordinate,
    base: u32,
) -> impl Iterator<Item = ImageStore> + '_ {
    // Bounded by check_segments, so the size fits in 32 bits.
    #[allow(clippy::cast_possible_truncation)]
    let words = segment_bytes(seg).div_ceil(4) as u32;
    let first = epa::word(base);

    (0..words).map(move |i| {
        let mut bytes = [0u8; 4];
        let start = i as usize * 4;
        if start < seg.data.len() {
            let end = (start + 4).min(seg.data.len());
            bytes[..end - start].copy_from_slice(&seg.data[start..end]);
        }
        ImageStore {
            endpoint,
            word_address: first + i,
            data: u32::from_le_bytes(bytes),
        }
    })
}
