//! Program images and symbol resolution
//!
//! Kernels are 32-bit little-endian ELF executables. The host needs two
//! things from them: the symbol table, to turn a buffer name such as
//! `g_src0` into an EVA, and the loadable segments, to populate a tile.
//!
//! The image bytes are held as [`Bytes`] so segments are zero-copy slices and
//! cloning an image for every tile of a group is cheap.

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use goblin::elf::program_header::{PF_X, PT_LOAD};
use goblin::elf::Elf;
use manycore_chip::Eva;
use tracing::debug;

use crate::error::{HostError, Result, TransferError};

/// Maps a symbol name to an EVA.
pub trait SymbolResolver {
    /// Name of the image being searched, for diagnostics.
    fn image_name(&self) -> &str;

    /// Look up `symbol`, if present.
    fn lookup(&self, symbol: &str) -> Option<Eva>;

    /// Resolve `symbol` to its EVA.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::SymbolNotFound` if the symbol is absent.
    fn resolve(&self, symbol: &str) -> Result<Eva> {
        self.lookup(symbol).ok_or_else(|| {
            TransferError::SymbolNotFound {
                symbol: symbol.to_string(),
                image: self.image_name().to_string(),
            }
            .into()
        })
    }
}

/// One named symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// EVA of the symbol.
    pub address: Eva,
    /// Size in bytes (0 if unknown).
    pub size: u32,
}

/// Name → symbol map.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    name: String,
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    /// Empty table for the image called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbols: HashMap::new(),
        }
    }

    /// Add or replace a symbol.
    pub fn insert(&mut self, symbol: impl Into<String>, address: Eva, size: u32) {
        self.symbols.insert(symbol.into(), Symbol { address, size });
    }

    /// Symbol by name.
    pub fn get(&self, symbol: &str) -> Option<&Symbol> {
        self.symbols.get(symbol)
    }

    /// All symbols sorted by address.
    pub fn sorted(&self) -> Vec<(&str, Symbol)> {
        let mut all: Vec<_> = self.symbols.iter().map(|(n, s)| (n.as_str(), *s)).collect();
        all.sort_by_key(|&(name, sym)| (sym.address, name));
        all
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True if the table holds no symbols.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolResolver for SymbolTable {
    fn image_name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, symbol: &str) -> Option<Eva> {
        self.symbols.get(symbol).map(|s| s.address)
    }
}

/// Loadable segment of a program image.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Virtual address the segment loads at.
    pub vaddr: Eva,
    /// File bytes (may be shorter than `mem_size`; the rest is zero-filled).
    pub data: Bytes,
    /// Size in memory.
    pub mem_size: u32,
    /// Segment holds instructions.
    pub executable: bool,
}

/// A kernel binary ready to be loaded onto tiles.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    name: String,
    data: Bytes,
    entry: Eva,
    symbols: SymbolTable,
    segments: Vec<Segment>,
}

impl ProgramImage {
    /// Parse an ELF image held in memory.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Program` if the bytes are not a 32-bit
    /// little-endian ELF or a segment lies outside the file.
    pub fn from_elf(name: impl Into<String>, data: impl Into<Bytes>) -> Result<Self> {
        let name = name.into();
        let data = data.into();

        let elf = Elf::parse(&data)
            .map_err(|e| HostError::program(format!("{name}: failed to parse ELF: {e}")))?;

        if elf.is_64 {
            return Err(HostError::program(format!("{name}: not a 32-bit ELF")));
        }
        if !elf.little_endian {
            return Err(HostError::program(format!("{name}: not a little-endian ELF")));
        }

        let mut symbols = SymbolTable::new(name.clone());
        for sym in elf.syms.iter() {
            let Some(sym_name) = elf.strtab.get_at(sym.st_name) else {
                continue;
            };
            if sym_name.is_empty() {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)]
            symbols.insert(sym_name, sym.st_value as u32, sym.st_size as u32);
        }

        let mut segments = Vec::new();
        for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
            #[allow(clippy::cast_possible_truncation)]
            let (start, len) = (ph.p_offset as usize, ph.p_filesz as usize);
            let end = start
                .checked_add(len)
                .filter(|&end| end <= data.len())
                .ok_or_else(|| {
                    HostError::program(format!(
                        "{name}: segment at {:#x} runs past end of file",
                        ph.p_vaddr
                    ))
                })?;

            #[allow(clippy::cast_possible_truncation)]
            segments.push(Segment {
                vaddr: ph.p_vaddr as u32,
                data: data.slice(start..end),
                mem_size: ph.p_memsz as u32,
                executable: ph.p_flags & PF_X != 0,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let entry = elf.header.e_entry as u32;

        debug!(
            "Program {name}: {} bytes, {} symbols, {} loadable segments, entry {entry:#x}",
            data.len(),
            symbols.len(),
            segments.len()
        );

        Ok(Self {
            name,
            data,
            entry,
            symbols,
            segments,
        })
    }

    /// Read and parse an ELF file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        Self::from_elf(path.display().to_string(), data)
    }

    /// Image with a symbol table and no code.
    ///
    /// Used for simulated kernels, whose behavior lives on the host.
    pub fn from_symbols<S: Into<String>>(
        name: impl Into<String>,
        symbols: impl IntoIterator<Item = (S, Eva)>,
    ) -> Self {
        let name = name.into();
        let mut table = SymbolTable::new(name.clone());
        for (sym, addr) in symbols {
            table.insert(sym, addr, 0);
        }
        Self {
            name,
            data: Bytes::new(),
            entry: 0,
            symbols: table,
            segments: Vec::new(),
        }
    }

    /// Image name (the file path for images read from disk).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw image bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Entry point.
    pub const fn entry(&self) -> Eva {
        self.entry
    }

    /// Symbol table.
    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Loadable segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl SymbolResolver for ProgramImage {
    fn image_name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, symbol: &str) -> Option<Eva> {
        self.symbols.lookup(symbol)
    }
}
