//! `manycore` — command-line interface for the manycore host driver.
//!
//! ```text
//! USAGE:
//!   manycore info                          Mesh geometry and active transport
//!   manycore symbols <elf>                 List the symbols of a kernel image
//!   manycore read  --tile x,y --addr A     Dump words from a tile or DRAM
//!   manycore write --tile x,y --addr A V…  Store words to a tile or DRAM
//!   manycore run <elf> --rect x1,y1,x2,y2  Launch a kernel and wait for it
//!
//! GLOBAL:
//!   --software        Target the simulated mesh
//!   --device <index>  FIFO device index or path (default 0)
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use manycore_chip::{classify, MemorySpace, TileCoordinate};
use manycore_driver::{
    HostConfig, Manycore, ProgramImage, SymbolResolver, TileGroup, Transport, TransportSelection,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "manycore", about = "Host driver for tiled manycore meshes", version)]
struct Cli {
    /// Use the simulated mesh instead of the FIFO device.
    #[arg(long, global = true)]
    software: bool,

    /// FIFO device index (e.g. 0) or channel base path.
    #[arg(long, global = true, default_value = "0")]
    device: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print mesh geometry and the transport in use.
    Info,
    /// List the symbols of a kernel image, sorted by address.
    Symbols {
        /// Path to the RISC-V ELF image.
        elf: PathBuf,
    },
    /// Read 32-bit words as seen from a tile.
    Read {
        /// Tile context, as `x,y`.
        #[arg(long, value_parser = parse_tile)]
        tile: TileCoordinate,
        #[command(flatten)]
        target: Target,
        /// Number of words to read.
        #[arg(long, default_value_t = 1)]
        words: usize,
    },
    /// Write 32-bit words as seen from a tile.
    Write {
        /// Tile context, as `x,y`.
        #[arg(long, value_parser = parse_tile)]
        tile: TileCoordinate,
        #[command(flatten)]
        target: Target,
        /// Values to store (decimal or 0x-prefixed hex).
        #[arg(required = true, value_parser = parse_u32)]
        values: Vec<u32>,
    },
    /// Load a kernel onto a group of tiles, release it and wait for completion.
    Run {
        /// Path to the RISC-V ELF image.
        elf: PathBuf,
        /// Member tile, as `x,y` (repeatable).
        #[arg(long = "tile", value_parser = parse_tile, conflicts_with = "rect")]
        tiles: Vec<TileCoordinate>,
        /// Rectangle `x1,y1,x2,y2`, end-exclusive.
        #[arg(long, value_parser = parse_rect)]
        rect: Option<Rect>,
        /// Completion timeout in milliseconds (0 waits forever).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

/// Where a read or write lands: a raw EVA or a symbol of an image.
#[derive(clap::Args)]
struct Target {
    /// Byte address (EVA), decimal or 0x-prefixed hex.
    #[arg(long, value_parser = parse_u32, required_unless_present = "symbol")]
    addr: Option<u32>,
    /// Symbol name, resolved against `--elf`.
    #[arg(long, requires = "elf", conflicts_with = "addr")]
    symbol: Option<String>,
    /// Image whose symbol table resolves `--symbol`.
    #[arg(long)]
    elf: Option<PathBuf>,
}

impl Target {
    fn resolve(&self) -> Result<Location> {
        match (&self.addr, &self.symbol, &self.elf) {
            (Some(addr), _, _) => Ok(Location::Address(*addr)),
            (None, Some(symbol), Some(elf)) => Ok(Location::Symbol {
                image: ProgramImage::from_file(elf)?,
                name: symbol.clone(),
            }),
            _ => bail!("either --addr or --symbol with --elf is required"),
        }
    }
}

/// A resolved read/write target.
enum Location {
    Address(u32),
    Symbol { image: ProgramImage, name: String },
}

impl Location {
    fn eva(&self) -> Result<u32> {
        match self {
            Self::Address(addr) => Ok(*addr),
            Self::Symbol { image, name } => Ok(image.resolve(name)?),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x1: u8,
    y1: u8,
    x2: u8,
    y2: u8,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Info => cmd_info(&cli.device, cli.software)?,
        Cmd::Symbols { ref elf } => cmd_symbols(elf)?,
        Cmd::Read { tile, ref target, words } => {
            let mut host = open(&cli.device, cli.software, HostConfig::from_env())?;
            cmd_read(&mut host, tile, &target.resolve()?, words)?;
        }
        Cmd::Write { tile, ref target, ref values } => {
            let mut host = open(&cli.device, cli.software, HostConfig::from_env())?;
            cmd_write(&mut host, tile, &target.resolve()?, values)?;
        }
        Cmd::Run { ref elf, ref tiles, rect, timeout_ms } => {
            let mut config = HostConfig::from_env();
            if let Some(ms) = timeout_ms {
                config = config.with_completion_timeout((ms > 0).then(|| Duration::from_millis(ms)));
            }
            let group = match rect {
                Some(r) => TileGroup::rectangle(r.x1, r.y1, r.x2, r.y2)?,
                None if tiles.is_empty() => bail!("run needs --tile or --rect"),
                None => TileGroup::from_tiles(tiles.iter().copied())?,
            };
            let mut host = open(&cli.device, cli.software, config)?;
            cmd_run(&mut host, elf, &group)?;
        }
    }

    Ok(())
}

fn open(device: &str, software: bool, config: HostConfig) -> Result<Manycore<dyn Transport>> {
    let selection = if software { TransportSelection::Software } else { TransportSelection::Fifo };
    tracing::debug!("Opening {device} ({selection:?})");
    Manycore::<dyn Transport>::open(selection, device, config)
        .with_context(|| format!("opening device {device}"))
}

fn cmd_info(device: &str, software: bool) -> Result<()> {
    let config = HostConfig::from_env();
    let mesh = config.mesh;

    println!("Mesh         : {}×{} ({} compute tiles)", mesh.columns, mesh.rows, mesh.compute_tile_count());
    println!("I/O row      : y={}", mesh.io_row);
    println!("Compute rows : y={}..={}", mesh.io_row + 1, mesh.last_compute_row());
    println!("DRAM row     : y={}", mesh.dram_row());
    println!("Host port    : {}", mesh.host);
    match config.completion_timeout {
        Some(t) => println!("Completion   : {} ms timeout", t.as_millis()),
        None => println!("Completion   : no timeout"),
    }

    match open(device, software, config) {
        Ok(host) => println!("Transport    : {}", host.transport().transport_type()),
        Err(e) => println!("Transport    : (unavailable: {e:#})"),
    }

    Ok(())
}

fn cmd_symbols(elf: &Path) -> Result<()> {
    let image = ProgramImage::from_file(elf)?;

    println!("Image  : {}", image.name());
    println!("Entry  : {:#010x}", image.entry());
    println!("Segments:");
    for seg in image.segments() {
        println!(
            "  {:#010x}  file {:>6}  mem {:>6}  {}",
            seg.vaddr,
            seg.data.len(),
            seg.mem_size,
            if seg.executable { "text" } else { "data" }
        );
    }
    println!("Symbols ({}):", image.symbols().len());
    for (name, sym) in image.symbols().sorted() {
        println!("  {:#010x}  {:>6}  {name}", sym.address, sym.size);
    }

    Ok(())
}

fn cmd_read<T: Transport + ?Sized>(
    host: &mut Manycore<T>,
    tile: TileCoordinate,
    target: &Location,
    words: usize,
) -> Result<Vec<u32>> {
    let addr = target.eva()?;
    let loc = classify(addr, tile, &host.config().mesh);
    let mut buf = vec![0u32; words];
    let metrics = match target {
        Location::Symbol { image, name } => host.read_symbol(image, tile, name, &mut buf)?,
        Location::Address(_) => host.read(loc.coord, addr, &mut buf)?,
    };

    println!("{} @ {} (context {tile})", space_name(loc.space), loc.coord);
    for (i, chunk) in buf.chunks(4).enumerate() {
        let line: Vec<String> = chunk.iter().map(|w| format!("{w:08x}")).collect();
        println!("  {:#010x}: {}", addr as usize + i * 16, line.join(" "));
    }
    println!("{} packets, {:.2} MB/s", metrics.packets, metrics.throughput_mbps);

    Ok(buf)
}

fn cmd_write<T: Transport + ?Sized>(
    host: &mut Manycore<T>,
    tile: TileCoordinate,
    target: &Location,
    values: &[u32],
) -> Result<()> {
    let addr = target.eva()?;
    let loc = classify(addr, tile, &host.config().mesh);
    let metrics = match target {
        Location::Symbol { image, name } => host.write_symbol(image, tile, name, values)?,
        Location::Address(_) => host.write(loc.coord, addr, values)?,
    };
    println!(
        "Wrote {} words to {} @ {} ({} packets)",
        values.len(),
        space_name(loc.space),
        loc.coord,
        metrics.packets
    );
    Ok(())
}

fn cmd_run(host: &mut Manycore<dyn Transport>, elf: &Path, group: &TileGroup) -> Result<()> {
    let image = ProgramImage::from_file(elf)?;

    println!("Launching {} on {} tiles (origin {}) ...", image.name(), group.len(), group.origin());
    host.launch(group, &image)?;
    let report = host.run(group)?;

    println!(
        "Done: {} tiles finished in {:.3} s",
        report.finished.len(),
        report.elapsed.as_secs_f64()
    );
    if report.ignored_packets > 0 {
        println!("Ignored {} unrelated packets", report.ignored_packets);
    }
    Ok(())
}

const fn space_name(space: MemorySpace) -> &'static str {
    match space {
        MemorySpace::Scratchpad => "scratchpad",
        MemorySpace::Dram => "DRAM",
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn parse_coords<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {N} comma-separated values, got '{s}'"));
    }
    let mut out = [0u8; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.parse().map_err(|e| format!("{part}: {e}"))?;
    }
    Ok(out)
}

fn parse_tile(s: &str) -> Result<TileCoordinate, String> {
    let [x, y] = parse_coords::<2>(s)?;
    Ok(TileCoordinate::new(x, y))
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let [x1, y1, x2, y2] = parse_coords::<4>(s)?;
    Ok(Rect { x1, y1, x2, y2 })
}
