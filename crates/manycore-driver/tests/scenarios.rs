//! End-to-end scenarios on the simulated mesh
//!
//! Each test drives the full stack (lifecycle, transfer, completion) through
//! `SoftwareMesh`, with host closures standing in for the tile kernels.

use std::time::Duration;

use manycore_driver::chip::{epa, MeshGeometry, RequestPacket, TileCoordinate};
use manycore_driver::{
    CompletionSynchronizer, ConfigError, HostConfig, HostError, Manycore, ProgramImage,
    SoftwareMesh, SyncError, TileGroup, TileLifecycle, TileOperation, TransferEngine,
};

const MESH: MeshGeometry = MeshGeometry::REFERENCE_4X4;
const VEC_LEN: usize = 160;

fn hello_image() -> ProgramImage {
    ProgramImage::from_symbols("hello", [("tileDataRd", 0x1000), ("tileDataWr", 0x1010)])
}

fn vvadd_image() -> ProgramImage {
    ProgramImage::from_symbols(
        "vvadd",
        [("g_src0", 0x1000), ("g_src1", 0x1280), ("g_dest", 0x1500)],
    )
}

fn sim() -> SoftwareMesh {
    let mut sim = SoftwareMesh::new(MESH);
    sim.register_kernel("hello", |ctx| {
        let input = ctx.read_symbol("tileDataRd", 4)?;
        let output: Vec<u32> = input.iter().map(|v| v + 1).collect();
        ctx.write_symbol("tileDataWr", &output)
    });
    sim.register_kernel("vvadd", |ctx| {
        let a = ctx.read_symbol("g_src0", VEC_LEN)?;
        let b = ctx.read_symbol("g_src1", VEC_LEN)?;
        let sum: Vec<u32> = a.iter().zip(&b).map(|(x, y)| x.wrapping_add(*y)).collect();
        ctx.write_symbol("g_dest", &sum)
    });
    sim
}

fn host() -> Manycore<SoftwareMesh> {
    Manycore::new(Box::new(sim()), HostConfig::new(MESH))
}

#[test]
fn single_tile_increment() {
    let mut host = host();
    let image = hello_image();
    let tile = TileCoordinate::new(0, 1);
    let group = TileGroup::from_tiles([tile]).unwrap();

    host.launch(&group, &image).unwrap();
    host.write_symbol(&image, tile, "tileDataRd", &[234i32, 1, 25, 101]).unwrap();
    let report = host.run(&group).unwrap();
    assert_eq!(report.finished, vec![tile]);

    let mut out = [0i32; 4];
    host.read_symbol(&image, tile, "tileDataWr", &mut out).unwrap();
    assert_eq!(out, [235, 2, 26, 102]);
}

#[test]
fn twelve_tile_vector_add() {
    let mut host = host();
    let image = vvadd_image();
    let group = TileGroup::rectangle(0, 1, 4, 4).unwrap();
    assert_eq!(group.len(), 12);
    assert_eq!(group.origin(), TileCoordinate::new(0, 1));

    host.launch(&group, &image).unwrap();
    let src: Vec<i32> = (0..160).collect();
    for tile in group.tiles() {
        host.write_symbol(&image, tile, "g_src0", &src).unwrap();
        host.write_symbol(&image, tile, "g_src1", &src).unwrap();
    }

    let report = host.run(&group).unwrap();
    assert_eq!(report.finished.len(), 12);

    for tile in group.tiles() {
        assert_eq!(host.transport().origin_of(tile), Some(group.origin()));
        let mut dest = vec![0i32; VEC_LEN];
        host.read_symbol(&image, tile, "g_dest", &mut dest).unwrap();
        for (i, d) in dest.iter().enumerate() {
            assert_eq!(*d, 2 * src[i], "tile {tile} element {i}");
        }
    }
}

#[test]
fn freezing_io_tile_is_rejected_without_traffic() {
    let mut sim = sim();
    let mut lifecycle = TileLifecycle::new(MESH);

    let err = lifecycle.freeze(&mut sim, TileCoordinate::new(2, 0)).unwrap_err();
    assert!(matches!(
        err,
        HostError::Config(ConfigError::IoTileTargeted {
            operation: TileOperation::Freeze,
            ..
        })
    ));
    assert!(err.to_string().contains("(2, 0)"));
    assert_eq!(sim.stats().control_ops, 0);
    assert!(!sim.is_frozen(TileCoordinate::new(2, 0)));
}

#[test]
fn completion_counts_twelve_signals_in_any_order() {
    let mut sim = sim();
    let mut tiles = MESH.compute_tiles();
    // Deterministic shuffle.
    for i in 0..tiles.len() {
        tiles.swap(i, (i * 7 + 3) % 12);
    }
    for &tile in &tiles {
        sim.inject_packet(RequestPacket::store(tile, MESH.host, epa::word(epa::FINISH), 0));
    }

    let report = CompletionSynchronizer::counting(12)
        .with_timeout(Some(Duration::from_secs(1)))
        .await_completion(&mut sim)
        .unwrap();
    assert_eq!(report.finished, tiles);

    // One fewer signal than expected must not complete.
    let mut sim = self::sim();
    for &tile in &tiles[..11] {
        sim.inject_packet(RequestPacket::store(tile, MESH.host, epa::word(epa::FINISH), 0));
    }
    let err = CompletionSynchronizer::counting(12)
        .await_completion(&mut sim)
        .unwrap_err();
    assert!(matches!(
        err,
        HostError::Sync(SyncError::Timeout {
            expected: 12,
            received: 11,
            ..
        })
    ));
}

#[test]
fn round_trip_through_dram() {
    let mut sim = sim();
    let engine = TransferEngine::new();
    let image = ProgramImage::from_symbols("globals", [("table", 0xC000_0100)]);
    let values: Vec<u32> = (0..300).map(|i| i * 3 + 1).collect();

    engine
        .write_symbol(
            &mut sim,
            &image,
            TileCoordinate::new(0, 1),
            "table",
            bytemuck::cast_slice(&values),
        )
        .unwrap();

    // DRAM is global: any context sees the same bank.
    let mut back = vec![0u8; values.len() * 4];
    engine
        .read_symbol(&mut sim, &image, TileCoordinate::new(3, 3), "table", &mut back)
        .unwrap();
    assert_eq!(back, bytemuck::cast_slice::<u32, u8>(&values));

    let mut again = vec![0u8; values.len() * 4];
    engine
        .read_symbol(&mut sim, &image, TileCoordinate::new(1, 2), "table", &mut again)
        .unwrap();
    assert_eq!(again, back);
}

#[test]
fn reordered_responses_still_reassemble() {
    let mut host = host();
    host.transport_mut().set_reorder_responses(true);
    let tile = TileCoordinate::new(2, 2);
    let values: Vec<i32> = (0..513).map(|i| i - 256).collect();

    host.write(tile, 0x1000, &values).unwrap();
    let mut back = vec![0i32; values.len()];
    let metrics = host.read(tile, 0x1000, &mut back).unwrap();
    assert_eq!(back, values);
    assert_eq!(metrics.packets, 513);
}

#[test]
fn failing_kernel_is_reported() {
    let mut host = host();
    host.transport_mut()
        .register_kernel("broken", |_| Err(HostError::program("bad opcode")));
    let image = ProgramImage::from_symbols("broken", [("x", 0x1000)]);
    let group = TileGroup::rectangle(1, 2, 2, 3).unwrap();

    host.launch(&group, &image).unwrap();
    let err = host.run(&group).unwrap_err();
    assert!(matches!(
        err,
        HostError::Sync(SyncError::KernelFailed { tile }) if tile == TileCoordinate::new(1, 2)
    ));
}

#[test]
fn duplicate_completion_is_rejected_when_tracking() {
    let mut host = host();
    let image = hello_image();
    let group = TileGroup::rectangle(0, 1, 2, 2).unwrap();
    host.launch(&group, &image).unwrap();

    // A stray finish from the origin arrives before the real ones.
    host.transport_mut().inject_packet(RequestPacket::store(
        group.origin(),
        MESH.host,
        epa::word(epa::FINISH),
        0,
    ));
    let err = host.run(&group).unwrap_err();
    assert!(matches!(
        err,
        HostError::Sync(SyncError::UnexpectedSignal { tile }) if tile == group.origin()
    ));
}

#[test]
fn relaunch_after_completion() {
    let mut host = host();
    let image = hello_image();
    let tile = TileCoordinate::new(3, 1);
    let group = TileGroup::from_tiles([tile]).unwrap();

    for round in 0..3i32 {
        host.launch(&group, &image).unwrap();
        host.write_symbol(&image, tile, "tileDataRd", &[round; 4]).unwrap();
        host.run(&group).unwrap();
        let mut out = [0i32; 4];
        host.read_symbol(&image, tile, "tileDataWr", &mut out).unwrap();
        assert_eq!(out, [round + 1; 4]);
    }
    assert_eq!(host.transport().stats().kernels_run, 3);
}

#[test]
fn transfer_to_faulty_tile_fails() {
    let mut host = host();
    let tile = TileCoordinate::new(1, 1);
    host.transport_mut().inject_fault(tile);
    let err = host.write(tile, 0x1000, &[1u32, 2]).unwrap_err();
    assert!(err.to_string().contains("(1, 1)"), "{err}");
}
