//! FIFO device tests
//!
//! Run against a real host interface with
//! `MANYCORE_DEVICE=/dev/manycore0 cargo test -- --ignored`.

use manycore_driver::chip::TileCoordinate;
use manycore_driver::{
    select_transport, HostConfig, Manycore, TileGroup, TransferEngine, Transport,
    TransportSelection, TransportType,
};

fn device() -> String {
    std::env::var("MANYCORE_DEVICE").unwrap_or_else(|_| "0".to_string())
}

#[test]
#[ignore] // Requires hardware
fn test_fifo_transport_opens() {
    let config = HostConfig::from_env();
    let transport = select_transport(TransportSelection::Fifo, &device(), &config.mesh)
        .expect("FIFO transport init");
    assert_eq!(transport.transport_type(), TransportType::Fifo);
    println!("FIFO transport on {}: {:?}", device(), transport.mesh());
}

#[test]
#[ignore] // Requires hardware
fn test_scratchpad_round_trip() {
    let config = HostConfig::from_env();
    let mut transport = select_transport(TransportSelection::Fifo, &device(), &config.mesh)
        .expect("FIFO transport init");
    let engine = TransferEngine::new();
    let tile = TileCoordinate::new(0, 1);

    let data: Vec<u32> = (0..64).map(|i| 0xC0DE_0000 | i).collect();
    engine
        .write_slice(&mut *transport, tile, 0x1000, &data)
        .expect("write");
    let mut back = vec![0u32; data.len()];
    let metrics = engine
        .read_slice(&mut *transport, tile, 0x1000, &mut back)
        .expect("read");
    assert_eq!(back, data);
    println!(
        "{} bytes in {:?} ({:.3} MB/s)",
        metrics.bytes_transferred, metrics.duration, metrics.throughput_mbps
    );
}

#[test]
#[ignore] // Requires hardware
fn test_freeze_and_release_group() {
    let config = HostConfig::from_env();
    let mut host = Manycore::<dyn Transport>::open(TransportSelection::Fifo, &device(), config)
        .expect("host init");
    let group = TileGroup::rectangle(0, 1, 2, 2).expect("group");

    let (lifecycle, transport) = host.lifecycle_mut();
    lifecycle.freeze_group(transport, &group).expect("freeze");
    lifecycle.unfreeze_group(transport, &group).expect("unfreeze");
}
