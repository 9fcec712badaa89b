//! Exercises the mapping over ordinary files, which behave like the physical
//! memory device for shared read/write mappings.

use std::fs;
use std::time::Duration;

use mand_core::bridge::RegisterBridge;
use mand_core::layout::{Field, LayoutVersion};
use mand_core::regs::{MemoryBlock, RegisterBlock};
use mand_hw::{DevMem, MapError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{NamedTempFile, TempDir};

/// A zero-filled scratch file, removed when the returned handle drops.
fn scratch_file(len: u64) -> NamedTempFile {
    let file = NamedTempFile::new().expect("scratch file");
    file.as_file().set_len(len).expect("scratch file length");
    file
}

#[test]
fn registers_are_written_through_to_the_backing_file() {
    let file = scratch_file(4096);
    let mem = DevMem::open_path(file.path(), 0, 0x80).unwrap();
    let mut bridge = RegisterBridge::new(mem, LayoutVersion::V2).unwrap();

    bridge.write_field(Field::CoreMaxIterations, 10_000_000).unwrap();
    bridge.write_field_signed(Field::CoreX, -2).unwrap();
    assert_eq!(bridge.read_field(Field::CoreMaxIterations).unwrap(), 10_000_000);

    assert_eq!(bridge.settle(), Duration::from_nanos(20));

    let mut mem = bridge.into_inner();
    mem.close().unwrap();

    let bytes = fs::read(file.path()).unwrap();
    assert_eq!(&bytes[72..76], &10_000_000u32.to_le_bytes());
    assert_eq!(&bytes[64..68], &[0xfe, 0xff, 0xff, 0xff]);
}

#[test]
fn unaligned_base_maps_from_the_page_start() {
    let file = scratch_file(8192);
    let mut mem = DevMem::open_path(file.path(), 0x1010, 0x40).unwrap();
    assert_eq!(mem.base(), 0x1010);
    mem.write(0, &[0xaa, 0xbb]).unwrap();
    mem.close().unwrap();

    let bytes = fs::read(file.path()).unwrap();
    assert_eq!(&bytes[0x1010..0x1012], &[0xaa, 0xbb]);
}

#[test]
fn close_releases_once() {
    let file = scratch_file(4096);
    let mut mem = DevMem::open_path(file.path(), 0, 0x80).unwrap();
    assert!(mem.is_open());
    mem.close().unwrap();
    assert!(!mem.is_open());

    // Second close and the drop that follows are no-ops.
    mem.close().unwrap();
    assert_eq!(mem.span(), 0);
    let mut buf = [0u8; 4];
    assert!(mem.read(0, &mut buf).is_err());
    drop(mem);
}

#[test]
fn bridge_error_after_open_still_releases() {
    let file = scratch_file(4096);
    let mem = DevMem::open_path(file.path(), 0, 0x80).unwrap();
    // V3 needs 144 bytes; the window is dropped with the failed bridge.
    assert!(RegisterBridge::new(mem, LayoutVersion::V3).is_err());
}

#[test]
fn missing_device_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mem");
    match DevMem::open_path(&path, 0, 0x80) {
        Err(err @ MapError::DeviceUnavailable { .. }) => assert!(err.is_acquisition()),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("opened a missing device"),
    }
}

#[test]
fn empty_window_fails_to_map() {
    let file = scratch_file(4096);
    assert!(matches!(
        DevMem::open_path(file.path(), 0, 0),
        Err(MapError::MapFailed { span: 0, .. })
    ));
}

#[test]
fn random_accesses_match_memory_model() {
    let file = scratch_file(4096);
    let mut mem = DevMem::open_path(file.path(), 0, 0x100).unwrap();
    let mut model = MemoryBlock::new(0x100);
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..500 {
        let len = rng.gen_range(1..=16);
        let offset = rng.gen_range(0..=0x100 - len);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        mem.write(offset, &data).unwrap();
        model.write(offset, &data).unwrap();

        let len = rng.gen_range(1..=16);
        let offset = rng.gen_range(0..=0x100 - len);
        let mut got = vec![0u8; len];
        let mut want = vec![0u8; len];
        mem.read(offset, &mut got).unwrap();
        model.read(offset, &mut want).unwrap();
        assert_eq!(got, want, "read of {len} bytes at {offset:#x}");
    }

    mem.close().unwrap();
}
