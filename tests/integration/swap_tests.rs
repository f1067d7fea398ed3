//! Swap store tests against a real swap file.
//!
//! Tests verify:
//! - Extents read back byte-identical through the file
//! - Freed extents are reused first-fit
//! - Freeing the tail shrinks the file, dropping the store removes it
//! - On-disk damage is reported as corruption

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use tile_composite::error::SwapError;
use tile_composite::io::FileBacking;
use tile_composite::{CanvasId, SwapStore, TileId};

use super::test_utils::ScratchDir;

fn tile(col: u32) -> TileId {
    TileId::new(CanvasId::from_raw(7), col, 0)
}

fn file_len(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

#[test]
fn test_file_swap_roundtrip() {
    let dir = ScratchDir::new("swap-roundtrip");
    let path = dir.join("tileswap.1");
    let mut store = SwapStore::new(FileBacking::new(&path));

    // Nothing is created until the first write
    assert!(!path.exists());

    let blocks: Vec<Vec<u8>> = (0..3u8).map(|n| vec![n + 1; 100 + n as usize]).collect();
    let locators: Vec<_> = blocks
        .iter()
        .enumerate()
        .map(|(i, b)| store.write(tile(i as u32), b).unwrap())
        .collect();

    assert!(path.exists());
    assert_eq!(file_len(&path), 303);

    for (loc, block) in locators.iter().zip(&blocks).rev() {
        assert_eq!(&store.read(loc).unwrap()[..], &block[..]);
    }
    assert_eq!(store.usage().extents, 3);
    assert_eq!(store.usage().used_bytes, 303);
}

#[test]
fn test_freed_extent_reused_first_fit() {
    let dir = ScratchDir::new("swap-first-fit");
    let mut store = SwapStore::new(FileBacking::new(dir.join("tileswap.2")));

    let a = store.write(tile(0), &[1; 100]).unwrap();
    let b = store.write(tile(1), &[2; 100]).unwrap();
    let c = store.write(tile(2), &[3; 100]).unwrap();
    store.free(&b).unwrap();

    let d = store.write(tile(3), &[4; 60]).unwrap();
    assert_eq!(d.offset(), 100);

    // The 40-byte remainder is too small, so this one appends
    let e = store.write(tile(4), &[5; 50]).unwrap();
    assert_eq!(e.offset(), 300);

    let usage = store.usage();
    assert_eq!(usage.free_bytes, 40);
    assert_eq!(usage.end, 350);

    for (loc, byte) in [(a, 1u8), (c, 3), (d, 4), (e, 5)] {
        assert!(store.read(&loc).unwrap().iter().all(|&x| x == byte));
    }
}

#[test]
fn test_freeing_everything_shrinks_and_drop_removes_file() {
    let dir = ScratchDir::new("swap-shrink");
    let path = dir.join("tileswap.3");
    let mut store = SwapStore::new(FileBacking::new(&path));

    let locs: Vec<_> = (0..4).map(|i| store.write(tile(i), &[9; 256]).unwrap()).collect();
    assert_eq!(file_len(&path), 1024);

    // Free out of order so coalescing has to merge both neighbours
    for i in [1, 3, 0, 2] {
        store.free(&locs[i]).unwrap();
    }
    let usage = store.usage();
    assert_eq!(usage.end, 0);
    assert_eq!(usage.free_bytes, 0);
    assert_eq!(file_len(&path), 0);

    drop(store);
    assert!(!path.exists());
}

#[test]
fn test_on_disk_damage_detected() {
    let dir = ScratchDir::new("swap-damage");
    let path = dir.join("tileswap.4");
    let mut store = SwapStore::new(FileBacking::new(&path));

    let good = store.write(tile(0), &[0xAA; 64]).unwrap();
    let bad = store.write(tile(1), &[0xBB; 64]).unwrap();

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(bad.offset() + 10)).unwrap();
    file.write_all(&[0x00]).unwrap();
    file.sync_all().unwrap();

    assert!(matches!(store.read(&bad), Err(SwapError::Corrupt { .. })));
    assert_eq!(&store.read(&good).unwrap()[..], &[0xAA; 64][..]);
}

#[test]
fn test_double_free_rejected() {
    let dir = ScratchDir::new("swap-double-free");
    let mut store = SwapStore::new(FileBacking::new(dir.join("tileswap.5")));

    let loc = store.write(tile(0), &[1; 32]).unwrap();
    let _keep = store.write(tile(1), &[2; 32]).unwrap();
    store.free(&loc).unwrap();
    assert!(matches!(store.free(&loc), Err(SwapError::UnknownExtent(0))));
    assert!(matches!(store.read(&loc), Err(SwapError::UnknownExtent(0))));
}
