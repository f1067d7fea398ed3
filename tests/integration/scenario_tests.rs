//! End-to-end scenarios through the engine.
//!
//! Tests verify:
//! - A canvas far larger than the budget round-trips through a swap file
//! - Stale swap files of dead processes are removed at startup
//! - Engine compositing and budget notifications

use std::path::PathBuf;

use tile_composite::io::{clean_stale_swap_files, FileBacking};
use tile_composite::region::ops;
use tile_composite::{
    Access, CompositeMode, CoreConfig, Engine, PixelFormat, Rect, SwapStore, TileContext,
};

use super::test_utils::{fill_pattern, pattern_image, ScratchDir};

// =============================================================================
// Large Canvas Under a One-Tile Budget
// =============================================================================

#[test]
fn test_solid_fill_roundtrip_with_one_tile_budget() {
    let dir = ScratchDir::new("one-tile");
    let swap_path = dir.join("tileswap.scenario");
    let ctx = TileContext::new(
        64 * 64 * 4,
        64,
        SwapStore::new(FileBacking::new(&swap_path)),
    );
    let canvas = ctx.create_canvas(300, 300, PixelFormat::Rgba);

    ops::fill(&canvas.full_region(Access::Write), &[12, 34, 56, 78]).unwrap();
    assert!(swap_path.exists());

    let pixels = canvas.read_all().unwrap();
    assert_eq!(pixels.len(), 300 * 300 * 4);
    assert!(pixels.chunks_exact(4).all(|px| px == [12, 34, 56, 78]));

    let stats = ctx.stats();
    assert!(stats.resident_bytes <= stats.budget);
    // 5x5 tiles, every one written out once and faulted back once
    assert_eq!(stats.swap_writes, 25);
    assert_eq!(stats.faults, 25);

    drop(canvas);
    assert_eq!(ctx.stats().swap_used_bytes, 0);
    drop(ctx);
    assert!(!swap_path.exists());
}

#[test]
fn test_pattern_roundtrip_through_engine() {
    let dir = ScratchDir::new("engine-pattern");
    let config = CoreConfig {
        swap_dir: Some(dir.path().to_path_buf()),
        tile_cache_size: "48KiB".to_string(),
        tile_size: 32,
        ..CoreConfig::default()
    };
    let engine = Engine::init(&config).unwrap();
    let canvas = engine.new_canvas(257, 129, PixelFormat::Rgb);

    fill_pattern(&canvas);
    assert!(engine.swap_path().exists());
    assert_eq!(canvas.read_all().unwrap(), pattern_image(257, 129, PixelFormat::Rgb));

    let stats = engine.stats();
    assert!(stats.peak_resident_bytes <= stats.budget + 32 * 32 * 3);
}

// =============================================================================
// Stale Swap Cleanup
// =============================================================================

fn seed_swap_files(dir: &ScratchDir) -> PathBuf {
    let own = dir.join(&format!("tileswap.{}", std::process::id()));
    for name in ["tileswap.1", "tileswap.notapid", "other.1"] {
        std::fs::write(dir.join(name), b"stale").unwrap();
    }
    std::fs::write(&own, b"mine").unwrap();
    own
}

#[test]
fn test_stale_cleanup_removes_only_dead_owners() {
    let dir = ScratchDir::new("stale");
    let own = seed_swap_files(&dir);

    // pid 1 is reported dead; the current process counts as alive regardless
    let removed = clean_stale_swap_files(dir.path(), "tileswap", &|pid: u32| pid != 1).unwrap();
    assert_eq!(removed, vec![dir.join("tileswap.1")]);

    let own_name = own.file_name().unwrap().to_string_lossy().into_owned();
    let mut expected = vec!["other.1".to_string(), "tileswap.notapid".to_string(), own_name];
    expected.sort();
    assert_eq!(dir.file_names(), expected);

    // Even a probe that calls everything dead must spare the current process
    let removed = clean_stale_swap_files(dir.path(), "tileswap", &|_: u32| false).unwrap();
    assert!(removed.is_empty());
    assert!(own.exists());
}

#[test]
fn test_engine_startup_cleans_stale_files() {
    let dir = ScratchDir::new("engine-stale");
    seed_swap_files(&dir);
    let config = CoreConfig {
        swap_dir: Some(dir.path().to_path_buf()),
        ..CoreConfig::default()
    };

    let engine = Engine::init_with_probe(&config, &|pid: u32| pid != 1).unwrap();
    assert_eq!(engine.removed_stale_files(), &[dir.join("tileswap.1")][..]);
    assert!(!dir.join("tileswap.1").exists());
    assert!(dir.join("other.1").exists());
}

#[test]
fn test_missing_swap_dir_is_created() {
    let dir = ScratchDir::new("engine-mkdir");
    let nested = dir.join("a/b/c");
    let config = CoreConfig {
        swap_dir: Some(nested.clone()),
        ..CoreConfig::default()
    };
    let engine = Engine::init(&config).unwrap();
    assert!(nested.is_dir());
    assert!(engine.removed_stale_files().is_empty());
}

// =============================================================================
// Engine Operations
// =============================================================================

#[test]
fn test_engine_composite_at_offset() {
    let dir = ScratchDir::new("engine-composite");
    let config = CoreConfig {
        swap_dir: Some(dir.path().to_path_buf()),
        tile_size: 16,
        ..CoreConfig::default()
    };
    let engine = Engine::init(&config).unwrap();
    let background = engine.new_canvas(40, 40, PixelFormat::Rgb);
    let layer = engine.new_canvas(10, 10, PixelFormat::Rgb);
    ops::fill(&background.full_region(Access::Write), &[100, 100, 100]).unwrap();
    ops::fill(&layer.full_region(Access::Write), &[200, 0, 255]).unwrap();

    let mut updates = 0;
    let mut progress = |_: u64, max: u64, current: u64| {
        assert_eq!(max, 100);
        assert!(current <= max);
        updates += 1;
    };
    engine
        .composite(
            &layer.full_region(Access::Read),
            &background.region(Rect::new(12, 12, 10, 10), Access::Write),
            None,
            CompositeMode::Normal,
            128,
            Some(&mut progress),
        )
        .unwrap();
    assert!(updates >= 2);

    let expect = |s: u32, d: u32| ((s * 128 + d * 127 + 127) / 255) as u8;
    assert_eq!(
        background.pixel(15, 20).unwrap(),
        vec![expect(200, 100), expect(0, 100), expect(255, 100)]
    );
    assert_eq!(background.pixel(11, 12).unwrap(), vec![100, 100, 100]);
    assert_eq!(background.pixel(22, 21).unwrap(), vec![100, 100, 100]);
}

#[test]
fn test_cache_size_change_notification() {
    let dir = ScratchDir::new("engine-budget");
    let config = CoreConfig {
        swap_dir: Some(dir.path().to_path_buf()),
        tile_size: 16,
        ..CoreConfig::default()
    };
    let engine = Engine::init(&config).unwrap();
    let canvas = engine.new_canvas(64, 64, PixelFormat::Gray);
    fill_pattern(&canvas);
    assert_eq!(engine.context().resident_bytes(), 64 * 64);

    engine.on_cache_size_changed(2 * 16 * 16).unwrap();
    assert!(engine.context().resident_bytes() <= 2 * 16 * 16);
    assert_eq!(engine.stats().budget, 2 * 16 * 16);
    assert_eq!(canvas.read_all().unwrap(), pattern_image(64, 64, PixelFormat::Gray));
}
