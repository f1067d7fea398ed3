//! Tile cache integration tests.
//!
//! Tests verify:
//! - Canvas contents survive eviction to swap and fault back byte-identical
//! - Lowering the budget never evicts pinned tiles
//! - Several canvases and threads share one budget
//! - Swap failures are recoverable and lose no pixels
//! - Validated tiles are computed once and then swap like written ones
//! - Mapped tiles share pixels until one side writes

use tile_composite::error::TileError;
use tile_composite::{
    Access, MemoryBacking, PixelFormat, Rect, SwapStore, TileContext, TileHandle, TileState,
};

use super::test_utils::{fill_pattern, pattern_byte, pattern_image};

const TS: u32 = 16;

fn tile_bytes(format: PixelFormat) -> usize {
    (TS * TS) as usize * format.bytes_per_pixel()
}

// =============================================================================
// Eviction Round Trips
// =============================================================================

#[test]
fn test_pattern_survives_eviction() {
    let format = PixelFormat::Rgb;
    // Two tiles of budget for a canvas of 7x5 tiles, with ragged edges
    let ctx = TileContext::in_memory(2 * tile_bytes(format), TS);
    let canvas = ctx.create_canvas(100, 70, format);

    fill_pattern(&canvas);
    let stats = ctx.stats();
    assert!(stats.swap_writes > 0);
    assert!(stats.resident_bytes <= stats.budget);

    assert_eq!(canvas.read_all().unwrap(), pattern_image(100, 70, format));
    assert_eq!(
        canvas.pixel(99, 69).unwrap(),
        vec![
            pattern_byte(99, 69, 0),
            pattern_byte(99, 69, 1),
            pattern_byte(99, 69, 2),
        ]
    );
    assert!(ctx.stats().faults > 0);
}

#[test]
fn test_dirty_tile_refaults_identically() {
    let format = PixelFormat::GrayAlpha;
    let backing = MemoryBacking::new();
    let ctx = TileContext::new(tile_bytes(format), TS, SwapStore::new(backing.clone()));
    let canvas = ctx.create_canvas(2 * TS, TS, format);

    let mut tile = canvas.acquire(0, 0, Access::Write).unwrap();
    for (i, b) in tile.data_mut().iter_mut().enumerate() {
        *b = (i * 31 % 251) as u8;
    }
    let written = tile.data().to_vec();
    drop(tile);

    drop(canvas.acquire(1, 0, Access::Read).unwrap());
    assert_eq!(canvas.tile_state(0, 0), TileState::SwappedOut);
    assert_eq!(backing.write_count(), 1);

    let tile = canvas.acquire(0, 0, Access::Read).unwrap();
    assert_eq!(tile.data(), &written[..]);
    drop(tile);

    // Faulted back clean: evicting again needs no second write
    drop(canvas.acquire(1, 0, Access::Read).unwrap());
    assert_eq!(backing.write_count(), 1);
    assert_eq!(canvas.tile_state(0, 0), TileState::SwappedOut);
}

#[test]
fn test_canvases_share_one_budget() {
    let format = PixelFormat::Gray;
    let budget = 3 * tile_bytes(format);
    let ctx = TileContext::in_memory(budget, TS);
    let a = ctx.create_canvas(64, 64, format);
    let b = ctx.create_canvas(64, 64, format);

    fill_pattern(&a);
    b.write_all(&vec![0x5A; 64 * 64]).unwrap();
    assert!(ctx.resident_bytes() <= budget);

    assert_eq!(a.read_all().unwrap(), pattern_image(64, 64, format));
    assert!(b.read_all().unwrap().iter().all(|&x| x == 0x5A));
    assert!(ctx.resident_bytes() <= budget);
}

#[test]
fn test_threads_share_context() {
    let format = PixelFormat::Rgba;
    let ctx = TileContext::in_memory(4 * tile_bytes(format), TS);

    std::thread::scope(|scope| {
        for n in 0..4u8 {
            let ctx = ctx.clone();
            scope.spawn(move || {
                let canvas = ctx.create_canvas(50, 40, format);
                let data: Vec<u8> = (0..50 * 40 * 4).map(|i| (i as u8) ^ n).collect();
                canvas.write_all(&data).unwrap();
                assert_eq!(canvas.read_all().unwrap(), data);
            });
        }
    });

    let stats = ctx.stats();
    assert_eq!(stats.resident_bytes, 0);
    assert_eq!(stats.swap_used_bytes, 0);
}

// =============================================================================
// Budget Changes
// =============================================================================

#[test]
fn test_budget_lowering_spares_pinned_tiles() {
    let format = PixelFormat::Gray;
    let tb = tile_bytes(format);
    let ctx = TileContext::in_memory(16 * tb, TS);
    let canvas = ctx.create_canvas(4 * TS, 4 * TS, format);
    fill_pattern(&canvas);
    assert_eq!(ctx.resident_bytes(), 16 * tb);

    let pinned_read = canvas.acquire(1, 1, Access::Read).unwrap();
    let mut pinned_write = canvas.acquire(2, 3, Access::Write).unwrap();
    pinned_write.data_mut()[0] = 0xEE;

    ctx.set_size_budget(0).unwrap();
    assert_eq!(ctx.resident_bytes(), 2 * tb);
    assert!(matches!(canvas.tile_state(1, 1), TileState::Resident { .. }));
    assert!(matches!(canvas.tile_state(2, 3), TileState::Resident { .. }));
    assert_eq!(canvas.tile_state(0, 0), TileState::SwappedOut);
    assert_eq!(pinned_read.data()[0], pattern_byte(TS, TS, 0));

    drop(pinned_read);
    drop(pinned_write);
    assert_eq!(ctx.resident_bytes(), 0);

    ctx.set_size_budget(16 * tb).unwrap();
    assert_eq!(canvas.pixel(2 * TS, 3 * TS).unwrap(), vec![0xEE]);
    assert_eq!(canvas.pixel(0, 0).unwrap(), vec![pattern_byte(0, 0, 0)]);
}

#[test]
fn test_swap_failure_is_recoverable() {
    let format = PixelFormat::Gray;
    let backing = MemoryBacking::with_limit(0);
    let ctx = TileContext::new(16 * tile_bytes(format), TS, SwapStore::new(backing.clone()));
    let canvas = ctx.create_canvas(2 * TS, 2 * TS, format);
    fill_pattern(&canvas);

    let err = ctx.set_size_budget(0).unwrap_err();
    assert!(matches!(err, TileError::Swap { .. }));
    assert!(err.is_recoverable());
    assert_eq!(canvas.tile_state(0, 0), TileState::Resident { dirty: true });
    assert_eq!(canvas.read_all().unwrap(), pattern_image(2 * TS, 2 * TS, format));

    backing.set_limit(None);
    ctx.set_size_budget(0).unwrap();
    assert_eq!(ctx.resident_bytes(), 0);
    assert_eq!(canvas.read_all().unwrap(), pattern_image(2 * TS, 2 * TS, format));
}

// =============================================================================
// Lazy and Shared Tiles
// =============================================================================

fn write_pattern(rect: Rect, tile: &mut TileHandle) {
    let bpp = tile.bytes_per_pixel();
    let stride = tile.row_stride();
    let data = tile.data_mut();
    for y in 0..rect.height {
        for x in 0..rect.width {
            for c in 0..bpp {
                data[y as usize * stride + x as usize * bpp + c] =
                    pattern_byte(rect.x + x, rect.y + y, c);
            }
        }
    }
}

#[test]
fn test_validated_canvas_under_pressure() {
    let format = PixelFormat::Rgba;
    let ctx = TileContext::in_memory(2 * tile_bytes(format), TS);
    let canvas = ctx.create_canvas(70, 50, format);
    canvas.set_validator(write_pattern);

    assert_eq!(canvas.read_all().unwrap(), pattern_image(70, 50, format));
    let first = ctx.stats();
    assert_eq!(first.validations, 20);
    assert_eq!(first.zero_fills, 0);
    assert!(first.resident_bytes <= first.budget);

    // Second pass faults from swap instead of validating again
    assert_eq!(canvas.read_all().unwrap(), pattern_image(70, 50, format));
    let second = ctx.stats();
    assert_eq!(second.validations, 20);
    assert!(second.faults > 0);
}

#[test]
fn test_mapped_canvas_copies_on_write() {
    let format = PixelFormat::Gray;
    let ctx = TileContext::in_memory(64 * tile_bytes(format), TS);
    let original = ctx.create_canvas(4 * TS, 2 * TS, format);
    let duplicate = ctx.create_canvas(4 * TS, 2 * TS, format);
    fill_pattern(&original);

    for row in 0..2 {
        for col in 0..4 {
            duplicate.map_tile(col, row, &original, col, row).unwrap();
        }
    }
    assert_eq!(duplicate.read_all().unwrap(), original.read_all().unwrap());
    assert_eq!(ctx.stats().copy_on_write, 0);

    duplicate.put_pixel(TS + 1, TS + 1, &[0xAB]).unwrap();
    assert_eq!(ctx.stats().copy_on_write, 1);
    assert_eq!(duplicate.pixel(TS + 1, TS + 1).unwrap(), vec![0xAB]);
    assert_eq!(original.read_all().unwrap(), pattern_image(4 * TS, 2 * TS, format));
}
