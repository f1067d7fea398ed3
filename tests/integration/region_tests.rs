//! Region iteration tests.
//!
//! Tests verify:
//! - Lock-step iteration yields spans of equal size for every region
//! - Spans tile the region exactly once, even across different tile grids
//! - Abandoning an iteration leaves no tile pinned
//! - Region copies land at the right offsets under cache pressure
//! - Automatic levels stretch a narrow tonal range to the full scale

use std::collections::HashSet;

use tile_composite::region::{ops, HistogramChannel};
use tile_composite::{lock_step, Access, Levels, PixelFormat, Rect, TileContext};

use super::test_utils::{fill_pattern, pattern_byte};

#[test]
fn test_lock_step_spans_have_equal_dimensions() {
    let a_ctx = TileContext::in_memory(1 << 20, 16);
    let b_ctx = TileContext::in_memory(1 << 20, 24);
    let a = a_ctx.create_canvas(120, 90, PixelFormat::Rgba);
    let b = b_ctx.create_canvas(120, 90, PixelFormat::Gray);
    let c = a_ctx.create_canvas(120, 90, PixelFormat::Rgb);

    let rect_a = Rect::new(5, 3, 70, 50);
    let rect_b = Rect::new(40, 31, 70, 50);
    let rect_c = Rect::new(11, 17, 70, 50);

    let mut covered = HashSet::new();
    let mut count = 0;
    for triple in lock_step([
        a.region(rect_a, Access::Read),
        b.region(rect_b, Access::Read),
        c.region(rect_c, Access::Write),
    ]) {
        let [sa, sb, sc] = triple.unwrap();
        count += 1;

        assert_eq!((sa.width(), sa.height()), (sb.width(), sb.height()));
        assert_eq!((sa.width(), sa.height()), (sc.width(), sc.height()));
        assert_eq!(sa.region_offset(), sb.region_offset());
        assert_eq!(sa.region_offset(), sc.region_offset());
        assert_eq!(sa.row(0).len(), sa.width() as usize * 4);
        assert_eq!(sb.row(0).len(), sb.width() as usize);

        // No span crosses a tile boundary of its own grid
        assert_eq!(sa.x() / 16, (sa.x() + sa.width() - 1) / 16);
        assert_eq!(sb.y() / 24, (sb.y() + sb.height() - 1) / 24);

        let (ox, oy) = sa.region_offset();
        for y in oy..oy + sa.height() {
            for x in ox..ox + sa.width() {
                assert!(covered.insert((x, y)), "pixel ({x}, {y}) visited twice");
            }
        }
    }

    assert_eq!(covered.len(), 70 * 50);
    assert!(count > 12);
}

#[test]
fn test_abandoned_lock_step_unpins_tiles() {
    let ctx = TileContext::in_memory(1 << 20, 16);
    let src = ctx.create_canvas(64, 64, PixelFormat::Gray);
    let dst = ctx.create_canvas(64, 64, PixelFormat::Gray);

    let mut iter = lock_step([
        src.full_region(Access::Read),
        dst.full_region(Access::Write),
    ]);
    let first = iter.next().unwrap().unwrap();
    assert_eq!(src.tile_refcount(0, 0), 1);
    assert_eq!(dst.tile_refcount(0, 0), 1);
    drop(first);
    let _second = iter.next().unwrap().unwrap();
    drop(iter);

    assert_eq!(src.tile_refcount(0, 0), 0);
    assert_eq!(dst.tile_refcount(0, 0), 0);
}

#[test]
fn test_copy_under_pressure_lands_at_offset() {
    let format = PixelFormat::Rgb;
    // Budget of three tiles while two 4x4-tile canvases are in play
    let ctx = TileContext::in_memory(3 * 16 * 16 * 3, 16);
    let src = ctx.create_canvas(64, 64, format);
    let dst = ctx.create_canvas(64, 64, format);
    fill_pattern(&src);

    ops::copy(
        &src.region(Rect::new(0, 0, 40, 30), Access::Read),
        &dst.region(Rect::new(20, 30, 40, 30), Access::Write),
    )
    .unwrap();

    for (x, y) in [(0, 0), (17, 9), (39, 29)] {
        let expected: Vec<u8> = (0..3).map(|c| pattern_byte(x, y, c)).collect();
        assert_eq!(dst.pixel(x + 20, y + 30).unwrap(), expected);
    }
    assert_eq!(dst.pixel(19, 30).unwrap(), vec![0, 0, 0]);
    assert!(ctx.stats().swap_writes > 0);
}

#[test]
#[should_panic(expected = "expected 20x20")]
fn test_lock_step_rejects_mismatched_sizes() {
    let ctx = TileContext::in_memory(1 << 20, 16);
    let a = ctx.create_canvas(64, 64, PixelFormat::Gray);
    let b = ctx.create_canvas(64, 64, PixelFormat::Gray);
    let _ = lock_step([
        a.region(Rect::new(0, 0, 20, 20), Access::Read),
        b.region(Rect::new(0, 0, 20, 21), Access::Write),
    ]);
}

#[test]
fn test_auto_levels_stretch_gradient() {
    // Four-tile budget for a 10x1-tile canvas
    let ctx = TileContext::in_memory(4 * 16 * 16, 16);
    let canvas = ctx.create_canvas(151, 16, PixelFormat::Gray);
    let gradient: Vec<u8> = (0..16).flat_map(|_| 50..=200u8).collect();
    canvas.write_all(&gradient).unwrap();

    let histogram = ops::histogram(&canvas.full_region(Access::Read)).unwrap();
    assert_eq!(histogram.total(HistogramChannel::Value), 151 * 16);
    let levels = Levels::auto(&histogram, false);
    let value = levels.channel(HistogramChannel::Value);
    assert_eq!((value.low_input, value.high_input), (51, 199));

    let mut last = 0;
    let mut sink = |_: u64, _: u64, cur: u64| last = cur;
    ops::levels(&canvas.full_region(Access::Write), &levels, Some(&mut sink)).unwrap();
    assert_eq!(last, 151 * 16);

    let row: Vec<u8> = (0..151).map(|x| canvas.pixel(x, 7).unwrap()[0]).collect();
    assert_eq!(row[0], 0);
    assert_eq!(row[1], 0);
    assert_eq!(row[149], 255);
    assert_eq!(row[150], 255);
    assert!(row.windows(2).all(|w| w[0] <= w[1]));
    assert!(ctx.stats().swap_writes > 0);
}
