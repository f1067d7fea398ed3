//! Compositing kernel tests.
//!
//! Tests verify:
//! - Every usable accelerated kernel matches the reference on all 65536 byte pairs
//! - The weighted mix matches the reference for every (blended, dst, weight)
//! - Whole-canvas composites are identical whichever kernels are selected
//! - Opacity and mask weighting follow the integer formulas

use tile_composite::composite::reference;
use tile_composite::region::ops;
use tile_composite::{
    Access, CompositeMode, CpuFeatures, KernelSet, KernelVariant, PixelFormat, Rect,
    TileContext,
};

use super::test_utils::{all_pairs, fill_pattern, pattern_image};

fn usable_variants() -> Vec<KernelVariant> {
    let features = CpuFeatures::detect();
    KernelVariant::ALL
        .into_iter()
        .filter(|v| *v != KernelVariant::Reference && v.is_available(&features))
        .collect()
}

// =============================================================================
// Exhaustive Kernel Equivalence
// =============================================================================

#[test]
fn test_blend_kernels_match_reference_exhaustively() {
    let (src, dst) = all_pairs();
    let mut expected = vec![0u8; src.len()];
    let mut actual = vec![0u8; src.len()];

    for variant in usable_variants() {
        for mode in CompositeMode::ALL {
            if !mode.is_elementwise() || !variant.supports(mode) {
                continue;
            }
            reference::blend(mode, &src, &dst, &mut expected);
            // Fill with garbage so a kernel that skips bytes cannot pass
            actual.fill(0xA5);
            variant.blend(mode, &src, &dst, &mut actual);

            if let Some(i) = expected.iter().zip(&actual).position(|(e, a)| e != a) {
                panic!(
                    "{variant} {mode}: s={} d={} expected {} got {}",
                    src[i], dst[i], expected[i], actual[i]
                );
            }
        }
    }
}

#[test]
fn test_mix_kernels_match_reference_exhaustively() {
    let (blended, weight) = all_pairs();
    let mut expected = vec![0u8; blended.len()];
    let mut actual = vec![0u8; blended.len()];

    for variant in usable_variants() {
        for d in 0..=255u8 {
            let dst = vec![d; blended.len()];
            reference::mix_slice(&blended, &dst, &weight, &mut expected);
            actual.fill(0x5A);
            variant.mix(&blended, &dst, &weight, &mut actual);
            assert!(expected == actual, "{variant} mix differs for d={d}");
        }
    }
}

#[test]
fn test_odd_lengths_use_scalar_tail() {
    let (src, dst) = all_pairs();
    for variant in usable_variants() {
        for len in [1usize, 7, 15, 17, 33, 100] {
            let mut expected = vec![0u8; len];
            let mut actual = vec![0u8; len];
            reference::blend(
                CompositeMode::Multiply,
                &src[300..300 + len],
                &dst[..len],
                &mut expected,
            );
            variant.blend(CompositeMode::Multiply, &src[300..300 + len], &dst[..len], &mut actual);
            assert_eq!(expected, actual, "{variant} len {len}");
        }
    }
}

// =============================================================================
// Canvas Compositing
// =============================================================================

#[test]
fn test_canvas_composite_identical_across_kernel_sets() {
    let ctx = TileContext::in_memory(1 << 20, 16);
    let layer = ctx.create_canvas(45, 37, PixelFormat::Rgba);
    fill_pattern(&layer);
    let background = pattern_image(45, 37, PixelFormat::Rgba)
        .into_iter()
        .map(|b| b.wrapping_mul(3).wrapping_add(17))
        .collect::<Vec<u8>>();

    let mut sets = vec![KernelSet::reference(), KernelSet::detect(true)];
    sets.extend(usable_variants().into_iter().map(KernelSet::forced));

    for mode in CompositeMode::ALL {
        let mut results = Vec::new();
        for kernels in &sets {
            let dst = ctx.create_canvas(45, 37, PixelFormat::Rgba);
            dst.write_all(&background).unwrap();
            ops::composite(
                kernels,
                &layer.full_region(Access::Read),
                &dst.full_region(Access::Write),
                None,
                mode,
                200,
                None,
            )
            .unwrap();
            results.push(dst.read_all().unwrap());
        }
        for (i, r) in results.iter().enumerate().skip(1) {
            assert!(r == &results[0], "{mode}: kernel set {i} differs from reference");
        }
    }
}

#[test]
fn test_half_opacity_normal_on_canvas() {
    let ctx = TileContext::in_memory(1 << 20, 64);
    let src = ctx.create_canvas(10, 10, PixelFormat::Rgba);
    let dst = ctx.create_canvas(10, 10, PixelFormat::Rgba);
    ops::fill(&src.full_region(Access::Write), &[200, 60, 0, 255]).unwrap();
    ops::fill(&dst.full_region(Access::Write), &[40, 180, 255, 255]).unwrap();

    ops::composite(
        &KernelSet::detect(true),
        &src.full_region(Access::Read),
        &dst.full_region(Access::Write),
        None,
        CompositeMode::Normal,
        128,
        None,
    )
    .unwrap();

    let expect = |s: u32, d: u32| ((s * 128 + d * 127 + 127) / 255) as u8;
    let pixel = vec![expect(200, 40), expect(60, 180), expect(0, 255), 255];
    let all = dst.read_all().unwrap();
    assert!(all.chunks_exact(4).all(|px| px == &pixel[..]));
}

#[test]
fn test_mask_scales_weight() {
    let ctx = TileContext::in_memory(1 << 20, 16);
    let src = ctx.create_canvas(3, 1, PixelFormat::Gray);
    let dst = ctx.create_canvas(3, 1, PixelFormat::Gray);
    let mask = ctx.create_canvas(3, 1, PixelFormat::Gray);
    src.write_all(&[255, 255, 255]).unwrap();
    mask.write_all(&[0, 128, 255]).unwrap();

    ops::composite(
        &KernelSet::reference(),
        &src.full_region(Access::Read),
        &dst.full_region(Access::Write),
        Some(&mask.full_region(Access::Read)),
        CompositeMode::Normal,
        255,
        None,
    )
    .unwrap();

    assert_eq!(dst.read_all().unwrap(), vec![0, 128, 255]);
}

#[test]
fn test_erase_with_alpha_destination() {
    let ctx = TileContext::in_memory(1 << 20, 16);
    let src = ctx.create_canvas(4, 4, PixelFormat::GrayAlpha);
    let dst = ctx.create_canvas(4, 4, PixelFormat::GrayAlpha);
    ops::fill(&src.full_region(Access::Write), &[0, 255]).unwrap();
    ops::fill(&dst.full_region(Access::Write), &[90, 255]).unwrap();

    ops::composite(
        &KernelSet::reference(),
        &src.region(Rect::new(0, 0, 2, 4), Access::Read),
        &dst.region(Rect::new(0, 0, 2, 4), Access::Write),
        None,
        CompositeMode::Erase,
        255,
        None,
    )
    .unwrap();

    assert_eq!(dst.pixel(1, 3).unwrap(), vec![90, 0]);
    assert_eq!(dst.pixel(2, 3).unwrap(), vec![90, 255]);
}
