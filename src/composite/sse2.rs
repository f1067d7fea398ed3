//! x86-64 SSE2 kernels.
//!
//! Products follow the classic unpack, multiply, pack sequence: eight
//! channels are zero-extended to 16-bit lanes, multiplied with `pmullw`,
//! divided by 255 with two shifts and packed back with unsigned saturation.

use std::arch::x86_64::*;

use super::mode::CompositeMode;
use super::reference;

pub const SUPPORTED: &[CompositeMode] = &[
    CompositeMode::Normal,
    CompositeMode::Multiply,
    CompositeMode::Screen,
    CompositeMode::Difference,
    CompositeMode::Addition,
    CompositeMode::Subtract,
    CompositeMode::Darken,
    CompositeMode::Lighten,
];

/// Whether the running CPU can execute these kernels.
pub fn available() -> bool {
    is_x86_feature_detected!("sse2")
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn load8(s: &[u8]) -> __m128i {
    debug_assert!(s.len() >= 8);
    _mm_unpacklo_epi8(
        _mm_loadl_epi64(s.as_ptr() as *const __m128i),
        _mm_setzero_si128(),
    )
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn store8(v: __m128i, out: &mut [u8]) {
    debug_assert!(out.len() >= 8);
    _mm_storel_epi64(
        out.as_mut_ptr() as *mut __m128i,
        _mm_packus_epi16(v, _mm_setzero_si128()),
    );
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn load16(s: &[u8]) -> __m128i {
    debug_assert!(s.len() >= 16);
    _mm_loadu_si128(s.as_ptr() as *const __m128i)
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn store16(v: __m128i, out: &mut [u8]) {
    debug_assert!(out.len() >= 16);
    _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, v);
}

#[inline]
#[target_feature(enable = "sse2")]
unsafe fn div255(x: __m128i) -> __m128i {
    let t = _mm_add_epi16(x, _mm_set1_epi16(128));
    _mm_srli_epi16(_mm_add_epi16(t, _mm_srli_epi16(t, 8)), 8)
}

#[target_feature(enable = "sse2")]
unsafe fn blend_sse2(mode: CompositeMode, src: &[u8], dst: &[u8], out: &mut [u8], body: usize) {
    let step = match mode {
        CompositeMode::Multiply | CompositeMode::Screen => 8,
        _ => 16,
    };
    let full = _mm_set1_epi16(255);

    for i in (0..body).step_by(step) {
        let (s, d, o) = (&src[i..], &dst[i..], &mut out[i..]);
        match mode {
            CompositeMode::Normal => store16(load16(s), o),
            CompositeMode::Difference => {
                let (a, b) = (load16(s), load16(d));
                store16(_mm_or_si128(_mm_subs_epu8(a, b), _mm_subs_epu8(b, a)), o);
            }
            CompositeMode::Addition => store16(_mm_adds_epu8(load16(s), load16(d)), o),
            CompositeMode::Subtract => store16(_mm_subs_epu8(load16(d), load16(s)), o),
            CompositeMode::Darken => store16(_mm_min_epu8(load16(s), load16(d)), o),
            CompositeMode::Lighten => store16(_mm_max_epu8(load16(s), load16(d)), o),
            CompositeMode::Multiply => {
                store8(div255(_mm_mullo_epi16(load8(s), load8(d))), o);
            }
            CompositeMode::Screen => {
                let p = _mm_mullo_epi16(
                    _mm_sub_epi16(full, load8(s)),
                    _mm_sub_epi16(full, load8(d)),
                );
                store8(_mm_sub_epi16(full, div255(p)), o);
            }
            _ => unreachable!(),
        }
    }
}

#[target_feature(enable = "sse2")]
unsafe fn mix_sse2(blended: &[u8], dst: &[u8], weight: &[u8], out: &mut [u8], body: usize) {
    let full = _mm_set1_epi16(255);
    for i in (0..body).step_by(8) {
        let w = load8(&weight[i..]);
        let x = _mm_add_epi16(
            _mm_mullo_epi16(load8(&blended[i..]), w),
            _mm_mullo_epi16(load8(&dst[i..]), _mm_sub_epi16(full, w)),
        );
        store8(div255(x), &mut out[i..]);
    }
}

/// Blend `src` onto `dst` channel by channel.
///
/// # Panics
/// Panics if `mode` is not in [`SUPPORTED`] or the CPU lacks SSE2.
pub fn blend(mode: CompositeMode, src: &[u8], dst: &[u8], out: &mut [u8]) {
    assert!(SUPPORTED.contains(&mode), "{mode} has no SSE2 kernel");
    assert!(available(), "SSE2 not available");
    let n = out.len().min(src.len()).min(dst.len());
    let step = if matches!(mode, CompositeMode::Multiply | CompositeMode::Screen) {
        8
    } else {
        16
    };
    let body = n - n % step;

    // SAFETY: SSE2 support checked above; every load and store stays inside
    // the first `body` bytes, which all three slices have.
    unsafe { blend_sse2(mode, src, dst, out, body) };
    reference::blend(mode, &src[body..n], &dst[body..n], &mut out[body..n]);
}

/// `(b * w + d * (255 - w) + 127) / 255` per channel.
///
/// # Panics
/// Panics if the CPU lacks SSE2.
pub fn mix(blended: &[u8], dst: &[u8], weight: &[u8], out: &mut [u8]) {
    assert!(available(), "SSE2 not available");
    let n = out.len().min(blended.len()).min(dst.len()).min(weight.len());
    let body = n - n % 8;

    // SAFETY: as in `blend`.
    unsafe { mix_sse2(blended, dst, weight, out, body) };
    reference::mix_slice(
        &blended[body..n],
        &dst[body..n],
        &weight[body..n],
        &mut out[body..n],
    );
}
