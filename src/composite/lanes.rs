//! Portable SIMD kernels on `wide` vector types.
//!
//! Byte-wise modes (min, max, saturating add/sub, absolute difference) run
//! sixteen channels at a time as `u8x16`. Modes that need a product widen
//! eight channels to `u16x8` and divide by 255 with the same shift sequence
//! as [`reference::mul_div255`](super::reference). Tails shorter than one
//! vector fall back to the scalar kernels.

use wide::{i16x8, u16x8, u8x16};

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
    CompositeMode::GrainExtract,
    CompositeMode::GrainMerge,
];

#[inline]
fn load16(s: &[u8]) -> u8x16 {
    let mut a = [0u8; 16];
    a.copy_from_slice(&s[..16]);
    u8x16::new(a)
}

#[inline]
fn widen8(s: &[u8]) -> u16x8 {
    u16x8::new(std::array::from_fn(|i| s[i] as u16))
}

#[inline]
fn widen8_signed(s: &[u8]) -> i16x8 {
    i16x8::new(std::array::from_fn(|i| s[i] as i16))
}

#[inline]
fn store_narrow(v: u16x8, out: &mut [u8]) {
    for (o, x) in out[..8].iter_mut().zip(v.to_array()) {
        *o = x as u8;
    }
}

#[inline]
fn store_narrow_signed(v: i16x8, out: &mut [u8]) {
    for (o, x) in out[..8].iter_mut().zip(v.to_array()) {
        *o = x as u8;
    }
}

/// `(x + 128 + ((x + 128) >> 8)) >> 8` per lane.
#[inline]
fn div255(x: u16x8) -> u16x8 {
    let t = x + u16x8::splat(128);
    (t + (t >> 8)) >> 8
}

#[inline]
fn mul8(a: u16x8, b: u16x8) -> u16x8 {
    div255(a * b)
}

/// Blend `src` onto `dst` channel by channel.
///
/// # Panics
/// Panics if `mode` is not in [`SUPPORTED`].
pub fn blend(mode: CompositeMode, src: &[u8], dst: &[u8], out: &mut [u8]) {
    let n = out.len().min(src.len()).min(dst.len());
    let step = match mode {
        CompositeMode::Multiply
        | CompositeMode::Screen
        | CompositeMode::GrainExtract
        | CompositeMode::GrainMerge => 8,
        _ => 16,
    };
    let body = n - n % step;

    for i in (0..body).step_by(step) {
        let (s, d, o) = (&src[i..], &dst[i..], &mut out[i..]);
        match mode {
            CompositeMode::Normal => o[..16].copy_from_slice(&s[..16]),
            CompositeMode::Difference => {
                let (a, b) = (load16(s), load16(d));
                let r = a.max(b) - a.min(b);
                o[..16].copy_from_slice(&r.to_array());
            }
            CompositeMode::Addition => {
                let r = load16(s).saturating_add(load16(d));
                o[..16].copy_from_slice(&r.to_array());
            }
            CompositeMode::Subtract => {
                let r = load16(d).saturating_sub(load16(s));
                o[..16].copy_from_slice(&r.to_array());
            }
            CompositeMode::Darken => {
                let r = load16(s).min(load16(d));
                o[..16].copy_from_slice(&r.to_array());
            }
            CompositeMode::Lighten => {
                let r = load16(s).max(load16(d));
                o[..16].copy_from_slice(&r.to_array());
            }
            CompositeMode::Multiply => store_narrow(mul8(widen8(s), widen8(d)), o),
            CompositeMode::Screen => {
                let full = u16x8::splat(255);
                let r = full - mul8(full - widen8(s), full - widen8(d));
                store_narrow(r, o);
            }
            CompositeMode::GrainExtract => {
                let r = widen8_signed(d) - widen8_signed(s) + i16x8::splat(128);
                store_narrow_signed(r.max(i16x8::splat(0)).min(i16x8::splat(255)), o);
            }
            CompositeMode::GrainMerge => {
                let r = widen8_signed(d) + widen8_signed(s) - i16x8::splat(128);
                store_narrow_signed(r.max(i16x8::splat(0)).min(i16x8::splat(255)), o);
            }
            _ => panic!("{mode} has no lane kernel"),
        }
    }

    reference::blend(mode, &src[body..n], &dst[body..n], &mut out[body..n]);
}

/// `(b * w + d * (255 - w) + 127) / 255` per channel.
pub fn mix(blended: &[u8], dst: &[u8], weight: &[u8], out: &mut [u8]) {
    let n = out.len().min(blended.len()).min(dst.len()).min(weight.len());
    let body = n - n % 8;
    let full = u16x8::splat(255);

    for i in (0..body).step_by(8) {
        let w = widen8(&weight[i..]);
        let x = widen8(&blended[i..]) * w + widen8(&dst[i..]) * (full - w);
        store_narrow(div255(x), &mut out[i..]);
    }

    reference::mix_slice(
        &blended[body..n],
        &dst[body..n],
        &weight[body..n],
        &mut out[body..n],
    );
}
