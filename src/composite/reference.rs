//! Portable scalar kernels. Every other variant must match these bit for bit.

use super::mode::CompositeMode;

/// `round(a * b / 255)` for 8-bit operands.
#[inline]
pub fn int_mult(a: u8, b: u8) -> u8 {
    mul_div255(a as u32 * b as u32) as u8
}

/// Rounded division by 255 using shifts. Exact for `x <= 255 * 255`.
#[inline]
pub(crate) fn mul_div255(x: u32) -> u32 {
    let t = x + 128;
    (t + (t >> 8)) >> 8
}

/// `(b * w + d * (255 - w) + 127) / 255`
#[inline]
pub fn mix(blended: u8, dst: u8, weight: u8) -> u8 {
    let x = blended as u32 * weight as u32 + dst as u32 * (255 - weight as u32);
    mul_div255(x) as u8
}

/// Blend function of an elementwise mode for one channel.
#[inline]
pub fn blend_channel(mode: CompositeMode, s: u8, d: u8) -> u8 {
    let (s32, d32) = (s as u32, d as u32);
    match mode {
        CompositeMode::Multiply => int_mult(s, d),
        CompositeMode::Screen => 255 - int_mult(255 - s, 255 - d),
        CompositeMode::Overlay => {
            let inner = d32 + mul_div255(2 * s32 * (255 - d32));
            mul_div255(d32 * inner).min(255) as u8
        }
        CompositeMode::Difference => s.abs_diff(d),
        CompositeMode::Addition => s.saturating_add(d),
        CompositeMode::Subtract => d.saturating_sub(s),
        CompositeMode::Darken => s.min(d),
        CompositeMode::Lighten => s.max(d),
        CompositeMode::Divide => ((d32 * 256) / (s32 + 1)).min(255) as u8,
        CompositeMode::Dodge => ((d32 * 256) / (256 - s32)).min(255) as u8,
        CompositeMode::Burn => 255 - (((255 - d32) * 256) / (s32 + 1)).min(255) as u8,
        CompositeMode::HardLight => {
            if s > 128 {
                let t = (255 - d32) * (255 - ((s32 - 128) * 2));
                255 - (t >> 8).min(255) as u8
            } else {
                ((d32 * s32 * 2) >> 8).min(255) as u8
            }
        }
        CompositeMode::GrainExtract => (d as i32 - s as i32 + 128).clamp(0, 255) as u8,
        CompositeMode::GrainMerge => (d as i32 + s as i32 - 128).clamp(0, 255) as u8,
        _ => s,
    }
}

pub fn blend(mode: CompositeMode, src: &[u8], dst: &[u8], out: &mut [u8]) {
    for ((o, &s), &d) in out.iter_mut().zip(src).zip(dst) {
        *o = blend_channel(mode, s, d);
    }
}

pub fn mix_slice(blended: &[u8], dst: &[u8], weight: &[u8], out: &mut [u8]) {
    for (((o, &b), &d), &w) in out.iter_mut().zip(blended).zip(dst).zip(weight) {
        *o = mix(b, d, w);
    }
}

/// Integer luminance with weights 0.30/0.59/0.11 scaled to 256.
#[inline]
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 151 * g as u32 + 28 * b as u32 + 128) >> 8) as u8
}

/// Replace `color` in a destination pixel by transparency.
///
/// Returns the new colour channels (written into `out_color`) and the new
/// alpha. The alpha needed to explain each channel as `color` blended over
/// an unknown background is the largest of the per-channel ratios; the colour
/// is then solved back from that alpha.
pub fn color_to_alpha(color: &[u8], dst: &[u8], dst_alpha: u8, out_color: &mut [u8]) -> u8 {
    let mut alpha = 0u32;
    for (&c, &d) in color.iter().zip(dst) {
        let (c, d) = (c as u32, d as u32);
        let a = if d > c {
            ((d - c) * 255 + (255 - c) / 2) / (255 - c)
        } else if d < c {
            ((c - d) * 255 + c / 2) / c
        } else {
            0
        };
        alpha = alpha.max(a);
    }

    if alpha == 0 {
        out_color.copy_from_slice(&dst[..out_color.len()]);
        return 0;
    }

    let alpha_i = alpha as i32;
    for ((o, &c), &d) in out_color.iter_mut().zip(color).zip(dst) {
        let diff = d as i32 - c as i32;
        // Rounds half away from zero
        let v = c as i32 + (diff * 255 + diff.signum() * (alpha_i / 2)) / alpha_i;
        *o = v.clamp(0, 255) as u8;
    }
    int_mult(alpha as u8, dst_alpha)
}
