//! Per-pixel compositing kernels.
//!
//! All arithmetic is 8-bit integer math. Products are rounded with
//! [`int_mult`] (`round(a * b / 255)`), and the final step of every
//! colour-blending mode is the weighted mix
//!
//! ```text
//! out = (blended * w + dst * (255 - w) + 127) / 255
//! ```
//!
//! # Weights
//!
//! The source weight starts as `a_eff = INT_MULT(INT_MULT(src_alpha, opacity), mask)`,
//! treating a missing alpha or mask as 255. On a destination with alpha the
//! layers combine as
//!
//! ```text
//! new_alpha = dst_alpha + INT_MULT(255 - dst_alpha, a_eff)
//! w         = round(a_eff * 255 / new_alpha)
//! ```
//!
//! so painting onto transparent pixels shows the full source colour. Without
//! destination alpha `w = a_eff`.
//!
//! # Variants
//!
//! A row is processed in chunks of [`CHUNK_PIXELS`]. Per-pixel weights are
//! computed by scalar code shared by all variants; the channel blend and the
//! weighted mix run through the variant the [`KernelSet`] chose. Because only
//! those two steps differ, bit-identical channel kernels give bit-identical
//! pixels.

mod dispatch;
pub mod lanes;
mod mode;
pub mod reference;
#[cfg(target_arch = "x86_64")]
pub mod sse2;

pub use dispatch::{CpuFeatures, KernelSet, KernelVariant, VariantCheck};
pub use mode::CompositeMode;
pub use reference::{int_mult, luminance, mix};

use crate::pixel::PixelFormat;

/// Pixels processed per inner chunk.
pub const CHUNK_PIXELS: usize = 64;

const CHUNK_CHANNELS: usize = CHUNK_PIXELS * 3;

impl KernelSet {
    /// Composite a row of `src` pixels onto `dst` in place.
    ///
    /// `mask`, if given, holds one coverage byte per pixel.
    ///
    /// # Panics
    /// Panics if the pixel counts differ, the formats have different colour
    /// channel counts, the mask is too short, or `mode` needs destination
    /// alpha that `dst_format` lacks.
    #[allow(clippy::too_many_arguments)]
    pub fn composite_pixels(
        &self,
        mode: CompositeMode,
        src: &[u8],
        src_format: PixelFormat,
        dst: &mut [u8],
        dst_format: PixelFormat,
        mask: Option<&[u8]>,
        opacity: u8,
    ) {
        let cc = dst_format.color_channels();
        assert_eq!(
            src_format.color_channels(),
            cc,
            "{mode} cannot composite {src_format} onto {dst_format}"
        );
        assert!(
            !mode.requires_dest_alpha() || dst_format.has_alpha(),
            "{mode} needs a destination with alpha, got {dst_format}"
        );
        let (sb, db) = (src_format.bytes_per_pixel(), dst_format.bytes_per_pixel());
        let n = dst.len() / db;
        assert_eq!(src.len() / sb, n, "source and destination pixel counts differ");
        if let Some(mask) = mask {
            assert!(mask.len() >= n, "mask covers {} of {n} pixels", mask.len());
        }

        let src_alpha = src_format.alpha_index();
        let dst_alpha = dst_format.alpha_index();
        let channel_op = if mode.is_elementwise() {
            Some(mode)
        } else if matches!(mode, CompositeMode::Behind | CompositeMode::Replace) {
            Some(CompositeMode::Normal)
        } else {
            None
        };

        let mut s_col = [0u8; CHUNK_CHANNELS];
        let mut d_col = [0u8; CHUNK_CHANNELS];
        let mut blended = [0u8; CHUNK_CHANNELS];
        let mut weight = [0u8; CHUNK_CHANNELS];
        let mut mixed = [0u8; CHUNK_CHANNELS];
        let mut a_src = [0u8; CHUNK_PIXELS];
        let mut a_dst = [0u8; CHUNK_PIXELS];
        let mut a_eff = [0u8; CHUNK_PIXELS];
        let mut coverage = [0u8; CHUNK_PIXELS];
        let mut a_out = [0u8; CHUNK_PIXELS];

        for start in (0..n).step_by(CHUNK_PIXELS) {
            let len = CHUNK_PIXELS.min(n - start);
            let channels = len * cc;

            // Gather into packed colour arrays
            for i in 0..len {
                let sp = &src[(start + i) * sb..(start + i + 1) * sb];
                let dp = &dst[(start + i) * db..(start + i + 1) * db];
                s_col[i * cc..(i + 1) * cc].copy_from_slice(&sp[..cc]);
                d_col[i * cc..(i + 1) * cc].copy_from_slice(&dp[..cc]);
                a_src[i] = src_alpha.map_or(255, |k| sp[k]);
                a_dst[i] = dst_alpha.map_or(255, |k| dp[k]);
                coverage[i] = mask.map_or(255, |m| m[start + i]);
                a_eff[i] = int_mult(int_mult(a_src[i], opacity), coverage[i]);
            }

            match mode {
                CompositeMode::Erase | CompositeMode::AntiErase => {
                    for i in 0..len {
                        a_out[i] = if mode == CompositeMode::Erase {
                            a_dst[i] - int_mult(a_dst[i], a_eff[i])
                        } else {
                            a_dst[i] + int_mult(255 - a_dst[i], a_eff[i])
                        };
                    }
                    if let Some(k) = dst_alpha {
                        for i in 0..len {
                            dst[(start + i) * db + k] = a_out[i];
                        }
                    }
                    continue;
                }
                CompositeMode::ColorToAlpha => {
                    for i in 0..len {
                        let range = i * cc..(i + 1) * cc;
                        let cleared = reference::color_to_alpha(
                            &s_col[range.clone()],
                            &d_col[range.clone()],
                            a_dst[i],
                            &mut blended[range],
                        );
                        a_out[i] = mix(cleared, a_dst[i], a_eff[i]);
                        weight[i * cc..(i + 1) * cc].fill(a_eff[i]);
                    }
                }
                CompositeMode::Colorize => {
                    for i in 0..len {
                        let d = &d_col[i * cc..(i + 1) * cc];
                        let lum = if cc == 3 { luminance(d[0], d[1], d[2]) } else { d[0] };
                        for c in 0..cc {
                            blended[i * cc + c] = int_mult(lum, s_col[i * cc + c]);
                        }
                    }
                    self.normal_weights(
                        dst_alpha.is_some(),
                        len,
                        cc,
                        &a_dst,
                        &a_eff,
                        &mut weight,
                        &mut a_out,
                    );
                }
                _ => {
                    let Some(op) = channel_op else {
                        unreachable!("{mode} has a channel kernel")
                    };
                    self.variant(op).blend(
                        op,
                        &s_col[..channels],
                        &d_col[..channels],
                        &mut blended[..channels],
                    );

                    match mode {
                        CompositeMode::Behind => {
                            for i in 0..len {
                                let (a_d, new_a) = if dst_alpha.is_some() {
                                    let a_d = a_dst[i] as u32;
                                    (a_d, a_d + int_mult(255 - a_dst[i], a_eff[i]) as u32)
                                } else {
                                    (255, 255)
                                };
                                let w = if new_a == 0 {
                                    0
                                } else {
                                    ((new_a - a_d) * 255 + new_a / 2) / new_a
                                };
                                a_out[i] = new_a as u8;
                                weight[i * cc..(i + 1) * cc].fill(w.min(255) as u8);
                            }
                        }
                        CompositeMode::Replace => {
                            for i in 0..len {
                                let w = int_mult(opacity, coverage[i]);
                                a_out[i] = mix(a_src[i], a_dst[i], w);
                                weight[i * cc..(i + 1) * cc].fill(w);
                            }
                        }
                        _ => self.normal_weights(
                            dst_alpha.is_some(),
                            len,
                            cc,
                            &a_dst,
                            &a_eff,
                            &mut weight,
                            &mut a_out,
                        ),
                    }
                }
            }

            self.mix_variant().mix(
                &blended[..channels],
                &d_col[..channels],
                &weight[..channels],
                &mut mixed[..channels],
            );

            // Scatter back
            for i in 0..len {
                let dp = &mut dst[(start + i) * db..(start + i + 1) * db];
                dp[..cc].copy_from_slice(&mixed[i * cc..(i + 1) * cc]);
                if let Some(k) = dst_alpha {
                    dp[k] = a_out[i];
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn normal_weights(
        &self,
        has_dst_alpha: bool,
        len: usize,
        cc: usize,
        a_dst: &[u8],
        a_eff: &[u8],
        weight: &mut [u8],
        a_out: &mut [u8],
    ) {
        for i in 0..len {
            let w = if has_dst_alpha {
                let new_a = a_dst[i] as u32 + int_mult(255 - a_dst[i], a_eff[i]) as u32;
                a_out[i] = new_a as u8;
                if new_a == 0 {
                    0
                } else {
                    ((a_eff[i] as u32 * 255 + new_a / 2) / new_a).min(255) as u8
                }
            } else {
                a_eff[i]
            };
            weight[i * cc..(i + 1) * cc].fill(w);
        }
    }

    /// Replace colour channels by `color` scaled with each pixel's luminance.
    /// Alpha is left untouched.
    pub fn colorize_pixels(&self, pixels: &mut [u8], format: PixelFormat, color: [u8; 3]) {
        let bpp = format.bytes_per_pixel();
        for px in pixels.chunks_exact_mut(bpp) {
            if format.color_channels() == 3 {
                let lum = luminance(px[0], px[1], px[2]);
                for c in 0..3 {
                    px[c] = int_mult(lum, color[c]);
                }
            } else {
                px[0] = int_mult(px[0], luminance(color[0], color[1], color[2]));
            }
        }
    }
}
