//! CPU probe and the per-mode kernel table.

use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;
use tracing::{debug, info};

use super::mode::CompositeMode;
use super::{lanes, reference};

/// CPU capabilities relevant to kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CpuFeatures {
    pub sse2: bool,
    pub sse41: bool,
    pub avx2: bool,
    pub neon: bool,
}

impl CpuFeatures {
    /// Probe the running CPU once; later calls return the cached answer.
    pub fn detect() -> Self {
        static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();
        *FEATURES.get_or_init(|| {
            let features = Self::probe();
            debug!(?features, "Probed CPU features");
            features
        })
    }

    #[cfg(target_arch = "x86_64")]
    fn probe() -> Self {
        Self {
            sse2: is_x86_feature_detected!("sse2"),
            sse41: is_x86_feature_detected!("sse4.1"),
            avx2: is_x86_feature_detected!("avx2"),
            neon: false,
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn probe() -> Self {
        Self {
            neon: std::arch::is_aarch64_feature_detected!("neon"),
            ..Self::default()
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    fn probe() -> Self {
        Self::default()
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.sse2, "sse2"),
            (self.sse41, "sse4.1"),
            (self.avx2, "avx2"),
            (self.neon, "neon"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

/// Implementation family of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelVariant {
    /// Portable scalar code; implements every mode
    Reference,
    /// Portable SIMD on `wide` vectors
    Lanes,
    /// x86-64 SSE2 intrinsics
    Sse2,
}

impl KernelVariant {
    pub const ALL: [KernelVariant; 3] = [
        KernelVariant::Reference,
        KernelVariant::Lanes,
        KernelVariant::Sse2,
    ];

    /// Whether this variant has a channel kernel for `mode`.
    pub fn supports(self, mode: CompositeMode) -> bool {
        match self {
            KernelVariant::Reference => true,
            KernelVariant::Lanes => lanes::SUPPORTED.contains(&mode),
            #[cfg(target_arch = "x86_64")]
            KernelVariant::Sse2 => super::sse2::SUPPORTED.contains(&mode),
            #[cfg(not(target_arch = "x86_64"))]
            KernelVariant::Sse2 => false,
        }
    }

    /// Whether the running CPU can execute this variant.
    pub fn is_available(self, features: &CpuFeatures) -> bool {
        match self {
            KernelVariant::Reference | KernelVariant::Lanes => true,
            KernelVariant::Sse2 => cfg!(target_arch = "x86_64") && features.sse2,
        }
    }

    pub fn blend(self, mode: CompositeMode, src: &[u8], dst: &[u8], out: &mut [u8]) {
        match self {
            KernelVariant::Reference => reference::blend(mode, src, dst, out),
            KernelVariant::Lanes => lanes::blend(mode, src, dst, out),
            #[cfg(target_arch = "x86_64")]
            KernelVariant::Sse2 => super::sse2::blend(mode, src, dst, out),
            #[cfg(not(target_arch = "x86_64"))]
            KernelVariant::Sse2 => reference::blend(mode, src, dst, out),
        }
    }

    pub fn mix(self, blended: &[u8], dst: &[u8], weight: &[u8], out: &mut [u8]) {
        match self {
            KernelVariant::Reference => reference::mix_slice(blended, dst, weight, out),
            KernelVariant::Lanes => lanes::mix(blended, dst, weight, out),
            #[cfg(target_arch = "x86_64")]
            KernelVariant::Sse2 => super::sse2::mix(blended, dst, weight, out),
            #[cfg(not(target_arch = "x86_64"))]
            KernelVariant::Sse2 => reference::mix_slice(blended, dst, weight, out),
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelVariant::Reference => "reference",
            KernelVariant::Lanes => "lanes",
            KernelVariant::Sse2 => "sse2",
        };
        f.write_str(name)
    }
}

/// Result of comparing one variant with the reference kernels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantCheck {
    pub variant: KernelVariant,
    /// Element-wise modes compared
    pub modes_checked: usize,
    /// One line per disagreement
    pub mismatches: Vec<String>,
}

impl VariantCheck {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for VariantCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed() { "✓" } else { "✗" };
        write!(
            f,
            "{} {}: {} modes + mix checked",
            mark, self.variant, self.modes_checked
        )?;
        if !self.passed() {
            write!(f, ", {} mismatch(es)", self.mismatches.len())?;
        }
        Ok(())
    }
}

impl KernelVariant {
    /// Compare every element-wise blend kernel and the mix kernel of this
    /// variant with the reference, over all 65536 byte pairs.
    pub fn check_against_reference(self) -> VariantCheck {
        let src: Vec<u8> = (0..256 * 256).map(|i| (i >> 8) as u8).collect();
        let dst: Vec<u8> = (0..256 * 256).map(|i| (i & 0xFF) as u8).collect();
        let mut expected = vec![0u8; src.len()];
        let mut actual = vec![0u8; src.len()];
        let mut check = VariantCheck {
            variant: self,
            modes_checked: 0,
            mismatches: Vec::new(),
        };

        for mode in CompositeMode::ALL {
            if !mode.is_elementwise() || !self.supports(mode) {
                continue;
            }
            reference::blend(mode, &src, &dst, &mut expected);
            self.blend(mode, &src, &dst, &mut actual);
            check.modes_checked += 1;
            if let Some(i) = expected.iter().zip(&actual).position(|(e, a)| e != a) {
                check.mismatches.push(format!(
                    "{} {}: s={} d={} expected {} got {}",
                    self, mode, src[i], dst[i], expected[i], actual[i]
                ));
            }
        }

        // Every (blended, weight) pair against a sweep of destinations
        for d in 0..=255u8 {
            let dsts = vec![d; src.len()];
            reference::mix_slice(&src, &dsts, &dst, &mut expected);
            self.mix(&src, &dsts, &dst, &mut actual);
            if expected != actual {
                check.mismatches.push(format!("{} mix: mismatch for d={}", self, d));
                break;
            }
        }

        debug!(
            variant = %self,
            modes = check.modes_checked,
            mismatches = check.mismatches.len(),
            "Checked kernels against reference"
        );
        check
    }
}

/// Kernel chosen for each mode, plus the kernel for the final weighted mix.
///
/// Built once at startup and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSet {
    blend: [KernelVariant; CompositeMode::COUNT],
    mix: KernelVariant,
    features: CpuFeatures,
}

/// Preference order when several variants are usable.
const PREFERENCE: [KernelVariant; 3] = [
    KernelVariant::Sse2,
    KernelVariant::Lanes,
    KernelVariant::Reference,
];

impl KernelSet {
    /// Pick the fastest usable variant for every mode.
    ///
    /// With `use_accelerated` false every mode uses the reference kernels.
    pub fn detect(use_accelerated: bool) -> Self {
        let features = CpuFeatures::detect();
        let set = Self::for_features(features, use_accelerated);
        info!(
            %features,
            use_accelerated,
            mix = %set.mix,
            accelerated_modes = set.accelerated_mode_count(),
            "Selected compositing kernels"
        );
        set
    }

    /// Table for an explicit feature set. Pure function of its arguments.
    pub fn for_features(features: CpuFeatures, use_accelerated: bool) -> Self {
        let choose = |mode: Option<CompositeMode>| {
            if !use_accelerated {
                return KernelVariant::Reference;
            }
            PREFERENCE
                .into_iter()
                .find(|v| v.is_available(&features) && mode.map_or(true, |m| v.supports(m)))
                .unwrap_or(KernelVariant::Reference)
        };

        let mut blend = [KernelVariant::Reference; CompositeMode::COUNT];
        for mode in CompositeMode::ALL {
            if mode.is_elementwise() {
                blend[mode.index()] = choose(Some(mode));
            }
        }

        Self {
            blend,
            mix: choose(None),
            features,
        }
    }

    /// Every mode forced onto one variant, falling back to the reference
    /// kernel where `variant` has no implementation.
    ///
    /// # Panics
    /// Panics if the running CPU cannot execute `variant`.
    pub fn forced(variant: KernelVariant) -> Self {
        let features = CpuFeatures::detect();
        assert!(
            variant.is_available(&features),
            "{variant} kernels are not available on this CPU ({features})"
        );
        let mut blend = [KernelVariant::Reference; CompositeMode::COUNT];
        for mode in CompositeMode::ALL {
            if mode.is_elementwise() && variant.supports(mode) {
                blend[mode.index()] = variant;
            }
        }
        Self {
            blend,
            mix: variant,
            features,
        }
    }

    pub fn reference() -> Self {
        Self::for_features(CpuFeatures::default(), false)
    }

    /// Variant used for the channel kernel of `mode`.
    pub fn variant(&self, mode: CompositeMode) -> KernelVariant {
        self.blend[mode.index()]
    }

    pub fn mix_variant(&self) -> KernelVariant {
        self.mix
    }

    pub fn features(&self) -> CpuFeatures {
        self.features
    }

    fn accelerated_mode_count(&self) -> usize {
        self.blend
            .iter()
            .filter(|v| **v != KernelVariant::Reference)
            .count()
    }
}
