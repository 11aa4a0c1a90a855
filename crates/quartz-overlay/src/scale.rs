//! Fixed-point scale factor computation.
//!
//! Scale factors use a 12-bit fractional shift ([`SCALE_FRACT_SHIFT`]). The
//! chroma factor is derived from the luma factor by the format's subsampling,
//! and the luma factor is then recomputed from the chroma factor so the two
//! stay in an exact integer ratio; without that, accumulated phase drift
//! between the planes shows up as chroma shimmer on large downscales.
//!
//! The coefficient banks depend only on the tap count, so they are reloaded
//! only when a scale factor actually changed since the last program. Skipping
//! the reload is an optimization, not a correctness requirement.

use crate::regs::SCALE_FRACT_SHIFT;
use crate::validate::ValidatedImage;

/// Scale factors for one programmed frame, 12-bit fractional fixed point.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScaleFactors {
    pub xscale: u32,
    pub yscale: u32,
    pub xscale_uv: u32,
    pub yscale_uv: u32,
}

impl ScaleFactors {
    /// Packed YRGBSCALE/UVSCALE register image: vertical fraction in the top
    /// bits, horizontal integer part and fraction below.
    pub fn pack_register(xscale: u32, yscale: u32) -> u32 {
        ((yscale & 0xfff) << 20) | (((xscale >> SCALE_FRACT_SHIFT) & 0x7) << 16)
            | ((xscale & 0xfff) << 3)
    }

    /// UVSCALEV register image: vertical integer parts of both planes.
    pub fn pack_vertical_int(&self) -> u32 {
        ((self.yscale >> SCALE_FRACT_SHIFT) << 16) | (self.yscale_uv >> SCALE_FRACT_SHIFT)
    }
}

fn axis_scale(src_scan: u32, dst: u32) -> u32 {
    if dst > 1 {
        ((src_scan - 1) << SCALE_FRACT_SHIFT) / dst
    } else {
        1 << SCALE_FRACT_SHIFT
    }
}

/// Computes the per-plane scale factors for `img` and reports whether the
/// polyphase coefficient banks must be rewritten.
pub fn compute_scale(img: &ValidatedImage, old: ScaleFactors) -> (ScaleFactors, bool) {
    let h_sub = img.format.h_subsample();
    let v_sub = img.format.v_subsample();

    let xscale = axis_scale(img.src_scan_width, img.dst.w);
    let yscale = axis_scale(img.src_scan_height, img.dst.h);

    // Chroma from luma, then luma from chroma: exact integer ratio.
    let xscale_uv = xscale / h_sub;
    let yscale_uv = yscale / v_sub;
    let factors = ScaleFactors {
        xscale: xscale_uv * h_sub,
        yscale: yscale_uv * v_sub,
        xscale_uv,
        yscale_uv,
    };

    let reload = factors.xscale != old.xscale || factors.yscale != old.yscale;
    (factors, reload)
}
