//! Overlay register page layout.
//!
//! The overlay engine is programmed through a single page of memory-mapped
//! registers whose layout is fixed across device generations (only the legal
//! value ranges differ). The page is either a GPU-address-space mapping or a
//! physically addressed block depending on the generation; [`crate::map`]
//! hides that distinction.
//!
//! Field offsets below are byte offsets into the page. The layout is an
//! internal hardware contract: the flip command latches the whole page at
//! vblank, so all fields for one frame must be written before the flip is
//! submitted.

use bitflags::bitflags;

/// Size of the mapped overlay register page.
pub const REG_PAGE_SIZE: usize = 0x1000;

/// Byte offsets of the overlay register fields.
pub mod reg {
    /// Luma buffer addresses (front/back).
    pub const OBUF_0Y: usize = 0x00;
    pub const OBUF_1Y: usize = 0x04;
    /// Chroma buffer addresses, zero for packed formats.
    pub const OBUF_0U: usize = 0x08;
    pub const OBUF_0V: usize = 0x0c;
    pub const OBUF_1U: usize = 0x10;
    pub const OBUF_1V: usize = 0x14;
    /// Luma stride in the low half-word, chroma stride in the high half-word.
    pub const OSTRIDE: usize = 0x18;
    /// Initial phase registers, written together with a filter reload.
    pub const YRGB_VPH: usize = 0x1c;
    pub const UV_VPH: usize = 0x20;
    pub const HORZ_PH: usize = 0x24;
    pub const INIT_PHS: usize = 0x28;
    /// Destination window position/size on the pipe.
    pub const DWINPOS: usize = 0x2c;
    pub const DWINSZ: usize = 0x30;
    /// Source geometry: width, width in 64-byte swizzle units, height.
    pub const SWIDTH: usize = 0x34;
    pub const SWIDTHSW: usize = 0x38;
    pub const SHEIGHT: usize = 0x3c;
    /// Packed luma/chroma horizontal scale factors (see `crate::scale`).
    pub const YRGBSCALE: usize = 0x40;
    pub const UVSCALE: usize = 0x44;
    /// Brightness/contrast and saturation.
    pub const OCLRC0: usize = 0x48;
    pub const OCLRC1: usize = 0x4c;
    /// Destination color key value and mask.
    pub const DCLRKV: usize = 0x50;
    pub const DCLRKM: usize = 0x54;
    /// Source chroma key (unused by this driver, kept cleared).
    pub const SCLRKVH: usize = 0x58;
    pub const SCLRKVL: usize = 0x5c;
    pub const SCLRKEN: usize = 0x60;
    /// Static configuration: pipe select, color-conversion mode.
    pub const OCONFIG: usize = 0x64;
    /// Per-frame command: enable bit, source format, field/frame select.
    pub const OCMD: usize = 0x68;
    /// Gamma ramp breakpoints, highest first to match the hardware ordering.
    pub const OGAMC5: usize = 0x70;
    pub const OGAMC4: usize = 0x74;
    pub const OGAMC3: usize = 0x78;
    pub const OGAMC2: usize = 0x7c;
    pub const OGAMC1: usize = 0x80;
    pub const OGAMC0: usize = 0x84;
    /// Vertical integer parts of the luma/chroma scale factors.
    pub const UVSCALEV: usize = 0xa4;

    /// Polyphase coefficient banks.
    pub const Y_HCOEFS: usize = 0x200;
    pub const UV_HCOEFS: usize = 0x380;
}

/// Number of filter phases per coefficient bank.
pub const N_PHASES: usize = 17;
/// Horizontal filter taps for the luma plane.
pub const N_HORIZ_Y_TAPS: usize = 5;
/// Horizontal filter taps for the chroma planes.
pub const N_HORIZ_UV_TAPS: usize = 3;
/// Vertical filter taps for the luma plane (hardwired, no coefficient bank).
pub const N_VERT_Y_TAPS: usize = 3;

/// Fractional shift of the hardware scale factors (see `crate::scale`).
pub const SCALE_FRACT_SHIFT: u32 = 12;
/// One coefficient unit: per phase, taps sum to exactly this.
pub const COEF_ONE: u32 = 1 << 11;

// Coefficient banks must fit inside the register page.
const _: () = {
    assert!(reg::Y_HCOEFS + N_HORIZ_Y_TAPS * N_PHASES * 4 <= reg::UV_HCOEFS);
    assert!(reg::UV_HCOEFS + N_HORIZ_UV_TAPS * N_PHASES * 4 <= REG_PAGE_SIZE);
    assert!(reg::UVSCALEV + 4 <= reg::Y_HCOEFS);
};

bitflags! {
    /// OCMD register fields.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Ocmd: u32 {
        const ENABLE = 1 << 0;
        /// Progressive frame source (the only mode this driver programs).
        const FRAME_MODE = 1 << 2;
        /// Source format field, bits 10..14.
        const FMT_PACKED_422 = 0x8 << 10;
        const FMT_PLANAR_420 = 0xc << 10;
        const FMT_PLANAR_411 = 0xd << 10;
        const FMT_PLANAR_410 = 0xe << 10;
    }
}

bitflags! {
    /// OCONFIG register fields.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Oconfig: u32 {
        /// Overlay output feeds pipe B instead of pipe A.
        const PIPE_B = 1 << 18;
        /// BT.601 full-swing color conversion.
        const CSC_BYPASS = 1 << 4;
    }
}

/// DCLRKM enable bit; the low 24 bits are the per-channel match mask.
pub const DCLRKM_KEY_ENABLE: u32 = 1 << 31;

/// Builds one horizontal polyphase coefficient bank.
///
/// Coefficients are unsigned 0.11 fixed point. Each phase is a triangular
/// (linear-interpolation) kernel centered `phase/16` of a pixel to the right
/// of the middle tap, with a support radius of half the tap count, normalized
/// so every phase sums to exactly [`COEF_ONE`]; the rounding remainder is
/// folded into the center tap. The bank is generation-fixed: it depends only
/// on the tap count, never on the programmed scale factor.
pub fn horizontal_coefficients(taps: usize) -> Vec<u32> {
    debug_assert!(taps % 2 == 1, "tap count must be odd");
    let center = (taps / 2) as i64;
    // Kernel support radius in 1/16ths of a pixel.
    let radius = ((taps as i64 + 1) * 16) / 2;

    let mut bank = Vec::with_capacity(N_PHASES * taps);
    for phase in 0..N_PHASES as i64 {
        let mut weights = vec![0u64; taps];
        let mut total = 0u64;
        for (tap, w) in weights.iter_mut().enumerate() {
            // Tap position relative to the phase center, in 1/16ths.
            let dist = ((tap as i64 - center) * 16 - phase).abs();
            if dist < radius {
                *w = (radius - dist) as u64;
                total += *w;
            }
        }
        let mut scaled: Vec<u32> = weights
            .iter()
            .map(|&w| ((w * u64::from(COEF_ONE)) / total) as u32)
            .collect();
        let sum: u32 = scaled.iter().sum();
        scaled[center as usize] += COEF_ONE - sum;
        bank.extend_from_slice(&scaled);
    }
    bank
}
