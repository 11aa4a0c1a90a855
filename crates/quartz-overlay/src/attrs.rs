//! Attribute and color pipeline: color key, brightness/contrast/saturation,
//! and the gamma ramp.
//!
//! These are independent of the geometry pipeline but share the register
//! page and the activation gate: the gamma ramp may only change while the
//! engine is off (the hardware latches it at enable time), and the color key
//! registers are derived from the destination pipe's pixel depth at show
//! time.

use crate::pipe::PipeDepth;
use crate::validate::ValidationError;

/// Requested attribute update. `gamma` is applied only when present.
#[derive(Copy, Clone, Debug)]
pub struct OverlayAttrs {
    pub color_key: u32,
    /// [-128, 127].
    pub brightness: i32,
    /// [0, 255].
    pub contrast: u32,
    /// [0, 1023].
    pub saturation: u32,
    /// Six breakpoints, each a packed `0x00RRGGBB` word, low breakpoint
    /// first.
    pub gamma: Option<[u32; 6]>,
}

/// Current attribute state as reported to clients.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AttrSnapshot {
    pub color_key: u32,
    pub brightness: i8,
    pub contrast: u8,
    pub saturation: u16,
    pub gamma: [u32; 6],
}

/// Hardware erratum: a ramp channel equal to this value misdecodes in the
/// interpolator, so it is rejected outright.
pub const GAMMA_RESERVED_MIDPOINT: u8 = 0x80;

pub fn check_ranges(attrs: &OverlayAttrs) -> Result<(), ValidationError> {
    if attrs.brightness < -128 || attrs.brightness > 127 {
        return Err(ValidationError::OutOfRange {
            what: "brightness",
            value: attrs.brightness as u32,
        });
    }
    if attrs.contrast > 255 {
        return Err(ValidationError::OutOfRange {
            what: "contrast",
            value: attrs.contrast,
        });
    }
    if attrs.saturation > 1023 {
        return Err(ValidationError::OutOfRange {
            what: "saturation",
            value: attrs.saturation,
        });
    }
    Ok(())
}

/// Validates gamma ramp monotonicity per channel across all six breakpoints,
/// plus the reserved-midpoint erratum on the top breakpoint.
pub fn check_gamma(ramp: &[u32; 6]) -> Result<(), ValidationError> {
    for window in ramp.windows(2) {
        for shift in [16, 8, 0] {
            let lo = (window[0] >> shift) & 0xff;
            let hi = (window[1] >> shift) & 0xff;
            if lo > hi {
                return Err(ValidationError::OutOfRange {
                    what: "gamma ramp (not monotonic)",
                    value: window[1],
                });
            }
        }
    }
    for shift in [16, 8, 0] {
        if (ramp[5] >> shift) & 0xff == u32::from(GAMMA_RESERVED_MIDPOINT) {
            return Err(ValidationError::OutOfRange {
                what: "gamma ramp (reserved midpoint)",
                value: ramp[5],
            });
        }
    }
    Ok(())
}

/// OCLRC0 image: contrast in bits 18..26, brightness two's-complement in the
/// low byte.
pub fn pack_oclrc0(brightness: i8, contrast: u8) -> u32 {
    (u32::from(contrast) << 18) | u32::from(brightness as u8)
}

/// OCLRC1 image: saturation in the low ten bits.
pub fn pack_oclrc1(saturation: u16) -> u32 {
    u32::from(saturation) & 0x3ff
}

/// DCLRKM enable bit lives in `crate::regs`; the low 24 bits returned here
/// are the per-channel match masks.
///
/// Each depth is a disjoint case; the masks never accumulate across depths.
pub fn color_key_for_depth(depth: PipeDepth, key: u32) -> (u32, u32) {
    match depth {
        PipeDepth::Clut8 => (key & 0xff, 0xff_ffff),
        PipeDepth::Rgb555 => {
            let r = (key >> 10) & 0x1f;
            let g = (key >> 5) & 0x1f;
            let b = key & 0x1f;
            ((r << 19) | (g << 11) | (b << 3), 0x07_0707)
        }
        PipeDepth::Rgb565 => {
            let r = (key >> 11) & 0x1f;
            let g = (key >> 5) & 0x3f;
            let b = key & 0x1f;
            ((r << 19) | (g << 10) | (b << 3), 0x07_0307)
        }
        PipeDepth::Rgb888 => (key & 0xff_ffff, 0),
    }
}
