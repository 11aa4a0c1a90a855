//! Client image validation.
//!
//! Every `put_image` descriptor goes through [`validate`] before any register
//! or ring state is touched. Validation is side-effect free: a rejected
//! descriptor leaves the engine exactly as it was, and the error variant
//! names the rule that failed so the client can correct and retry.
//!
//! Limits are generation dependent; the overlay engine itself is otherwise
//! identical across generations.

use thiserror::Error;

use crate::pipe::{Pipe, PipeState};
use crate::regs::{N_HORIZ_Y_TAPS, N_VERT_Y_TAPS};
use crate::surface::SurfaceHandle;

/// Overlay hardware generation, as far as limits are concerned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Generation {
    /// Early parts: smaller maximum image, coarse stride alignment, and a
    /// 512-byte minimum luma stride.
    Gen2,
    /// Later parts: larger maximum image, 64-byte stride alignment.
    Gen3Plus,
}

impl Generation {
    /// Maximum source image size (width, height).
    pub fn max_image_size(self) -> (u32, u32) {
        match self {
            Generation::Gen2 => (1024, 1088),
            Generation::Gen3Plus => (2048, 2046),
        }
    }

    fn stride_align_mask(self) -> u32 {
        match self {
            Generation::Gen2 => 255,
            Generation::Gen3Plus => 63,
        }
    }

    fn min_luma_stride(self) -> u32 {
        match self {
            Generation::Gen2 => 512,
            Generation::Gen3Plus => 0,
        }
    }
}

/// Maximum hardware downscale ratio per axis (source scan size over
/// destination size).
pub const MAX_DOWNSCALE: u32 = 8;

const MIN_SRC_WIDTH: u32 = 4 * N_HORIZ_Y_TAPS as u32;
const MIN_SRC_HEIGHT: u32 = 4 * N_VERT_Y_TAPS as u32;

const MAX_STRIDE_PACKED: u32 = 8192;
const MAX_STRIDE_PLANAR: u32 = 4096;
const MAX_STRIDE_CHROMA: u32 = 2048;

/// Overlay source pixel format.
///
/// The engine scans out YUV only; RGB sources are rejected by validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2 (interleaved luma/chroma, two bytes per pixel).
    PackedYuv422,
    /// Planar 4:2:0 (chroma subsampled 2x horizontally, 2x vertically).
    PlanarYuv420,
    /// Planar 4:1:1 (chroma subsampled 4x horizontally).
    PlanarYuv411,
    /// Planar 4:1:0 (chroma subsampled 4x horizontally, 2x vertically).
    PlanarYuv410,
    /// RGB sources are representable so clients get a precise rejection.
    Rgb,
}

impl PixelFormat {
    pub fn is_packed(self) -> bool {
        matches!(self, PixelFormat::PackedYuv422)
    }

    /// Horizontal chroma subsampling factor.
    pub fn h_subsample(self) -> u32 {
        match self {
            PixelFormat::PackedYuv422 | PixelFormat::PlanarYuv420 => 2,
            PixelFormat::PlanarYuv411 | PixelFormat::PlanarYuv410 => 4,
            PixelFormat::Rgb => 1,
        }
    }

    /// Vertical chroma subsampling factor.
    pub fn v_subsample(self) -> u32 {
        match self {
            PixelFormat::PackedYuv422 | PixelFormat::PlanarYuv411 => 1,
            PixelFormat::PlanarYuv420 | PixelFormat::PlanarYuv410 => 2,
            PixelFormat::Rgb => 1,
        }
    }

    /// Bytes per pixel in the luma plane (packed interleaves chroma).
    pub fn luma_bytes_per_pixel(self) -> u32 {
        if self.is_packed() {
            2
        } else {
            1
        }
    }
}

/// Destination rectangle in pipe coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// One `put_image` request as supplied by the client. Transient: validated,
/// consumed into register values, not retained.
#[derive(Copy, Clone, Debug)]
pub struct ImageDescriptor {
    /// Clear means "disable the overlay"; all other fields are then ignored.
    pub enable: bool,
    pub pipe: Pipe,
    pub handle: SurfaceHandle,
    pub format: PixelFormat,
    /// Full source buffer extent in pixels.
    pub src_width: u32,
    pub src_height: u32,
    /// Scanned-out subset of the source, anchored at the plane offsets.
    pub src_scan_width: u32,
    pub src_scan_height: u32,
    /// Per-plane strides in bytes. `stride_uv` must be zero for packed.
    pub stride_y: u32,
    pub stride_uv: u32,
    /// Per-plane byte offsets into the buffer. Chroma offsets must be zero
    /// for packed formats.
    pub offset_y: u32,
    pub offset_u: u32,
    pub offset_v: u32,
    pub dst: Rect,
}

/// Descriptor that passed validation against a specific pipe and buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValidatedImage {
    pub format: PixelFormat,
    pub src_width: u32,
    pub src_height: u32,
    pub src_scan_width: u32,
    pub src_scan_height: u32,
    pub stride_y: u32,
    pub stride_uv: u32,
    pub offset_y: u32,
    pub offset_u: u32,
    pub offset_v: u32,
    pub dst: Rect,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: u32 },
    #[error("unsupported source pixel format")]
    UnsupportedFormat,
    #[error("{what} misaligned: {value:#x}")]
    BadAlignment { what: &'static str, value: u32 },
    #[error("image spans {needed} bytes but buffer holds {available}")]
    OutOfBounds { needed: u64, available: u64 },
    #[error("downscale ratio over {MAX_DOWNSCALE}x on the {axis} axis")]
    ScaleTooLarge { axis: &'static str },
}

/// Validates a descriptor against the target pipe's visible mode and the
/// pinned buffer's allocated size. No engine state is read or written.
pub fn validate(
    desc: &ImageDescriptor,
    gen: Generation,
    pipe: &PipeState,
    buffer_size: u64,
) -> Result<ValidatedImage, ValidationError> {
    if desc.format == PixelFormat::Rgb {
        return Err(ValidationError::UnsupportedFormat);
    }

    check_source_extent(desc, gen)?;
    check_destination(desc, pipe)?;
    check_strides(desc, gen)?;
    check_buffer_bounds(desc, buffer_size)?;

    // Last, now that both ends of the ratio are known to be nonzero.
    if desc.src_scan_width > desc.dst.w.saturating_mul(MAX_DOWNSCALE) {
        return Err(ValidationError::ScaleTooLarge { axis: "horizontal" });
    }
    if desc.src_scan_height > desc.dst.h.saturating_mul(MAX_DOWNSCALE) {
        return Err(ValidationError::ScaleTooLarge { axis: "vertical" });
    }

    Ok(ValidatedImage {
        format: desc.format,
        src_width: desc.src_width,
        src_height: desc.src_height,
        src_scan_width: desc.src_scan_width,
        src_scan_height: desc.src_scan_height,
        stride_y: desc.stride_y,
        stride_uv: desc.stride_uv,
        offset_y: desc.offset_y,
        offset_u: desc.offset_u,
        offset_v: desc.offset_v,
        dst: desc.dst,
    })
}

fn check_source_extent(desc: &ImageDescriptor, gen: Generation) -> Result<(), ValidationError> {
    let (max_w, max_h) = gen.max_image_size();
    if desc.src_width < MIN_SRC_WIDTH || desc.src_width > max_w {
        return Err(ValidationError::OutOfRange {
            what: "source width",
            value: desc.src_width,
        });
    }
    if desc.src_height < MIN_SRC_HEIGHT || desc.src_height > max_h {
        return Err(ValidationError::OutOfRange {
            what: "source height",
            value: desc.src_height,
        });
    }
    if desc.src_scan_width == 0 || desc.src_scan_width > desc.src_width {
        return Err(ValidationError::OutOfRange {
            what: "source scan width",
            value: desc.src_scan_width,
        });
    }
    if desc.src_scan_height == 0 || desc.src_scan_height > desc.src_height {
        return Err(ValidationError::OutOfRange {
            what: "source scan height",
            value: desc.src_scan_height,
        });
    }
    Ok(())
}

fn check_destination(desc: &ImageDescriptor, pipe: &PipeState) -> Result<(), ValidationError> {
    let dst = &desc.dst;
    if dst.w == 0 || dst.x.saturating_add(dst.w) > pipe.hdisplay {
        return Err(ValidationError::OutOfRange {
            what: "destination width",
            value: dst.w,
        });
    }
    if dst.h == 0 || dst.y.saturating_add(dst.h) > pipe.vdisplay {
        return Err(ValidationError::OutOfRange {
            what: "destination height",
            value: dst.h,
        });
    }
    Ok(())
}

fn check_strides(desc: &ImageDescriptor, gen: Generation) -> Result<(), ValidationError> {
    let mask = gen.stride_align_mask();

    if desc.stride_y & mask != 0 {
        return Err(ValidationError::BadAlignment {
            what: "luma stride",
            value: desc.stride_y,
        });
    }
    if desc.stride_y < gen.min_luma_stride() {
        return Err(ValidationError::OutOfRange {
            what: "luma stride",
            value: desc.stride_y,
        });
    }

    let bpp = desc.format.luma_bytes_per_pixel();
    let row_bytes = desc.src_width.saturating_mul(bpp);

    if desc.format.is_packed() {
        // Packed sources have no chroma planes at all.
        if desc.stride_uv != 0 {
            return Err(ValidationError::BadAlignment {
                what: "chroma stride on a packed format",
                value: desc.stride_uv,
            });
        }
        if desc.offset_u != 0 || desc.offset_v != 0 {
            return Err(ValidationError::BadAlignment {
                what: "chroma offset on a packed format",
                value: desc.offset_u | desc.offset_v,
            });
        }
        if desc.offset_y % bpp != 0 {
            return Err(ValidationError::BadAlignment {
                what: "packed luma offset",
                value: desc.offset_y,
            });
        }
        if desc.stride_y > MAX_STRIDE_PACKED {
            return Err(ValidationError::OutOfRange {
                what: "luma stride",
                value: desc.stride_y,
            });
        }
    } else {
        if desc.stride_y > MAX_STRIDE_PLANAR {
            return Err(ValidationError::OutOfRange {
                what: "luma stride",
                value: desc.stride_y,
            });
        }
        if desc.stride_uv & mask != 0 {
            return Err(ValidationError::BadAlignment {
                what: "chroma stride",
                value: desc.stride_uv,
            });
        }
        if desc.stride_uv == 0 || desc.stride_uv > MAX_STRIDE_CHROMA {
            return Err(ValidationError::OutOfRange {
                what: "chroma stride",
                value: desc.stride_uv,
            });
        }
        let chroma_row = desc.src_width.div_ceil(desc.format.h_subsample());
        if chroma_row > desc.stride_uv {
            return Err(ValidationError::OutOfRange {
                what: "chroma stride",
                value: desc.stride_uv,
            });
        }
    }

    if row_bytes > desc.stride_y {
        return Err(ValidationError::OutOfRange {
            what: "luma stride",
            value: desc.stride_y,
        });
    }
    Ok(())
}

fn plane_span(offset: u32, stride: u32, rows: u32) -> Option<u64> {
    u64::from(stride)
        .checked_mul(u64::from(rows))?
        .checked_add(u64::from(offset))
}

fn check_buffer_bounds(desc: &ImageDescriptor, buffer_size: u64) -> Result<(), ValidationError> {
    let mut needed = plane_span(desc.offset_y, desc.stride_y, desc.src_height)
        .ok_or(ValidationError::OutOfBounds {
            needed: u64::MAX,
            available: buffer_size,
        })?;

    if !desc.format.is_packed() {
        let chroma_rows = desc.src_height.div_ceil(desc.format.v_subsample());
        for offset in [desc.offset_u, desc.offset_v] {
            let span = plane_span(offset, desc.stride_uv, chroma_rows).ok_or(
                ValidationError::OutOfBounds {
                    needed: u64::MAX,
                    available: buffer_size,
                },
            )?;
            needed = needed.max(span);
        }
    }

    if needed > buffer_size {
        return Err(ValidationError::OutOfBounds {
            needed,
            available: buffer_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::PipeDepth;

    fn test_pipe() -> PipeState {
        PipeState {
            enabled: true,
            hdisplay: 1920,
            vdisplay: 1080,
            double_wide: false,
            depth: PipeDepth::Rgb888,
            pfit: None,
        }
    }

    fn packed_desc() -> ImageDescriptor {
        ImageDescriptor {
            enable: true,
            pipe: Pipe::A,
            handle: SurfaceHandle(1),
            format: PixelFormat::PackedYuv422,
            src_width: 640,
            src_height: 480,
            src_scan_width: 640,
            src_scan_height: 480,
            stride_y: 1280,
            stride_uv: 0,
            offset_y: 0,
            offset_u: 0,
            offset_v: 0,
            dst: Rect {
                x: 0,
                y: 0,
                w: 640,
                h: 480,
            },
        }
    }

    fn planar_desc() -> ImageDescriptor {
        ImageDescriptor {
            format: PixelFormat::PlanarYuv420,
            stride_y: 640,
            stride_uv: 320,
            offset_y: 0,
            offset_u: 640 * 480,
            offset_v: 640 * 480 + 320 * 240,
            ..packed_desc()
        }
    }

    const PACKED_SIZE: u64 = 1280 * 480;
    const PLANAR_SIZE: u64 = 640 * 480 + 2 * 320 * 240;

    #[test]
    fn accepts_well_formed_descriptors() {
        assert!(validate(&packed_desc(), Generation::Gen3Plus, &test_pipe(), PACKED_SIZE).is_ok());
        assert!(validate(&planar_desc(), Generation::Gen3Plus, &test_pipe(), PLANAR_SIZE).is_ok());
    }

    #[test]
    fn rejects_rgb() {
        let desc = ImageDescriptor {
            format: PixelFormat::Rgb,
            ..packed_desc()
        };
        assert_eq!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::UnsupportedFormat)
        );
    }

    #[test]
    fn source_extent_limits_depend_on_generation() {
        let desc = ImageDescriptor {
            src_width: 2048,
            src_scan_width: 2048,
            stride_y: 4096,
            dst: Rect {
                x: 0,
                y: 0,
                w: 1024,
                h: 480,
            },
            ..packed_desc()
        };
        assert!(validate(&desc, Generation::Gen3Plus, &test_pipe(), 4096 * 480).is_ok());
        assert!(matches!(
            validate(&desc, Generation::Gen2, &test_pipe(), 4096 * 480),
            Err(ValidationError::OutOfRange {
                what: "source width",
                ..
            })
        ));
    }

    #[test]
    fn rejects_sources_too_small_for_the_filter() {
        let desc = ImageDescriptor {
            src_width: 16, // below 4 * 5 taps
            src_scan_width: 16,
            ..packed_desc()
        };
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::OutOfRange {
                what: "source width",
                ..
            })
        ));

        let desc = ImageDescriptor {
            src_height: 8, // below 4 * 3 taps
            src_scan_height: 8,
            ..packed_desc()
        };
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::OutOfRange {
                what: "source height",
                ..
            })
        ));
    }

    #[test]
    fn gen2_wants_coarser_stride_alignment() {
        let desc = ImageDescriptor {
            stride_y: 1344, // 64-byte aligned, not 256-byte aligned
            ..packed_desc()
        };
        assert!(validate(&desc, Generation::Gen3Plus, &test_pipe(), 1344 * 480).is_ok());
        assert!(matches!(
            validate(&desc, Generation::Gen2, &test_pipe(), 1344 * 480),
            Err(ValidationError::BadAlignment {
                what: "luma stride",
                ..
            })
        ));
    }

    #[test]
    fn gen2_enforces_minimum_luma_stride() {
        let desc = ImageDescriptor {
            src_width: 128,
            src_scan_width: 128,
            stride_y: 256,
            dst: Rect {
                x: 0,
                y: 0,
                w: 128,
                h: 480,
            },
            ..packed_desc()
        };
        assert!(validate(&desc, Generation::Gen3Plus, &test_pipe(), 256 * 480).is_ok());
        assert!(matches!(
            validate(&desc, Generation::Gen2, &test_pipe(), 256 * 480),
            Err(ValidationError::OutOfRange {
                what: "luma stride",
                ..
            })
        ));
    }

    #[test]
    fn packed_forces_empty_chroma_planes() {
        let desc = ImageDescriptor {
            stride_uv: 640,
            ..packed_desc()
        };
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::BadAlignment { .. })
        ));

        let desc = ImageDescriptor {
            offset_u: 64,
            ..packed_desc()
        };
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::BadAlignment { .. })
        ));
    }

    #[test]
    fn packed_luma_offset_respects_pixel_depth() {
        let desc = ImageDescriptor {
            offset_y: 3, // not a multiple of 2 bytes/pixel
            ..packed_desc()
        };
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE + 64),
            Err(ValidationError::BadAlignment {
                what: "packed luma offset",
                ..
            })
        ));
    }

    #[test]
    fn buffer_bounds_are_exact_at_the_boundary() {
        let desc = packed_desc();
        assert!(validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE).is_ok());
        assert_eq!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE - 1),
            Err(ValidationError::OutOfBounds {
                needed: PACKED_SIZE,
                available: PACKED_SIZE - 1,
            })
        );
    }

    #[test]
    fn chroma_planes_count_toward_buffer_bounds() {
        let desc = planar_desc();
        assert!(validate(&desc, Generation::Gen3Plus, &test_pipe(), PLANAR_SIZE).is_ok());
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PLANAR_SIZE - 1),
            Err(ValidationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn destination_must_fit_the_mode() {
        let desc = ImageDescriptor {
            dst: Rect {
                x: 1900,
                y: 0,
                w: 640,
                h: 480,
            },
            ..packed_desc()
        };
        assert!(matches!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::OutOfRange {
                what: "destination width",
                ..
            })
        ));
    }

    #[test]
    fn downscale_boundary_is_exactly_eight() {
        // 640 / 80 = 8.0: accepted.
        let desc = ImageDescriptor {
            dst: Rect {
                x: 0,
                y: 0,
                w: 80,
                h: 60,
            },
            ..packed_desc()
        };
        assert!(validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE).is_ok());

        // 640 / 79 > 8: rejected.
        let desc = ImageDescriptor {
            dst: Rect {
                x: 0,
                y: 0,
                w: 79,
                h: 60,
            },
            ..packed_desc()
        };
        assert_eq!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::ScaleTooLarge { axis: "horizontal" })
        );
    }

    #[test]
    fn large_downscale_is_rejected_per_axis() {
        // src_scan 4096 into dst 400 is ratio 10.24.
        let desc = ImageDescriptor {
            src_width: 2048,
            src_scan_width: 2048,
            stride_y: 4096,
            dst: Rect {
                x: 0,
                y: 0,
                w: 200,
                h: 480,
            },
            ..packed_desc()
        };
        assert_eq!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), 4096 * 480),
            Err(ValidationError::ScaleTooLarge { axis: "horizontal" })
        );

        let desc = ImageDescriptor {
            dst: Rect {
                x: 0,
                y: 0,
                w: 640,
                h: 59,
            },
            ..packed_desc()
        };
        assert_eq!(
            validate(&desc, Generation::Gen3Plus, &test_pipe(), PACKED_SIZE),
            Err(ValidationError::ScaleTooLarge { axis: "vertical" })
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_format() -> impl Strategy<Value = PixelFormat> {
            prop_oneof![
                Just(PixelFormat::PackedYuv422),
                Just(PixelFormat::PlanarYuv420),
                Just(PixelFormat::PlanarYuv411),
                Just(PixelFormat::PlanarYuv410),
            ]
        }

        proptest! {
            /// Bounds soundness: every accepted descriptor fits its buffer,
            /// recomputed per plane with independent arithmetic.
            #[test]
            fn accepted_descriptors_fit_their_buffers(
                format in arb_format(),
                src_w in 20u32..2048,
                src_h in 12u32..2046,
                stride_y_blocks in 1u32..64,
                stride_uv_blocks in 1u32..32,
                offset_y in prop_oneof![Just(0u32), (0u32..1024).prop_map(|v| v * 2)],
                buffer_size in 0u64..16 * 1024 * 1024,
            ) {
                let stride_y = stride_y_blocks * 64;
                let stride_uv = if format.is_packed() { 0 } else { stride_uv_blocks * 64 };
                let desc = ImageDescriptor {
                    enable: true,
                    pipe: Pipe::A,
                    handle: SurfaceHandle(0),
                    format,
                    src_width: src_w,
                    src_height: src_h,
                    src_scan_width: src_w,
                    src_scan_height: src_h,
                    stride_y,
                    stride_uv,
                    offset_y,
                    offset_u: if format.is_packed() { 0 } else { offset_y + stride_y * src_h },
                    offset_v: if format.is_packed() { 0 } else { offset_y + stride_y * src_h + stride_uv * src_h },
                    dst: Rect { x: 0, y: 0, w: src_w.min(1920), h: src_h.min(1080) },
                };

                if let Ok(v) = validate(&desc, Generation::Gen3Plus, &test_pipe(), buffer_size) {
                    let luma_end = u64::from(v.offset_y)
                        + u64::from(v.stride_y) * u64::from(v.src_height);
                    prop_assert!(luma_end <= buffer_size);
                    if !v.format.is_packed() {
                        let rows = u64::from(v.src_height.div_ceil(v.format.v_subsample()));
                        for offset in [v.offset_u, v.offset_v] {
                            let end = u64::from(offset) + u64::from(v.stride_uv) * rows;
                            prop_assert!(end <= buffer_size);
                        }
                    }
                }
            }
        }
    }
}
