//! Overlay engine lifecycle: enable, flip, disable, and interrupted-wait
//! recovery.
//!
//! The engine is a single instance owned by the display device context. All
//! public operations run under the caller-held mode-config and buffer-manager
//! locks, so at most one operation is in flight; the only asynchrony is the
//! GPU consuming submitted batches, observed through blocking waits on
//! [`RequestId`]s.
//!
//! A wait may be interrupted (signal delivery to the caller). Every batch
//! submission therefore records a [`RecoveryState`] *before* blocking;
//! [`OverlayEngine::recover`] resumes from exactly that point instead of
//! re-submitting, since a duplicate flip would desynchronize the hardware
//! state machine. `recover` runs at the top of every mutating public
//! operation.
//!
//! Buffer ownership: `current` is being scanned out, `retiring` is displayed
//! until the in-flight flip latches. Both are owning boxes whose drop unpins,
//! so release is exactly-once by construction; on a failed wait the slots are
//! left populated (a leaked pin is recoverable, a use-after-unpin is not).

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::attrs::{
    check_gamma, check_ranges, color_key_for_depth, pack_oclrc0, pack_oclrc1, AttrSnapshot,
    OverlayAttrs,
};
use crate::map::{MapError, RegPage, RegisterBlock};
use crate::pipe::{Pipe, PipeState, PipeTopology};
use crate::regs::{self, reg, Ocmd, Oconfig};
use crate::ring::{self, CommandRing, RequestId, RingError, WaitError};
use crate::scale::{compute_scale, ScaleFactors};
use crate::surface::{PinError, PinnedSurface, SurfaceProvider};
use crate::validate::{
    validate, Generation, ImageDescriptor, PixelFormat, ValidatedImage, ValidationError,
};

/// Where an interrupted operation must resume.
///
/// Together with the pending [`RequestId`] this is the complete resumption
/// state: recovery re-waits the request, then performs the variant's tail
/// action.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RecoveryState {
    /// No operation in flight.
    #[default]
    Stable,
    /// Enable sequence submitted; the engine never reached a displayable
    /// state and cannot re-issue the sequence. Terminal until [`OverlayEngine::reset`].
    AwaitingFirstFlip,
    /// A flip is in flight and `retiring` must be released once it latches.
    AwaitingFlipRelease,
    /// Disable stage 1 submitted; stage 2 still has to run.
    AwaitingDisableStage1,
    /// Disable stage 2 submitted; the final release has not happened.
    AwaitingDisableStage2,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OverlayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Pin(#[from] PinError),
    /// The requested change needs the engine off (gamma updates).
    #[error("overlay engine is active; disable it first")]
    Busy,
    /// The blocking wait was interrupted; call `recover()` to make progress.
    #[error("wait interrupted; operation suspended for recovery")]
    Interrupted,
    #[error("hardware request did not complete in time")]
    HardwareTimeout,
    /// Left mid-enable with no way to resume; only `reset()` clears this.
    #[error("overlay engine wedged during enable")]
    HardwareWedged,
    #[error("no such display pipe")]
    NoSuchPipe,
    #[error("pipe cannot feed the overlay: {0}")]
    PipeIncompatible(&'static str),
}

/// The overlay engine. One per display device.
pub struct OverlayEngine {
    gen: Generation,
    regs: RegisterBlock,
    /// Hardware address of the register block, used as the flip target.
    flip_addr: u32,
    active: bool,
    pipe: Option<Pipe>,
    /// Panel fitter interposed on the bound pipe, captured at show time.
    pfit_active: bool,
    pfit_vscale_ratio: u32,

    color_key: u32,
    brightness: i8,
    contrast: u8,
    saturation: u16,
    gamma: [u32; 6],

    last_scale: ScaleFactors,
    current: Option<Box<dyn PinnedSurface>>,
    retiring: Option<Box<dyn PinnedSurface>>,
    pending: Option<RequestId>,
    recovery: RecoveryState,
}

impl OverlayEngine {
    pub fn new(gen: Generation, regs: RegisterBlock, flip_addr: u32) -> Self {
        Self {
            gen,
            regs,
            flip_addr,
            active: false,
            pipe: None,
            pfit_active: false,
            pfit_vscale_ratio: 1 << 12,
            color_key: 0x01_01fe,
            brightness: -19,
            contrast: 75,
            saturation: 146,
            gamma: [0x00_0000, 0x10_1010, 0x30_3030, 0x60_6060, 0xc0_c0c0, 0xff_ffff],
            last_scale: ScaleFactors::default(),
            current: None,
            retiring: None,
            pending: None,
            recovery: RecoveryState::Stable,
        }
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn pipe(&self) -> Option<Pipe> {
        self.pipe
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery
    }

    /// Source size limits for the control surface to report.
    pub fn max_image_size(&self) -> (u32, u32) {
        self.gen.max_image_size()
    }

    /// Display or disable a frame. The two user-facing entry points funnel
    /// through here; `desc.enable == false` is equivalent to a disable.
    pub fn put_image(
        &mut self,
        ring: &mut dyn CommandRing,
        pipes: &dyn PipeTopology,
        surfaces: &mut dyn SurfaceProvider,
        desc: &ImageDescriptor,
    ) -> Result<(), OverlayError> {
        self.recover(ring)?;

        if !desc.enable {
            return self.hide(ring);
        }

        let pipe_state = pipes.pipe(desc.pipe).ok_or(OverlayError::NoSuchPipe)?;

        // Switching pipes tears the engine down on the old pipe first.
        if self.active && self.pipe != Some(desc.pipe) {
            debug!(from = ?self.pipe, to = ?desc.pipe, "overlay switching pipes");
            self.hide(ring)?;
        }

        if !pipe_state.enabled {
            return Err(OverlayError::PipeIncompatible("pipe is not scanning out"));
        }
        if pipe_state.double_wide {
            return Err(OverlayError::PipeIncompatible(
                "overlay cannot feed a double-wide pipe",
            ));
        }

        self.pfit_active = pipe_state.pfit.is_some();
        self.pfit_vscale_ratio = pipe_state.pfit.map_or(1 << 12, |p| p.vscale_ratio);

        let mut corrected = *desc;
        // The panel fitter scales the whole pipe vertically after the
        // overlay is composited; pre-divide the destination so the image
        // lands where the client asked on the panel. Widened so huge client
        // coordinates fail the mode check instead of wrapping past it.
        if self.pfit_active && self.pfit_vscale_ratio != 1 << 12 {
            corrected.dst.y = pfit_corrected(desc.dst.y, self.pfit_vscale_ratio, "destination y")?;
            corrected.dst.h =
                pfit_corrected(desc.dst.h, self.pfit_vscale_ratio, "destination height")?;
        }

        let surface = surfaces.pin(desc.handle)?;
        let image = validate(&corrected, self.gen, &pipe_state, surface.size())?;

        self.pipe = Some(desc.pipe);
        self.show(ring, desc.pipe, &pipe_state, surface, &image)
    }

    /// Disable the overlay. No-op when already off.
    pub fn hide(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        self.recover(ring)?;
        if !self.active {
            return Ok(());
        }

        self.release_retiring(ring)?;

        // Clear the command register so the stage-1 flip latches an
        // inactive frame before the engine is switched off.
        self.regs.with_registers(|page| page.write(reg::OCMD, 0))?;

        debug!("overlay disable: stage 1");
        self.submit(
            ring,
            &ring::disable_stage1_batch(self.flip_addr),
            RecoveryState::AwaitingDisableStage1,
        )?;
        self.wait_pending(ring)?;

        self.disable_stage2(ring)
    }

    /// Current attribute state.
    pub fn attrs(&self) -> AttrSnapshot {
        AttrSnapshot {
            color_key: self.color_key,
            brightness: self.brightness,
            contrast: self.contrast,
            saturation: self.saturation,
            gamma: self.gamma,
        }
    }

    /// Validates and applies an attribute update, returning the new state.
    ///
    /// Gamma changes require the engine to be off ([`OverlayError::Busy`]
    /// otherwise); nothing is written when any part of the update is
    /// rejected.
    pub fn set_attrs(
        &mut self,
        ring: &mut dyn CommandRing,
        update: &OverlayAttrs,
    ) -> Result<AttrSnapshot, OverlayError> {
        self.recover(ring)?;
        check_ranges(update)?;
        if let Some(ramp) = &update.gamma {
            if self.active {
                return Err(OverlayError::Busy);
            }
            check_gamma(ramp)?;
        }

        self.color_key = update.color_key;
        self.brightness = update.brightness as i8;
        self.contrast = update.contrast as u8;
        self.saturation = update.saturation as u16;
        if let Some(ramp) = update.gamma {
            self.gamma = ramp;
        }

        let oclrc0 = pack_oclrc0(self.brightness, self.contrast);
        let oclrc1 = pack_oclrc1(self.saturation);
        let gamma = update.gamma.map(|_| self.gamma);
        self.regs.with_registers(|page| {
            page.write(reg::OCLRC0, oclrc0);
            page.write(reg::OCLRC1, oclrc1);
            if let Some(ramp) = gamma {
                for (i, value) in ramp.iter().enumerate() {
                    // OGAMC0 sits highest; breakpoints grow downward.
                    page.write(reg::OGAMC0 - i * 4, *value);
                }
            }
        })?;

        Ok(self.attrs())
    }

    /// Housekeeping for the owning context: if a previous flip's surface is
    /// still awaiting release, wait the flip out and release it. Mode-set
    /// paths call this before reconfiguring the pipe.
    pub fn release_retired(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        self.recover(ring)?;
        self.release_retiring(ring)
    }

    /// Resumes an operation whose wait was interrupted. Idempotent; callable
    /// repeatedly until it reports the engine `Stable`.
    pub fn recover(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        match self.recovery {
            RecoveryState::Stable => Ok(()),
            RecoveryState::AwaitingFirstFlip => {
                warn!("overlay wedged during enable; external reset required");
                Err(OverlayError::HardwareWedged)
            }
            RecoveryState::AwaitingFlipRelease => {
                trace!("recovery: re-waiting flip for retiring release");
                self.wait_pending_or_reissue(ring)?;
                self.retiring = None;
                self.recovery = RecoveryState::Stable;
                Ok(())
            }
            RecoveryState::AwaitingDisableStage1 => {
                trace!("recovery: resuming disable at stage 2");
                self.wait_pending_or_reissue(ring)?;
                self.disable_stage2(ring)
            }
            RecoveryState::AwaitingDisableStage2 => {
                trace!("recovery: finalizing disable");
                self.wait_pending_or_reissue(ring)?;
                self.finalize_disable();
                Ok(())
            }
        }
    }

    /// Post-GPU-reset hook from the owning device context: the hardware is
    /// known to be off, so drop every reference and return to `Stable`.
    pub fn reset(&mut self) {
        debug!("overlay engine reset");
        self.current = None;
        self.retiring = None;
        self.pending = None;
        self.active = false;
        self.recovery = RecoveryState::Stable;
        self.last_scale = ScaleFactors::default();
    }

    fn show(
        &mut self,
        ring: &mut dyn CommandRing,
        pipe_id: Pipe,
        pipe: &PipeState,
        surface: Box<dyn PinnedSurface>,
        image: &ValidatedImage,
    ) -> Result<(), OverlayError> {
        let was_off = !self.active;
        if was_off {
            self.enable(ring, pipe_id)?;
        }

        // At most one buffer is ever awaiting release: the previous flip's
        // retiring surface goes first.
        self.release_retiring(ring)?;

        let (factors, mut reload) = compute_scale(image, self.last_scale);
        // A fresh enable has no banks loaded regardless of the old factors.
        reload |= was_off;

        let base = surface.gpu_addr();
        let color_key = self.color_key;
        let oclrc0 = pack_oclrc0(self.brightness, self.contrast);
        let oclrc1 = pack_oclrc1(self.saturation);
        let depth = pipe.depth;
        self.regs.with_registers(|page| {
            program_frame(page, image, base, &factors, reload);
            let (key_value, key_mask) = color_key_for_depth(depth, color_key);
            page.write(reg::DCLRKV, key_value);
            page.write(reg::DCLRKM, key_mask | regs::DCLRKM_KEY_ENABLE);
            page.write(reg::OCLRC0, oclrc0);
            page.write(reg::OCLRC1, oclrc1);
        })?;
        self.last_scale = factors;

        trace!(reload, base, "overlay flip");
        self.submit(
            ring,
            &ring::continue_batch(self.flip_addr, reload),
            RecoveryState::Stable,
        )?;

        self.retiring = self.current.take();
        self.current = Some(surface);
        Ok(())
    }

    fn enable(&mut self, ring: &mut dyn CommandRing, pipe_id: Pipe) -> Result<(), OverlayError> {
        let mut config = Oconfig::CSC_BYPASS;
        if pipe_id == Pipe::B {
            config |= Oconfig::PIPE_B;
        }
        self.regs
            .with_registers(|page| page.write(reg::OCONFIG, config.bits()))?;

        debug!(?pipe_id, "overlay enable");
        self.submit(
            ring,
            &ring::enable_batch(self.flip_addr),
            RecoveryState::AwaitingFirstFlip,
        )?;
        self.wait_pending(ring)?;

        self.active = true;
        self.recovery = RecoveryState::Stable;
        Ok(())
    }

    fn disable_stage2(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        debug!("overlay disable: stage 2");
        self.submit(
            ring,
            &ring::disable_stage2_batch(self.flip_addr),
            RecoveryState::AwaitingDisableStage2,
        )?;
        self.wait_pending(ring)?;
        self.finalize_disable();
        Ok(())
    }

    fn finalize_disable(&mut self) {
        debug!("overlay disabled");
        self.current = None;
        self.retiring = None;
        self.pending = None;
        self.active = false;
        self.recovery = RecoveryState::Stable;
    }

    /// Waits out the in-flight flip and releases the retiring surface, so
    /// that at most one buffer is ever pending release.
    fn release_retiring(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        if self.retiring.is_none() {
            // Nothing to release; a leftover completed request is stale.
            return Ok(());
        }
        self.recovery = RecoveryState::AwaitingFlipRelease;
        self.wait_pending_or_reissue(ring)?;
        self.retiring = None;
        self.recovery = RecoveryState::Stable;
        Ok(())
    }

    fn submit(
        &mut self,
        ring: &mut dyn CommandRing,
        batch: &[u32],
        state: RecoveryState,
    ) -> Result<(), OverlayError> {
        let req = ring.submit(batch)?;
        trace!(?req, ?state, "overlay batch submitted");
        self.pending = Some(req);
        self.recovery = state;
        Ok(())
    }

    /// Blocks on the recorded request. On interruption or timeout the
    /// request and recovery state stay recorded for `recover()`.
    fn wait_pending(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        let Some(req) = self.pending else {
            return Ok(());
        };
        match ring.wait(req) {
            Ok(()) => {
                self.pending = None;
                Ok(())
            }
            Err(WaitError::Interrupted) => Err(OverlayError::Interrupted),
            Err(WaitError::Timeout) => Err(OverlayError::HardwareTimeout),
        }
    }

    /// Like [`Self::wait_pending`], but issues a trivial wait batch first if
    /// no request is recorded (recovery after the original request was
    /// already consumed).
    fn wait_pending_or_reissue(&mut self, ring: &mut dyn CommandRing) -> Result<(), OverlayError> {
        if self.pending.is_none() {
            let req = ring.submit(&ring::flip_wait_batch())?;
            trace!(?req, "overlay recovery wait batch submitted");
            self.pending = Some(req);
        }
        self.wait_pending(ring)
    }
}

impl Drop for OverlayEngine {
    fn drop(&mut self) {
        // Detach-time contract: the owning device context disables the
        // engine (or resets after a wedge) before dropping it.
        if !std::thread::panicking() {
            debug_assert!(
                !self.active && self.recovery == RecoveryState::Stable,
                "overlay engine dropped while active or mid-recovery"
            );
        }
    }
}

/// Number of 64-byte swizzle units a scan row touches, given the plane's
/// byte offset and row length.
fn swizzle_span(offset: u32, row_bytes: u32) -> u32 {
    ((offset & 63) + row_bytes).div_ceil(64)
}

/// Divides a destination coordinate by the panel fitter's 1.12 vertical
/// ratio, in 64-bit so oversized client values surface as a range error
/// rather than wrapping into the visible area.
fn pfit_corrected(value: u32, ratio: u32, what: &'static str) -> Result<u32, ValidationError> {
    let scaled = (u64::from(value) << 12)
        .checked_div(u64::from(ratio))
        .ok_or(ValidationError::OutOfRange {
            what: "panel fitter ratio",
            value: ratio,
        })?;
    u32::try_from(scaled).map_err(|_| ValidationError::OutOfRange { what, value })
}

fn ocmd_format(format: PixelFormat) -> Ocmd {
    match format {
        PixelFormat::PackedYuv422 => Ocmd::FMT_PACKED_422,
        PixelFormat::PlanarYuv420 => Ocmd::FMT_PLANAR_420,
        PixelFormat::PlanarYuv411 => Ocmd::FMT_PLANAR_411,
        PixelFormat::PlanarYuv410 => Ocmd::FMT_PLANAR_410,
        // Rejected by validation before any register write.
        PixelFormat::Rgb => unreachable!("RGB rejected by validation"),
    }
}

/// Writes the per-frame geometry, buffer, and scale registers.
fn program_frame(
    page: &mut RegPage<'_>,
    image: &ValidatedImage,
    base: u32,
    factors: &ScaleFactors,
    reload_coefficients: bool,
) {
    let h_sub = image.format.h_subsample();
    let v_sub = image.format.v_subsample();

    page.write(reg::OBUF_0Y, base.wrapping_add(image.offset_y));
    if image.format.is_packed() {
        page.write(reg::OBUF_0U, 0);
        page.write(reg::OBUF_0V, 0);
    } else {
        page.write(reg::OBUF_0U, base.wrapping_add(image.offset_u));
        page.write(reg::OBUF_0V, base.wrapping_add(image.offset_v));
    }
    page.write(reg::OSTRIDE, image.stride_y | (image.stride_uv << 16));

    let scan_w = image.src_scan_width;
    let scan_h = image.src_scan_height;
    page.write(reg::SWIDTH, scan_w | ((scan_w.div_ceil(h_sub)) << 16));
    let luma_row = scan_w * image.format.luma_bytes_per_pixel();
    let chroma_row = if image.format.is_packed() {
        0
    } else {
        scan_w.div_ceil(h_sub)
    };
    page.write(
        reg::SWIDTHSW,
        swizzle_span(image.offset_y, luma_row)
            | (swizzle_span(image.offset_u, chroma_row) << 16),
    );
    page.write(reg::SHEIGHT, scan_h | ((scan_h.div_ceil(v_sub)) << 16));

    page.write(reg::DWINPOS, image.dst.x | (image.dst.y << 16));
    page.write(reg::DWINSZ, image.dst.w | (image.dst.h << 16));

    page.write(
        reg::YRGBSCALE,
        ScaleFactors::pack_register(factors.xscale, factors.yscale),
    );
    page.write(
        reg::UVSCALE,
        ScaleFactors::pack_register(factors.xscale_uv, factors.yscale_uv),
    );
    page.write(reg::UVSCALEV, factors.pack_vertical_int());

    // Source chroma keying is unused by this driver.
    page.write(reg::SCLRKEN, 0);

    if reload_coefficients {
        page.write_bank(
            reg::Y_HCOEFS,
            &regs::horizontal_coefficients(regs::N_HORIZ_Y_TAPS),
        );
        page.write_bank(
            reg::UV_HCOEFS,
            &regs::horizontal_coefficients(regs::N_HORIZ_UV_TAPS),
        );
    }

    let ocmd = Ocmd::ENABLE | Ocmd::FRAME_MODE | ocmd_format(image.format);
    page.write(reg::OCMD, ocmd.bits());
}
