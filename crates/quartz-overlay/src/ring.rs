//! Command-ring boundary and the overlay's fixed command sequences.
//!
//! The overlay drives the hardware through four short batches of 32-bit
//! command words submitted to the device's single serialized command ring.
//! Submission yields an opaque [`RequestId`] that resolves once the GPU has
//! consumed the batch; completion is observed by a blocking, signal-
//! cancellable wait on that id. The ring, request bookkeeping, and interrupt
//! delivery all live behind [`CommandRing`].

use thiserror::Error;

/// Opaque, monotonically increasing submission identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("ring submission failed: {0}")]
    Submit(&'static str),
}

/// Outcome of a blocking wait on a [`RequestId`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    /// The caller was interrupted (e.g. by a signal) before completion. The
    /// request stays outstanding and may be waited on again.
    #[error("wait interrupted before request completed")]
    Interrupted,
    /// The collaborator's deadline elapsed without the GPU consuming the
    /// request.
    #[error("request did not complete within the hardware deadline")]
    Timeout,
}

/// Serialized command-submission collaborator.
pub trait CommandRing {
    /// Submits a batch of command words, returning its completion handle.
    fn submit(&mut self, batch: &[u32]) -> Result<RequestId, RingError>;

    /// Blocks until `req` completes. May return [`WaitError::Interrupted`],
    /// in which case the request remains outstanding.
    fn wait(&mut self, req: RequestId) -> Result<(), WaitError>;
}

/// Command word opcodes and modifiers used by the overlay sequences.
pub mod cmd {
    pub const MI_NOOP: u32 = 0;
    pub const MI_WAIT_FOR_EVENT: u32 = 0x03 << 23;
    /// Event select for "overlay flip latched".
    pub const MI_WAIT_FOR_OVERLAY_FLIP: u32 = 1 << 16;
    pub const MI_OVERLAY_FLIP: u32 = 0x11 << 23;
    /// Mode field of `MI_OVERLAY_FLIP`.
    pub const MI_OVERLAY_CONTINUE: u32 = 0x0 << 21;
    pub const MI_OVERLAY_ON: u32 = 0x1 << 21;
    pub const MI_OVERLAY_OFF: u32 = 0x2 << 21;
    /// Flip-address qualifier: reload coefficient banks at this flip.
    pub const OFC_UPDATE: u32 = 0x1;
}

/// Enable sequence: flip-with-enable, wait-for-flip marker, alignment no-op.
pub fn enable_batch(flip_addr: u32) -> [u32; 4] {
    [
        cmd::MI_OVERLAY_FLIP | cmd::MI_OVERLAY_ON,
        flip_addr | cmd::OFC_UPDATE,
        cmd::MI_WAIT_FOR_EVENT | cmd::MI_WAIT_FOR_OVERLAY_FLIP,
        cmd::MI_NOOP,
    ]
}

/// Continue sequence: latch the freshly written register page at the next
/// vblank, optionally reloading the coefficient banks.
pub fn continue_batch(flip_addr: u32, load_coefficients: bool) -> [u32; 2] {
    let qualifier = if load_coefficients { cmd::OFC_UPDATE } else { 0 };
    [
        cmd::MI_OVERLAY_FLIP | cmd::MI_OVERLAY_CONTINUE,
        flip_addr | qualifier,
    ]
}

/// Disable stage 1: flip to the cleared command register and wait for the
/// flip to latch.
pub fn disable_stage1_batch(flip_addr: u32) -> [u32; 4] {
    [
        cmd::MI_OVERLAY_FLIP | cmd::MI_OVERLAY_CONTINUE,
        flip_addr,
        cmd::MI_WAIT_FOR_EVENT | cmd::MI_WAIT_FOR_OVERLAY_FLIP,
        cmd::MI_NOOP,
    ]
}

/// Disable stage 2: turn the engine off and wait for the final flip.
pub fn disable_stage2_batch(flip_addr: u32) -> [u32; 4] {
    [
        cmd::MI_OVERLAY_FLIP | cmd::MI_OVERLAY_OFF,
        flip_addr,
        cmd::MI_WAIT_FOR_EVENT | cmd::MI_WAIT_FOR_OVERLAY_FLIP,
        cmd::MI_NOOP,
    ]
}

/// Trivial wait-only batch, used by recovery when it must re-observe a flip
/// for which no request was recorded.
pub fn flip_wait_batch() -> [u32; 2] {
    [
        cmd::MI_WAIT_FOR_EVENT | cmd::MI_WAIT_FOR_OVERLAY_FLIP,
        cmd::MI_NOOP,
    ]
}
