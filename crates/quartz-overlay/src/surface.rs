//! Surface pinning boundary.
//!
//! The buffer manager is a collaborator: the overlay asks it to pin a buffer
//! (make it GPU-resident and non-relocatable) for as long as the hardware may
//! scan it out. Unpinning is tied to ownership: dropping the returned
//! [`PinnedSurface`] box unpins exactly once, so the engine's `current` /
//! `retiring` slots cannot double-release or leak a pin by construction.

use thiserror::Error;

/// Client-visible buffer handle, resolved by the buffer manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u32);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PinError {
    #[error("no buffer for handle {0:?}")]
    UnknownHandle(SurfaceHandle),
    #[error("buffer pin failed: no aperture space")]
    NoSpace,
}

/// A pinned, GPU-resident buffer. Implementations unpin in `Drop`.
pub trait PinnedSurface {
    /// Base address of the buffer in the GPU aperture.
    fn gpu_addr(&self) -> u32;
    /// Allocated size in bytes, bounding every plane the overlay reads.
    fn size(&self) -> u64;
}

/// Pin service provided by the buffer manager.
pub trait SurfaceProvider {
    fn pin(&mut self, handle: SurfaceHandle) -> Result<Box<dyn PinnedSurface>, PinError>;
}
