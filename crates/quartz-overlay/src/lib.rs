//! Video overlay engine for the Quartz display device model.
//!
//! This crate implements the hardware overlay plane controller: it validates
//! client image descriptors, computes fixed-point scale factors and polyphase
//! filter selections, programs the overlay register page, and drives the
//! enable/flip/disable command sequences on the device command ring.
//!
//! The crate deliberately stops at the subsystem boundary. Mode setting, the
//! command ring itself, and the buffer manager are collaborators reached
//! through traits:
//! - [`ring::CommandRing`] submits fixed command-word batches and blocks on
//!   their completion,
//! - [`surface::SurfaceProvider`] pins GPU buffers for scanout (unpin happens
//!   when the returned [`surface::PinnedSurface`] box is dropped),
//! - [`map::RegisterBacking`] maps the overlay register page for scoped
//!   read/modify/write access.
//!
//! The main entry point is [`engine::OverlayEngine`], which exposes
//! `put_image`, `set_attrs` and `recover` to the display driver's control
//! surface.
#![forbid(unsafe_code)]

pub mod attrs;
pub mod engine;
pub mod map;
pub mod pipe;
pub mod regs;
pub mod ring;
pub mod scale;
pub mod surface;
pub mod validate;

pub use attrs::{AttrSnapshot, OverlayAttrs};
pub use engine::{OverlayEngine, OverlayError, RecoveryState};
pub use map::{MapError, OwnedPageBacking, RegPage, RegisterBacking, RegisterBlock};
pub use pipe::{PanelFitter, Pipe, PipeDepth, PipeState, PipeTopology};
pub use ring::{CommandRing, RequestId, RingError, WaitError};
pub use scale::{compute_scale, ScaleFactors};
pub use surface::{PinError, PinnedSurface, SurfaceHandle, SurfaceProvider};
pub use validate::{
    Generation, ImageDescriptor, PixelFormat, Rect, ValidatedImage, ValidationError,
};
