//! Display pipe state as the overlay engine sees it.
//!
//! Mode setting owns the pipes; the overlay only needs a read-only snapshot
//! of the bits that gate overlay output: whether the pipe scans out, its
//! visible mode area, the primary plane's pixel depth (for color keying),
//! double-wide operation (incompatible with the overlay engine), and the
//! panel fitter (whose vertical scale displaces overlay destination
//! coordinates).

/// Display pipe identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pipe {
    A,
    B,
}

/// Pixel depth of the pipe's primary plane, used to derive the color key
/// match value and mask.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipeDepth {
    /// 8-bit paletted: the key is a CLUT index.
    Clut8,
    /// 16-bit 5-5-5.
    Rgb555,
    /// 16-bit 5-6-5.
    Rgb565,
    /// 24/32-bit true color.
    Rgb888,
}

/// Panel fitter configuration when one is interposed on the pipe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PanelFitter {
    /// Vertical scale as a 1.12 fixed-point ratio (panel lines per pipe
    /// line, `1 << 12` meaning no scaling).
    pub vscale_ratio: u32,
}

/// Snapshot of one pipe, taken under the caller-held mode-config lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PipeState {
    pub enabled: bool,
    /// Visible mode area.
    pub hdisplay: u32,
    pub vdisplay: u32,
    pub double_wide: bool,
    pub depth: PipeDepth,
    pub pfit: Option<PanelFitter>,
}

/// Resolves pipe identifiers to their current state.
pub trait PipeTopology {
    fn pipe(&self, pipe: Pipe) -> Option<PipeState>;
}
