//! Shared test doubles for the overlay collaborators: a scriptable command
//! ring, pin-counting surfaces, a fixed pipe topology, and a register page
//! the test can inspect from outside the engine.
// Not every test binary uses every helper.
#![allow(dead_code)]

use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use quartz_overlay::{
    CommandRing, Generation, ImageDescriptor, MapError, OverlayEngine, PinError, PinnedSurface,
    Pipe, PipeDepth, PipeState, PipeTopology, RegisterBacking, RegisterBlock, RequestId,
    RingError, SurfaceHandle, SurfaceProvider, WaitError,
};
use quartz_overlay::map::MappedRegion;
use quartz_overlay::regs::REG_PAGE_SIZE;
use quartz_overlay::validate::{PixelFormat, Rect};

/// Ring fake: records every submission, completes every wait unless told to
/// interrupt the next N of them.
#[derive(Default)]
pub struct FakeRing {
    next: u64,
    pub submissions: Vec<Vec<u32>>,
    pub interrupt_next_waits: u32,
}

impl CommandRing for FakeRing {
    fn submit(&mut self, batch: &[u32]) -> Result<RequestId, RingError> {
        self.next += 1;
        self.submissions.push(batch.to_vec());
        Ok(RequestId(self.next))
    }

    fn wait(&mut self, _req: RequestId) -> Result<(), WaitError> {
        if self.interrupt_next_waits > 0 {
            self.interrupt_next_waits -= 1;
            return Err(WaitError::Interrupted);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct PinLedger {
    pub pins: u32,
    pub unpins: u32,
}

impl PinLedger {
    pub fn live(&self) -> u32 {
        self.pins - self.unpins
    }
}

pub struct CountedSurface {
    addr: u32,
    size: u64,
    ledger: Rc<RefCell<PinLedger>>,
}

impl PinnedSurface for CountedSurface {
    fn gpu_addr(&self) -> u32 {
        self.addr
    }

    fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for CountedSurface {
    fn drop(&mut self) {
        self.ledger.borrow_mut().unpins += 1;
    }
}

/// Surface provider fake: every known handle pins a buffer of the
/// configured size and counts pin/unpin pairs in a shared ledger.
pub struct FakeSurfaces {
    sizes: HashMap<SurfaceHandle, u64>,
    pub ledger: Rc<RefCell<PinLedger>>,
}

impl FakeSurfaces {
    pub fn with_buffers(buffers: &[(SurfaceHandle, u64)]) -> Self {
        Self {
            sizes: buffers.iter().copied().collect(),
            ledger: Rc::new(RefCell::new(PinLedger::default())),
        }
    }

    pub fn live(&self) -> u32 {
        self.ledger.borrow().live()
    }
}

impl SurfaceProvider for FakeSurfaces {
    fn pin(&mut self, handle: SurfaceHandle) -> Result<Box<dyn PinnedSurface>, PinError> {
        let size = *self
            .sizes
            .get(&handle)
            .ok_or(PinError::UnknownHandle(handle))?;
        self.ledger.borrow_mut().pins += 1;
        Ok(Box::new(CountedSurface {
            addr: 0x0100_0000 + handle.0 * 0x10_0000,
            size,
            ledger: Rc::clone(&self.ledger),
        }))
    }
}

pub struct FakePipes {
    pub pipes: HashMap<Pipe, PipeState>,
}

impl FakePipes {
    pub fn single_1080p() -> Self {
        let mut pipes = HashMap::new();
        pipes.insert(Pipe::A, default_pipe());
        Self { pipes }
    }
}

impl PipeTopology for FakePipes {
    fn pipe(&self, pipe: Pipe) -> Option<PipeState> {
        self.pipes.get(&pipe).copied()
    }
}

pub fn default_pipe() -> PipeState {
    PipeState {
        enabled: true,
        hdisplay: 1920,
        vdisplay: 1080,
        double_wide: false,
        depth: PipeDepth::Rgb888,
        pfit: None,
    }
}

/// Register backing whose page the test can inspect while the engine owns
/// the `RegisterBlock`.
pub struct SharedPage(pub Rc<RefCell<Vec<u8>>>);

pub struct SharedMapping<'a>(RefMut<'a, Vec<u8>>);

impl MappedRegion for SharedMapping<'_> {
    fn bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl RegisterBacking for SharedPage {
    fn map(&mut self) -> Result<Box<dyn MappedRegion + '_>, MapError> {
        Ok(Box::new(SharedMapping(self.0.borrow_mut())))
    }
}

pub fn peek(page: &Rc<RefCell<Vec<u8>>>, offset: usize) -> u32 {
    let data = page.borrow();
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Engine over a shared page so tests can look at programmed registers.
pub fn engine_with_page() -> (OverlayEngine, Rc<RefCell<Vec<u8>>>) {
    let page = Rc::new(RefCell::new(vec![0u8; REG_PAGE_SIZE]));
    let block = RegisterBlock::new(Box::new(SharedPage(Rc::clone(&page))));
    (
        OverlayEngine::new(Generation::Gen3Plus, block, 0x0010_0000),
        page,
    )
}

pub const FRAME_BYTES: u64 = 1280 * 480;

/// A well-formed packed 4:2:2 full-frame descriptor for `handle`.
pub fn frame(handle: SurfaceHandle) -> ImageDescriptor {
    ImageDescriptor {
        enable: true,
        pipe: Pipe::A,
        handle,
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
