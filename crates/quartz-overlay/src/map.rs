//! Scoped access to the mapped overlay register page.
//!
//! Depending on the device generation the register page lives either behind a
//! GPU-address-space mapping or in a physically addressed stolen-memory
//! block. [`RegisterBacking`] abstracts over both; [`RegisterBlock`] is the
//! engine-owned handle that grants scoped access.
//!
//! Two invariants are enforced structurally:
//! - the page is unmapped on every exit path (the mapping is an RAII guard,
//!   so an unwind through the closure still unmaps), and
//! - no two mappings exist concurrently ([`RegisterBlock::with_registers`]
//!   takes `&mut self`, so a re-entrant map cannot be expressed; a backing
//!   that is nevertheless asked to double-map fails fast with
//!   [`MapError::AlreadyMapped`]).

use thiserror::Error;

use crate::regs::REG_PAGE_SIZE;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("register page mapping failed: address space exhausted")]
    Exhausted,
    #[error("register page mapping failed: device removed")]
    DeviceGone,
    #[error("register page is already mapped")]
    AlreadyMapped,
}

/// One live mapping of the register page. Dropping it unmaps.
pub trait MappedRegion {
    fn bytes(&mut self) -> &mut [u8];
}

/// Provider of register page mappings (GPU mapping or physical block).
pub trait RegisterBacking {
    fn map(&mut self) -> Result<Box<dyn MappedRegion + '_>, MapError>;
}

/// Typed view over the mapped page. All registers are 32-bit little-endian.
pub struct RegPage<'a> {
    bytes: &'a mut [u8],
}

impl<'a> RegPage<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        assert_eq!(bytes.len(), REG_PAGE_SIZE, "register page size mismatch");
        Self { bytes }
    }

    pub fn read(&self, offset: usize) -> u32 {
        let b = &self.bytes[offset..offset + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn write(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Writes a coefficient bank as consecutive 32-bit words.
    pub fn write_bank(&mut self, base: usize, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            self.write(base + i * 4, w);
        }
    }
}

/// Engine-owned handle to the register page.
pub struct RegisterBlock {
    backing: Box<dyn RegisterBacking>,
}

impl RegisterBlock {
    pub fn new(backing: Box<dyn RegisterBacking>) -> Self {
        Self { backing }
    }

    /// Maps the page, runs `f` against it, and unmaps.
    ///
    /// The mapping is never held across a blocking hardware wait: callers
    /// write all fields for an operation inside one closure and submit ring
    /// commands only after this returns.
    pub fn with_registers<R>(&mut self, f: impl FnOnce(&mut RegPage<'_>) -> R) -> Result<R, MapError> {
        let mut region = self.backing.map()?;
        let mut page = RegPage::new(region.bytes());
        Ok(f(&mut page))
    }
}

/// Physically addressed backing over an owned page, as used on generations
/// whose overlay registers live in stolen memory. Also the test backing.
///
/// Concurrent mappings cannot be expressed against this backing: `map` takes
/// `&mut self` and the returned guard keeps the borrow alive.
/// [`MapError::AlreadyMapped`] exists for device backings whose mapping
/// facility is shared hardware state outside this crate's control.
#[derive(Debug)]
pub struct OwnedPageBacking {
    data: Vec<u8>,
}

impl OwnedPageBacking {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; REG_PAGE_SIZE],
        }
    }

    /// Reads a register without going through a mapping (test inspection).
    pub fn peek(&self, offset: usize) -> u32 {
        let b = &self.data[offset..offset + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}

impl Default for OwnedPageBacking {
    fn default() -> Self {
        Self::new()
    }
}

struct OwnedPageMapping<'a> {
    backing: &'a mut OwnedPageBacking,
}

impl MappedRegion for OwnedPageMapping<'_> {
    fn bytes(&mut self) -> &mut [u8] {
        &mut self.backing.data
    }
}

impl RegisterBacking for OwnedPageBacking {
    fn map(&mut self) -> Result<Box<dyn MappedRegion + '_>, MapError> {
        Ok(Box::new(OwnedPageMapping { backing: self }))
    }
}
