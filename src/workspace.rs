//! The byte-block heap (spec §3 "Workspace", §4.11 `DIM name <size>` /
//! `DIM name!offset <size>`): a bump allocator handing out raw,
//! untyped byte ranges addressed by offset, for the indirection-style
//! (`?`/`!`) allocations that sit outside the typed value/array model.
//!
//! The tokenised program's own bytes live in [`crate::program::Program`]
//! instead of here — that buffer needs in-place opcode patching, not bump
//! allocation, so it is modelled separately rather than forcing both
//! concerns through one region the way the source's single workspace did.

use crate::error::{BasicError, Result};

/// A raw byte-block allocation, addressed like the source's workspace
/// offsets. `DIM name <size>` stores this base in `name`; `-1` (spec
/// §4.11) requests "current heap top, no allocation" instead of
/// allocating, which callers detect before calling [`Workspace::alloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapAddr(pub u64);

/// Sentinel meaning "current heap top, no allocation" (spec §4.11).
pub const HEAP_TOP_SENTINEL: i64 = -1;

#[derive(Debug)]
pub struct Workspace {
    bytes: Vec<u8>,
    /// 32-bit mode requires every returned address to fit in `u32`
    /// (spec §4.11, `DIM HIMEM` in 32-bit mode).
    addr32: bool,
}

impl Workspace {
    pub fn new(addr32: bool) -> Self {
        Workspace {
            bytes: Vec::new(),
            addr32,
        }
    }

    pub fn heap_top(&self) -> HeapAddr {
        HeapAddr(self.bytes.len() as u64)
    }

    /// Allocate `size + 1` bytes (spec §4.11: the `+1` leaves room for the
    /// implicit terminator byte BASIC's `?`/`!` indirection conventions
    /// expect after the nominal block). Negative sizes are rejected by the
    /// caller (`BasicError::NegByteDim`/`NegDim`) before this is reached.
    pub fn alloc(&mut self, size: u64) -> Result<HeapAddr> {
        let base = self.bytes.len() as u64;
        let total = size
            .checked_add(1)
            .ok_or(BasicError::BadByteDim)?;
        if self.addr32 && base.checked_add(total).map_or(true, |end| end > u32::MAX as u64) {
            return Err(BasicError::BadDim);
        }
        self.bytes.resize(self.bytes.len() + total as usize, 0);
        Ok(HeapAddr(base))
    }

    pub fn read_u8(&self, addr: HeapAddr) -> Result<u8> {
        self.bytes
            .get(addr.0 as usize)
            .copied()
            .ok_or(BasicError::Range)
    }

    pub fn write_u8(&mut self, addr: HeapAddr, value: u8) -> Result<()> {
        *self
            .bytes
            .get_mut(addr.0 as usize)
            .ok_or(BasicError::Range)? = value;
        Ok(())
    }

    pub fn read_u32(&self, addr: HeapAddr) -> Result<u32> {
        let i = addr.0 as usize;
        let slice = self.bytes.get(i..i + 4).ok_or(BasicError::Range)?;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    }

    pub fn write_u32(&mut self, addr: HeapAddr, value: u32) -> Result<()> {
        let i = addr.0 as usize;
        let slice = self.bytes.get_mut(i..i + 4).ok_or(BasicError::Range)?;
        slice.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
