use alloc::vec;
use alloc::vec::Vec;
use core::time::Duration;

use crate::error::{BridgeError, Result};

/// A window of registers reachable by byte offset.
///
/// Implementations must perform every access immediately: no caching and no
/// coalescing, because reads observe hardware state and writes trigger it.
pub trait RegisterBlock {
    /// Size of the window in bytes.
    fn span(&self) -> usize;

    /// Reads `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` starting at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()>;

    /// Time the hardware needs to latch a write before the next access.
    fn write_settle(&self) -> Duration {
        Duration::ZERO
    }
}

impl<B: RegisterBlock + ?Sized> RegisterBlock for &mut B {
    fn span(&self) -> usize {
        (**self).span()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write(offset, data)
    }

    fn write_settle(&self) -> Duration {
        (**self).write_settle()
    }
}

/// Checks that `offset..offset + len` lies inside a window of `span` bytes.
#[inline]
pub fn check_bounds(offset: usize, len: usize, span: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= span => Ok(()),
        _ => Err(BridgeError::OutOfBounds { offset, len, span }),
    }
}

/// Register window backed by ordinary memory.
///
/// Used to decode register snapshots offline and as the backing store of
/// tests that only need static register contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    bytes: Vec<u8>,
}

impl MemoryBlock {
    /// A zero-filled window of `span` bytes.
    pub fn new(span: usize) -> Self {
        Self {
            bytes: vec![0; span],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl RegisterBlock for MemoryBlock {
    fn span(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.bytes.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
