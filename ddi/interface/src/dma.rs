// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device Driver Interface (DDI) library - DMA memory module

use std::sync::Arc;

use parking_lot::Mutex;

use crate::DdiError;
use crate::DdiResult;

/// Backing store of one device-visible region.
///
/// The host and the device each hold a handle to the same bytes; the device
/// side addresses them through the bus address of the owning [`DmaBuffer`].
#[derive(Debug, Clone)]
pub struct DmaMemory(Arc<Mutex<Box<[u8]>>>);

impl DmaMemory {
    /// Create a zero-initialized region of `size` bytes.
    pub fn zeroed(size: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice())))
    }

    /// Region length in bytes
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Returns `true` for a zero-length region
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `out.len()` bytes starting at `offset` into `out`.
    ///
    /// # Error
    /// * `DdiError::IndexOutOfBounds` - The range is outside the region
    pub fn read(&self, offset: usize, out: &mut [u8]) -> DdiResult<()> {
        let mem = self.0.lock();
        let end = offset
            .checked_add(out.len())
            .ok_or(DdiError::IndexOutOfBounds)?;
        let src = mem.get(offset..end).ok_or(DdiError::IndexOutOfBounds)?;
        out.copy_from_slice(src);
        Ok(())
    }

    /// Copy `data` into the region starting at `offset`.
    ///
    /// # Error
    /// * `DdiError::IndexOutOfBounds` - The range is outside the region
    pub fn write(&self, offset: usize, data: &[u8]) -> DdiResult<()> {
        let mut mem = self.0.lock();
        let end = offset
            .checked_add(data.len())
            .ok_or(DdiError::IndexOutOfBounds)?;
        let dst = mem
            .get_mut(offset..end)
            .ok_or(DdiError::IndexOutOfBounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Overwrite the whole region with `value`.
    pub fn fill(&self, value: u8) {
        self.0.lock().fill(value);
    }
}

/// One physically contiguous, device-visible buffer.
///
/// A `DmaBuffer` is not `Clone`: whoever holds it owns the region and must
/// hand it back through [`crate::DmaAllocator::release_dma_buffer`] or
/// [`crate::DdiDev::repost_receive_buffer`].
#[derive(Debug)]
pub struct DmaBuffer {
    addr: u64,
    mem: DmaMemory,
}

impl DmaBuffer {
    /// Wrap a region mapped at bus address `addr`.
    pub fn new(addr: u64, mem: DmaMemory) -> Self {
        Self { addr, mem }
    }

    /// Bus address the device uses for this buffer
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Buffer length in bytes
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// Returns `true` for a zero-length buffer
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Host view of the backing memory
    pub fn memory(&self) -> &DmaMemory {
        &self.mem
    }

    /// See [`DmaMemory::read`]
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> DdiResult<()> {
        self.mem.read(offset, out)
    }

    /// See [`DmaMemory::write`]
    pub fn write_at(&self, offset: usize, data: &[u8]) -> DdiResult<()> {
        self.mem.write(offset, data)
    }

    /// Zero the whole buffer
    pub fn zero(&self) {
        self.mem.fill(0);
    }
}
