// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DDI Implementation - Mock Adapter - DMA Module

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use hbamgmt_ddi_interface::*;
use parking_lot::Mutex;
use rand::Rng;

const PAGE_SIZE: u64 = 0x1000;

/// Mock device-visible memory.
///
/// Every live buffer is tracked by bus address so the mock device can DMA
/// into it and so tests can check that nothing leaked or was released twice.
#[derive(Debug)]
pub struct MockDma {
    next_addr: AtomicU64,
    regions: Mutex<HashMap<u64, DmaMemory>>,
    // Allocations left before every further allocation fails
    budget: Mutex<Option<usize>>,
    allocations: AtomicUsize,
    invalid_releases: AtomicUsize,
}

impl Default for MockDma {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDma {
    /// Create an empty address space at a random, page aligned base.
    pub fn new() -> Self {
        let base = rand::thread_rng().gen_range(0x1_0000u64..0x10_0000) * PAGE_SIZE;
        Self {
            next_addr: AtomicU64::new(base),
            regions: Mutex::new(HashMap::new()),
            budget: Mutex::new(None),
            allocations: AtomicUsize::new(0),
            invalid_releases: AtomicUsize::new(0),
        }
    }

    /// Let the next `count` allocations succeed, then fail every allocation
    /// until [`MockDma::clear_failure`] is called.
    pub fn fail_after(&self, count: usize) {
        *self.budget.lock() = Some(count);
    }

    /// Stop injecting allocation failures
    pub fn clear_failure(&self) {
        *self.budget.lock() = None;
    }

    /// Number of buffers currently allocated
    pub fn outstanding(&self) -> usize {
        self.regions.lock().len()
    }

    /// Number of successful allocations since creation
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Releases of buffers that were not allocated (double free)
    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases.load(Ordering::Relaxed)
    }

    /// Device-side read of `len` bytes at bus address `addr`.
    ///
    /// # Error
    /// * `DdiError::IndexOutOfBounds` - No buffer starts at `addr` or it is
    ///   shorter than `len`
    pub fn dma_read(&self, addr: u64, len: usize) -> DdiResult<Vec<u8>> {
        let mem = self.region(addr)?;
        let mut out = vec![0u8; len];
        mem.read(0, &mut out)?;
        Ok(out)
    }

    /// Device-side write of `data` at bus address `addr`.
    ///
    /// # Error
    /// * `DdiError::IndexOutOfBounds` - No buffer starts at `addr` or it is
    ///   shorter than `data`
    pub fn dma_write(&self, addr: u64, data: &[u8]) -> DdiResult<()> {
        self.region(addr)?.write(0, data)
    }

    fn region(&self, addr: u64) -> DdiResult<DmaMemory> {
        self.regions
            .lock()
            .get(&addr)
            .cloned()
            .ok_or(DdiError::IndexOutOfBounds)
    }

    fn take_budget(&self) -> bool {
        match self.budget.lock().as_mut() {
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
            None => true,
        }
    }
}

impl DmaAllocator for MockDma {
    fn allocate_dma_buffer(&self, size: usize) -> DdiResult<DmaBuffer> {
        if !self.take_budget() {
            tracing::debug!(size, "injected DMA allocation failure");
            Err(DdiError::ResourceExhausted)?
        }

        let span = (size as u64).max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let addr = self.next_addr.fetch_add(span, Ordering::Relaxed);
        let mem = DmaMemory::zeroed(size);
        self.regions.lock().insert(addr, mem.clone());
        self.allocations.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(addr, size, "allocated DMA buffer");
        Ok(DmaBuffer::new(addr, mem))
    }

    fn release_dma_buffer(&self, buffer: DmaBuffer) {
        if self.regions.lock().remove(&buffer.addr()).is_none() {
            self.invalid_releases.fetch_add(1, Ordering::Relaxed);
            tracing::error!(addr = buffer.addr(), "release of unknown DMA buffer");
        }
    }
}
