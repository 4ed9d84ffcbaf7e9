// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Scatter/gather extent builder
//!
//! Maps a flat byte request onto DMA chunks of at most `max_chunk_size` bytes
//! and describes them in one or more linked descriptor pages.

use std::io::Read;

use hbamgmt_ddi_interface::*;

use crate::config::EngineConfig;

/// How the contents of new extents are produced
pub enum ExtentDirection<'a> {
    /// Host to device; each chunk is read from the source in order
    CopyIn(&'a mut dyn Read),

    /// Device to host; chunks are zeroed
    ZeroFill,
}

impl ExtentDirection<'_> {
    fn kind(&self) -> BdeKind {
        match self {
            ExtentDirection::CopyIn(_) => BdeKind::Transmit,
            ExtentDirection::ZeroFill => BdeKind::Receive,
        }
    }
}

#[derive(Debug)]
struct BufferExtent {
    buffer: DmaBuffer,
    size: usize,
    kind: BdeKind,
}

#[derive(Debug)]
struct DescriptorPage {
    buffer: DmaBuffer,
    entries: Vec<Bde>,
}

impl DescriptorPage {
    fn set(&mut self, index: usize, bde: Bde) -> DdiResult<()> {
        self.buffer.write_at(index * BDE_SIZE, bde.encode())?;
        match self.entries.get_mut(index) {
            Some(slot) => *slot = bde,
            None => self.entries.push(bde),
        }
        Ok(())
    }

    fn valid_bytes(&self) -> u32 {
        (self.entries.len() * BDE_SIZE) as u32
    }
}

// State of a list before an append, for unwinding
struct Checkpoint {
    pages: usize,
    extents: usize,
    last_page_len: usize,
    last_entry: Option<Bde>,
}

/// Ordered DMA extents and the linked descriptor pages that describe them.
///
/// The list owns every buffer it references. It must be handed back through
/// [`ExtentList::release`]; dropping it leaks the DMA memory.
#[derive(Debug)]
pub struct ExtentList {
    pages: Vec<DescriptorPage>,
    extents: Vec<BufferExtent>,
    entries_per_page: usize,
    usable_per_page: usize,
}

impl ExtentList {
    fn new(entries_per_page: usize, usable_per_page: usize) -> Self {
        Self {
            pages: Vec::new(),
            extents: Vec::new(),
            entries_per_page,
            usable_per_page,
        }
    }

    /// Data entries across all pages, links excluded
    pub fn entry_count(&self) -> usize {
        self.extents.len()
    }

    /// Descriptor pages in the list
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns `true` if the list holds no extents
    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Total bytes covered by the extents
    pub fn byte_len(&self) -> usize {
        self.extents.iter().map(|e| e.size).sum()
    }

    /// Sizes of the extents in order
    pub fn extent_sizes(&self) -> Vec<usize> {
        self.extents.iter().map(|e| e.size).collect()
    }

    /// Entries of page `index` as the device sees them, links included
    pub fn page_entries(&self, index: usize) -> Option<&[Bde]> {
        self.pages.get(index).map(|p| p.entries.as_slice())
    }

    /// Device reference to the first page, `None` for an empty list
    pub fn bpl_ref(&self) -> Option<BplRef> {
        self.pages.first().map(|page| BplRef {
            addr: page.buffer.addr(),
            size: page.valid_bytes(),
        })
    }

    /// Concatenate the contents of every extent of `kind`, stopping after
    /// `limit` bytes.
    ///
    /// # Error
    /// * `DdiError::IndexOutOfBounds` - An extent buffer is shorter than its entry
    pub fn copy_out(&self, kind: BdeKind, limit: usize) -> DdiResult<Vec<u8>> {
        let mut out = Vec::new();
        for extent in self.extents.iter().filter(|e| e.kind == kind) {
            let n = extent.size.min(limit - out.len());
            if n == 0 {
                break;
            }
            let start = out.len();
            out.resize(start + n, 0);
            extent.buffer.read_at(0, &mut out[start..])?;
        }
        Ok(out)
    }

    /// Release every extent and descriptor page to `alloc`.
    pub fn release<A: DmaAllocator + ?Sized>(mut self, alloc: &A) {
        tracing::trace!(
            extents = self.extents.len(),
            pages = self.pages.len(),
            "releasing extent list"
        );
        for extent in self.extents.drain(..) {
            alloc.release_dma_buffer(extent.buffer);
        }
        for page in self.pages.drain(..) {
            alloc.release_dma_buffer(page.buffer);
        }
    }

    fn checkpoint(&self) -> Checkpoint {
        let last = self.pages.last();
        Checkpoint {
            pages: self.pages.len(),
            extents: self.extents.len(),
            last_page_len: last.map_or(0, |p| p.entries.len()),
            last_entry: last.and_then(|p| p.entries.last().copied()),
        }
    }

    fn rollback<A: DmaAllocator + ?Sized>(&mut self, alloc: &A, cp: Checkpoint) {
        for extent in self.extents.drain(cp.extents..) {
            alloc.release_dma_buffer(extent.buffer);
        }
        for page in self.pages.drain(cp.pages..) {
            alloc.release_dma_buffer(page.buffer);
        }

        let count = self.pages.len();
        let Some(page) = self.pages.last_mut() else {
            return;
        };
        page.entries.truncate(cp.last_page_len);
        if let Some(entry) = cp.last_entry {
            // restore the entry displaced by a link
            if page.set(cp.last_page_len - 1, entry).is_err() {
                tracing::error!("failed to restore displaced descriptor entry");
            }
        }

        if count > 1 {
            let addr = page.buffer.addr();
            let size = page.valid_bytes();
            if self.relink(count - 2, addr, size).is_err() {
                tracing::error!("failed to restore descriptor link");
            }
        }
    }

    // Point the link at the end of page `index` to `addr`, covering `size` bytes
    fn relink(&mut self, index: usize, addr: u64, size: u32) -> DdiResult<()> {
        let prev = &mut self.pages[index];
        let last = prev.entries.len() - 1;
        prev.set(last, Bde::new(BdeKind::Link, addr, size)?)
    }

    fn allocate_page<A: DmaAllocator + ?Sized>(&self, alloc: &A) -> DdiResult<DescriptorPage> {
        let buffer = alloc.allocate_dma_buffer(self.entries_per_page * BDE_SIZE)?;
        Ok(DescriptorPage {
            buffer,
            entries: Vec::with_capacity(self.entries_per_page),
        })
    }

    fn push_entry<A: DmaAllocator + ?Sized>(&mut self, alloc: &A, bde: Bde) -> DdiResult<()> {
        let full = match self.pages.last() {
            None => {
                let page = self.allocate_page(alloc)?;
                self.pages.push(page);
                false
            }
            Some(page) => page.entries.len() >= self.usable_per_page,
        };

        if full {
            let mut next = self.allocate_page(alloc)?;
            let count = self.pages.len();
            let page = &mut self.pages[count - 1];
            let last = page.entries.len() - 1;
            let moved = page.entries[last];

            let linked = next
                .set(0, moved)
                .and_then(|_| Bde::new(BdeKind::Link, next.buffer.addr(), next.valid_bytes()))
                .and_then(|link| page.set(last, link));
            if let Err(err) = linked {
                alloc.release_dma_buffer(next.buffer);
                return Err(err);
            }
            self.pages.push(next);
        }

        let count = self.pages.len();
        let page = &mut self.pages[count - 1];
        let index = page.entries.len();
        page.set(index, bde)?;

        // keep the link into this page in step with its length
        if count > 1 {
            let addr = page.buffer.addr();
            let size = page.valid_bytes();
            self.relink(count - 2, addr, size)?;
        }

        Ok(())
    }
}

impl Drop for ExtentList {
    fn drop(&mut self) {
        if !self.extents.is_empty() || !self.pages.is_empty() {
            tracing::error!(
                extents = self.extents.len(),
                pages = self.pages.len(),
                "extent list dropped without release"
            );
        }
    }
}

/// Builds [`ExtentList`]s with a fixed chunk size and page geometry
#[derive(Clone, Copy, Debug)]
pub struct ExtentBuilder {
    max_chunk: usize,
    entries_per_page: usize,
    usable_per_page: usize,
}

impl ExtentBuilder {
    /// Builder for a validated configuration
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_chunk: config.max_chunk_size,
            entries_per_page: config.bpl_entries_per_page,
            usable_per_page: config.usable_entries_per_page(),
        }
    }

    /// Largest extent the builder produces
    pub fn max_chunk(&self) -> usize {
        self.max_chunk
    }

    /// Empty list using this builder's geometry
    pub fn empty_list(&self) -> ExtentList {
        ExtentList::new(self.entries_per_page, self.usable_per_page)
    }

    /// Build a new list covering `len` bytes.
    ///
    /// # Error
    /// * `DdiError::ResourceExhausted` - A page or chunk could not be allocated
    /// * `DdiError::IoError` - The `CopyIn` source failed
    pub fn build<A: DmaAllocator + ?Sized>(
        &self,
        alloc: &A,
        len: usize,
        direction: ExtentDirection<'_>,
    ) -> DdiResult<ExtentList> {
        let mut list = self.empty_list();
        self.append(alloc, &mut list, len, direction)?;
        Ok(list)
    }

    /// Append extents covering `len` bytes to `list`.
    ///
    /// On failure only this call's extents and pages are released; the
    /// entries already in `list` are left as they were.
    ///
    /// # Error
    /// * `DdiError::ResourceExhausted` - A page or chunk could not be allocated
    /// * `DdiError::IoError` - The `CopyIn` source failed
    #[tracing::instrument(skip(self, alloc, list, direction), fields(existing = list.entry_count()))]
    pub fn append<A: DmaAllocator + ?Sized>(
        &self,
        alloc: &A,
        list: &mut ExtentList,
        len: usize,
        mut direction: ExtentDirection<'_>,
    ) -> DdiResult<()> {
        let cp = list.checkpoint();
        let result = self.fill(alloc, list, len, &mut direction);
        if let Err(err) = &result {
            tracing::warn!(?err, len, "extent build failed; unwinding");
            list.rollback(alloc, cp);
        }
        result
    }

    fn fill<A: DmaAllocator + ?Sized>(
        &self,
        alloc: &A,
        list: &mut ExtentList,
        len: usize,
        direction: &mut ExtentDirection<'_>,
    ) -> DdiResult<()> {
        let kind = direction.kind();
        let mut remaining = len;
        let mut chunk = Vec::new();

        while remaining > 0 {
            let size = remaining.min(self.max_chunk);
            let buffer = alloc.allocate_dma_buffer(size)?;

            let filled = match direction {
                ExtentDirection::CopyIn(source) => {
                    chunk.resize(size, 0);
                    source
                        .read_exact(&mut chunk)
                        .map_err(DdiError::from)
                        .and_then(|_| buffer.write_at(0, &chunk))
                }
                ExtentDirection::ZeroFill => {
                    buffer.zero();
                    Ok(())
                }
            };
            let entry = filled.and_then(|_| Bde::new(kind, buffer.addr(), size as u32));
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    alloc.release_dma_buffer(buffer);
                    return Err(err);
                }
            };

            list.extents.push(BufferExtent { buffer, size, kind });
            list.push_entry(alloc, entry)?;
            remaining -= size;
        }

        tracing::trace!(
            len,
            entries = list.entry_count(),
            pages = list.page_count(),
            "extents built"
        );
        Ok(())
    }
}
