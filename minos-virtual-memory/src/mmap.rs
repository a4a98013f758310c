//! Memory-mapped file ranges
//!
//! A mapping ties a contiguous run of virtual pages to a privately reopened
//! file handle. Its pages ride the same fault machinery as anonymous memory;
//! this module supplies the page-in and write-back routines that move bytes
//! between a frame and the page's slice of the file.

use alloc::boxed::Box;
use alloc::format;

use minos_api::addr::{PAGE_SIZE, VirtAddr};
use minos_api::error::{self, Result};
use minos_api::platform::{FileHandle, PageBuf};

/// Identifier of one file mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(pub u64);

/// One user-level file mapping.
///
/// Holds the private file handle for the duration of the mapping; dropping
/// the map closes it.
pub struct MemoryMap {
    /// Mapping identifier.
    pub id: MapId,
    /// Page-aligned start of the mapped range.
    pub start: VirtAddr,
    /// Mapped length in bytes; the final page may be short.
    pub len: usize,
    file: Box<dyn FileHandle>,
}

impl MemoryMap {
    /// Creates a mapping record over an already privately reopened handle.
    pub fn new(id: MapId, start: VirtAddr, len: usize, file: Box<dyn FileHandle>) -> Self {
        debug_assert!(start.is_page_aligned());
        debug_assert!(len > 0);
        Self { id, start, len, file }
    }

    /// Number of pages in the mapped range, including a short final page.
    pub fn page_count(&self) -> usize {
        self.len.div_ceil(PAGE_SIZE)
    }

    /// Iterates over the page addresses of the mapped range.
    pub fn pages(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        let start = self.start.as_usize();
        (0..self.page_count()).map(move |i| VirtAddr::new(start + i * PAGE_SIZE))
    }

    /// Returns whether `page` belongs to this mapping.
    pub fn contains(&self, page: VirtAddr) -> bool {
        let offset = page.as_usize().wrapping_sub(self.start.as_usize());
        page >= self.start && offset < self.len
    }

    /// Number of file bytes covered by `page`: a full page except for the
    /// final page of a length that is not a page multiple.
    fn page_bytes(&self, page: VirtAddr) -> usize {
        let offset = page.as_usize() - self.start.as_usize();
        usize::min(PAGE_SIZE, self.len - offset)
    }

    /// Reads the page's slice of the file into `buf`, zero-filling past the
    /// end of a short final page.
    pub fn fault_in_page(&mut self, page: VirtAddr, buf: &mut PageBuf) -> Result<()> {
        debug_assert!(self.contains(page));
        let offset = page.as_usize() - self.start.as_usize();
        let bytes = self.page_bytes(page);
        let read = self.file.read_at(&mut buf[..bytes], offset)?;
        if read != bytes {
            return Err(error::io_error(&format!(
                "mapping {}: short read ({} of {} bytes)",
                self.id.0, read, bytes
            )));
        }
        buf[bytes..].fill(0);
        Ok(())
    }

    /// Writes the frame's bytes back to the page's slice of the file.
    ///
    /// Called only for pages whose hardware dirty bit is set; the zero
    /// padding above a short final page is not written.
    pub fn write_back_page(&mut self, page: VirtAddr, buf: &PageBuf) -> Result<()> {
        debug_assert!(self.contains(page));
        let offset = page.as_usize() - self.start.as_usize();
        let bytes = self.page_bytes(page);
        let written = self.file.write_at(&buf[..bytes], offset)?;
        if written != bytes {
            return Err(error::io_error(&format!(
                "mapping {}: short write ({} of {} bytes)",
                self.id.0, written, bytes
            )));
        }
        log::debug!(
            "mmap {}: wrote back {} bytes at offset {}",
            self.id.0,
            bytes,
            offset
        );
        Ok(())
    }
}
