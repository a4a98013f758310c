//! Interfaces to the collaborators the memory subsystem consumes
//!
//! The virtual-memory subsystem never allocates physical memory, walks
//! hardware page tables, or touches the disk itself; it goes through these
//! traits. The kernel wires in the real implementations, tests wire in
//! simulated ones.

use alloc::boxed::Box;
use bitflags::bitflags;

use crate::addr::{PAGE_SIZE, PhysAddr, SECTOR_SIZE, VirtAddr};
use crate::error::Result;

/// Process identifier
pub type Pid = u64;

/// One page worth of bytes
pub type PageBuf = [u8; PAGE_SIZE];

/// One sector worth of bytes
pub type Sector = [u8; SECTOR_SIZE];

bitflags! {
    /// Physical page allocation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Zero the page before returning it
        const ZERO = 1 << 0;
    }
}

/// Trait for the raw physical page allocator
pub trait PhysMemory: Send {
    /// Allocates one physical page, or `None` when the pool is exhausted
    fn alloc_page(&mut self, flags: AllocFlags) -> Option<PhysAddr>;

    /// Returns a physical page to the free pool
    fn free_page(&mut self, frame: PhysAddr);

    /// Copies the contents of a physical page into `buf`
    fn read_page(&self, frame: PhysAddr, buf: &mut PageBuf);

    /// Overwrites the contents of a physical page with `buf`
    fn write_page(&mut self, frame: PhysAddr, buf: &PageBuf);
}

/// Trait for the hardware page-table abstraction
pub trait PageDirectory: Send {
    /// Installs a virtual-to-physical mapping; `false` when the page-table
    /// structures themselves cannot be allocated
    fn map(&mut self, pid: Pid, page: VirtAddr, frame: PhysAddr, writable: bool) -> bool;

    /// Removes a virtual-to-physical mapping
    fn unmap(&mut self, pid: Pid, page: VirtAddr);

    /// Returns whether the mapping's hardware dirty bit is set
    fn is_dirty(&self, pid: Pid, page: VirtAddr) -> bool;
}

/// Trait for a sector-addressed block device
pub trait BlockDevice: Send {
    /// Returns the device capacity in sectors
    fn sector_count(&self) -> usize;

    /// Reads one sector into `buf`
    fn read_sector(&mut self, sector: usize, buf: &mut Sector);

    /// Writes one sector from `buf`
    fn write_sector(&mut self, sector: usize, buf: &Sector);
}

/// Trait for an open file supplied by the file/inode layer
///
/// Dropping the handle closes it.
pub trait FileHandle: Send {
    /// Returns the file length in bytes
    fn length(&self) -> usize;

    /// Reads up to `buf.len()` bytes at `offset`; returns the count read
    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Writes `buf` at `offset`; returns the count written
    fn write_at(&mut self, buf: &[u8], offset: usize) -> Result<usize>;

    /// Opens an independent handle to the same file, with its own cursor
    /// and lifetime
    fn reopen(&self) -> Result<Box<dyn FileHandle>>;
}
