//! Address types and page arithmetic

use static_assertions::const_assert;
use static_assertions::const_assert_eq;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;
/// Block device sector size
pub const SECTOR_SIZE: usize = 512;
/// Sectors needed to hold one page
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Top of the user stack; the first stack page sits one page below.
pub const USER_STACK_TOP: usize = 0xc000_0000;
/// Lowest address the user stack may grow down to.
pub const STACK_LOW_BOUND: usize = 0xbf80_0000;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert_eq!(1usize << PAGE_SHIFT, PAGE_SIZE);
const_assert_eq!(PAGE_SIZE % SECTOR_SIZE, 0);
const_assert!(STACK_LOW_BOUND < USER_STACK_TOP);

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// A physical (kernel-virtual) address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    /// Creates a new physical address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the physical address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Checks if the physical address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }
}

impl From<usize> for PhysAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<PhysAddr> for usize {
    fn from(addr: PhysAddr) -> Self {
        addr.0
    }
}

/// A user virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the virtual address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Checks if the virtual address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Rounds down the virtual address to its page boundary.
    pub const fn page_round_down(self) -> Self {
        Self(page_round_down(self.0))
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<VirtAddr> for usize {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}
