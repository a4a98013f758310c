//! Supplemental page table
//!
//! Per-process bookkeeping for every virtual page the process has touched,
//! independent of whether the page is currently resident. The hardware page
//! tables only know about resident pages; this table remembers where the
//! bytes of everything else live.

use alloc::collections::BTreeMap;

use minos_api::addr::{PhysAddr, STACK_LOW_BOUND, USER_STACK_TOP, VirtAddr};
use minos_api::platform::Pid;

use crate::mmap::MapId;
use crate::swap::SlotId;

/// Where a page's bytes can be recreated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Anonymous memory; evicted copies go to the swap store.
    Anonymous,
    /// A slice of a memory-mapped file.
    Mapped(MapId),
}

/// Where a page's bytes currently live.
///
/// Exactly one variant holds at a time, so a page can never claim to be
/// resident and swapped simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// No frame and no swap copy; the bytes live in the backing file (or
    /// are all zero and have never been materialized).
    Unbacked,
    /// In memory, backed by the given frame.
    Resident {
        /// Physical address of the backing frame.
        frame: PhysAddr,
    },
    /// Written out to a swap slot. Only anonymous pages carry slots;
    /// file-backed pages go back to [`Residency::Unbacked`] on eviction.
    Swapped {
        /// Locator of the swap copy.
        slot: SlotId,
    },
}

/// Bookkeeping entry for one virtual page.
#[derive(Debug, Clone)]
pub struct PageRecord {
    /// Page-aligned virtual address.
    pub vaddr: VirtAddr,
    /// Owning process.
    pub pid: Pid,
    /// Whether the hardware mapping is installed writable.
    pub writable: bool,
    /// Current location of the page's bytes.
    pub residency: Residency,
    /// Where the bytes can be recreated from.
    pub backing: Backing,
}

/// One process's supplemental page table.
///
/// Only mutated by the owning process's threads, or by the exit path after
/// the process has stopped fielding faults; the eviction path reaches in
/// through the manager's process-table lock.
#[derive(Default)]
pub struct ProcessPages {
    pages: BTreeMap<VirtAddr, PageRecord>,
}

impl ProcessPages {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a page record for `vaddr`, or re-attaches an existing one.
    ///
    /// A page can be evicted and faulted back in repeatedly while remaining
    /// the same logical page, so re-creating an existing record attaches it
    /// to the given frame and marks it resident instead of duplicating it.
    /// Passing no frame creates a lazy record that starts [`Residency::Unbacked`].
    pub fn create_or_attach(
        &mut self,
        pid: Pid,
        vaddr: VirtAddr,
        frame: Option<PhysAddr>,
        writable: bool,
        backing: Backing,
    ) -> &mut PageRecord {
        debug_assert!(vaddr.is_page_aligned());
        if self.pages.contains_key(&vaddr) {
            let existing = self.pages.get_mut(&vaddr).unwrap();
            debug_assert!(frame.is_some(), "re-attaching a page requires a frame");
            if let Some(frame) = frame {
                existing.residency = Residency::Resident { frame };
            }
            // Backing and writability are properties of the logical page
            // and survive eviction unchanged.
            return existing;
        }
        let residency = match frame {
            Some(frame) => Residency::Resident { frame },
            None => Residency::Unbacked,
        };
        self.pages.entry(vaddr).or_insert(PageRecord {
            vaddr,
            pid,
            writable,
            residency,
            backing,
        })
    }

    /// Returns the record for the page containing `vaddr`, if any.
    pub fn find(&self, vaddr: VirtAddr) -> Option<&PageRecord> {
        self.pages.get(&vaddr.page_round_down())
    }

    /// Returns the mutable record for the page containing `vaddr`, if any.
    pub fn find_mut(&mut self, vaddr: VirtAddr) -> Option<&mut PageRecord> {
        self.pages.get_mut(&vaddr.page_round_down())
    }

    /// Removes and returns the record for the page containing `vaddr`.
    ///
    /// Does not free the record's frame or swap slot; the caller picks the
    /// correct release path for the record's backing kind.
    pub fn remove(&mut self, vaddr: VirtAddr) -> Option<PageRecord> {
        self.pages.remove(&vaddr.page_round_down())
    }

    /// Returns the lowest mapped stack page, or [`USER_STACK_TOP`] when no
    /// stack page exists yet (so growth starts one page below the top).
    pub fn lowest_stack_page(&self) -> VirtAddr {
        self.pages
            .range(VirtAddr::new(STACK_LOW_BOUND)..VirtAddr::new(USER_STACK_TOP))
            .next()
            .map(|(vaddr, _)| *vaddr)
            .unwrap_or(VirtAddr::new(USER_STACK_TOP))
    }

    /// Returns the page addresses of all records.
    pub fn page_addrs(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        self.pages.keys().copied()
    }

    /// Number of records in the table.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns whether the table has no records.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
