//! Physical frame registry
//!
//! Tracks every physical page currently backing a user page, keyed by its
//! physical address. Each entry carries a creation stamp from a monotonic
//! counter; the oldest frame with an owner is the eviction victim, a FIFO
//! approximation of LRU.

use alloc::vec::Vec;
use hashbrown::HashMap;
use spin::Mutex;

use minos_api::addr::{PhysAddr, VirtAddr};
use minos_api::platform::Pid;

/// Identity of a page record: the owning process and the page base address.
pub type PageKey = (Pid, VirtAddr);

/// One physical page currently in use.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Physical address of the page, unique for the frame's lifetime.
    pub addr: PhysAddr,
    /// Creation stamp; lower means older.
    pub stamp: u64,
    /// Pages currently backed by this frame. At most one entry while page
    /// sharing is unimplemented.
    pub owners: Vec<PageKey>,
}

struct FrameTableInner {
    frames: HashMap<PhysAddr, Frame>,
    next_stamp: u64,
}

/// Directory of all resident frames.
///
/// One lock covers lookups, insertions, deletions, and the victim scan.
/// Callers must not hold it across page I/O; [`FrameTable::take_victim`]
/// removes the victim from the directory so the write-back can happen after
/// the lock is dropped.
pub struct FrameTable {
    inner: Mutex<FrameTableInner>,
}

impl FrameTable {
    /// Creates an empty frame table.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FrameTableInner {
                frames: HashMap::new(),
                next_stamp: 0,
            }),
        }
    }

    /// Registers a freshly obtained physical page as a frame and returns its
    /// creation stamp.
    ///
    /// Re-registering an address already present returns the existing entry's
    /// stamp unchanged.
    pub fn acquire(&self, addr: PhysAddr) -> u64 {
        debug_assert!(addr.is_page_aligned());
        let inner = &mut *self.inner.lock();
        if let Some(existing) = inner.frames.get(&addr) {
            return existing.stamp;
        }
        let stamp = inner.next_stamp;
        inner.next_stamp += 1;
        inner.frames.insert(
            addr,
            Frame {
                addr,
                stamp,
                owners: Vec::new(),
            },
        );
        log::debug!("frame: registered {:#x} (stamp {})", addr.as_usize(), stamp);
        stamp
    }

    /// Records `key` as an owner of the frame at `addr`.
    ///
    /// Returns `false` if no such frame is registered.
    pub fn attach_owner(&self, addr: PhysAddr, key: PageKey) -> bool {
        let mut inner = self.inner.lock();
        match inner.frames.get_mut(&addr) {
            Some(frame) => {
                frame.owners.push(key);
                true
            }
            None => false,
        }
    }

    /// Unregisters the frame at `addr`, dropping its bookkeeping entry.
    ///
    /// The caller is responsible for returning the physical page and
    /// invalidating hardware mappings. Returns `false` if `addr` is not
    /// registered.
    pub fn release(&self, addr: PhysAddr) -> bool {
        let removed = self.inner.lock().frames.remove(&addr).is_some();
        if removed {
            log::debug!("frame: released {:#x}", addr.as_usize());
        }
        removed
    }

    /// Returns a snapshot of the frame at `addr`, or `None`.
    pub fn lookup(&self, addr: PhysAddr) -> Option<Frame> {
        self.inner.lock().frames.get(&addr).cloned()
    }

    /// Removes and returns the eviction victim: the owned frame with the
    /// smallest creation stamp.
    ///
    /// Selection does not consult page protection; read-only pages are
    /// evicted like any other, since every eviction path preserves content.
    ///
    /// # Panics
    ///
    /// Panics when no owned frame exists. Memory is exhausted and there is
    /// nothing left to reclaim, which is unrecoverable.
    pub fn take_victim(&self) -> Frame {
        let inner = &mut *self.inner.lock();
        let victim = inner
            .frames
            .values()
            .filter(|f| !f.owners.is_empty())
            .min_by_key(|f| f.stamp)
            .map(|f| f.addr);
        match victim {
            Some(addr) => {
                let frame = inner.frames.remove(&addr).unwrap();
                log::debug!(
                    "frame: evicting {:#x} (stamp {})",
                    frame.addr.as_usize(),
                    frame.stamp
                );
                frame
            }
            None => panic!("frame table: no frame to evict"),
        }
    }

    /// Returns the number of registered frames.
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Returns whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}
