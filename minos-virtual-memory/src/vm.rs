//! Virtual memory orchestration
//!
//! [`VmManager`] owns the frame registry, the swap store, and the
//! per-process supplemental page tables and mappings, and moves page
//! contents between frames, swap slots, and mapped files on faults and
//! evictions. The page-fault trap handler calls [`VmManager::resolve_fault`];
//! the process-exit path calls [`VmManager::release_process`].
//!
//! Lock order: process table, then frame directory, then (with both
//! released where I/O is involved) the swap store or file layer. The frame
//! lock is never held across device or file I/O; eviction removes the
//! victim from the directory first and performs the write-back afterwards.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use spin::Mutex;

use minos_api::addr::{
    PAGE_SIZE, PhysAddr, STACK_LOW_BOUND, USER_STACK_TOP, VirtAddr, page_round_down,
};
use minos_api::error::{self, Error, Result};
use minos_api::platform::{
    AllocFlags, BlockDevice, FileHandle, PageBuf, PageDirectory, PhysMemory, Pid,
};

use crate::frame::FrameTable;
use crate::mmap::{MapId, MemoryMap};
use crate::page::{Backing, PageRecord, ProcessPages, Residency};
use crate::swap::SwapStore;

/// Per-process virtual-memory state.
#[derive(Default)]
struct ProcessVm {
    pages: ProcessPages,
    maps: HashMap<MapId, MemoryMap>,
}

/// The demand-paging manager.
pub struct VmManager {
    frames: FrameTable,
    swap: SwapStore,
    procs: Mutex<HashMap<Pid, ProcessVm>>,
    phys: Mutex<Box<dyn PhysMemory>>,
    pagedir: Mutex<Box<dyn PageDirectory>>,
    next_map_id: AtomicU64,
}

impl VmManager {
    /// Creates the manager over the given platform services. The swap
    /// store's bitmap is sized to the device capacity, all slots free.
    pub fn new(
        phys: Box<dyn PhysMemory>,
        pagedir: Box<dyn PageDirectory>,
        swap_device: Box<dyn BlockDevice>,
    ) -> Self {
        Self {
            frames: FrameTable::new(),
            swap: SwapStore::new(swap_device),
            procs: Mutex::new(HashMap::new()),
            phys: Mutex::new(phys),
            pagedir: Mutex::new(pagedir),
            next_map_id: AtomicU64::new(0),
        }
    }

    /// Resolves a page fault at `addr` for process `pid`.
    ///
    /// In order: an existing page record is faulted in; an address in the
    /// stack region grows the stack down to cover it; anything else is a
    /// segmentation violation reported to the caller.
    pub fn resolve_fault(&self, pid: Pid, addr: usize) -> Result<()> {
        let procs = &mut *self.procs.lock();
        let page = VirtAddr::new(page_round_down(addr));
        let known = procs
            .get(&pid)
            .is_some_and(|proc| proc.pages.find(page).is_some());
        if known {
            return self.fault_in(procs, pid, page);
        }
        if (STACK_LOW_BOUND..USER_STACK_TOP).contains(&addr) {
            return self.grow_stack_locked(procs, pid, addr);
        }
        log::debug!("vm: pid {}: segmentation fault at {:#x}", pid, addr);
        Err(Error::SegmentationFault(addr))
    }

    /// Extends `pid`'s stack downward one page at a time until it covers
    /// `fault_addr`, registering each page as writable anonymous memory.
    ///
    /// Pages committed before a failure stay committed. Whether `fault_addr`
    /// is a plausible stack access is the trap handler's call, not ours.
    pub fn grow_stack(&self, pid: Pid, fault_addr: usize) -> Result<()> {
        let procs = &mut *self.procs.lock();
        self.grow_stack_locked(procs, pid, fault_addr)
    }

    fn grow_stack_locked(
        &self,
        procs: &mut HashMap<Pid, ProcessVm>,
        pid: Pid,
        fault_addr: usize,
    ) -> Result<()> {
        let dest = page_round_down(fault_addr);
        let mut cursor = procs
            .entry(pid)
            .or_default()
            .pages
            .lowest_stack_page()
            .as_usize();
        while cursor > dest {
            cursor -= PAGE_SIZE;
            let page = VirtAddr::new(cursor);
            let frame = self.obtain_frame(procs, AllocFlags::ZERO);
            if !self.pagedir.lock().map(pid, page, frame, true) {
                self.phys.lock().free_page(frame);
                log::warn!("vm: pid {}: stack growth failed at {:#x}", pid, cursor);
                return Err(error::out_of_memory());
            }
            self.frames.acquire(frame);
            self.frames.attach_owner(frame, (pid, page));
            procs
                .get_mut(&pid)
                .unwrap()
                .pages
                .create_or_attach(pid, page, Some(frame), true, Backing::Anonymous);
            log::debug!("vm: pid {}: stack page {:#x} -> {:#x}", pid, cursor, frame.as_usize());
        }
        Ok(())
    }

    /// Brings the non-resident page at `page` back into a frame.
    fn fault_in(
        &self,
        procs: &mut HashMap<Pid, ProcessVm>,
        pid: Pid,
        page: VirtAddr,
    ) -> Result<()> {
        let (residency, backing, writable) = {
            let proc = procs.get_mut(&pid).ok_or_else(|| error::not_found("process"))?;
            match proc.pages.find(page) {
                Some(record) => (record.residency, record.backing, record.writable),
                None => return Err(Error::SegmentationFault(page.as_usize())),
            }
        };
        if matches!(residency, Residency::Resident { .. }) {
            // Spurious fault; the mapping is already installed.
            return Ok(());
        }

        let frame = self.obtain_frame(procs, AllocFlags::empty());
        let mut buf: PageBuf = [0; PAGE_SIZE];
        let fill = match residency {
            Residency::Swapped { slot } => {
                // Frees the slot as part of the read.
                self.swap.read_page(slot, &mut buf);
                Ok(())
            }
            Residency::Unbacked => match backing {
                Backing::Mapped(id) => {
                    let proc = procs.get_mut(&pid).unwrap();
                    match proc.maps.get_mut(&id) {
                        Some(map) => map.fault_in_page(page, &mut buf),
                        None => Err(error::invalid_state("page record without its mapping")),
                    }
                }
                // Fresh anonymous page: all zeros.
                Backing::Anonymous => Ok(()),
            },
            Residency::Resident { .. } => unreachable!(),
        };
        if let Err(err) = fill {
            self.phys.lock().free_page(frame);
            return Err(err);
        }
        self.phys.lock().write_page(frame, &buf);

        if !self.pagedir.lock().map(pid, page, frame, writable) {
            // Put the bytes back where they came from before giving up.
            if matches!(residency, Residency::Swapped { .. }) {
                let slot = self.swap.write_page(&buf);
                let proc = procs.get_mut(&pid).unwrap();
                if let Some(record) = proc.pages.find_mut(page) {
                    record.residency = Residency::Swapped { slot };
                }
            }
            self.phys.lock().free_page(frame);
            return Err(error::out_of_memory());
        }
        self.frames.acquire(frame);
        self.frames.attach_owner(frame, (pid, page));
        procs
            .get_mut(&pid)
            .unwrap()
            .pages
            .create_or_attach(pid, page, Some(frame), writable, backing);
        log::debug!(
            "vm: pid {}: faulted in {:#x} -> {:#x}",
            pid,
            page.as_usize(),
            frame.as_usize()
        );
        Ok(())
    }

    /// Obtains a physical page, evicting a victim frame when the allocator
    /// is out of memory.
    fn obtain_frame(&self, procs: &mut HashMap<Pid, ProcessVm>, flags: AllocFlags) -> PhysAddr {
        if let Some(frame) = self.phys.lock().alloc_page(flags) {
            return frame;
        }
        let frame = self.evict_one(procs);
        if flags.contains(AllocFlags::ZERO) {
            self.phys.lock().write_page(frame, &[0; PAGE_SIZE]);
        }
        frame
    }

    /// Evicts the victim frame and returns its now-free physical address.
    ///
    /// The victim leaves the frame directory under the frame lock alone;
    /// its page record is flipped off `Resident` and the hardware mapping
    /// cleared before the bytes move, so nothing can observe residency in a
    /// frame that is about to be reused. Anonymous contents go to swap;
    /// file-backed contents are written back only when dirty.
    fn evict_one(&self, procs: &mut HashMap<Pid, ProcessVm>) -> PhysAddr {
        let victim = self.frames.take_victim();
        let addr = victim.addr;
        let Some(&(vpid, vpage)) = victim.owners.first() else {
            return addr;
        };

        let backing = {
            let record = procs
                .get_mut(&vpid)
                .and_then(|proc| proc.pages.find_mut(vpage))
                .unwrap_or_else(|| {
                    panic!(
                        "vm: evicted frame {:#x} owned by unknown page {}/{:#x}",
                        addr.as_usize(),
                        vpid,
                        vpage.as_usize()
                    )
                });
            record.residency = Residency::Unbacked;
            record.backing
        };
        let dirty = {
            let mut pagedir = self.pagedir.lock();
            let dirty = pagedir.is_dirty(vpid, vpage);
            pagedir.unmap(vpid, vpage);
            dirty
        };

        let mut buf: PageBuf = [0; PAGE_SIZE];
        self.phys.lock().read_page(addr, &mut buf);
        match backing {
            Backing::Anonymous => {
                let slot = self.swap.write_page(&buf);
                let record = procs
                    .get_mut(&vpid)
                    .and_then(|proc| proc.pages.find_mut(vpage))
                    .unwrap();
                record.residency = Residency::Swapped { slot };
                log::debug!(
                    "vm: pid {}: evicted {:#x} to swap slot {}",
                    vpid,
                    vpage.as_usize(),
                    slot.0
                );
            }
            Backing::Mapped(id) => {
                if dirty {
                    let map = procs
                        .get_mut(&vpid)
                        .and_then(|proc| proc.maps.get_mut(&id))
                        .unwrap_or_else(|| {
                            panic!("vm: page {:#x} refers to missing mapping", vpage.as_usize())
                        });
                    if let Err(err) = map.write_back_page(vpage, &buf) {
                        panic!("vm: write-back failed during eviction: {}", err);
                    }
                }
                // Clean file pages are dropped; the next fault re-reads the
                // file.
                log::debug!(
                    "vm: pid {}: evicted mapped page {:#x} (dirty: {})",
                    vpid,
                    vpage.as_usize(),
                    dirty
                );
            }
        }
        addr
    }

    /// Maps the given file at `addr` for process `pid` and returns the
    /// mapping id.
    ///
    /// The file is reopened privately, so the mapping keeps its own handle
    /// alive after the caller closes the original. One lazy page record is
    /// created per page of the file's length, including a short final page.
    pub fn create_mapping(
        &self,
        pid: Pid,
        file: &dyn FileHandle,
        addr: usize,
        writable: bool,
    ) -> Result<MapId> {
        if addr == 0 {
            return Err(error::invalid_argument("cannot map page zero"));
        }
        if addr % PAGE_SIZE != 0 {
            return Err(error::invalid_argument("mapping address not page-aligned"));
        }
        let len = file.length();
        if len == 0 {
            return Err(error::invalid_argument("cannot map an empty file"));
        }
        let page_count = len.div_ceil(PAGE_SIZE);
        let end = match addr.checked_add(page_count * PAGE_SIZE) {
            Some(end) => end,
            None => return Err(error::invalid_argument("mapping wraps the address space")),
        };
        if end > STACK_LOW_BOUND {
            return Err(error::invalid_argument("mapping overlaps the stack region"));
        }

        let procs = &mut *self.procs.lock();
        let proc = procs.entry(pid).or_default();
        for i in 0..page_count {
            if proc.pages.find(VirtAddr::new(addr + i * PAGE_SIZE)).is_some() {
                return Err(error::invalid_argument("mapping overlaps existing pages"));
            }
        }

        let private = file.reopen()?;
        let id = MapId(self.next_map_id.fetch_add(1, Ordering::Relaxed));
        let map = MemoryMap::new(id, VirtAddr::new(addr), len, private);
        for page in map.pages() {
            proc.pages
                .create_or_attach(pid, page, None, writable, Backing::Mapped(id));
        }
        proc.maps.insert(id, map);
        log::info!(
            "vm: pid {}: mapped {} bytes at {:#x} as map {}",
            pid,
            len,
            addr,
            id.0
        );
        Ok(id)
    }

    /// Releases mapping `id`: writes back dirty resident pages, frees
    /// frames and swap slots, destroys the page records, clears hardware
    /// mappings, and closes the private handle.
    ///
    /// Fails with `NotFound` for an unknown id, and with `InvalidState`
    /// when a constituent page record is missing; in the latter case the
    /// caller must not assume the file on disk is consistent.
    pub fn release_mapping(&self, pid: Pid, id: MapId) -> Result<()> {
        let procs = &mut *self.procs.lock();
        self.release_mapping_locked(procs, pid, id)
    }

    fn release_mapping_locked(
        &self,
        procs: &mut HashMap<Pid, ProcessVm>,
        pid: Pid,
        id: MapId,
    ) -> Result<()> {
        let proc = procs
            .get_mut(&pid)
            .ok_or_else(|| error::not_found("process has no mappings"))?;
        let mut map = proc
            .maps
            .remove(&id)
            .ok_or_else(|| error::not_found("unknown mapping id"))?;

        let pages: Vec<VirtAddr> = map.pages().collect();
        for page in pages {
            let Some(record) = proc.pages.remove(page) else {
                return Err(error::invalid_state("mapping page record missing"));
            };
            match record.residency {
                Residency::Resident { frame } => {
                    if self.pagedir.lock().is_dirty(pid, page) {
                        let mut buf: PageBuf = [0; PAGE_SIZE];
                        self.phys.lock().read_page(frame, &mut buf);
                        map.write_back_page(page, &buf)?;
                    }
                    self.pagedir.lock().unmap(pid, page);
                    if self.frames.release(frame) {
                        self.phys.lock().free_page(frame);
                    }
                }
                Residency::Swapped { slot } => {
                    self.swap.release_slot(slot);
                }
                Residency::Unbacked => {}
            }
        }
        log::info!("vm: pid {}: released map {}", pid, id.0);
        Ok(())
    }

    /// Releases every mapping and page record owned by an exiting process,
    /// returning all frames and swap slots they held. Called only by the
    /// process-exit path, after the process has stopped fielding faults.
    pub fn release_process(&self, pid: Pid) {
        let procs = &mut *self.procs.lock();
        let map_ids: Vec<MapId> = match procs.get(&pid) {
            Some(proc) => proc.maps.keys().copied().collect(),
            None => return,
        };
        for id in map_ids {
            if let Err(err) = self.release_mapping_locked(procs, pid, id) {
                log::warn!("vm: pid {}: releasing map {} on exit: {}", pid, id.0, err);
            }
        }

        let Some(mut proc) = procs.remove(&pid) else {
            return;
        };
        let pages: Vec<VirtAddr> = proc.pages.page_addrs().collect();
        for page in pages {
            let Some(record) = proc.pages.remove(page) else {
                continue;
            };
            match record.residency {
                Residency::Resident { frame } => {
                    self.pagedir.lock().unmap(pid, page);
                    if self.frames.release(frame) {
                        self.phys.lock().free_page(frame);
                    }
                }
                Residency::Swapped { slot } => {
                    self.swap.release_slot(slot);
                }
                Residency::Unbacked => {}
            }
        }
        log::info!("vm: pid {}: released", pid);
    }

    /// Number of registered frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total slots in the swap store.
    pub fn swap_slot_count(&self) -> usize {
        self.swap.slot_count()
    }

    /// Free slots in the swap store.
    pub fn free_swap_slots(&self) -> usize {
        self.swap.free_slots()
    }

    /// Residency of the page containing `addr`, if a record exists.
    pub fn residency(&self, pid: Pid, addr: usize) -> Option<Residency> {
        self.procs
            .lock()
            .get(&pid)
            .and_then(|proc| proc.pages.find(VirtAddr::new(addr)))
            .map(|record| record.residency)
    }

    /// Snapshot of the record for the page containing `addr`, if any.
    pub fn page_record(&self, pid: Pid, addr: usize) -> Option<PageRecord> {
        self.procs
            .lock()
            .get(&pid)
            .and_then(|proc| proc.pages.find(VirtAddr::new(addr)))
            .cloned()
    }
}
