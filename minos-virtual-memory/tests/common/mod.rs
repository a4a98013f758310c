//! Shared test fixtures
//!
//! In-memory implementations of the platform traits: a fixed pool of
//! physical frames, a software MMU with dirty bits, a byte-vector block
//! device, and a shared-inode file. Each is a cheap `Clone` over shared
//! state so tests can keep a handle while the manager owns the boxed trait
//! object.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use minos_api::addr::{PAGE_SIZE, PhysAddr, SECTOR_SIZE, VirtAddr, page_round_down};
use minos_api::error::Result;
use minos_api::platform::{
    AllocFlags, BlockDevice, FileHandle, PageBuf, PageDirectory, PhysMemory, Pid, Sector,
};

/// Simulated physical memory: a fixed pool of frames with inspectable bytes.
#[derive(Clone)]
pub struct SimPhysMemory {
    inner: Arc<Mutex<PhysInner>>,
}

struct PhysInner {
    free: Vec<PhysAddr>,
    pages: HashMap<PhysAddr, Box<PageBuf>>,
}

impl SimPhysMemory {
    pub fn new(frames: usize) -> Self {
        let free = (0..frames)
            .rev()
            .map(|i| PhysAddr::new(0x10_0000 + i * PAGE_SIZE))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(PhysInner {
                free,
                pages: HashMap::new(),
            })),
        }
    }

    pub fn frames_in_use(&self) -> usize {
        self.inner.lock().unwrap().pages.len()
    }

    /// Writes bytes into an allocated frame at the given offset.
    pub fn poke(&self, frame: PhysAddr, offset: usize, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let page = inner.pages.get_mut(&frame).expect("poke of unallocated frame");
        page[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Reads bytes from an allocated frame at the given offset.
    pub fn peek(&self, frame: PhysAddr, offset: usize, len: usize) -> Vec<u8> {
        let inner = self.inner.lock().unwrap();
        let page = inner.pages.get(&frame).expect("peek of unallocated frame");
        page[offset..offset + len].to_vec()
    }
}

impl PhysMemory for SimPhysMemory {
    fn alloc_page(&mut self, flags: AllocFlags) -> Option<PhysAddr> {
        let mut inner = self.inner.lock().unwrap();
        let addr = inner.free.pop()?;
        // Non-zeroed pages start with junk so missing-zeroing bugs show up.
        let fill = if flags.contains(AllocFlags::ZERO) { 0 } else { 0xa5 };
        inner.pages.insert(addr, Box::new([fill; PAGE_SIZE]));
        Some(addr)
    }

    fn free_page(&mut self, frame: PhysAddr) {
        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.pages.remove(&frame).is_some(),
            "double free of frame {:#x}",
            frame.as_usize()
        );
        inner.free.push(frame);
    }

    fn read_page(&self, frame: PhysAddr, buf: &mut PageBuf) {
        let inner = self.inner.lock().unwrap();
        let page = inner.pages.get(&frame).expect("read of unallocated frame");
        buf.copy_from_slice(&page[..]);
    }

    fn write_page(&mut self, frame: PhysAddr, buf: &PageBuf) {
        let mut inner = self.inner.lock().unwrap();
        let page = inner.pages.get_mut(&frame).expect("write to unallocated frame");
        page.copy_from_slice(buf);
    }
}

struct Mapping {
    frame: PhysAddr,
    #[allow(dead_code)]
    writable: bool,
    dirty: bool,
}

/// Simulated MMU: per-process virtual-to-physical mappings with dirty bits.
#[derive(Clone)]
pub struct SimPageDirectory {
    inner: Arc<Mutex<HashMap<(Pid, VirtAddr), Mapping>>>,
}

impl SimPageDirectory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn translate(&self, pid: Pid, page: VirtAddr) -> Option<PhysAddr> {
        self.inner.lock().unwrap().get(&(pid, page)).map(|m| m.frame)
    }

    pub fn set_dirty(&self, pid: Pid, page: VirtAddr) {
        self.inner
            .lock()
            .unwrap()
            .get_mut(&(pid, page))
            .expect("set_dirty on unmapped page")
            .dirty = true;
    }

    pub fn mapping_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl PageDirectory for SimPageDirectory {
    fn map(&mut self, pid: Pid, page: VirtAddr, frame: PhysAddr, writable: bool) -> bool {
        self.inner.lock().unwrap().insert(
            (pid, page),
            Mapping {
                frame,
                writable,
                dirty: false,
            },
        );
        true
    }

    fn unmap(&mut self, pid: Pid, page: VirtAddr) {
        self.inner.lock().unwrap().remove(&(pid, page));
    }

    fn is_dirty(&self, pid: Pid, page: VirtAddr) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(&(pid, page))
            .is_some_and(|m| m.dirty)
    }
}

/// Simulated swap device over a byte vector.
#[derive(Clone)]
pub struct SimBlockDevice {
    data: Arc<Mutex<Vec<u8>>>,
}

impl SimBlockDevice {
    pub fn new(sectors: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; sectors * SECTOR_SIZE])),
        }
    }
}

impl BlockDevice for SimBlockDevice {
    fn sector_count(&self) -> usize {
        self.data.lock().unwrap().len() / SECTOR_SIZE
    }

    fn read_sector(&mut self, sector: usize, buf: &mut Sector) {
        let data = self.data.lock().unwrap();
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
    }

    fn write_sector(&mut self, sector: usize, buf: &Sector) {
        let mut data = self.data.lock().unwrap();
        let start = sector * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
    }
}

struct FileInner {
    data: Vec<u8>,
    writes: usize,
}

/// Simulated inode: reopened handles share bytes, and writes are counted so
/// tests can assert that no write-back happened.
#[derive(Clone)]
pub struct SimFile {
    inner: Arc<Mutex<FileInner>>,
}

impl SimFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FileInner { data, writes: 0 })),
        }
    }

    /// A file of `len` bytes filled with the pattern `i % 251`.
    pub fn with_pattern(len: usize) -> Self {
        Self::new((0..len).map(|i| (i % 251) as u8).collect())
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.inner.lock().unwrap().data.clone()
    }

    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }
}

impl FileHandle for SimFile {
    fn length(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    fn read_at(&mut self, buf: &mut [u8], offset: usize) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        let end = usize::min(offset + buf.len(), inner.data.len());
        let n = end.saturating_sub(offset);
        buf[..n].copy_from_slice(&inner.data[offset..end]);
        Ok(n)
    }

    fn write_at(&mut self, buf: &[u8], offset: usize) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        let end = offset + buf.len();
        if end > inner.data.len() {
            inner.data.resize(end, 0);
        }
        inner.data[offset..end].copy_from_slice(buf);
        inner.writes += 1;
        Ok(buf.len())
    }

    fn reopen(&self) -> Result<Box<dyn FileHandle>> {
        Ok(Box::new(self.clone()))
    }
}

/// Stores bytes at a mapped user address, the way a user-mode write through
/// the MMU would: translates the page and sets its hardware dirty bit.
pub fn user_write(
    phys: &SimPhysMemory,
    pagedir: &SimPageDirectory,
    pid: Pid,
    addr: usize,
    bytes: &[u8],
) {
    let page = VirtAddr::new(page_round_down(addr));
    let frame = pagedir.translate(pid, page).expect("user_write to unmapped page");
    phys.poke(frame, addr - page.as_usize(), bytes);
    pagedir.set_dirty(pid, page);
}

/// Loads bytes from a mapped user address through the simulated MMU.
pub fn user_read(
    phys: &SimPhysMemory,
    pagedir: &SimPageDirectory,
    pid: Pid,
    addr: usize,
    len: usize,
) -> Vec<u8> {
    let page = VirtAddr::new(page_round_down(addr));
    let frame = pagedir.translate(pid, page).expect("user_read of unmapped page");
    phys.peek(frame, addr - page.as_usize(), len)
}
