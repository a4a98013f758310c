//! Swap store
//!
//! A fixed-size array of page-sized slots on a block device, tracked by a
//! bitmap. Slot `i` occupies sectors `[i * SECTORS_PER_PAGE,
//! (i + 1) * SECTORS_PER_PAGE)`. The bitmap lives only in memory; swapped
//! data does not survive a reboot.
//!
//! A single lock covers bitmap mutation and the accompanying device I/O so
//! two concurrent evictions cannot race for the same slot, and a slot is
//! never read while being written.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use minos_api::addr::{SECTOR_SIZE, SECTORS_PER_PAGE};
use minos_api::platform::{BlockDevice, PageBuf, Sector};

/// Index of one page-sized slot in the swap area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

impl SlotId {
    /// First device sector of this slot.
    pub const fn start_sector(self) -> usize {
        self.0 * SECTORS_PER_PAGE
    }
}

/// Occupancy bitmap with a first-fit scan, one bit per slot.
struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    fn test(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    fn clear(&mut self, bit: usize) {
        self.words[bit / 64] &= !(1 << (bit % 64));
    }

    fn first_clear(&self) -> Option<usize> {
        (0..self.len).find(|&bit| !self.test(bit))
    }

    fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

struct SwapInner {
    device: Box<dyn BlockDevice>,
    bitmap: Bitmap,
}

/// Page-granular storage on the swap device. Pure storage, no policy.
pub struct SwapStore {
    inner: Mutex<SwapInner>,
    slots: usize,
}

impl SwapStore {
    /// Creates a swap store covering the whole device, all slots free.
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let slots = device.sector_count() / SECTORS_PER_PAGE;
        log::info!(
            "swap: {} slots over {} sectors",
            slots,
            device.sector_count()
        );
        Self {
            inner: Mutex::new(SwapInner {
                device,
                bitmap: Bitmap::new(slots),
            }),
            slots,
        }
    }

    /// Total number of slots on the device.
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Number of currently free slots.
    pub fn free_slots(&self) -> usize {
        self.slots - self.inner.lock().bitmap.count_set()
    }

    /// Writes one page to the first free slot and returns its locator.
    ///
    /// # Panics
    ///
    /// Panics when every slot is occupied. There is no secondary backing
    /// store, so swap exhaustion is unrecoverable.
    pub fn write_page(&self, page: &PageBuf) -> SlotId {
        let inner = &mut *self.inner.lock();
        let Some(slot) = inner.bitmap.first_clear() else {
            panic!("swap: out of swap slots");
        };
        inner.bitmap.set(slot);
        let slot = SlotId(slot);
        let mut sector_buf: Sector = [0; SECTOR_SIZE];
        for i in 0..SECTORS_PER_PAGE {
            sector_buf.copy_from_slice(&page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            inner.device.write_sector(slot.start_sector() + i, &sector_buf);
        }
        log::debug!("swap: wrote page to slot {}", slot.0);
        slot
    }

    /// Reads the page stored in `slot` into `dest` and frees the slot.
    ///
    /// The slot is freed as part of the read: once the page is resident
    /// again its swap copy is stale.
    ///
    /// # Panics
    ///
    /// Panics when `slot` is out of range or not occupied; either means the
    /// frame/page/swap bookkeeping has already been corrupted.
    pub fn read_page(&self, slot: SlotId, dest: &mut PageBuf) {
        let inner = &mut *self.inner.lock();
        assert!(slot.0 < self.slots, "swap: slot {} out of range", slot.0);
        assert!(
            inner.bitmap.test(slot.0),
            "swap: reading unoccupied slot {}",
            slot.0
        );
        inner.bitmap.clear(slot.0);
        let mut sector_buf: Sector = [0; SECTOR_SIZE];
        for i in 0..SECTORS_PER_PAGE {
            inner.device.read_sector(slot.start_sector() + i, &mut sector_buf);
            dest[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sector_buf);
        }
        log::debug!("swap: read page from slot {}", slot.0);
    }

    /// Frees `slot` without reading it, for pages destroyed while swapped.
    ///
    /// Returns `false` if the slot was already free.
    pub fn release_slot(&self, slot: SlotId) -> bool {
        if slot.0 >= self.slots {
            return false;
        }
        let inner = &mut *self.inner.lock();
        if !inner.bitmap.test(slot.0) {
            return false;
        }
        inner.bitmap.clear(slot.0);
        log::debug!("swap: released slot {}", slot.0);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minos_api::addr::PAGE_SIZE;

    /// Block device over a plain byte vector.
    struct MemDevice {
        data: Vec<u8>,
    }

    impl MemDevice {
        fn new(sectors: usize) -> Self {
            Self {
                data: vec![0; sectors * SECTOR_SIZE],
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn sector_count(&self) -> usize {
            self.data.len() / SECTOR_SIZE
        }

        fn read_sector(&mut self, sector: usize, buf: &mut Sector) {
            let start = sector * SECTOR_SIZE;
            buf.copy_from_slice(&self.data[start..start + SECTOR_SIZE]);
        }

        fn write_sector(&mut self, sector: usize, buf: &Sector) {
            let start = sector * SECTOR_SIZE;
            self.data[start..start + SECTOR_SIZE].copy_from_slice(buf);
        }
    }

    fn store_with_slots(slots: usize) -> SwapStore {
        SwapStore::new(Box::new(MemDevice::new(slots * SECTORS_PER_PAGE)))
    }

    #[test]
    fn test_bitmap_first_fit() {
        let mut bitmap = Bitmap::new(130);
        assert_eq!(bitmap.first_clear(), Some(0));
        bitmap.set(0);
        bitmap.set(1);
        assert_eq!(bitmap.first_clear(), Some(2));
        bitmap.clear(0);
        assert_eq!(bitmap.first_clear(), Some(0));
        assert_eq!(bitmap.count_set(), 1);
    }

    #[test]
    fn test_write_read_round_trip() {
        let store = store_with_slots(4);
        let mut page: PageBuf = [0; PAGE_SIZE];
        for (i, byte) in page.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let slot = store.write_page(&page);
        assert_eq!(store.free_slots(), 3);

        let mut dest: PageBuf = [0; PAGE_SIZE];
        store.read_page(slot, &mut dest);
        assert_eq!(page.as_slice(), dest.as_slice());
        // Read frees the slot.
        assert_eq!(store.free_slots(), 4);
    }

    #[test]
    fn test_slots_return_to_all_free() {
        let store = store_with_slots(8);
        let pages: Vec<PageBuf> = (0..5u8).map(|n| [n; PAGE_SIZE]).collect();
        let slots: Vec<SlotId> = pages.iter().map(|p| store.write_page(p)).collect();
        assert_eq!(store.free_slots(), 3);

        let mut dest: PageBuf = [0; PAGE_SIZE];
        for (page, slot) in pages.iter().zip(slots) {
            store.read_page(slot, &mut dest);
            assert_eq!(page.as_slice(), dest.as_slice());
        }
        assert_eq!(store.free_slots(), store.slot_count());
    }

    #[test]
    fn test_release_slot_twice_reports_not_found() {
        let store = store_with_slots(2);
        let slot = store.write_page(&[7; PAGE_SIZE]);
        assert!(store.release_slot(slot));
        assert!(!store.release_slot(slot));
        assert!(!store.release_slot(SlotId(99)));
    }

    #[test]
    #[should_panic(expected = "unoccupied slot")]
    fn test_read_free_slot_panics() {
        let store = store_with_slots(2);
        let mut dest: PageBuf = [0; PAGE_SIZE];
        store.read_page(SlotId(0), &mut dest);
    }

    #[test]
    #[should_panic(expected = "out of swap slots")]
    fn test_exhaustion_panics() {
        let store = store_with_slots(1);
        store.write_page(&[0; PAGE_SIZE]);
        store.write_page(&[1; PAGE_SIZE]);
    }
}
