//! Swap space.
//!
//! Anonymous pages have no file to return to when their frame is reclaimed,
//! so their contents are parked in a *swap slot*: a page-sized run of sectors
//! on a block device set aside for that purpose. [`SwapTable`] tracks which
//! slots are in use and moves pages between frames and slots.
//!
//! The table is not internally synchronized. The frame table owns the swap
//! store and only touches it while holding its own lock, so slot allocation,
//! slot release and slot I/O are serialized together with eviction.
use crate::{KernelError, addressing::PAGE_SIZE, sync::SpinLock};
use alloc::{sync::Arc, vec, vec::Vec};

/// Size of a disk sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Number of sectors that make up one swap slot.
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

/// A sector, a minimal unit of a block device.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct Sector(pub usize);

impl Sector {
    /// Get offset that represented by the sector.
    #[inline]
    pub fn into_offset(self) -> usize {
        self.0 * SECTOR_SIZE
    }

    /// Cast into usize.
    #[inline]
    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl core::ops::Add<usize> for Sector {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

/// A device that reads and writes whole sectors.
pub trait BlockDevice
where
    Self: Send,
{
    /// Number of sectors of the device.
    fn sector_count(&self) -> usize;

    /// Read 512 bytes from disk starting from sector.
    fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), KernelError>;

    /// Write 512 bytes to disk starting from sector.
    fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), KernelError>;
}

/// The type for disk hooking.
///
/// A hook is invoked before every sector access with the sector and whether
/// the access is a write. Returning an error fails the access.
pub type Hook = Arc<dyn Fn(Sector, bool) -> Result<(), KernelError> + Send + Sync + 'static>;

/// A block device backed by memory.
pub struct MemDisk {
    sectors: SpinLock<Vec<[u8; SECTOR_SIZE]>>,
    hook: Option<Hook>,
}

impl MemDisk {
    /// Create a zeroed disk of `sectors` sectors.
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: SpinLock::new(vec![[0; SECTOR_SIZE]; sectors]),
            hook: None,
        }
    }

    /// Create a zeroed disk that holds exactly `slots` swap slots.
    pub fn with_slots(slots: usize) -> Self {
        Self::new(slots * SECTORS_PER_SLOT)
    }

    /// Add a hook for the disk.
    pub fn hook(self, hook: Hook) -> Self {
        Self {
            sectors: self.sectors,
            hook: Some(hook),
        }
    }
}

impl BlockDevice for MemDisk {
    fn sector_count(&self) -> usize {
        let sectors = self.sectors.lock();
        let count = sectors.len();
        sectors.unlock();
        count
    }

    fn read(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        if let Some(hook) = self.hook.as_ref() {
            hook(sector, false)?;
        }
        let sectors = self.sectors.lock();
        let result = match sectors.get(sector.into_usize()) {
            Some(data) => {
                buf.copy_from_slice(data);
                Ok(())
            }
            None => Err(KernelError::IOError),
        };
        sectors.unlock();
        result
    }

    fn write(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        if let Some(hook) = self.hook.as_ref() {
            hook(sector, true)?;
        }
        let mut sectors = self.sectors.lock();
        let result = match sectors.get_mut(sector.into_usize()) {
            Some(data) => {
                data.copy_from_slice(buf);
                Ok(())
            }
            None => Err(KernelError::IOError),
        };
        sectors.unlock();
        result
    }
}

/// Index of a page-sized slot in swap space.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Index of the slot.
    pub fn index(&self) -> usize {
        self.0
    }

    /// First sector of the slot.
    pub fn sector(&self) -> Sector {
        Sector(self.0 * SECTORS_PER_SLOT)
    }
}

/// Page-granular storage for evicted anonymous pages.
pub trait SwapStore
where
    Self: Send,
{
    /// Reserve a free slot.
    ///
    /// # Errors
    /// - [`KernelError::NoSpace`] if every slot is in use.
    fn alloc_slot(&mut self) -> Result<SwapSlot, KernelError>;

    /// Write one page of data to `slot`.
    fn write_slot(&mut self, slot: SwapSlot, page: &[u8]) -> Result<(), KernelError>;

    /// Read `slot` into one page of `page`.
    fn read_slot(&mut self, slot: SwapSlot, page: &mut [u8]) -> Result<(), KernelError>;

    /// Return `slot` to the free set.
    fn free_slot(&mut self, slot: SwapSlot);

    /// Number of slots not in use.
    fn free_slots(&self) -> usize;
}

/// Slot table over a block device.
///
/// Slot `n` occupies sectors `8n..8n+8` of the device.
pub struct SwapTable<D: BlockDevice> {
    disk: D,
    // 1: used, 0: free
    used: Vec<u64>,
    slots: usize,
    free: usize,
}

impl<D: BlockDevice> SwapTable<D> {
    /// Create a slot table covering every whole slot of `disk`.
    pub fn new(disk: D) -> Self {
        let slots = disk.sector_count() / SECTORS_PER_SLOT;
        Self {
            disk,
            used: vec![0; slots.div_ceil(64)],
            slots,
            free: slots,
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots
    }

    fn is_used(&self, slot: SwapSlot) -> bool {
        let (pos, ofs) = (slot.0 / 64, slot.0 % 64);
        self.used[pos] & (1 << ofs) != 0
    }
}

impl<D: BlockDevice> SwapStore for SwapTable<D> {
    fn alloc_slot(&mut self) -> Result<SwapSlot, KernelError> {
        let pos = self
            .used
            .iter()
            .position(|qword| *qword != u64::MAX)
            .ok_or(KernelError::NoSpace)?;
        let index = pos * 64 + self.used[pos].trailing_ones() as usize;
        if index >= self.slots {
            return Err(KernelError::NoSpace);
        }
        self.used[pos] |= 1 << (index % 64);
        self.free -= 1;
        Ok(SwapSlot(index))
    }

    fn write_slot(&mut self, slot: SwapSlot, page: &[u8]) -> Result<(), KernelError> {
        if page.len() != PAGE_SIZE || !self.is_used(slot) {
            return Err(KernelError::InvalidArgument);
        }
        let mut sector = [0; SECTOR_SIZE];
        for (i, chunk) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            sector.copy_from_slice(chunk);
            self.disk.write(slot.sector() + i, &sector)?;
        }
        Ok(())
    }

    fn read_slot(&mut self, slot: SwapSlot, page: &mut [u8]) -> Result<(), KernelError> {
        if page.len() != PAGE_SIZE || !self.is_used(slot) {
            return Err(KernelError::InvalidArgument);
        }
        let mut sector = [0; SECTOR_SIZE];
        for (i, chunk) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.disk.read(slot.sector() + i, &mut sector)?;
            chunk.copy_from_slice(&sector);
        }
        Ok(())
    }

    fn free_slot(&mut self, slot: SwapSlot) {
        debug_assert!(self.is_used(slot), "{slot:?} is not in use");
        if !self.is_used(slot) {
            return;
        }
        let (pos, ofs) = (slot.0 / 64, slot.0 % 64);
        self.used[pos] &= !(1 << ofs);
        self.free += 1;
    }

    fn free_slots(&self) -> usize {
        self.free
    }
}
