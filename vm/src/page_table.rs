//! Four-level page table of a user address space.
//!
//! The page table is the hardware-visible half of an address space: it maps a
//! user page to the physical frame currently holding its contents. Everything
//! else about the page (where its contents come from, whether it may grow, where
//! it goes on eviction) lives in the supplemental page table.
//!
//! The table follows the x86_64 layout:
//!
//! ```text
//! 63          48 47            39 38            30 29            21 20            12 11                         0
//! +-------------+----------------+----------------+----------------+----------------+----------------------------+
//! | Sign Extend |    Page-Map    | Page-Directory | Page-directory |      Page      |         Page Offset        |
//! |             | Level-4 Offset |  Pointer Index |     Index      |   Table Index  |                            |
//! +-------------+----------------+----------------+----------------+----------------+----------------------------+
//! ```
//!
//! Intermediate levels are allocated on first use and are owned by the level
//! above them, so dropping a [`PageTable`] frees the whole tree. Leaf entries
//! are [`Pte`]s, whose accessed and dirty bits are maintained by
//! [`PageTable::translate`], the software counterpart of the MMU's walk.
//!
//! Only the lower (user) half of the address space can be mapped. Indices at
//! or above [`PageTable::KBASE`] belong to the kernel.
use alloc::boxed::Box;
use core::ops::Deref;
use pagos::{
    addressing::{Pa, Va},
    interrupt::PFErrorCode,
    mm::page_table::{PageTableMappingError, Permission, Pte, PteFlags},
};

/// Represents page table indices for a given virtual address (VA).
///
/// In the x86_64 architecture, virtual addresses are translated to physical
/// addresses using a 4-level paging hierarchy. This struct holds the index of
/// each level for a page-aligned virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtIndices {
    /// The virtual address (VA) associated with this page table index.
    pub va: Va,

    /// Page-Map Level-4 Table Index (PML4EI).
    pub pml4ei: usize,

    /// Page-Directory-Pointer Table Index (PDPTEI).
    pub pdptei: usize,

    /// Page-Directory Table Index (PDEI).
    pub pdei: usize,

    /// Page Table Entry Index (PTEI).
    pub ptei: usize,
}

impl PtIndices {
    /// Extracts page table indices from a given virtual address ([`Va`]).
    ///
    /// # Returns
    /// - `Ok(Self)`: If `va` is page-aligned.
    /// - `Err(PageTableMappingError::Unaligned)`: If `va` is not page-aligned.
    pub fn from_va(va: Va) -> Result<Self, PageTableMappingError> {
        if va.is_page_aligned() {
            let va_raw = va.into_usize();
            Ok(Self {
                va,
                pml4ei: (va_raw >> 39) & 0x1ff,
                pdptei: (va_raw >> 30) & 0x1ff,
                pdei: (va_raw >> 21) & 0x1ff,
                ptei: (va_raw >> 12) & 0x1ff,
            })
        } else {
            Err(PageTableMappingError::Unaligned)
        }
    }
}

// A mid-level table. Each slot owns the next level, if present.
struct Level<T>([Option<Box<T>>; 512]);

impl<T: Default> Level<T> {
    fn get(&self, index: usize) -> Option<&T> {
        self.0[index].as_deref()
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.0[index].as_deref_mut()
    }

    fn get_or_insert(&mut self, index: usize) -> &mut T {
        self.0[index].get_or_insert_with(Box::default)
    }
}

impl<T> Default for Level<T> {
    fn default() -> Self {
        Self(core::array::from_fn(|_| None))
    }
}

// The last level, holding the entries themselves.
struct Leaf([Pte; 512]);

impl Default for Leaf {
    fn default() -> Self {
        Self([Pte(0); 512])
    }
}

type Pd = Level<Leaf>;
type Pdp = Level<Pd>;
type Pml4 = Level<Pdp>;

/// Page Table Structure for x86_64 Architecture.
///
/// The [`PageTable`] maps page-aligned user virtual addresses to physical
/// frames and records, for each mapping, whether it is writable and whether it
/// has been accessed or written since the bits were last cleared.
///
/// The page table never owns the frames it points to. Frames are owned by the
/// frame table; unmapping an address only returns the physical address that
/// was mapped.
pub struct PageTable {
    root: Box<Pml4>,
    mapped: usize,
}

impl PageTable {
    /// The first level-4 index of the kernel half of the address space.
    pub const KBASE: usize = 256;

    /// Create an empty page table.
    pub fn new() -> Self {
        Self {
            root: Box::default(),
            mapped: 0,
        }
    }

    /// Number of present mappings.
    pub fn mapped(&self) -> usize {
        self.mapped
    }

    /// Maps a physical address (`pa`) to a virtual address (`va`) with the
    /// specified permissions.
    ///
    /// # Returns
    /// - `Ok(())`: If the mapping is successfully created.
    /// - `Err(PageTableMappingError::Unaligned)`: If `va` or `pa` is not
    ///   page-aligned.
    /// - `Err(PageTableMappingError::InvalidPermission)`: If `va` belongs to
    ///   the kernel half or `perm` lacks [`Permission::READ`].
    /// - `Err(PageTableMappingError::Duplicated)`: If `va` is already mapped.
    pub fn map(&mut self, va: Va, pa: Pa, perm: Permission) -> Result<(), PageTableMappingError> {
        let indices = PtIndices::from_va(va)?;
        if indices.pml4ei >= Self::KBASE || !perm.contains(Permission::READ) {
            return Err(PageTableMappingError::InvalidPermission);
        }
        if pa.offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        let pte = &mut self
            .root
            .get_or_insert(indices.pml4ei)
            .get_or_insert(indices.pdptei)
            .get_or_insert(indices.pdei)
            .0[indices.ptei];
        Walked { pte }.set_pa(pa, PteFlags::from(perm))?;
        self.mapped += 1;
        Ok(())
    }

    /// Unmaps a virtual address (`va`), returning the physical address that
    /// was mapped to it.
    ///
    /// # Returns
    /// - `Ok(Pa)`: If the address was mapped.
    /// - `Err(PageTableMappingError::Unaligned)`: If `va` is not page-aligned.
    /// - `Err(PageTableMappingError::NotExist)`: If `va` is not mapped.
    pub fn unmap(&mut self, va: Va) -> Result<Pa, PageTableMappingError> {
        let pa = self
            .walk_mut(va)?
            .clear()
            .ok_or(PageTableMappingError::NotExist)?;
        self.mapped -= 1;
        Ok(pa)
    }

    /// Walks through the page table to find the present entry of `va`.
    pub fn walk(&self, va: Va) -> Result<&Pte, PageTableMappingError> {
        let indices = PtIndices::from_va(va)?;
        self.root
            .get(indices.pml4ei)
            .and_then(|pdp| pdp.get(indices.pdptei))
            .and_then(|pd| pd.get(indices.pdei))
            .map(|pt| &pt.0[indices.ptei])
            .filter(|pte| pte.flags().contains(PteFlags::P))
            .ok_or(PageTableMappingError::NotExist)
    }

    /// Walks through the page table to find the present entry of `va`, for
    /// modification.
    pub fn walk_mut(&mut self, va: Va) -> Result<Walked<'_>, PageTableMappingError> {
        let indices = PtIndices::from_va(va)?;
        self.root
            .get_mut(indices.pml4ei)
            .and_then(|pdp| pdp.get_mut(indices.pdptei))
            .and_then(|pd| pd.get_mut(indices.pdei))
            .map(|pt| &mut pt.0[indices.ptei])
            .filter(|pte| pte.flags().contains(PteFlags::P))
            .map(|pte| Walked { pte })
            .ok_or(PageTableMappingError::NotExist)
    }

    /// Returns `true` if `va` is mapped.
    pub fn is_present(&self, va: Va) -> bool {
        self.walk(va).is_ok()
    }

    /// Returns `true` if the mapping of `va` was accessed since its accessed
    /// bit was last cleared.
    pub fn is_accessed(&self, va: Va) -> bool {
        self.walk(va)
            .is_ok_and(|pte| pte.flags().contains(PteFlags::A))
    }

    /// Clears the accessed bit of the mapping of `va`.
    pub fn clear_accessed(&mut self, va: Va) {
        if let Ok(mut walked) = self.walk_mut(va) {
            walked.update_flags(PteFlags::A, false);
        }
    }

    /// Returns `true` if the mapping of `va` was written since it was
    /// installed.
    pub fn is_dirty(&self, va: Va) -> bool {
        self.walk(va)
            .is_ok_and(|pte| pte.flags().contains(PteFlags::D))
    }

    /// Sets or clears the dirty bit of the mapping of `va`.
    pub fn set_dirty(&mut self, va: Va, dirty: bool) {
        if let Ok(mut walked) = self.walk_mut(va) {
            walked.update_flags(PteFlags::D, dirty);
        }
    }

    /// Translates `va` the way the MMU does for an access of the given kind.
    ///
    /// On success, the accessed bit (and, for a write, the dirty bit) of the
    /// mapping is set and the physical address of the byte is returned. On
    /// failure, the error code of the page fault that the access raises is
    /// returned.
    pub fn translate(&mut self, va: Va, is_write: bool, is_user: bool) -> Result<Pa, PFErrorCode> {
        let mut ec = PFErrorCode::empty();
        if is_write {
            ec |= PFErrorCode::WRITE_ACCESS;
        }
        if is_user {
            ec |= PFErrorCode::USER;
        }
        if !va.is_user() {
            return Err(ec);
        }
        let mut walked = self.walk_mut(va.page_down()).map_err(|_| ec)?;
        let flags = walked.flags();
        if (is_user && !flags.contains(PteFlags::US)) || (is_write && !flags.contains(PteFlags::RW))
        {
            return Err(ec | PFErrorCode::PRESENT);
        }
        walked.update_flags(PteFlags::A, true);
        if is_write {
            walked.update_flags(PteFlags::D, true);
        }
        walked
            .pa()
            .map(|pa| pa + va.offset())
            .ok_or(ec)
    }

    /// Removes every mapping.
    pub fn clear(&mut self) {
        self.root = Box::default();
        self.mapped = 0;
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutable reference to a page table entry (PTE) associated with a virtual
/// address.
pub struct Walked<'a> {
    pte: &'a mut Pte,
}

impl Walked<'_> {
    /// Clears the entry, returning the physical address it mapped.
    pub fn clear(&mut self) -> Option<Pa> {
        self.pte.clear()
    }

    /// Sets the physical address and flags of an empty entry.
    ///
    /// # Returns
    /// - `Err(PageTableMappingError::Duplicated)`: If the entry is already
    ///   present.
    pub fn set_pa(&mut self, pa: Pa, flags: PteFlags) -> Result<(), PageTableMappingError> {
        if self.pte.flags().contains(PteFlags::P) {
            Err(PageTableMappingError::Duplicated)
        } else {
            self.pte.set_pa(pa)?.set_flags(flags | PteFlags::P);
            Ok(())
        }
    }

    fn update_flags(&mut self, flag: PteFlags, on: bool) {
        let mut flags = self.pte.flags();
        flags.set(flag, on);
        self.pte.set_flags(flags);
    }
}

impl Deref for Walked<'_> {
    type Target = Pte;

    fn deref(&self) -> &Self::Target {
        self.pte
    }
}
