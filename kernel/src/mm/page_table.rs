//! Entries of Page Table and thier permissions.
use crate::addressing::Pa;

/// Page Table Entry (PTE).
///
/// This struct represents a Page Table Entry, the last level of the 4-level
/// page table system for x86_64 architecture. A page table entry holds the
/// physical address of a page frame and various control bits, such as flags
/// indicating whether the page is present, writable, or has been accessed.
///
/// The MMU sets [`PteFlags::A`] on every access through the entry and
/// [`PteFlags::D`] on every write; the clock eviction policy and dirty
/// write-back read these bits.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(pub usize);

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.pa() {
            Some(pa) => write!(f, "Pte({}, {:?})", pa, self.flags()),
            None => write!(f, "Pte(.)"),
        }
    }
}

impl Pte {
    /// Get the physical address pointed to by this entry.
    ///
    /// # Returns
    /// - `Some(Pa)` if the page is present, containing the physical address.
    /// - `None` if the page is not present (i.e., the "P" flag is not set).
    #[inline]
    pub const fn pa(&self) -> Option<Pa> {
        if self.flags().contains(PteFlags::P) {
            Pa::new(self.0 & !PteFlags::all().bits())
        } else {
            None
        }
    }

    /// Get the flags associated with this page table entry.
    #[inline]
    pub const fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    /// Set the physical address for this entry.
    ///
    /// This method updates the physical address of the entry, preserving the
    /// current flags, and marks the entry present.
    ///
    /// # Returns
    /// - `Ok(&mut Self)` if the address is valid and the update is successful.
    /// - `Err(PageTableMappingError::Unaligned)` if the provided physical
    ///   address is not aligned.
    #[inline]
    pub fn set_pa(&mut self, pa: Pa) -> Result<&mut Self, PageTableMappingError> {
        let pa = pa.into_usize();
        if pa & 0xfff != 0 {
            Err(PageTableMappingError::Unaligned)
        } else {
            self.0 = pa | self.flags().bits() | PteFlags::P.bits();
            Ok(self)
        }
    }

    /// Set the flags for this entry.
    ///
    /// The physical address remains unchanged.
    #[inline]
    pub fn set_flags(&mut self, perm: PteFlags) -> &mut Self {
        self.0 = self.pa().map(|n| n.into_usize()).unwrap_or(0) | perm.bits();
        self
    }

    /// Clears the entry.
    ///
    /// # Returns
    /// - `Some(Pa)`: The physical address that was previously stored in the
    ///   entry, if it existed.
    /// - `None`: If the entry did not contain a valid physical address.
    #[inline]
    pub fn clear(&mut self) -> Option<Pa> {
        self.pa().inspect(|_| {
            self.0 = 0;
        })
    }
}

bitflags::bitflags! {
    /// Flags for pte.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a 4-KByte page
        const P = 1 << 0;
        /// Read/write; if 0, writes may not be allowed to the 4-KByte page referenced by this entry
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses are not allowed to the 4-KByte page referenced by this entry
        const US = 1 << 2;
        /// Page-level write-through
        const PWT = 1 << 3;
        /// Page-level cache disable
        const PCD = 1 << 4;
        /// Accessed; indicates whether software has accessed the 4-KByte page referenced by this entry
        const A = 1 << 5;
        /// Dirty; indicates whether software has written to the 4-KByte page referenced by this entry
        const D = 1 << 6;
        /// Indirectly determines the memory type used to access the 4-KByte page referenced by this entry
        const PAT = 1 << 7;
        /// Global; if CR4.PGE = 1, determines whether the translation is global; ignored otherwise
        const G = 1 << 8;
        /// If IA32_EFER.NXE = 1, execute-disable
        const XD = 1 << 63;
    }
}

impl From<Permission> for PteFlags {
    fn from(perm: Permission) -> Self {
        let mut flags = PteFlags::P;
        if perm.contains(Permission::WRITE) {
            flags |= PteFlags::RW;
        }
        if perm.contains(Permission::USER) {
            flags |= PteFlags::US;
        }
        if !perm.contains(Permission::EXECUTABLE) {
            flags |= PteFlags::XD;
        }
        flags
    }
}

/// Page Table Mapping Error.
///
/// This enum represents errors that can occur when working with page table
/// mappings in the virtual memory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableMappingError {
    /// Unaligned address.
    ///
    /// This error is returned when an address provided for a page table entry
    /// is not a multiple of 4KB.
    Unaligned,

    /// Not exist.
    ///
    /// This error is returned when a requested page table entry does not exist
    /// or has not been mapped yet.
    NotExist,

    /// Duplicated mapping.
    ///
    /// This error is returned when an attempt is made to create a duplicate
    /// mapping for an address that already has an existing mapping.
    Duplicated,

    /// Invalid permission.
    ///
    /// This error is returned when an attempt is made to create a mapping with
    /// an invalid permission, or to map an address of the kernel half.
    InvalidPermission,
}

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    ///
    /// The [`Permission`] allows you to specify memory access permissions such as:
    /// - Whether a page is readable.
    /// - Whether a page is writable.
    /// - Whether a page is executable.
    /// - Whether a page can be accessed by user applications.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}
