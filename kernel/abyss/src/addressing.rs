//! Physical and Virtual Memory Addressing Schemes.
//!
//! This module provides the two address types the memory manager works with:
//! [`Va`] for a virtual address of a user address space and [`Pa`] for the
//! physical address of a page frame. Keeping them as distinct newtypes means a
//! frame address can never be handed to a function that expects a user
//! address, and vice versa.
//!
//! The canonical x86_64 address space is split in two halves. The lower half
//! (`0x0000_0000_0000_0000..0x0000_8000_0000_0000`) belongs to user programs,
//! and the upper half belongs to the kernel. [`Va::is_user`] tells the halves
//! apart; the fault handler and every mapping operation refuse kernel-half
//! addresses.
//!
//! ## Arithmetic Operations
//!
//! Both [`Pa`] and [`Va`] implement addition, subtraction and bitwise
//! operations with `usize`, so moving to the next page is simply
//! `va + PAGE_SIZE`.
//!
//! ## Example Usage:
//!
//! ```
//! let va = Va::new(0x4747_f123).unwrap();
//! assert_eq!(va.page_down(), Va::new(0x4747_f000).unwrap());
//! assert_eq!(va.offset(), 0x123);
//! ```

/// The size of a single page in memory, in bytes.
///
/// This constant represents the size of a memory page, which is 4 KiB. Frames,
/// swap slots, and every unit of lazy loading are exactly one page long.
pub const PAGE_SIZE: usize = 0x1000;

/// The shift amount to get the page index from a given address.
///
/// ## Example:
/// ```
/// let frame_number = address >> PAGE_SHIFT;
/// ```
pub const PAGE_SHIFT: usize = 12; // 12 bits (log2 of 4 KB)

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = 0xfff;

/// One past the last address of the user half of the address space.
pub const USER_END: usize = 0x0000_8000_0000_0000;

/// Represents a physical address.
///
/// The `Pa` (Physical Address) struct is a wrapper around the `usize` type,
/// which represents the location of a page frame in physical memory.
///
/// ## Example:
/// ```
/// let pa = Pa::new(0x10_0000).unwrap();
/// let next = pa + PAGE_SIZE;
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// Creates a new physical address if the address is valid.
    ///
    /// The address must be less than `0xffff_0000_0000_0000`, which ensures it
    /// falls within the valid physical address range.
    ///
    /// # Returns
    /// - `Some(Pa)` if the address is valid.
    /// - `None` if the address is outside the valid range.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < 0xffff_0000_0000_0000 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast the physical address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Align down the physical address to the page boundary.
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align up to the physical address to the page boundary.
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the page offset from the physical address.
    ///
    /// # Example
    /// ```
    /// let pa = Pa::new(0x1234_5678).unwrap();
    /// assert_eq!(pa.offset(), 0x678);
    /// ```
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// Represents a virtual address.
///
/// The [`Va`] (Virtual Address) struct represents an address in the virtual
/// memory space used by the kernel or user-space applications. Only canonical
/// addresses can be constructed.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address is canonical.
    ///
    /// # Returns
    /// - `Some(Va)`: If the address is within the valid virtual memory range.
    /// - `None`: If the address is not canonical.
    ///
    /// # Example
    /// ```
    /// assert!(Va::new(0xFFFF_8000_1234_5678).is_some());
    /// assert!(Va::new(0xFFFF_7000_1234_5678).is_none());
    /// ```
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            m if m == 0xffff_8000_0000_0000 || m == 0 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Returns the raw `usize` representation of the virtual address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Returns `true` if the address lies in the user half of the address
    /// space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < USER_END
    }

    /// Returns `true` if the address is aligned to a page boundary.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Aligns the virtual address down to the nearest page boundary.
    ///
    /// # Example
    /// ```
    /// let va = Va::new(0x1234_5678).unwrap();
    /// assert_eq!(va.page_down().into_usize(), 0x1234_5000);
    /// ```
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Aligns the virtual address up to the nearest page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the offset within the memory page from the virtual address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Adds `rhs` to the address, returning `None` if the result overflows or
    /// is not canonical.
    #[inline]
    pub const fn checked_add(self, rhs: usize) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(addr) => Self::new(addr),
            None => None,
        }
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 = self.0 + other
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, other: usize) -> Self::Output {
                Self(self.0 - other)
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;

            fn sub(self, other: Self) -> Self::Output {
                self.0 - other.0
            }
        }
        impl core::ops::SubAssign<usize> for $t {
            fn sub_assign(&mut self, other: usize) {
                self.0 = self.0 - other
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;

            fn bitand(self, other: usize) -> Self {
                Self(self.0 & other)
            }
        }
    };
}

impl_arith!(Va);
impl_arith!(Pa);

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}
impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}
