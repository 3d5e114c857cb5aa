//! Memory Management.
//!
//! This module implements the pool of physical page frames that back user
//! pages. The core abstraction is the [`Frame`], which represents ownership of
//! a single page frame.
//!
//! Frame allocation and deallocation is closely tied to Rust's ownership
//! system: a frame is allocated by [`PhysicalMemory::alloc`], which returns a
//! [`Frame`]. Once the [`Frame`] instance is dropped, the frame is
//! automatically returned to the pool, so a frame can neither leak nor be
//! handed out twice.
pub mod page_table;

use crate::{
    addressing::{PAGE_SHIFT, PAGE_SIZE, Pa},
    info,
    sync::SpinLock,
};
use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::cell::UnsafeCell;

/// Physical address of the first frame of the user pool.
pub const USER_POOL_BASE: Pa = match Pa::new(0x10_0000) {
    Some(pa) => pa,
    None => panic!("invalid user pool base"),
};

struct BytePP(usize);
impl core::fmt::Display for BytePP {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.0 > 16 * 1024 * 1024 * 1024 {
            write!(f, "{} GiB", self.0 / 1024 / 1024 / 1024)
        } else if self.0 > 16 * 1024 * 1024 {
            write!(f, "{} MiB", self.0 / 1024 / 1024)
        } else if self.0 > 16 * 1024 {
            write!(f, "{} KiB", self.0 / 1024)
        } else {
            write!(f, "{} B", self.0)
        }
    }
}

// Allocation bitmap of a frame pool.
struct Arena {
    // 0: used, 1: unused
    bitmap: Vec<u64>,
    free: usize,
}

impl Arena {
    fn new(frames: usize) -> Self {
        let mut arena = Arena {
            bitmap: vec![u64::MAX; frames.div_ceil(64)],
            free: frames,
        };
        // Pad back.
        for i in frames..arena.bitmap.len() * 64 {
            arena.set_used(i);
        }
        arena
    }
    fn set_used(&mut self, index: usize) {
        let (pos, ofs) = (index / 64, index % 64);
        debug_assert_ne!(self.bitmap[pos] & (1 << ofs), 0);
        self.bitmap[pos] &= !(1 << ofs);
        debug_assert_eq!(self.bitmap[pos] & (1 << ofs), 0);
    }
    fn set_unused(&mut self, index: usize) {
        let (pos, ofs) = (index / 64, index % 64);
        debug_assert_eq!(self.bitmap[pos] & (1 << ofs), 0);
        self.bitmap[pos] |= 1 << ofs;
        debug_assert_ne!(self.bitmap[pos] & (1 << ofs), 0);
    }
    fn alloc(&mut self) -> Option<usize> {
        // search first qword that contains one.
        let pos = self.bitmap.iter().position(|qword| *qword != 0)?;
        let index = pos * 64 + self.bitmap[pos].trailing_zeros() as usize;
        self.set_used(index);
        self.free -= 1;
        Some(index)
    }
    fn dealloc(&mut self, index: usize) {
        self.set_unused(index);
        self.free += 1;
    }
}

#[repr(C, align(4096))]
struct FrameBuf([u8; PAGE_SIZE]);

/// A pool of physical page frames.
///
/// The pool owns the memory of `capacity()` contiguous frames starting at a
/// base physical address and hands them out one at a time as [`Frame`]s.
/// It is shared through an [`Arc`] because every outstanding [`Frame`] keeps
/// a reference back to the pool it must return to.
pub struct PhysicalMemory {
    base: Pa,
    storage: Box<[UnsafeCell<FrameBuf>]>,
    arena: SpinLock<Arena>,
}

// Contents of a frame are only reachable through the unique `Frame` handle
// that owns it.
unsafe impl Sync for PhysicalMemory {}

impl PhysicalMemory {
    /// Creates a pool of `frames` page frames, the first of which lives at
    /// `base`.
    pub fn new(base: Pa, frames: usize) -> Arc<Self> {
        info!(
            "Memory: {} user frames at {} ({})",
            frames,
            base,
            BytePP(frames * PAGE_SIZE)
        );
        Arc::new(Self {
            base: base.page_down(),
            storage: (0..frames)
                .map(|_| UnsafeCell::new(FrameBuf([0; PAGE_SIZE])))
                .collect(),
            arena: SpinLock::new(Arena::new(frames)),
        })
    }

    /// Total number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of frames that are currently not handed out.
    pub fn free_frames(&self) -> usize {
        let arena = self.arena.lock();
        let free = arena.free;
        arena.unlock();
        free
    }

    /// Index of the frame at `pa` within this pool.
    ///
    /// Returns `None` if `pa` is not the address of a frame of this pool.
    pub fn frame_index(&self, pa: Pa) -> Option<usize> {
        if pa < self.base || pa.offset() != 0 {
            return None;
        }
        Some((pa - self.base) >> PAGE_SHIFT).filter(|index| *index < self.capacity())
    }

    /// Physical address of the frame at `index` within this pool.
    pub fn frame_pa(&self, index: usize) -> Pa {
        self.base + (index << PAGE_SHIFT)
    }

    /// Allocate a zero-filled frame.
    ///
    /// Returns `None` when every frame of the pool is in use.
    pub fn alloc(self: &Arc<Self>) -> Option<Frame> {
        let mut arena = self.arena.lock();
        let index = arena.alloc();
        arena.unlock();
        let index = index?;

        let mut frame = Frame {
            pa: self.frame_pa(index),
            index,
            memory: self.clone(),
        };
        frame.inner_mut().fill(0);
        Some(frame)
    }

    fn dealloc(&self, index: usize) {
        let mut arena = self.arena.lock();
        arena.dealloc(index);
        arena.unlock();
    }
}

/// An owned physical page frame.
///
/// The [`Frame`] struct grants exclusive access to the contents of one page
/// frame of a [`PhysicalMemory`] pool. Dropping it returns the frame to the
/// pool.
///
/// ## Example:
/// ```
/// let mut frame = memory.alloc().unwrap();
/// frame.inner_mut()[0] = 0xcc;
/// let pa = frame.pa();
/// drop(frame); // `pa` is free again.
/// ```
pub struct Frame {
    pa: Pa,
    index: usize,
    memory: Arc<PhysicalMemory>,
}

impl Frame {
    /// Get the physical address of this frame.
    #[inline]
    pub fn pa(&self) -> Pa {
        self.pa
    }

    /// Get the index of this frame within its pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Get a reference to the underlying slice of the frame (read-only).
    pub fn inner(&self) -> &[u8] {
        unsafe { &(*self.memory.storage[self.index].get()).0 }
    }

    /// Get a mutable reference to the underlying slice of the frame.
    pub fn inner_mut(&mut self) -> &mut [u8] {
        unsafe { &mut (*self.memory.storage[self.index].get()).0 }
    }
}

impl core::fmt::Debug for Frame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Frame({})", self.pa)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.memory.dealloc(self.index);
    }
}
