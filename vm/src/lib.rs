//! # pagos-vm: demand-paged virtual memory
//!
//! This crate manages the user half of every address space of the kernel.
//! Pages are reserved without being loaded, brought in by the page fault
//! handler on first access, evicted to swap (or written back to their file)
//! when physical memory runs short, and brought back on the next access.
//!
//! ## Components
//!
//! - [`page_table`]: the four-level page table of an address space.
//! - [`page`]: the [`Page`](page::Page) record and its three flavors:
//!   uninitialized, anonymous and file-backed.
//! - [`spt`]: the supplemental page table, the per-address-space index of
//!   every page.
//! - [`frame`]: the kernel-wide frame table and its clock eviction.
//! - [`mm_struct`]: [`MmStruct`], the memory state of a process, with
//!   reservation, claiming, `mmap` and tear down.
//! - [`lazy_pager`]: the page fault handler, including stack growth.
//! - [`loader`]: lazy loading of program segments and the initial stack.
//! - [`fork`]: duplication of an address space.
//! - [`process`]: a process's view of its memory, including the accessors
//!   the kernel uses to touch user buffers.
//!
//! ## Getting started
//!
//! A system is assembled with [`SystemConfigurationBuilder`], which returns the
//! frame table shared by every address space:
//!
//! ```ignore
//! let frame_table = SystemConfigurationBuilder::new().user_frames(64).build();
//! let mut process = Process::new(frame_table);
//! process.setup_stack()?;
//! ```
#![no_std]

extern crate alloc;

pub mod fork;
pub mod frame;
pub mod lazy_pager;
pub mod loader;
pub mod mm_struct;
pub mod page;
pub mod page_table;
pub mod process;
pub mod spt;

pub use frame::FrameTable;
pub use mm_struct::MmStruct;
pub use process::Process;

use alloc::{boxed::Box, sync::Arc};
use pagos::{
    addressing::{PAGE_SIZE, Va},
    mm::{PhysicalMemory, USER_POOL_BASE},
    swap::{MemDisk, SwapStore, SwapTable},
};

/// Top of the user stack. The stack grows down from here.
pub const USER_STACK: Va = match Va::new(0x4748_0000) {
    Some(va) => va,
    None => panic!("invalid user stack"),
};

/// Maximum size of the user stack.
pub const STACK_LIMIT: usize = 0x10_0000;

/// How far below the stack pointer an access may land and still grow the
/// stack.
pub const STACK_GROWTH_SLACK: usize = PAGE_SIZE;

/// Number of user frames if not configured otherwise.
pub const DEFAULT_USER_FRAMES: usize = 1024;

/// Number of swap slots if no swap store is configured.
pub const DEFAULT_SWAP_SLOTS: usize = 2048;

/// Builder of the memory subsystem.
///
/// # Example
/// ```ignore
/// let frame_table = SystemConfigurationBuilder::new()
///     .user_frames(2)
///     .swap(Box::new(SwapTable::new(MemDisk::with_slots(4))))
///     .build();
/// ```
pub struct SystemConfigurationBuilder {
    frames: usize,
    swap: Option<Box<dyn SwapStore>>,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Start from the default configuration.
    pub fn new() -> Self {
        Self {
            frames: DEFAULT_USER_FRAMES,
            swap: None,
        }
    }

    /// Number of physical frames available to user pages.
    pub fn user_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Swap store that anonymous pages are evicted to.
    pub fn swap(mut self, swap: Box<dyn SwapStore>) -> Self {
        self.swap = Some(swap);
        self
    }

    /// Build the frame table.
    pub fn build(self) -> Arc<FrameTable> {
        let memory = PhysicalMemory::new(USER_POOL_BASE, self.frames);
        let swap = self
            .swap
            .unwrap_or_else(|| Box::new(SwapTable::new(MemDisk::with_slots(DEFAULT_SWAP_SLOTS))));
        FrameTable::new(memory, swap)
    }
}
