//! The abyss of the kernel that talks to the hardware.
//!
//! This crate collects the lowest layer of the memory manager: the address
//! types, the spinlock, the kernel print macros and the page-fault error code
//! that the MMU reports.
//!
//! You are **not** expected to build on the internals of this crate directly.
//! The [`pagos`] crate re-exports everything the memory manager is supposed to
//! use.
//!
//! [`pagos`]: ../pagos/index.html
#![no_std]

use core::sync::atomic::AtomicBool;

extern crate alloc;

#[doc(hidden)]
pub use log as __log;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod addressing;
pub mod interrupt;
pub mod spinlock;

/// Mutes the kernel print macros when set.
#[doc(hidden)]
pub static QUITE: AtomicBool = AtomicBool::new(false);
