//! # pagos: kernel services for a demand-paged memory manager
//!
//! This crate provides everything the virtual memory manager (`pagos-vm`)
//! consumes from the rest of the kernel:
//!
//! - [`mm`]: the pool of physical page frames and the [`Frame`] handle that
//!   owns one of them, plus the encoding of page table entries.
//! - [`fs`]: regular files, read and written at page granularity.
//! - [`swap`]: the block device used as swap space and the table of swap
//!   slots carved out of it.
//! - [`KernelError`]: the error type shared by every fallible operation.
//!
//! Logging goes through the [`info!`], [`warning!`] and [`debug!`] macros,
//! which forward to the `log` facade.
//!
//! [`Frame`]: mm::Frame
#![no_std]

extern crate alloc;

pub mod fs;
pub mod mm;
pub mod swap;

/// Synchronization primitives.
pub mod sync {
    pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
}

/// Hardware exception information.
pub mod interrupt {
    pub use abyss::interrupt::PFErrorCode;
}

pub use abyss::{QUITE, addressing, debug, info, warning};

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel operation.
/// Each variant corresponds to a specific type of error that might
/// occur during the handling of a kernel operation. These errors can be
/// returned to the user program to indicate the nature of the failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// IO Error. (EIO)
    IOError,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Permission denied. (EACCES)
    InvalidAccess,
    /// Bad address. (EFAULT)
    BadAddress,
    /// File exists. (EEXIST)
    FileExist,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// No space left on device. (ENOSPC)
    NoSpace,
}
