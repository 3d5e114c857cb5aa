//! Kernel print utilities.
//!
//! The kernel has no console of its own. Every message goes through the [`log`]
//! facade under the `pagos` target, so whoever links the kernel decides where
//! the messages end up by installing a logger.
//!
//! [`log`]: https://docs.rs/log

/// Log target used by every kernel message.
#[doc(hidden)]
pub const TARGET: &str = "pagos";

/// Display an information message.
///
/// Use the format! syntax to write data to the kernel log.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::__log::info!(target: $crate::kprint::TARGET, $($arg)*) });
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the kernel log.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::__log::warn!(target: $crate::kprint::TARGET, $($arg)*) });
}

/// Display a debug message.
///
/// Use the format! syntax to write data to the kernel log.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => (if !$crate::QUITE.load(core::sync::atomic::Ordering::SeqCst) { $crate::__log::debug!(target: $crate::kprint::TARGET, $($arg)*) });
}
