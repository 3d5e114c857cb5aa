//! Regular files as seen by the memory manager.
//!
//! The memory manager reads files at page granularity: a lazily loaded
//! executable segment or a memory-mapped file region is filled one page at a
//! time, and dirty mapped pages are written back the same way. This module
//! provides the [`RegularFile`] handle used for that, on top of the
//! [`traits::RegularFile`] contract any file system implements.
//!
//! [`MemFile`] is an in-memory implementation, used as the backing store of
//! the kernel's test programs.
use crate::{KernelError, sync::SpinLock};
use alloc::{boxed::Box, sync::Arc, vec::Vec};

/// Traits that a file system implements.
pub mod traits {
    use super::FileBlockNumber;
    use crate::KernelError;

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports basic read and write
    /// operations at the granularity of 4096-byte file blocks.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Reads data from the file into the provided buffer.
        ///
        /// Bytes of the block that lie beyond the end of the file are filled
        /// with zero.
        ///
        /// # Parameters
        /// - `fba`: The `FileBlockNumber` which to read.
        /// - `buf`: A mutable array where the file content will be stored.
        ///
        /// # Returns
        /// - `Ok(true)`: If the block lies (partially) within the file.
        /// - `Ok(false)`: If the block lies entirely beyond the end of file.
        /// - `Err(Error)`: An error occured while the read operation.
        fn read(&self, fba: FileBlockNumber, buf: &mut [u8; 4096]) -> Result<bool, KernelError>;

        /// Writes a 4096-byte page of data into the specified file block.
        ///
        /// If the target block lies beyond the current end of the file, the
        /// file is extended up to `min_size` bytes to accommodate the write.
        ///
        /// # Parameters
        /// - `fba`: The `FileBlockNumber` indicating the block to write to.
        /// - `buf`: A buffer containing exactly 4096 bytes of data to write.
        /// - `min_size`: The desired minimum file size (in bytes) after the
        ///   write. If this value is less than or equal to the current file
        ///   size, no growth occurs.
        fn write(
            &self,
            fba: FileBlockNumber,
            buf: &[u8; 4096],
            min_size: usize,
        ) -> Result<(), KernelError>;
    }
}

/// A handle of a regular file.
///
/// Cloning the handle is the equivalent of reopening the file: every clone
/// refers to the same underlying file and observes the writes of the others.
#[derive(Clone)]
pub struct RegularFile(pub Arc<dyn traits::RegularFile>);

impl RegularFile {
    /// Create a new [`RegularFile`] from the file system's implementation.
    #[inline]
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(r))
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Reads data from the file into the buffer, starting at `position`.
    ///
    /// The read stops at the end of file.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes read.
    /// - `Err(Error)`: An error if the read operation fails.
    pub fn read(&self, mut position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let mut bounce_buffer = Box::new([0; 4096]);
        let max_read = self
            .size()
            .min(position + buf.len())
            .saturating_sub(position);
        let mut read_bytes = 0;
        while read_bytes < max_read {
            let in_block = position & 0xfff;
            self.0
                .read(FileBlockNumber::from_offset(position), &mut bounce_buffer)?;
            let chunk = (0x1000 - in_block).min(max_read - read_bytes);
            buf[read_bytes..read_bytes + chunk]
                .copy_from_slice(&bounce_buffer[in_block..in_block + chunk]);
            position += chunk;
            read_bytes += chunk;
        }
        Ok(read_bytes)
    }

    /// Writes data from the buffer into the file, starting at `position`.
    ///
    /// If the write position is beyond the current file size, file will be
    /// extended to minimum size required to reflect the update.
    ///
    /// # Returns
    /// - `Ok(usize)`: The number of bytes written.
    /// - `Err(Error)`: An error if the write operation fails.
    pub fn write(&self, mut position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let mut bounce_buffer = Box::new([0; 4096]);
        let mut write_bytes = 0;
        while write_bytes < buf.len() {
            let in_block = position & 0xfff;
            let chunk = (0x1000 - in_block).min(buf.len() - write_bytes);
            let fba = FileBlockNumber::from_offset(position);
            if chunk != 0x1000 {
                // Partial block: keep the bytes around the written range.
                self.0.read(fba, &mut bounce_buffer)?;
            }
            bounce_buffer[in_block..in_block + chunk]
                .copy_from_slice(&buf[write_bytes..write_bytes + chunk]);
            self.0.write(fba, &bounce_buffer, position + chunk)?;
            position += chunk;
            write_bytes += chunk;
        }
        Ok(write_bytes)
    }
}

impl core::fmt::Debug for RegularFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RegularFile({:p}, size: {})", Arc::as_ptr(&self.0), self.size())
    }
}

/// Represents a file block number within a file.
///
/// Each block contains 4096 bytes of contents.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct FileBlockNumber(pub usize);

impl FileBlockNumber {
    /// Computes the file block number from a byte offset within a file.
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset / 0x1000)
    }

    /// Byte offset of the first byte of this block.
    pub const fn into_offset(self) -> usize {
        self.0 * 0x1000
    }
}

impl core::ops::Add<usize> for FileBlockNumber {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

/// The type for file access hooking.
///
/// A hook is invoked before every block access with the block number and
/// whether the access is a write. Returning an error fails the access.
pub type Hook = Arc<dyn Fn(FileBlockNumber, bool) -> Result<(), KernelError> + Send + Sync + 'static>;

/// A regular file that lives entirely in memory.
pub struct MemFile {
    data: SpinLock<Vec<u8>>,
    hook: Option<Hook>,
}

impl MemFile {
    /// Create a file holding `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: SpinLock::new(data.into()),
            hook: None,
        }
    }

    /// Add a hook for the file.
    pub fn hook(self, hook: Hook) -> Self {
        Self {
            data: self.data,
            hook: Some(hook),
        }
    }
}

impl traits::RegularFile for MemFile {
    fn size(&self) -> usize {
        let data = self.data.lock();
        let size = data.len();
        data.unlock();
        size
    }

    fn read(&self, fba: FileBlockNumber, buf: &mut [u8; 4096]) -> Result<bool, KernelError> {
        if let Some(hook) = self.hook.as_ref() {
            hook(fba, false)?;
        }
        let data = self.data.lock();
        let start = fba.into_offset().min(data.len());
        let end = (start + 4096).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        buf[end - start..].fill(0);
        let in_file = fba.into_offset() < data.len();
        data.unlock();
        Ok(in_file)
    }

    fn write(
        &self,
        fba: FileBlockNumber,
        buf: &[u8; 4096],
        min_size: usize,
    ) -> Result<(), KernelError> {
        if let Some(hook) = self.hook.as_ref() {
            hook(fba, true)?;
        }
        let mut data = self.data.lock();
        let start = fba.into_offset();
        if start >= data.len().max(min_size) {
            data.unlock();
            return Err(KernelError::InvalidArgument);
        }
        if data.len() < min_size {
            data.resize(min_size, 0);
        }
        let end = (start + 4096).min(data.len());
        data[start..end].copy_from_slice(&buf[..end - start]);
        data.unlock();
        Ok(())
    }
}
