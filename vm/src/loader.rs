//! Lazy loading of a program image.
//!
//! When a program is loaded, its segments are not read from the executable.
//! Each page of a segment is reserved with an initializer that knows which
//! part of the file holds the page's bytes; the bytes are read when the page
//! is first touched. Loaded pages are anonymous: once resident they belong to
//! the process, and are evicted to swap rather than written back to the
//! executable.
use crate::{
    MmStruct, USER_STACK,
    page::{Initializer, LazySegment, VmType},
};
use pagos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::RegularFile,
    debug,
};

impl MmStruct {
    /// Reserve the pages of a program segment starting at `upage`.
    ///
    /// The segment's first `read_bytes` bytes come from `file` at `offset`;
    /// the following `zero_bytes` bytes are zero.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `upage` or `offset` is not
    ///   page-aligned, or the segment does not end on a page boundary.
    /// - Any error of [`MmStruct::reserve`], such as
    ///   [`KernelError::FileExist`] if the segment overlaps another page.
    pub fn load_segment(
        &self,
        file: &RegularFile,
        mut offset: usize,
        mut upage: Va,
        mut read_bytes: usize,
        mut zero_bytes: usize,
        writable: bool,
    ) -> Result<(), KernelError> {
        if (read_bytes + zero_bytes) % PAGE_SIZE != 0
            || !upage.is_page_aligned()
            || offset % PAGE_SIZE != 0
        {
            return Err(KernelError::InvalidArgument);
        }
        while read_bytes > 0 || zero_bytes > 0 {
            let page_read_bytes = read_bytes.min(PAGE_SIZE);
            let page_zero_bytes = PAGE_SIZE - page_read_bytes;
            let segment = LazySegment {
                file: file.clone(),
                offset,
                read_bytes: page_read_bytes,
                zero_bytes: page_zero_bytes,
            };
            self.reserve(upage, writable, VmType::Anon, Initializer::LoadSegment(segment))?;

            read_bytes -= page_read_bytes;
            zero_bytes -= page_zero_bytes;
            offset += page_read_bytes;
            upage += PAGE_SIZE;
        }
        Ok(())
    }

    /// Create the first page of the user stack and make it resident.
    ///
    /// # Returns
    /// The initial stack pointer, [`USER_STACK`].
    pub fn setup_stack(&self) -> Result<Va, KernelError> {
        let va = USER_STACK - PAGE_SIZE;
        self.reserve_stack_page(va)?;
        self.claim(va)?;
        debug!("User stack set up at {:?}", va);
        Ok(USER_STACK)
    }
}
