//! # Memory State of a process
//!
//! The state of a process's memory is represented by the [`MmStruct`]
//! structure, similiar to the Linux kernel's `struct mm_struct`. It ties
//! together the three pieces of the demand pager:
//!
//! - the **supplemental page table**, which knows every page of the address
//!   space and how to produce its content,
//! - the **page table**, which maps the pages that are currently resident,
//! - the kernel-wide **frame table**, shared with every other address space,
//!   which hands out frames and reclaims them under memory pressure.
//!
//! Nothing is loaded when a region is reserved. [`MmStruct::reserve`] records
//! an uninitialized page, and [`MmStruct::claim`], called from the page fault
//! handler on first access, obtains a frame, fills it, and maps it.
//!
//! ## Tear down
//!
//! Removing a page from the address space ([`MmStruct::unmap`],
//! [`MmStruct::munmap`], [`MmStruct::destroy`]) runs the page's type-specific
//! teardown first: a modified file-backed page is written back to its file,
//! and an anonymous page releases its swap slot. Dropping an [`MmStruct`]
//! destroys it.
//!
//! ## Locking
//!
//! Every operation takes `&self`, so an [`MmStruct`] may be shared by several
//! threads of one process. Locks are taken in the order supplemental page
//! table, page, page table, frame table; the supplemental page table lock is
//! never held while a page is claimed.
use crate::{
    frame::{FrameOwner, FrameTable},
    page::{
        Initializer, LazySegment, Mapping, Page, PageState, UninitPage, VmMarker,
        VmType,
    },
    page_table::PageTable,
    spt::{PageRef, SupplementalPageTable},
};
use alloc::{sync::Arc, vec::Vec};
use core::ops::Range;
use pagos::{
    KernelError,
    addressing::{PAGE_SIZE, USER_END, Va},
    fs::RegularFile,
    mm::{Frame, page_table::Permission},
    sync::SpinLock,
    warning,
};

/// The memory state of a process.
///
/// This struct encapsulates the essential information required to manage a
/// process's virtual memory: its supplemental page table, its page table, and
/// a handle of the frame table it draws frames from.
pub struct MmStruct {
    frame_table: Arc<FrameTable>,
    page_table: Arc<SpinLock<PageTable>>,
    spt: SpinLock<SupplementalPageTable>,
}

impl MmStruct {
    /// Creates an empty address space drawing frames from `frame_table`.
    pub fn new(frame_table: Arc<FrameTable>) -> Self {
        Self {
            frame_table,
            page_table: Arc::new(SpinLock::new(PageTable::new())),
            spt: SpinLock::new(SupplementalPageTable::new()),
        }
    }

    /// The frame table this address space draws frames from.
    pub fn frame_table(&self) -> &Arc<FrameTable> {
        &self.frame_table
    }

    /// The page table of this address space.
    pub fn page_table(&self) -> &Arc<SpinLock<PageTable>> {
        &self.page_table
    }

    /// Find the page containing `va`.
    pub fn lookup(&self, va: Va) -> Option<PageRef> {
        let spt = self.spt.lock();
        let page = spt.find(va);
        spt.unlock();
        page
    }

    /// Type of the page containing `va`.
    ///
    /// An uninitialized page reports the type it turns into on first access.
    pub fn page_type(&self, va: Va) -> Option<VmType> {
        self.with_page(va, |page| page.ty())
    }

    /// Run `f` on the page containing `va`.
    pub fn with_page<R>(&self, va: Va, f: impl FnOnce(&Page) -> R) -> Option<R> {
        let page = self.lookup(va)?;
        let guard = page.lock();
        let result = f(&guard);
        guard.unlock();
        Some(result)
    }

    /// Returns `true` if the page containing `va` is backed by a frame.
    pub fn is_resident(&self, va: Va) -> bool {
        self.with_page(va, |page| page.is_resident())
            .unwrap_or(false)
    }

    /// Number of pages in the address space.
    pub fn pages(&self) -> usize {
        let spt = self.spt.lock();
        let pages = spt.len();
        spt.unlock();
        pages
    }

    /// Snapshot of every page, in address order.
    pub(crate) fn snapshot(&self) -> Vec<PageRef> {
        let spt = self.spt.lock();
        let pages = spt.iter().map(|(_, page)| page.clone()).collect();
        spt.unlock();
        pages
    }

    /// Reserve the page at `va` without loading it.
    ///
    /// The page becomes a page of type `ty` on first access, by running
    /// `init`.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `va` is not a page-aligned user
    ///   address, or `init` cannot produce a page of type `ty`.
    /// - [`KernelError::FileExist`] if the page is already reserved.
    pub fn reserve(
        &self,
        va: Va,
        writable: bool,
        ty: VmType,
        init: Initializer,
    ) -> Result<(), KernelError> {
        self.reserve_with_markers(va, writable, ty, init, VmMarker::empty())
    }

    pub(crate) fn reserve_with_markers(
        &self,
        va: Va,
        writable: bool,
        ty: VmType,
        init: Initializer,
        markers: VmMarker,
    ) -> Result<(), KernelError> {
        if !va.is_page_aligned() || !va.is_user() {
            return Err(KernelError::InvalidArgument);
        }
        let state = PageState::Uninit(UninitPage::new(ty, init)?);
        self.insert_page(Page::new(va, writable, markers, state))
            .map(|_| ())
    }

    pub(crate) fn insert_page(&self, page: Page) -> Result<PageRef, KernelError> {
        let mut spt = self.spt.lock();
        let result = spt.insert(page);
        spt.unlock();
        result
    }

    /// Make the page containing `va` resident.
    ///
    /// Claiming a page that is already resident does nothing.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if no page contains `va`.
    /// - [`KernelError::NoMemory`] if no frame can be obtained.
    /// - [`KernelError::InvalidAccess`] if the page table already maps the
    ///   address.
    /// - Any error of the page's swap-in, such as [`KernelError::IOError`].
    pub fn claim(&self, va: Va) -> Result<(), KernelError> {
        let page_ref = self.lookup(va).ok_or(KernelError::BadAddress)?;
        let mut page = page_ref.lock();
        let result = self.do_claim(&page_ref, &mut page);
        page.unlock();
        result
    }

    /// Claim the locked `page`, whose handle is `page_ref`.
    pub(crate) fn do_claim(&self, page_ref: &PageRef, page: &mut Page) -> Result<(), KernelError> {
        if page.is_resident() {
            return Ok(());
        }
        let pt = self.page_table.lock();
        let conflict = pt.is_present(page.va());
        pt.unlock();
        if conflict {
            warning!("{:?} is mapped without being resident.", page.va());
            return Err(KernelError::InvalidAccess);
        }

        let mut frame = self.frame_table.allocate_frame(Some(page_ref))?;
        self.frame_table
            .with_swap(|swap| page.swap_in(&mut frame, swap))?;
        self.install(page_ref, page, frame)
    }

    /// Map `frame` at the page's address and link the two.
    fn install(&self, page_ref: &PageRef, page: &mut Page, frame: Frame) -> Result<(), KernelError> {
        let mut perm = Permission::READ | Permission::USER;
        if page.writable() {
            perm |= Permission::WRITE;
        }
        let mut pt = self.page_table.lock();
        let result = pt.map(page.va(), frame.pa(), perm);
        pt.unlock();
        if let Err(e) = result {
            warning!("Failed to map {:?}: {:?}", page.va(), e);
            return Err(KernelError::InvalidAccess);
        }

        page.set_frame(Some(frame.pa()));
        self.frame_table.register(
            frame,
            FrameOwner {
                page: Arc::downgrade(page_ref),
                page_table: Arc::downgrade(&self.page_table),
                va: page.va(),
            },
        );
        Ok(())
    }

    /// Make the locked, non-resident `page` resident with a copy of
    /// `content`, without running its swap-in.
    pub(crate) fn install_copy(
        &self,
        page_ref: &PageRef,
        page: &mut Page,
        content: &[u8],
        dirty: bool,
    ) -> Result<(), KernelError> {
        let mut frame = self.frame_table.allocate_frame(Some(page_ref))?;
        frame.inner_mut().copy_from_slice(content);
        self.install(page_ref, page, frame)?;
        if dirty {
            let mut pt = self.page_table.lock();
            pt.set_dirty(page.va(), true);
            pt.unlock();
        }
        Ok(())
    }

    /// Run the teardown of a page that was taken out of the supplemental page
    /// table.
    fn teardown(&self, page_ref: &PageRef) {
        let mut page = page_ref.lock();
        let mut resident = None;
        if let Some(pa) = page.frame() {
            let mut pt = self.page_table.lock();
            let dirty = pt.is_dirty(page.va());
            let unmapped = pt.unmap(page.va());
            pt.unlock();
            debug_assert_eq!(unmapped, Ok(pa));
            resident = self
                .frame_table
                .release(pa)
                .map(|frame| (frame, dirty));
        }
        let (frame, dirty) = match &resident {
            Some((frame, dirty)) => (Some(frame), *dirty),
            None => (None, false),
        };
        self.frame_table
            .with_swap(|swap| page.destroy(frame, dirty, swap));
        page.unlock();
    }

    /// Remove the page containing `va` from the address space.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if no page contains `va`.
    pub fn remove_page(&self, va: Va) -> Result<(), KernelError> {
        let mut spt = self.spt.lock();
        let page = spt.remove(va);
        spt.unlock();
        let page = page.ok_or(KernelError::InvalidArgument)?;
        self.teardown(&page);
        Ok(())
    }

    /// Remove the `page_count` pages starting at `va` from the address space.
    ///
    /// Addresses in the range that hold no page are skipped.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `va` is not page-aligned.
    pub fn unmap(&self, va: Va, page_count: usize) -> Result<(), KernelError> {
        if !va.is_page_aligned() {
            return Err(KernelError::InvalidArgument);
        }
        for i in 0..page_count {
            let mut spt = self.spt.lock();
            let page = spt.remove(va + i * PAGE_SIZE);
            spt.unlock();
            if let Some(page) = page {
                self.teardown(&page);
            }
        }
        Ok(())
    }

    /// Remove every page from the address space.
    ///
    /// Destroying an address space that is already empty does nothing.
    pub fn destroy(&self) {
        let mut spt = self.spt.lock();
        let pages = spt.take_all();
        spt.unlock();
        for page in pages.into_values() {
            self.teardown(&page);
        }
    }

    /// Check whether a given memory range is accessible by the process.
    ///
    /// Every page overlapping `addr` must be reserved, and writable if
    /// `is_write` is set. Pages are not brought in.
    ///
    /// # Returns
    /// - `true` if the memory range is valid.
    /// - `false` if the memory range is invalid or inaccessible.
    pub fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        if addr.start > addr.end || !addr.start.is_user() || addr.end.into_usize() > USER_END {
            return false;
        }
        let spt = self.spt.lock();
        let mut va = addr.start.page_down();
        let mut ok = true;
        while ok && va < addr.end {
            ok = match spt.find(va) {
                Some(page) => {
                    let page = page.lock();
                    let writable = page.writable();
                    page.unlock();
                    writable || !is_write
                }
                None => false,
            };
            va += PAGE_SIZE;
        }
        spt.unlock();
        ok
    }

    /// Maps `length` bytes of `file`, starting at `offset`, at `addr`.
    ///
    /// The pages of the mapping are loaded from the file on first access. If
    /// the file ends before the mapping does, the rest of the mapping reads
    /// as zero. Modified pages are written back when the mapping is removed.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `addr` is zero or not
    ///   page-aligned, `length` is zero, the range leaves the user address
    ///   space, `offset` is not page-aligned or not within the file, the file
    ///   is empty, or the range overlaps an existing page.
    ///
    /// # Returns
    /// The first address of the mapping.
    pub fn mmap(
        &self,
        addr: Va,
        length: usize,
        writable: bool,
        file: &RegularFile,
        offset: usize,
    ) -> Result<Va, KernelError> {
        if addr.into_usize() == 0
            || !addr.is_page_aligned()
            || !addr.is_user()
            || length == 0
            || offset % PAGE_SIZE != 0
        {
            return Err(KernelError::InvalidArgument);
        }
        let count = length.div_ceil(PAGE_SIZE);
        let last = (count - 1)
            .checked_mul(PAGE_SIZE)
            .and_then(|size| addr.checked_add(size))
            .filter(|last| last.is_user())
            .ok_or(KernelError::InvalidArgument)?;
        let file_len = file.size();
        if offset >= file_len {
            return Err(KernelError::InvalidArgument);
        }

        let mut remaining = length.min(file_len - offset);
        let mut pages = Vec::with_capacity(count);
        for index in 0..count {
            let read_bytes = remaining.min(PAGE_SIZE);
            remaining -= read_bytes;
            let segment = LazySegment {
                file: file.clone(),
                offset: offset + index * PAGE_SIZE,
                read_bytes,
                zero_bytes: PAGE_SIZE - read_bytes,
            };
            let mapping = Mapping {
                start: addr,
                index,
                pages: count,
            };
            let uninit = UninitPage::new(VmType::File, Initializer::MapFile(segment, mapping))?;
            pages.push(Page::new(
                addr + index * PAGE_SIZE,
                writable,
                VmMarker::empty(),
                PageState::Uninit(uninit),
            ));
        }

        let mut spt = self.spt.lock();
        let result = if spt.overlaps(addr..last + 1) {
            Err(KernelError::InvalidArgument)
        } else {
            pages
                .into_iter()
                .try_for_each(|page| spt.insert(page).map(|_| ()))
        };
        spt.unlock();
        result.map(|_| addr)
    }

    /// Unmaps the memory-mapped region that starts at `addr`.
    ///
    /// Modified pages are written back to the file; unmodified pages are
    /// simply discarded.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `addr` is not the first address
    ///   of a mapping created by [`MmStruct::mmap`].
    pub fn munmap(&self, addr: Va) -> Result<(), KernelError> {
        if !addr.is_page_aligned() {
            return Err(KernelError::InvalidArgument);
        }
        let mapping = self
            .with_page(addr, |page| page.mapping())
            .flatten()
            .filter(|mapping| mapping.start == addr)
            .ok_or(KernelError::InvalidArgument)?;
        self.unmap(addr, mapping.pages)
    }

    /// Reserve a zero-filled, writable page of the user stack at `va`.
    pub(crate) fn reserve_stack_page(&self, va: Va) -> Result<(), KernelError> {
        self.reserve_with_markers(va, true, VmType::Anon, Initializer::ZeroFill, VmMarker::STACK)
    }
}

impl Drop for MmStruct {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl core::fmt::Debug for MmStruct {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmStruct")
            .field("pages", &self.pages())
            .finish()
    }
}

