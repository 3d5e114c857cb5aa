//! Duplication of an address space.
//!
//! A forked child starts with a copy of its parent's memory. The copy is
//! eager for pages that hold data and lazy for pages that were never
//! touched:
//!
//! - An uninitialized page is reserved again in the child with the same
//!   initializer, so the child loads it from the same source on first access.
//! - A stack page is reserved again as a fresh zero-filled stack page. The
//!   top page of the stack is made resident right away, as on a fresh stack
//!   setup.
//! - Any other page is brought in by the parent if it was evicted, and its
//!   content is copied into a new frame of the child. The child's page keeps
//!   the parent's type, and the dirty bit is carried over so that a modified
//!   file-backed page is still written back by the child.
//!
//! The parent's pages are visited one at a time with only that page locked,
//! and the lock is dropped before the child asks for a frame.
//! The two address spaces share no frame once the duplication is over.
use crate::{
    MmStruct, USER_STACK,
    page::{AnonPage, Page, PageState},
    spt::PageRef,
};
use alloc::boxed::Box;
use pagos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    debug,
};

enum Duplicated {
    Deferred,
    Stack(Va),
    Copied { page: Page, dirty: bool },
}

/// Copy every page of `src` into the empty address space `dst`.
///
/// # Errors
/// Any error met while copying a page. Pages already copied stay in `dst`;
/// the caller is expected to drop it.
pub fn duplicate(dst: &MmStruct, src: &MmStruct) -> Result<(), KernelError> {
    let mut buffer = Box::new([0u8; PAGE_SIZE]);
    let (mut deferred, mut stack, mut copied) = (0, 0, 0);
    for page_ref in src.snapshot() {
        let mut page = page_ref.lock();
        let result = duplicate_page(dst, src, &page_ref, &mut page, &mut buffer);
        page.unlock();
        // The parent's page is released before the child asks for a frame.
        match result? {
            Duplicated::Deferred => deferred += 1,
            Duplicated::Stack(va) => {
                if va == top_of_stack() {
                    dst.claim(va)?;
                }
                stack += 1;
            }
            Duplicated::Copied { page, dirty } => {
                let copy_ref = dst.insert_page(page)?;
                let mut copy = copy_ref.lock();
                let result = dst.install_copy(&copy_ref, &mut copy, &buffer[..], dirty);
                copy.unlock();
                result?;
                copied += 1;
            }
        }
    }
    debug!(
        "Forked address space: {} copied, {} deferred, {} stack pages",
        copied, deferred, stack
    );
    Ok(())
}

fn duplicate_page(
    dst: &MmStruct,
    src: &MmStruct,
    page_ref: &PageRef,
    page: &mut Page,
    buffer: &mut [u8; PAGE_SIZE],
) -> Result<Duplicated, KernelError> {
    let va = page.va();
    let state = match page.state() {
        PageState::Uninit(uninit) => {
            let copy = Page::new(
                va,
                page.writable(),
                page.markers(),
                PageState::Uninit(uninit.clone()),
            );
            dst.insert_page(copy)?;
            return Ok(Duplicated::Deferred);
        }
        _ if page.is_stack() => {
            dst.reserve_stack_page(va)?;
            return Ok(Duplicated::Stack(va));
        }
        PageState::Anon(_) => PageState::Anon(AnonPage::new()),
        PageState::File(file) => PageState::File(file.clone()),
    };

    src.do_claim(page_ref, page)?;
    let pa = page.frame().ok_or(KernelError::BadAddress)?;
    let pt = src.page_table().lock();
    let dirty = pt.is_dirty(va);
    pt.unlock();
    src.frame_table()
        .with_frame(pa, |frame| buffer.copy_from_slice(frame.inner()))
        .ok_or(KernelError::BadAddress)?;

    Ok(Duplicated::Copied {
        page: Page::new(va, page.writable(), page.markers(), state),
        dirty,
    })
}

fn top_of_stack() -> Va {
    USER_STACK - PAGE_SIZE
}

impl MmStruct {
    /// Create a copy of this address space drawing frames from the same frame
    /// table.
    ///
    /// # Errors
    /// Any error met while copying a page. The partial copy is torn down.
    pub fn fork(&self) -> Result<MmStruct, KernelError> {
        let child = MmStruct::new(self.frame_table().clone());
        duplicate(&child, self)?;
        Ok(child)
    }
}
