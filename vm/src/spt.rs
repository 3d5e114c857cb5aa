//! Supplemental page table.
//!
//! The hardware page table only knows about pages that are resident. The
//! supplemental page table knows about every page of the address space,
//! including the ones that were reserved but never touched and the ones that
//! were evicted, and is what the fault handler consults to bring a page back.
use crate::page::Page;
use alloc::{collections::BTreeMap, sync::Arc};
use core::ops::Range;
use pagos::{KernelError, addressing::Va, sync::SpinLock};

/// A shared handle of a page.
///
/// The supplemental page table owns the page; the frame table refers to the
/// pages it evicts from through weak references.
pub type PageRef = Arc<SpinLock<Page>>;

/// Per-address-space index from page-aligned virtual address to [`Page`].
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<Va, PageRef>,
}

impl SupplementalPageTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    /// Find the page containing `va`.
    pub fn find(&self, va: Va) -> Option<PageRef> {
        self.pages.get(&va.page_down()).cloned()
    }

    /// Returns `true` if a page contains `va`.
    pub fn contains(&self, va: Va) -> bool {
        self.pages.contains_key(&va.page_down())
    }

    /// Returns `true` if any page lies within `range`.
    pub fn overlaps(&self, range: Range<Va>) -> bool {
        let start = range.start.page_down();
        start < range.end && self.pages.range(start..range.end).next().is_some()
    }

    /// Insert `page`, keyed by its virtual address.
    ///
    /// # Errors
    /// - [`KernelError::FileExist`] if a page already exists at that address.
    ///   The existing page is left untouched.
    pub fn insert(&mut self, page: Page) -> Result<PageRef, KernelError> {
        let va = page.va();
        if self.pages.contains_key(&va) {
            return Err(KernelError::FileExist);
        }
        let page = Arc::new(SpinLock::new(page));
        self.pages.insert(va, page.clone());
        Ok(page)
    }

    /// Remove the page containing `va` from the table, without tearing it
    /// down.
    pub fn remove(&mut self, va: Va) -> Option<PageRef> {
        self.pages.remove(&va.page_down())
    }

    /// Remove every page from the table, without tearing them down.
    pub fn take_all(&mut self) -> BTreeMap<Va, PageRef> {
        core::mem::take(&mut self.pages)
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns `true` if the table has no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Iterate over the pages in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Va, &PageRef)> {
        self.pages.iter()
    }
}
