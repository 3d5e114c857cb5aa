//! Pages of a user address space.
//!
//! A [`Page`] is the memory manager's record of one page-aligned region of a
//! process's virtual address space, whether or not a frame currently backs it.
//! Its content comes from one of three places, captured by [`PageState`]:
//!
//! - [`UninitPage`]: nothing has been loaded yet. The page carries an
//!   [`Initializer`] describing how to fill it on first access, and the type it
//!   becomes afterwards.
//! - [`AnonPage`]: memory with no file behind it (stack, zero-fill regions,
//!   loaded writable segments). It is parked in a swap slot when evicted.
//! - [`FilePage`]: a page of a memory-mapped file. It is written back to the
//!   file when evicted or unmapped, if it was modified.
//!
//! Each state implements [`PageOperations`]; [`Page`] dispatches to the
//! current state with a `match`, so a page can never run the operations of a
//! type it no longer has. The only transition is `Uninit → Anon | File`,
//! performed by the first [`swap_in`](Page::swap_in).
//!
//! [`Initializer`]: uninit::Initializer
pub mod anon;
pub mod file;
pub mod uninit;

pub use anon::AnonPage;
pub use file::FilePage;
pub use uninit::{Initializer, LazySegment, Mapping, UninitPage};

use pagos::{
    KernelError,
    addressing::{Pa, Va},
    mm::Frame,
    swap::SwapStore,
};

bitflags::bitflags! {
    /// Auxiliary markers attached to a page.
    pub struct VmMarker: u32 {
        /// The page belongs to the growable user stack.
        const STACK = 1 << 3;
    }
}

/// Type of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    /// Not yet loaded.
    Uninit,
    /// Anonymous memory, backed by swap.
    Anon,
    /// Memory-mapped file, backed by the file.
    File,
}

/// Type-specific behavior of a page.
///
/// `frame` is the frame that backs (or will back) the page, and `swap` is the
/// swap store, reachable only while the frame table is locked.
pub trait PageOperations {
    /// Fill `frame` with the content of the page.
    fn swap_in(&mut self, frame: &mut Frame, swap: &mut dyn SwapStore) -> Result<(), KernelError>;

    /// Save the content of `frame` so that it can be reclaimed. `dirty` tells
    /// whether the page was written while resident.
    fn swap_out(
        &mut self,
        frame: &Frame,
        dirty: bool,
        swap: &mut dyn SwapStore,
    ) -> Result<(), KernelError>;

    /// Release every resource held by the page. `frame` is the backing frame
    /// if the page is resident.
    fn destroy(&mut self, frame: Option<&Frame>, dirty: bool, swap: &mut dyn SwapStore);
}

/// Current type of a page, together with its type-specific payload.
#[derive(Debug)]
pub enum PageState {
    /// Not yet loaded.
    Uninit(UninitPage),
    /// Anonymous memory.
    Anon(AnonPage),
    /// Memory-mapped file.
    File(FilePage),
}

/// A page of a user address space.
#[derive(Debug)]
pub struct Page {
    va: Va,
    writable: bool,
    markers: VmMarker,
    state: PageState,
    frame: Option<Pa>,
}

impl Page {
    /// Create a non-resident page at the page-aligned address `va`.
    pub fn new(va: Va, writable: bool, markers: VmMarker, state: PageState) -> Self {
        debug_assert!(va.is_page_aligned());
        Self {
            va,
            writable,
            markers,
            state,
            frame: None,
        }
    }

    /// Virtual address of the page.
    #[inline]
    pub fn va(&self) -> Va {
        self.va
    }

    /// Whether user code may write the page.
    #[inline]
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Markers of the page.
    #[inline]
    pub fn markers(&self) -> VmMarker {
        self.markers
    }

    /// Whether the page belongs to the user stack.
    #[inline]
    pub fn is_stack(&self) -> bool {
        self.markers.contains(VmMarker::STACK)
    }

    /// Physical address of the frame backing the page, if resident.
    #[inline]
    pub fn frame(&self) -> Option<Pa> {
        self.frame
    }

    /// Whether a frame currently backs the page.
    #[inline]
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// Current state of the page.
    #[inline]
    pub fn state(&self) -> &PageState {
        &self.state
    }

    /// Type the page has, or will have once loaded.
    ///
    /// An uninitialized page reports the type it turns into on first access.
    pub fn ty(&self) -> VmType {
        match &self.state {
            PageState::Uninit(uninit) => uninit.target(),
            PageState::Anon(_) => VmType::Anon,
            PageState::File(_) => VmType::File,
        }
    }

    /// Position of the page within its memory-mapped region, if it belongs
    /// to one.
    pub fn mapping(&self) -> Option<Mapping> {
        match &self.state {
            PageState::Uninit(uninit) => match uninit.initializer() {
                Initializer::MapFile(_, mapping) => Some(*mapping),
                Initializer::ZeroFill | Initializer::LoadSegment(_) => None,
            },
            PageState::Anon(_) => None,
            PageState::File(file) => Some(file.mapping()),
        }
    }

    pub(crate) fn set_frame(&mut self, frame: Option<Pa>) {
        self.frame = frame;
    }

    /// Fill `frame` with the content of the page.
    ///
    /// An uninitialized page runs its initializer and becomes its target type.
    /// Linking the frame to the page is left to the caller.
    pub(crate) fn swap_in(
        &mut self,
        frame: &mut Frame,
        swap: &mut dyn SwapStore,
    ) -> Result<(), KernelError> {
        match &mut self.state {
            PageState::Uninit(uninit) => {
                uninit.swap_in(frame, swap)?;
                let next = uninit.initialized();
                self.state = next;
                Ok(())
            }
            PageState::Anon(anon) => anon.swap_in(frame, swap),
            PageState::File(file) => file.swap_in(frame, swap),
        }
    }

    /// Save the content of `frame` and unlink it from the page.
    pub(crate) fn swap_out(
        &mut self,
        frame: &Frame,
        dirty: bool,
        swap: &mut dyn SwapStore,
    ) -> Result<(), KernelError> {
        match &mut self.state {
            PageState::Uninit(uninit) => uninit.swap_out(frame, dirty, swap),
            PageState::Anon(anon) => anon.swap_out(frame, dirty, swap),
            PageState::File(file) => file.swap_out(frame, dirty, swap),
        }?;
        self.frame = None;
        Ok(())
    }

    /// Release the resources of the page.
    pub(crate) fn destroy(&mut self, frame: Option<&Frame>, dirty: bool, swap: &mut dyn SwapStore) {
        match &mut self.state {
            PageState::Uninit(uninit) => uninit.destroy(frame, dirty, swap),
            PageState::Anon(anon) => anon.destroy(frame, dirty, swap),
            PageState::File(file) => file.destroy(frame, dirty, swap),
        }
        self.frame = None;
    }
}
