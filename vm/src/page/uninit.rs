//! Pages that have not been loaded yet.
//!
//! Reserving a region of the address space does not touch physical memory.
//! Instead, every page of the region is recorded as an [`UninitPage`] holding
//! an [`Initializer`]: a description of how to produce the page's initial
//! content. The initializer runs exactly once, when the page is first claimed,
//! after which the page takes on its target type.
use super::{AnonPage, FilePage, PageOperations, PageState, VmType};
use pagos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::RegularFile,
    mm::Frame,
    swap::SwapStore,
};

/// A run of file bytes at the beginning of a page; the rest of the page is
/// zero.
#[derive(Debug, Clone)]
pub struct LazySegment {
    /// The file to read from.
    pub file: RegularFile,
    /// Offset within the file of the first byte of the page.
    pub offset: usize,
    /// Number of bytes to read from the file.
    pub read_bytes: usize,
    /// Number of bytes to zero after the bytes read.
    pub zero_bytes: usize,
}

impl LazySegment {
    /// Fill `frame` with `read_bytes` bytes of the file followed by zeros.
    pub(crate) fn load(&self, frame: &mut Frame) -> Result<(), KernelError> {
        let buf = frame.inner_mut();
        let read = self.file.read(self.offset, &mut buf[..self.read_bytes])?;
        if read != self.read_bytes {
            return Err(KernelError::IOError);
        }
        buf[self.read_bytes..].fill(0);
        Ok(())
    }

    fn is_valid(&self) -> bool {
        self.read_bytes <= PAGE_SIZE && self.read_bytes + self.zero_bytes == PAGE_SIZE
    }
}

/// Position of a page within a memory-mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// First address of the region.
    pub start: Va,
    /// Index of the page within the region.
    pub index: usize,
    /// Number of pages of the region.
    pub pages: usize,
}

/// Deferred work that produces the initial content of a page.
#[derive(Debug, Clone)]
pub enum Initializer {
    /// Fill the page with zeros.
    ZeroFill,
    /// Load a piece of an executable segment.
    LoadSegment(LazySegment),
    /// Load a page of a memory-mapped file.
    MapFile(LazySegment, Mapping),
}

/// A page waiting for its first access.
#[derive(Debug, Clone)]
pub struct UninitPage {
    ty: VmType,
    init: Initializer,
}

impl UninitPage {
    /// Create an uninitialized page that becomes a page of type `ty` by
    /// running `init`.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if `init` cannot produce a page of
    ///   type `ty`: anonymous pages are zero-filled or loaded from a segment,
    ///   and file pages are loaded from a mapping. A segment must describe
    ///   exactly one page.
    pub fn new(ty: VmType, init: Initializer) -> Result<Self, KernelError> {
        let valid = match (&ty, &init) {
            (VmType::Anon, Initializer::ZeroFill) => true,
            (VmType::Anon, Initializer::LoadSegment(segment)) => segment.is_valid(),
            (VmType::File, Initializer::MapFile(segment, mapping)) => {
                segment.is_valid() && mapping.index < mapping.pages
            }
            _ => false,
        };
        if valid {
            Ok(Self { ty, init })
        } else {
            Err(KernelError::InvalidArgument)
        }
    }

    /// Type the page becomes once loaded.
    pub fn target(&self) -> VmType {
        self.ty
    }

    /// The deferred work of the page.
    pub fn initializer(&self) -> &Initializer {
        &self.init
    }

    /// State of the page once the initializer has run.
    pub(crate) fn initialized(&self) -> PageState {
        match &self.init {
            Initializer::MapFile(segment, mapping) => {
                PageState::File(FilePage::new(segment.clone(), *mapping))
            }
            Initializer::ZeroFill | Initializer::LoadSegment(_) => {
                PageState::Anon(AnonPage::new())
            }
        }
    }
}

impl PageOperations for UninitPage {
    fn swap_in(&mut self, frame: &mut Frame, _swap: &mut dyn SwapStore) -> Result<(), KernelError> {
        match &self.init {
            Initializer::ZeroFill => {
                frame.inner_mut().fill(0);
                Ok(())
            }
            Initializer::LoadSegment(segment) | Initializer::MapFile(segment, _) => {
                segment.load(frame)
            }
        }
    }

    fn swap_out(
        &mut self,
        frame: &Frame,
        _dirty: bool,
        _swap: &mut dyn SwapStore,
    ) -> Result<(), KernelError> {
        // Loading turns the page into its target type before it is mapped.
        panic!("uninitialized page backed by {frame:?}");
    }

    fn destroy(&mut self, _frame: Option<&Frame>, _dirty: bool, _swap: &mut dyn SwapStore) {}
}
