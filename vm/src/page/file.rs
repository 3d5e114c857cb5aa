//! Pages of memory-mapped files.
use super::{LazySegment, Mapping, PageOperations};
use pagos::{KernelError, fs::RegularFile, mm::Frame, swap::SwapStore, warning};

/// A page whose content mirrors a range of a file.
///
/// Only the first `read_bytes` bytes of the page correspond to the file; the
/// tail of the last page of a mapping is zero-filled on load and never
/// written back.
#[derive(Debug, Clone)]
pub struct FilePage {
    segment: LazySegment,
    mapping: Mapping,
}

impl FilePage {
    pub(crate) fn new(segment: LazySegment, mapping: Mapping) -> Self {
        Self { segment, mapping }
    }

    /// The backing file.
    pub fn file(&self) -> &RegularFile {
        &self.segment.file
    }

    /// Offset within the file of the first byte of the page.
    pub fn offset(&self) -> usize {
        self.segment.offset
    }

    /// Number of bytes of the page that mirror the file.
    pub fn read_bytes(&self) -> usize {
        self.segment.read_bytes
    }

    /// Position of the page within its mapping.
    pub fn mapping(&self) -> Mapping {
        self.mapping
    }

    fn write_back(&self, frame: &Frame) -> Result<(), KernelError> {
        let written = self
            .segment
            .file
            .write(self.segment.offset, &frame.inner()[..self.segment.read_bytes])?;
        if written != self.segment.read_bytes {
            return Err(KernelError::IOError);
        }
        Ok(())
    }
}

impl PageOperations for FilePage {
    fn swap_in(&mut self, frame: &mut Frame, _swap: &mut dyn SwapStore) -> Result<(), KernelError> {
        self.segment.load(frame)
    }

    fn swap_out(
        &mut self,
        frame: &Frame,
        dirty: bool,
        _swap: &mut dyn SwapStore,
    ) -> Result<(), KernelError> {
        if dirty {
            self.write_back(frame)?;
        }
        Ok(())
    }

    fn destroy(&mut self, frame: Option<&Frame>, dirty: bool, _swap: &mut dyn SwapStore) {
        if let Some(frame) = frame.filter(|_| dirty) {
            if let Err(e) = self.write_back(frame) {
                warning!(
                    "Failed to write back {:?} at offset {:#x}: {:?}",
                    self.segment.file,
                    self.segment.offset,
                    e
                );
            }
        }
    }
}
