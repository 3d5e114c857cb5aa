//! Anonymous pages.
use super::PageOperations;
use pagos::{
    KernelError,
    mm::Frame,
    swap::{SwapSlot, SwapStore},
};

/// A page with no backing file.
///
/// While resident, the content lives only in its frame. When evicted, the
/// content is written to a swap slot, which is read back and released on the
/// next swap-in.
#[derive(Debug, Default)]
pub struct AnonPage {
    slot: Option<SwapSlot>,
}

impl AnonPage {
    /// Create an anonymous page that has never been swapped out.
    pub fn new() -> Self {
        Self { slot: None }
    }

    /// The swap slot holding the page's content, if it is swapped out.
    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.slot
    }
}

impl PageOperations for AnonPage {
    fn swap_in(&mut self, frame: &mut Frame, swap: &mut dyn SwapStore) -> Result<(), KernelError> {
        match self.slot {
            Some(slot) => {
                swap.read_slot(slot, frame.inner_mut())?;
                swap.free_slot(slot);
                self.slot = None;
            }
            None => frame.inner_mut().fill(0),
        }
        Ok(())
    }

    fn swap_out(
        &mut self,
        frame: &Frame,
        _dirty: bool,
        swap: &mut dyn SwapStore,
    ) -> Result<(), KernelError> {
        let slot = swap.alloc_slot()?;
        if let Err(e) = swap.write_slot(slot, frame.inner()) {
            swap.free_slot(slot);
            return Err(e);
        }
        self.slot = Some(slot);
        Ok(())
    }

    fn destroy(&mut self, _frame: Option<&Frame>, _dirty: bool, swap: &mut dyn SwapStore) {
        if let Some(slot) = self.slot.take() {
            swap.free_slot(slot);
        }
    }
}
