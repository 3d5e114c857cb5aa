//! Page fault handling.
//!
//! Pages are loaded on demand: reserving a page only records it in the
//! supplemental page table, and the first access to it raises a page fault.
//! The handler decides what the fault means, and either makes the page
//! resident or reports the access as invalid:
//!
//! 1. A fault on a kernel address, or on a page that is present (a write to a
//!    read-only page), is an invalid access.
//! 2. A fault on a reserved page claims it. The faulting instruction can be
//!    restarted once the handler returns.
//! 3. A fault on an unreserved address that looks like a stack access grows
//!    the stack by one page.
//! 4. Anything else is a bad address.
//!
//! The stack grows only for accesses at most [`STACK_GROWTH_SLACK`] bytes
//! below the stack pointer, and only within [`STACK_LIMIT`] bytes below
//! [`USER_STACK`]. The stack pointer consulted is the user one for faults
//! raised by user code, and the one saved on kernel entry for faults the
//! kernel raises while touching user memory on a process's behalf.
use crate::{MmStruct, STACK_GROWTH_SLACK, STACK_LIMIT, USER_STACK};
use pagos::{KernelError, addressing::Va, debug, interrupt::PFErrorCode};

/// Represents the reason for a page fault in a virtual memory system.
///
/// This struct is used to capture various details about a page fault, including
/// the faulting address, the type of access that caused the fault (read or
/// write), and whether the fault was due to a non-present page or a user-mode
/// access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFaultReason {
    /// The address that caused the page fault.
    pub fault_addr: Va,
    /// Whether the fault was due to a write access.
    pub is_write_access: bool,
    /// Whether the faulting page was present in memory.
    pub is_present: bool,
    /// Whether the fault occurred in user mode.
    pub is_user: bool,
}

impl PageFaultReason {
    /// Decode a page fault from the error code and the faulting address
    /// (`cr2`).
    pub fn new(ec: PFErrorCode, cr2: Va) -> Self {
        Self {
            fault_addr: cr2,
            is_write_access: ec.contains(PFErrorCode::WRITE_ACCESS),
            is_present: ec.contains(PFErrorCode::PRESENT),
            is_user: ec.contains(PFErrorCode::USER),
        }
    }

    /// Checks if the page fault was caused by demand paging, that is, by an
    /// access to a page that is not present.
    #[inline]
    pub fn is_demand_paging_fault(&self) -> bool {
        !self.is_present
    }
}

/// What a page fault means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The address belongs to the kernel.
    KernelAddress,
    /// The access is not allowed on the page.
    ProtectionViolation,
    /// The page is reserved but not resident.
    ResidentMiss,
    /// No page contains the address, but it lies where the stack may grow.
    StackGrowthCandidate,
    /// No page contains the address.
    Unmapped,
}

/// Returns `true` if `addr` lies where the stack may grow, given the stack
/// pointer `rsp`.
pub fn is_stack_access(addr: Va, rsp: Va) -> bool {
    let addr = addr.into_usize();
    let top = USER_STACK.into_usize();
    addr < top
        && addr >= top - STACK_LIMIT
        && addr.saturating_add(STACK_GROWTH_SLACK) >= rsp.into_usize()
}

impl MmStruct {
    /// Decide what the fault described by `reason` means, given the stack
    /// pointer `rsp` at the time of the fault.
    pub fn classify_fault(&self, reason: &PageFaultReason, rsp: Va) -> FaultKind {
        let addr = reason.fault_addr;
        if !addr.is_user() {
            return FaultKind::KernelAddress;
        }
        if !reason.is_demand_paging_fault() {
            return FaultKind::ProtectionViolation;
        }
        match self.with_page(addr, |page| page.writable()) {
            Some(false) if reason.is_write_access => FaultKind::ProtectionViolation,
            Some(_) => FaultKind::ResidentMiss,
            None if is_stack_access(addr, rsp) => FaultKind::StackGrowthCandidate,
            None => FaultKind::Unmapped,
        }
    }

    /// Handle the page fault described by `reason`.
    ///
    /// On success the faulting page is resident and mapped, and the faulting
    /// access can be retried.
    ///
    /// # Errors
    /// - [`KernelError::InvalidAccess`] if the address belongs to the kernel
    ///   or the access is not allowed on the page.
    /// - [`KernelError::BadAddress`] if no page contains the address and it
    ///   is not a stack access.
    /// - Any error of [`MmStruct::claim`].
    pub fn handle_page_fault(&self, reason: &PageFaultReason, rsp: Va) -> Result<(), KernelError> {
        let kind = self.classify_fault(reason, rsp);
        debug!("Page fault at {:?}: {:?}", reason.fault_addr, kind);
        match kind {
            FaultKind::KernelAddress | FaultKind::ProtectionViolation => {
                Err(KernelError::InvalidAccess)
            }
            FaultKind::Unmapped => Err(KernelError::BadAddress),
            FaultKind::ResidentMiss => self.claim(reason.fault_addr),
            FaultKind::StackGrowthCandidate => self.grow_stack(reason.fault_addr),
        }
    }

    /// Add a zero-filled stack page containing `addr` and make it resident.
    pub fn grow_stack(&self, addr: Va) -> Result<(), KernelError> {
        let va = addr.page_down();
        match self.reserve_stack_page(va) {
            // Another thread grew the stack first.
            Ok(()) | Err(KernelError::FileExist) => (),
            Err(e) => return Err(e),
        }
        debug!("Grow stack to {:?}", va);
        self.claim(va)
    }
}
