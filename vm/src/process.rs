//! A process's view of its memory.
//!
//! [`Process`] bundles an address space with the CPU state the page fault
//! handler needs: the user stack pointer, and the stack pointer saved when
//! the process entered the kernel. Several threads may share one address
//! space; each has its own [`Process`].
//!
//! The kernel reads and writes user memory through [`Process::copy_from_user`]
//! and [`Process::copy_to_user`], which behave like the MMU would: every page
//! is translated through the page table, and a failed translation raises a
//! page fault that is handled before the access is retried. User code itself
//! is modeled by [`Process::user_read`] and [`Process::user_write`].
use crate::{
    FrameTable, MmStruct, USER_STACK,
    lazy_pager::PageFaultReason,
};
use alloc::sync::Arc;
use crossbeam_utils::Backoff;
use pagos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    debug,
    interrupt::PFErrorCode,
};

/// A thread of a user process.
pub struct Process {
    /// Address space of the process.
    pub mm_struct: Arc<MmStruct>,
    /// User stack pointer.
    pub rsp: Va,
    kernel_rsp: Option<Va>,
}

impl Process {
    /// Create a process with an empty address space.
    pub fn new(frame_table: Arc<FrameTable>) -> Self {
        Self {
            mm_struct: Arc::new(MmStruct::new(frame_table)),
            rsp: USER_STACK,
            kernel_rsp: None,
        }
    }

    /// Create another thread sharing this thread's address space.
    pub fn spawn_thread(&self, rsp: Va) -> Self {
        Self {
            mm_struct: self.mm_struct.clone(),
            rsp,
            kernel_rsp: None,
        }
    }

    /// Set up the user stack and point the stack pointer at its top.
    pub fn setup_stack(&mut self) -> Result<(), KernelError> {
        self.rsp = self.mm_struct.setup_stack()?;
        Ok(())
    }

    /// Record the user stack pointer on entry to the kernel, such as at the
    /// start of a system call.
    pub fn record_kernel_rsp(&mut self, rsp: Va) {
        self.kernel_rsp = Some(rsp);
    }

    /// Forget the stack pointer recorded on kernel entry.
    pub fn leave_kernel(&mut self) {
        self.kernel_rsp = None;
    }

    /// Stack pointer to consult for a fault raised in user mode if `is_user`
    /// is set, or in kernel mode otherwise.
    pub fn current_stack_pointer(&self, is_user: bool) -> Va {
        match self.kernel_rsp {
            Some(rsp) if !is_user => rsp,
            _ => self.rsp,
        }
    }

    /// Handle a page fault raised at `cr2` with the error code `ec`.
    ///
    /// # Errors
    /// See [`MmStruct::handle_page_fault`]. An error means the faulting
    /// access is invalid.
    pub fn page_fault(&self, ec: PFErrorCode, cr2: Va) -> Result<(), KernelError> {
        let reason = PageFaultReason::new(ec, cr2);
        let rsp = self.current_stack_pointer(reason.is_user);
        let result = self.mm_struct.handle_page_fault(&reason, rsp);
        if let Err(e) = result {
            debug!("Segmentation fault: {:?} ({:?})", reason, e);
        }
        result
    }

    /// Fork the process. The child gets a copy of the address space and the
    /// same stack pointers.
    pub fn fork(&self) -> Result<Process, KernelError> {
        Ok(Process {
            mm_struct: Arc::new(self.mm_struct.fork()?),
            rsp: self.rsp,
            kernel_rsp: self.kernel_rsp,
        })
    }

    /// Read user memory at `va` from user mode.
    pub fn user_read(&self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let len = buf.len();
        self.access(va, len, false, true, |page, pos| {
            buf[pos..pos + page.len()].copy_from_slice(page)
        })
    }

    /// Write user memory at `va` from user mode.
    pub fn user_write(&self, va: Va, data: &[u8]) -> Result<(), KernelError> {
        self.access(va, data.len(), true, true, |page, pos| {
            page.copy_from_slice(&data[pos..pos + page.len()])
        })
    }

    /// Read user memory at `va` from the kernel, on behalf of the process.
    ///
    /// # Errors
    /// The error of the first fault that cannot be handled.
    pub fn copy_from_user(&self, va: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        let len = buf.len();
        self.access(va, len, false, false, |page, pos| {
            buf[pos..pos + page.len()].copy_from_slice(page)
        })
    }

    /// Write user memory at `va` from the kernel, on behalf of the process.
    ///
    /// # Errors
    /// The error of the first fault that cannot be handled.
    pub fn copy_to_user(&self, va: Va, data: &[u8]) -> Result<(), KernelError> {
        self.access(va, data.len(), true, false, |page, pos| {
            page.copy_from_slice(&data[pos..pos + page.len()])
        })
    }

    /// Access `len` bytes at `va` page by page. `f` receives the bytes of one
    /// page and their position within the access.
    ///
    /// The page table is only locked for the translation. If the frame is
    /// evicted before the bytes are reached, the page is translated again.
    fn access(
        &self,
        va: Va,
        len: usize,
        is_write: bool,
        is_user: bool,
        mut f: impl FnMut(&mut [u8], usize),
    ) -> Result<(), KernelError> {
        let page_table = self.mm_struct.page_table();
        let frame_table = self.mm_struct.frame_table();
        let mut done = 0;
        while done < len {
            let addr = va.checked_add(done).ok_or(KernelError::BadAddress)?;
            let chunk = (PAGE_SIZE - addr.offset()).min(len - done);
            let backoff = Backoff::new();
            loop {
                let mut pt = page_table.lock();
                let translated = pt
                    .translate(addr, is_write, is_user)
                    .map(|pa| (frame_table.ticket(pa.page_down()), pa.offset()));
                pt.unlock();
                match translated {
                    Ok((Some(ticket), offset)) => {
                        let accessed = frame_table.with_ticket(ticket, |frame| {
                            f(&mut frame.inner_mut()[offset..offset + chunk], done)
                        });
                        if accessed.is_some() {
                            break;
                        }
                        backoff.snooze();
                    }
                    // Mapped, but not registered in the frame table yet.
                    Ok((None, _)) => backoff.snooze(),
                    Err(ec) => self.page_fault(ec, addr)?,
                }
            }
            done += chunk;
        }
        Ok(())
    }
}
