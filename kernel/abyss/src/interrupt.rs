//! Page-fault error code reported by the MMU.

bitflags::bitflags! {
    /// Error code pushed by the CPU on a page fault (#PF).
    ///
    /// Together with the faulting address (CR2), it tells the fault handler
    /// why the translation failed.
    pub struct PFErrorCode: u64 {
        /// The fault was caused by a page-level protection violation. When
        /// clear, the fault was caused by a non-present page.
        const PRESENT = 1 << 0;
        /// The access causing the fault was a write.
        const WRITE_ACCESS = 1 << 1;
        /// The access was made while the CPU was in user mode.
        const USER = 1 << 2;
        /// A reserved bit was set in some paging-structure entry.
        const RESERVED_WRITE = 1 << 3;
        /// The access was an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}
