//! Frame table and clock eviction.
//!
//! The frame table is the kernel-wide record of every physical frame that
//! currently backs a user page, shared by all address spaces. It is indexed by
//! frame number, so each slot either holds the frame together with the page it
//! backs, or is empty.
//!
//! ## Eviction
//!
//! When the physical pool runs dry, [`FrameTable::allocate_frame`] reclaims a
//! frame from some resident page with the *clock* (second chance) policy. A
//! hand sweeps the table in frame order and keeps its position across
//! evictions:
//!
//! - a frame whose mapping was accessed since the last sweep gets its accessed
//!   bit cleared and is skipped,
//! - the first frame found with a clear accessed bit is the victim.
//!
//! Two sweeps always suffice: the first one clears every bit it sees. The
//! hand stops just past the victim, so the next eviction resumes from there.
//!
//! The victim's page saves its content (`swap_out`), its mapping is removed so
//! that the next access faults, and the frame is handed to the caller.
//!
//! ## Locking
//!
//! One lock covers the table, the hand, and the swap store. A claim holds the
//! faulting page's lock when it asks for a frame, so the sweep never blocks on
//! another page or page table: it only `try_lock`s them and skips a busy one.
//! A sweep that skipped busy frames drops the table lock, backs off, and
//! sweeps again. Only frames of pages the caller itself holds can never
//! become free; a sweep that found nothing else gives up.
//!
//! Every registration of a frame gets a fresh generation number. A
//! [`FrameTicket`] taken while the page table maps the frame stays valid only
//! as long as that registration does, so an access can translate an address,
//! release the page table, and still notice that the frame was evicted in
//! between.
use crate::{page::Page, page_table::PageTable, spt::PageRef};
use alloc::{boxed::Box, sync::Arc, sync::Weak, vec::Vec};
use crossbeam_utils::{Backoff, CachePadded};
use pagos::{
    KernelError,
    addressing::{Pa, Va},
    debug,
    mm::{Frame, PhysicalMemory},
    swap::SwapStore,
    sync::SpinLock,
    warning,
};

/// The page a frame backs, and the page table that maps it.
pub(crate) struct FrameOwner {
    pub page: Weak<SpinLock<Page>>,
    pub page_table: Weak<SpinLock<PageTable>>,
    pub va: Va,
}

struct FrameEntry {
    frame: Frame,
    owner: FrameOwner,
    generation: u64,
}

/// One registration of a frame in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTicket {
    pa: Pa,
    generation: u64,
}

struct FrameTableInner {
    entries: Vec<Option<FrameEntry>>,
    hand: usize,
    resident: usize,
    evictions: usize,
    generation: u64,
    swap: Box<dyn SwapStore>,
}

enum Sweep {
    Evicted(Frame),
    /// Some frames were skipped because another thread held their page or
    /// page table.
    Busy,
}

/// The kernel-wide table of frames backing user pages.
pub struct FrameTable {
    memory: Arc<PhysicalMemory>,
    inner: CachePadded<SpinLock<FrameTableInner>>,
}

impl FrameTable {
    /// Create a frame table over the frames of `memory`, evicting anonymous
    /// pages to `swap`.
    pub fn new(memory: Arc<PhysicalMemory>, swap: Box<dyn SwapStore>) -> Arc<Self> {
        let entries = (0..memory.capacity()).map(|_| None).collect();
        Arc::new(Self {
            memory,
            inner: CachePadded::new(SpinLock::new(FrameTableInner {
                entries,
                hand: 0,
                resident: 0,
                evictions: 0,
                generation: 0,
                swap,
            })),
        })
    }

    /// The physical pool the frames come from.
    pub fn memory(&self) -> &Arc<PhysicalMemory> {
        &self.memory
    }

    /// Obtain a zero-filled frame, evicting a resident page if the pool is
    /// exhausted.
    ///
    /// The caller may hold the lock of `held`; its frame is never evicted.
    /// The returned frame is not in the table; [`register`](Self::register)
    /// it once it backs a page.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if no frame is free and every resident
    ///   frame backs `held`, or no frame is resident at all.
    /// - Any error of the victim's `swap_out`, such as
    ///   [`KernelError::NoSpace`] when swap is full.
    pub fn allocate_frame(&self, held: Option<&PageRef>) -> Result<Frame, KernelError> {
        let backoff = Backoff::new();
        loop {
            if let Some(frame) = self.memory.alloc() {
                return Ok(frame);
            }
            let mut inner = self.inner.lock();
            let sweep = inner.evict(held);
            inner.unlock();
            match sweep? {
                Sweep::Evicted(frame) => return Ok(frame),
                Sweep::Busy => backoff.snooze(),
            }
        }
    }

    /// Record that `frame` now backs the page `owner` describes.
    pub(crate) fn register(&self, frame: Frame, owner: FrameOwner) {
        let index = frame.index();
        let mut inner = self.inner.lock();
        debug_assert!(inner.entries[index].is_none());
        inner.generation += 1;
        let generation = inner.generation;
        inner.entries[index] = Some(FrameEntry {
            frame,
            owner,
            generation,
        });
        inner.resident += 1;
        inner.unlock();
    }

    /// Take the frame at `pa` out of the table.
    ///
    /// The caller holds the lock of the page the frame backs.
    pub(crate) fn release(&self, pa: Pa) -> Option<Frame> {
        let index = self.memory.frame_index(pa)?;
        let mut inner = self.inner.lock();
        let entry = inner.entries[index].take();
        if entry.is_some() {
            inner.resident -= 1;
        }
        inner.unlock();
        entry.map(|entry| entry.frame)
    }

    /// Run `f` on the resident frame at `pa`.
    ///
    /// Returns `None` if no page is backed by the frame at `pa`.
    pub fn with_frame<R>(&self, pa: Pa, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        let index = self.memory.frame_index(pa)?;
        let mut inner = self.inner.lock();
        let result = inner.entries[index]
            .as_mut()
            .map(|entry| f(&mut entry.frame));
        inner.unlock();
        result
    }

    /// Ticket for the current registration of the frame at `pa`.
    ///
    /// Taken while the page table that maps `pa` is locked, the ticket names
    /// the page that mapping belongs to.
    pub fn ticket(&self, pa: Pa) -> Option<FrameTicket> {
        let index = self.memory.frame_index(pa)?;
        let inner = self.inner.lock();
        let ticket = inner.entries[index].as_ref().map(|entry| FrameTicket {
            pa: entry.frame.pa(),
            generation: entry.generation,
        });
        inner.unlock();
        ticket
    }

    /// Run `f` on the frame `ticket` was taken for.
    ///
    /// Returns `None` if the frame was released or evicted since.
    pub fn with_ticket<R>(&self, ticket: FrameTicket, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        let index = self.memory.frame_index(ticket.pa)?;
        let mut inner = self.inner.lock();
        let result = inner.entries[index]
            .as_mut()
            .filter(|entry| entry.generation == ticket.generation)
            .map(|entry| f(&mut entry.frame));
        inner.unlock();
        result
    }

    /// Run `f` with exclusive access to the swap store.
    pub fn with_swap<R>(&self, f: impl FnOnce(&mut dyn SwapStore) -> R) -> R {
        let mut inner = self.inner.lock();
        let result = f(&mut *inner.swap);
        inner.unlock();
        result
    }

    /// Number of frames that back a page.
    pub fn resident_frames(&self) -> usize {
        let inner = self.inner.lock();
        let resident = inner.resident;
        inner.unlock();
        resident
    }

    /// Number of frames left in the physical pool.
    pub fn free_frames(&self) -> usize {
        self.memory.free_frames()
    }

    /// Number of evictions performed so far.
    pub fn evictions(&self) -> usize {
        let inner = self.inner.lock();
        let evictions = inner.evictions;
        inner.unlock();
        evictions
    }

    /// Number of unused swap slots.
    pub fn free_swap_slots(&self) -> usize {
        self.with_swap(|swap| swap.free_slots())
    }

    /// Physical address of the frame the clock hand points to.
    pub fn clock_hand(&self) -> Pa {
        let inner = self.inner.lock();
        let hand = inner.hand;
        inner.unlock();
        self.memory.frame_pa(hand)
    }
}

impl FrameTableInner {
    fn evict(&mut self, held: Option<&PageRef>) -> Result<Sweep, KernelError> {
        let n = self.entries.len();
        if self.resident == 0 {
            warning!("Out of memory: no frame is free and none is resident.");
            return Err(KernelError::NoMemory);
        }
        let mut busy = 0;
        for _ in 0..2 * n {
            let index = self.hand;
            self.hand = (self.hand + 1) % n;

            let Some(entry) = &self.entries[index] else {
                continue;
            };
            let va = entry.owner.va;
            let (Some(page_table), Some(page)) =
                (entry.owner.page_table.upgrade(), entry.owner.page.upgrade())
            else {
                panic!("{:?} backs {:?} of a dead address space", entry.frame, va);
            };
            if held.is_some_and(|held| Arc::ptr_eq(held, &page)) {
                continue;
            }

            let Ok(mut pt) = page_table.try_lock() else {
                busy += 1;
                continue;
            };
            if pt.is_accessed(va) {
                pt.clear_accessed(va);
                pt.unlock();
                continue;
            }
            let Ok(mut page) = page.try_lock() else {
                pt.unlock();
                busy += 1;
                continue;
            };

            let dirty = pt.is_dirty(va);
            let Some(entry) = self.entries[index].take() else {
                unreachable!()
            };
            match page.swap_out(&entry.frame, dirty, &mut *self.swap) {
                Ok(()) => {
                    let unmapped = pt.unmap(va);
                    debug_assert_eq!(unmapped, Ok(entry.frame.pa()));
                    debug!(
                        "Evict {:?} ({:?}) from {:?}, dirty: {}",
                        va,
                        page.ty(),
                        entry.frame,
                        dirty
                    );
                    page.unlock();
                    pt.unlock();
                    self.resident -= 1;
                    self.evictions += 1;
                    let mut frame = entry.frame;
                    frame.inner_mut().fill(0);
                    return Ok(Sweep::Evicted(frame));
                }
                Err(e) => {
                    warning!("Failed to evict {:?}: {:?}", va, e);
                    self.entries[index] = Some(entry);
                    page.unlock();
                    pt.unlock();
                    return Err(e);
                }
            }
        }
        if busy > 0 {
            debug!("Every evictable frame is busy ({} skipped), retrying.", busy);
            return Ok(Sweep::Busy);
        }
        warning!("Out of memory: every resident frame is held by the caller.");
        Err(KernelError::NoMemory)
    }
}
