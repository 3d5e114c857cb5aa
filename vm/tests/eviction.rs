mod common;

use common::{IoMonitor, pattern, read_page, system, va};
use pagos::{
    KernelError,
    addressing::PAGE_SIZE,
    mm::{PhysicalMemory, USER_POOL_BASE},
    swap::{MemDisk, SwapTable},
};
use pagos_vm::{
    FrameTable, Process, SystemConfigurationBuilder,
    page::{Initializer, VmType},
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

const A: usize = 0x40_0000;
const B: usize = 0x40_1000;
const C: usize = 0x40_2000;

fn reserve_anon(process: &Process, addr: usize) {
    process
        .mm_struct
        .reserve(va(addr), true, VmType::Anon, Initializer::ZeroFill)
        .unwrap();
}

#[test]
fn clock_gives_a_second_chance() {
    let frame_table = system(2, 8);
    let process = Process::new(frame_table.clone());
    for addr in [A, B, C] {
        reserve_anon(&process, addr);
    }

    process.user_write(va(A), &pattern(1)).unwrap();
    process.user_write(va(B), &pattern(2)).unwrap();
    assert_eq!(frame_table.resident_frames(), 2);
    assert_eq!(frame_table.free_frames(), 0, "Both frames should be in use");
    assert_eq!(frame_table.evictions(), 0);

    // Both pages were accessed: the first sweep clears both bits and the
    // second one picks the page under the hand.
    process.user_write(va(C), &pattern(3)).unwrap();
    assert_eq!(frame_table.evictions(), 1);
    assert!(!process.mm_struct.is_resident(va(A)), "A should be evicted first");
    assert!(process.mm_struct.is_resident(va(B)));
    assert!(process.mm_struct.is_resident(va(C)));
    assert_eq!(
        frame_table.clock_hand(),
        USER_POOL_BASE + PAGE_SIZE,
        "The hand should rest just past the victim"
    );

    // B was not accessed since the sweep, so it goes next.
    assert_eq!(read_page(&process, va(A)), Ok(pattern(1)), "A should come back from swap");
    assert_eq!(frame_table.evictions(), 2);
    assert!(!process.mm_struct.is_resident(va(B)), "B should be evicted second");
    assert!(process.mm_struct.is_resident(va(C)));

    assert_eq!(read_page(&process, va(B)), Ok(pattern(2)));
    assert_eq!(read_page(&process, va(C)), Ok(pattern(3)));

    let pt = process.mm_struct.page_table().lock();
    for addr in [A, B, C] {
        assert_eq!(
            pt.is_present(va(addr)),
            process.mm_struct.is_resident(va(addr)),
            "A page should be mapped exactly when it is resident"
        );
    }
    pt.unlock();
}

#[test]
fn evicted_frame_is_reused_zeroed() {
    let frame_table = system(1, 8);
    let process = Process::new(frame_table.clone());
    reserve_anon(&process, A);
    reserve_anon(&process, B);

    process.user_write(va(A), &pattern(7)).unwrap();
    assert_eq!(
        read_page(&process, va(B)),
        Ok(vec![0; PAGE_SIZE]),
        "A reclaimed frame should not leak the previous page's content"
    );
    assert_eq!(frame_table.resident_frames(), 1);
    assert_eq!(frame_table.free_swap_slots(), 7, "A should occupy one slot");

    assert_eq!(read_page(&process, va(A)), Ok(pattern(7)));
    assert_eq!(
        frame_table.free_swap_slots(),
        7,
        "A's slot should be released on swap-in, and B should take one"
    );
}

#[test]
fn eviction_crosses_address_spaces() {
    let frame_table = system(2, 8);
    let first = Process::new(frame_table.clone());
    let second = Process::new(frame_table.clone());
    reserve_anon(&first, A);
    reserve_anon(&first, B);
    reserve_anon(&second, A);

    first.user_write(va(A), &pattern(1)).unwrap();
    first.user_write(va(B), &pattern(2)).unwrap();
    second.user_write(va(A), &pattern(3)).unwrap();

    assert_eq!(frame_table.evictions(), 1);
    assert!(!first.mm_struct.is_resident(va(A)));
    assert_eq!(read_page(&second, va(A)), Ok(pattern(3)));
    assert_eq!(read_page(&first, va(A)), Ok(pattern(1)));
    assert_eq!(read_page(&first, va(B)), Ok(pattern(2)));
}

#[test]
fn eviction_waits_for_a_busy_page_table() {
    let frame_table = system(2, 8);
    let owner = Process::new(frame_table.clone());
    reserve_anon(&owner, A);
    reserve_anon(&owner, B);
    owner.user_write(va(A), &pattern(1)).unwrap();
    owner.user_write(va(B), &pattern(2)).unwrap();

    let faulter = Process::new(frame_table.clone());
    reserve_anon(&faulter, A);
    let pt = owner.mm_struct.page_table().lock();
    let handle = thread::spawn(move || {
        let result = faulter.user_write(va(A), &pattern(3));
        (faulter, result)
    });
    thread::sleep(Duration::from_millis(50));
    assert!(
        !handle.is_finished(),
        "A claim should wait while every resident frame is busy"
    );
    pt.unlock();

    let (faulter, result) = handle.join().unwrap();
    assert_eq!(result, Ok(()), "The claim should succeed once a frame is evictable");
    assert_eq!(frame_table.evictions(), 1);
    assert_eq!(read_page(&faulter, va(A)), Ok(pattern(3)));
    assert_eq!(read_page(&owner, va(A)), Ok(pattern(1)));
    assert_eq!(read_page(&owner, va(B)), Ok(pattern(2)));
}

#[test]
fn concurrent_reader_does_not_starve_other_faults() {
    let frame_table = system(4, 128);
    let reader = Process::new(frame_table.clone());
    let addrs: Vec<_> = (0..4).map(|i| A + i * PAGE_SIZE).collect();
    for (i, addr) in addrs.iter().enumerate() {
        reserve_anon(&reader, *addr);
        reader.user_write(va(*addr), &pattern(i as u8)).unwrap();
    }
    assert_eq!(frame_table.free_frames(), 0, "The reader should own every frame");

    let writer = Process::new(frame_table.clone());
    const PAGES: usize = 64;
    for i in 0..PAGES {
        reserve_anon(&writer, 0x80_0000 + i * PAGE_SIZE);
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handle = {
        let stop = stop.clone();
        thread::spawn(move || {
            let mut rounds = 0;
            while !stop.load(Ordering::SeqCst) {
                for (i, addr) in addrs.iter().enumerate() {
                    assert_eq!(read_page(&reader, va(*addr)), Ok(pattern(i as u8)));
                }
                rounds += 1;
            }
            rounds
        })
    };

    for round in 0..500 {
        let page = round % PAGES;
        let addr = va(0x80_0000 + page * PAGE_SIZE);
        assert_eq!(
            writer.user_write(addr, &[page as u8; 8]),
            Ok(()),
            "A valid fault should not fail while frames can be evicted"
        );
    }
    stop.store(true, Ordering::SeqCst);
    let rounds = handle.join().unwrap();
    assert!(rounds > 0);

    for page in 0..PAGES {
        let mut buf = [0; 8];
        writer
            .user_read(va(0x80_0000 + page * PAGE_SIZE), &mut buf)
            .unwrap();
        assert_eq!(buf, [page as u8; 8]);
    }
    assert!(frame_table.evictions() > 0);
}

#[test]
fn ticket_expires_with_the_frame() {
    let frame_table = system(1, 8);
    let process = Process::new(frame_table.clone());
    reserve_anon(&process, A);
    reserve_anon(&process, B);
    process.user_write(va(A), &pattern(1)).unwrap();

    let pa = process.mm_struct.with_page(va(A), |page| page.frame()).flatten().unwrap();
    let ticket = frame_table.ticket(pa).unwrap();
    assert_eq!(
        frame_table.with_ticket(ticket, |frame| frame.inner()[..PAGE_SIZE].to_vec()),
        Some(pattern(1))
    );

    process.user_write(va(B), &pattern(2)).unwrap();
    assert_eq!(
        process.mm_struct.with_page(va(B), |page| page.frame()).flatten(),
        Some(pa),
        "The only frame should now back B"
    );
    assert_eq!(
        frame_table.with_ticket(ticket, |_| ()),
        None,
        "A ticket should not outlive the eviction of its frame"
    );
    let ticket = frame_table.ticket(pa).unwrap();
    assert_eq!(
        frame_table.with_ticket(ticket, |frame| frame.inner()[..PAGE_SIZE].to_vec()),
        Some(pattern(2))
    );
}

#[test]
fn destroying_an_address_space_returns_its_frames() {
    let frame_table = system(4, 8);
    let process = Process::new(frame_table.clone());
    for addr in [A, B, C] {
        reserve_anon(&process, addr);
        process.user_write(va(addr), &pattern(9)).unwrap();
    }
    assert_eq!(frame_table.free_frames(), 1);
    drop(process);
    assert_eq!(frame_table.free_frames(), 4, "Every frame should be back in the pool");
    assert_eq!(frame_table.resident_frames(), 0);
}

#[test]
fn swapped_pages_release_their_slots_on_destroy() {
    let frame_table = system(1, 8);
    let process = Process::new(frame_table.clone());
    for addr in [A, B, C] {
        reserve_anon(&process, addr);
        process.user_write(va(addr), &pattern(5)).unwrap();
    }
    assert_eq!(frame_table.free_swap_slots(), 6);
    process.mm_struct.destroy();
    assert_eq!(frame_table.free_swap_slots(), 8);
    assert_eq!(frame_table.free_frames(), 1);
}

#[test]
fn out_of_memory_without_frames() {
    let frame_table = system(0, 8);
    let process = Process::new(frame_table);
    reserve_anon(&process, A);
    assert_eq!(
        process.mm_struct.claim(va(A)),
        Err(KernelError::NoMemory),
        "Claiming without any frame should fail"
    );
    assert!(!process.mm_struct.is_resident(va(A)));
}

#[test]
fn full_swap_keeps_the_victim_resident() {
    let frame_table = system(1, 1);
    let process = Process::new(frame_table.clone());
    for addr in [A, B, C] {
        reserve_anon(&process, addr);
    }
    process.user_write(va(A), &pattern(1)).unwrap();
    process.user_write(va(B), &pattern(2)).unwrap();
    assert_eq!(frame_table.free_swap_slots(), 0);

    assert_eq!(
        process.user_write(va(C), &pattern(3)),
        Err(KernelError::NoSpace),
        "Evicting with a full swap should fail"
    );
    assert!(process.mm_struct.is_resident(va(B)), "The victim should stay resident");
    assert!(!process.mm_struct.is_resident(va(C)));
    assert_eq!(read_page(&process, va(B)), Ok(pattern(2)));
}

#[test]
fn swap_io_error_keeps_the_victim_resident() {
    common::init_logger();
    let monitor = IoMonitor::default();
    let frame_table = FrameTable::new(
        PhysicalMemory::new(USER_POOL_BASE, 1),
        Box::new(SwapTable::new(MemDisk::with_slots(4).hook(monitor.disk_hook()))),
    );
    let process = Process::new(frame_table.clone());
    reserve_anon(&process, A);
    reserve_anon(&process, B);
    process.user_write(va(A), &pattern(1)).unwrap();

    monitor.fail(true);
    assert_eq!(
        process.user_write(va(B), &pattern(2)),
        Err(KernelError::IOError),
        "A failed swap write should fail the claim"
    );
    assert_eq!(frame_table.evictions(), 0);
    assert_eq!(frame_table.free_swap_slots(), 4, "The slot of a failed write should be released");

    monitor.fail(false);
    assert_eq!(read_page(&process, va(A)), Ok(pattern(1)));
    process.user_write(va(B), &pattern(2)).unwrap();
    assert_eq!(read_page(&process, va(A)), Ok(pattern(1)));
}

#[test]
fn builder_defaults() {
    common::init_logger();
    let frame_table = SystemConfigurationBuilder::new().user_frames(3).build();
    assert_eq!(frame_table.free_frames(), 3);
    assert_eq!(frame_table.resident_frames(), 0);
    assert_eq!(frame_table.free_swap_slots(), pagos_vm::DEFAULT_SWAP_SLOTS);
    assert_eq!(frame_table.memory().capacity(), 3);
}
