mod common;

use common::{file, file_contents, pattern, process, read_page, system, va};
use pagos::{KernelError, addressing::PAGE_SIZE};
use pagos_vm::{
    Process, USER_STACK,
    page::{Initializer, LazySegment, VmType},
};

#[test]
fn child_gets_a_private_copy() {
    let mut parent = process(16);
    parent.setup_stack().unwrap();
    let mm = &parent.mm_struct;
    mm.reserve(va(0x40_0000), true, VmType::Anon, Initializer::ZeroFill)
        .unwrap();
    parent.user_write(va(0x40_0000), &pattern(1)).unwrap();

    let child = parent.fork().unwrap();
    assert_eq!(child.mm_struct.pages(), mm.pages());
    assert_eq!(
        read_page(&child, va(0x40_0000)),
        Ok(pattern(1)),
        "The child should see the parent's data"
    );

    child.user_write(va(0x40_0000), &pattern(2)).unwrap();
    assert_eq!(
        read_page(&parent, va(0x40_0000)),
        Ok(pattern(1)),
        "A write of the child should not be visible to the parent"
    );
    parent.user_write(va(0x40_0000), &pattern(3)).unwrap();
    assert_eq!(
        read_page(&child, va(0x40_0000)),
        Ok(pattern(2)),
        "A write of the parent should not be visible to the child"
    );
}

#[test]
fn uninitialized_pages_stay_lazy() {
    let parent = process(16);
    let image = file(&pattern(5));
    parent
        .mm_struct
        .reserve(
            va(0x40_0000),
            false,
            VmType::Anon,
            Initializer::LoadSegment(LazySegment {
                file: image,
                offset: 0,
                read_bytes: PAGE_SIZE,
                zero_bytes: 0,
            }),
        )
        .unwrap();
    parent
        .mm_struct
        .reserve(va(0x40_1000), true, VmType::Anon, Initializer::ZeroFill)
        .unwrap();

    let child = parent.fork().unwrap();
    let frame_table = child.mm_struct.frame_table();
    assert_eq!(
        frame_table.resident_frames(),
        0,
        "Pages never touched should not be loaded by a fork"
    );
    assert!(!child.mm_struct.is_resident(va(0x40_0000)));
    assert_eq!(child.mm_struct.page_type(va(0x40_0000)), Some(VmType::Anon));
    assert_eq!(read_page(&child, va(0x40_0000)), Ok(pattern(5)));
    assert_eq!(
        child.user_write(va(0x40_0000), &[0; 4]),
        Err(KernelError::InvalidAccess),
        "The child's copy should stay read-only"
    );
    assert_eq!(read_page(&child, va(0x40_1000)), Ok(vec![0; PAGE_SIZE]));
}

#[test]
fn stack_is_set_up_again() {
    let mut parent = process(16);
    parent.setup_stack().unwrap();
    parent.rsp = USER_STACK - PAGE_SIZE;
    parent
        .user_write(USER_STACK - 2 * PAGE_SIZE, &pattern(1))
        .unwrap();
    assert_eq!(parent.mm_struct.pages(), 2);

    let child = parent.fork().unwrap();
    assert_eq!(child.rsp, parent.rsp);
    assert_eq!(child.mm_struct.pages(), 2);
    assert!(
        child.mm_struct.is_resident(USER_STACK - PAGE_SIZE),
        "The top of the child's stack should be resident"
    );
    assert!(
        !child.mm_struct.is_resident(USER_STACK - 2 * PAGE_SIZE),
        "The rest of the child's stack should be loaded lazily"
    );
    assert_eq!(
        read_page(&child, USER_STACK - 2 * PAGE_SIZE),
        Ok(vec![0; PAGE_SIZE])
    );
}

#[test]
fn evicted_pages_are_copied() {
    let frame_table = system(2, 16);
    let parent = Process::new(frame_table.clone());
    for (i, addr) in [0x40_0000, 0x40_1000, 0x40_2000].into_iter().enumerate() {
        parent
            .mm_struct
            .reserve(va(addr), true, VmType::Anon, Initializer::ZeroFill)
            .unwrap();
        parent.user_write(va(addr), &pattern(i as u8)).unwrap();
    }
    assert!(frame_table.evictions() > 0);

    let child = parent.fork().unwrap();
    for (i, addr) in [0x40_0000, 0x40_1000, 0x40_2000].into_iter().enumerate() {
        assert_eq!(read_page(&child, va(addr)), Ok(pattern(i as u8)));
        assert_eq!(read_page(&parent, va(addr)), Ok(pattern(i as u8)));
    }
}

#[test]
fn failed_fork_releases_the_partial_copy() {
    let frame_table = system(2, 0);
    let parent = Process::new(frame_table.clone());
    for addr in [0x40_0000, 0x40_1000] {
        parent
            .mm_struct
            .reserve(va(addr), true, VmType::Anon, Initializer::ZeroFill)
            .unwrap();
        parent.user_write(va(addr), &pattern(1)).unwrap();
    }

    assert_eq!(
        parent.fork().err(),
        Some(KernelError::NoSpace),
        "Copying without a free frame or swap should fail"
    );
    assert_eq!(frame_table.resident_frames(), 2);
    assert_eq!(parent.mm_struct.pages(), 2);
    assert_eq!(read_page(&parent, va(0x40_0000)), Ok(pattern(1)));
    assert_eq!(read_page(&parent, va(0x40_1000)), Ok(pattern(1)));
}

#[test]
fn dirty_file_pages_are_written_back_by_the_child() {
    let parent = process(16);
    let shared = file(&pattern(0));
    let addr = parent
        .mm_struct
        .mmap(va(0x50_0000), PAGE_SIZE, true, &shared, 0)
        .unwrap();
    parent.user_write(addr, &pattern(1)).unwrap();

    let child = parent.fork().unwrap();
    assert_eq!(child.mm_struct.page_type(addr), Some(VmType::File));
    parent.mm_struct.munmap(addr).unwrap();
    assert_eq!(file_contents(&shared), pattern(1));

    child.user_write(addr, &pattern(2)).unwrap();
    drop(child);
    assert_eq!(
        file_contents(&shared),
        pattern(2),
        "The child's modification should reach the file"
    );
}
