mod common;

use common::va;
use pagos::{
    addressing::{PAGE_SIZE, Pa},
    interrupt::PFErrorCode,
    mm::page_table::{PageTableMappingError, Permission},
};
use pagos_vm::page_table::PageTable;

fn pa(addr: usize) -> Pa {
    Pa::new(addr).unwrap()
}

#[test]
fn map_and_unmap() {
    let mut pt = PageTable::new();
    let addr = va(0x40_0000);

    assert_eq!(
        pt.map(addr, pa(0x20_0000), Permission::READ | Permission::USER),
        Ok(()),
        "Mapping an unmapped, aligned user address should succeed"
    );
    assert!(pt.is_present(addr), "A mapped address should be present");
    assert!(
        !pt.is_present(addr + PAGE_SIZE),
        "The neighbor of a mapped address should not be present"
    );
    assert_eq!(pt.mapped(), 1);

    assert_eq!(
        pt.map(addr, pa(0x30_0000), Permission::READ | Permission::USER),
        Err(PageTableMappingError::Duplicated),
        "Mapping an address twice should fail"
    );
    assert_eq!(
        pt.unmap(addr),
        Ok(pa(0x20_0000)),
        "Unmapping should return the physical address that was mapped"
    );
    assert!(!pt.is_present(addr));
    assert_eq!(
        pt.unmap(addr),
        Err(PageTableMappingError::NotExist),
        "Unmapping an unmapped address should fail"
    );
    assert_eq!(pt.mapped(), 0);
}

#[test]
fn map_rejects_bad_arguments() {
    let mut pt = PageTable::new();

    assert_eq!(
        pt.map(va(0x40_0123), pa(0x20_0000), Permission::READ),
        Err(PageTableMappingError::Unaligned),
        "A misaligned virtual address should be rejected"
    );
    assert_eq!(
        pt.map(va(0x40_0000), pa(0x20_0123), Permission::READ),
        Err(PageTableMappingError::Unaligned),
        "A misaligned physical address should be rejected"
    );
    assert_eq!(
        pt.map(va(0xffff_8000_0000_0000), pa(0x20_0000), Permission::READ),
        Err(PageTableMappingError::InvalidPermission),
        "A kernel address should never be mapped in a user page table"
    );
    assert_eq!(
        pt.map(va(0x40_0000), pa(0x20_0000), Permission::WRITE),
        Err(PageTableMappingError::InvalidPermission),
        "A mapping must be readable"
    );
    assert_eq!(pt.mapped(), 0);
}

#[test]
fn translate_tracks_accessed_and_dirty() {
    let mut pt = PageTable::new();
    let addr = va(0x40_0000);
    pt.map(
        addr,
        pa(0x20_0000),
        Permission::READ | Permission::WRITE | Permission::USER,
    )
    .unwrap();
    assert!(!pt.is_accessed(addr), "A fresh mapping should not be accessed");
    assert!(!pt.is_dirty(addr), "A fresh mapping should not be dirty");

    assert_eq!(pt.translate(addr + 0x10, false, true), Ok(pa(0x20_0010)));
    assert!(pt.is_accessed(addr), "A read should set the accessed bit");
    assert!(!pt.is_dirty(addr), "A read should not set the dirty bit");

    pt.clear_accessed(addr);
    assert!(!pt.is_accessed(addr));

    assert_eq!(pt.translate(addr + 0xff8, true, true), Ok(pa(0x20_0ff8)));
    assert!(pt.is_accessed(addr), "A write should set the accessed bit");
    assert!(pt.is_dirty(addr), "A write should set the dirty bit");
}

#[test]
fn translate_reports_faults() {
    let mut pt = PageTable::new();
    let ro = va(0x40_0000);
    let kernel_only = va(0x40_1000);
    pt.map(ro, pa(0x20_0000), Permission::READ | Permission::USER)
        .unwrap();
    pt.map(kernel_only, pa(0x20_1000), Permission::READ | Permission::WRITE)
        .unwrap();

    assert_eq!(
        pt.translate(va(0x50_0000), false, true),
        Err(PFErrorCode::USER),
        "Reading an unmapped page should fault as not present"
    );
    assert_eq!(
        pt.translate(va(0x50_0000), true, false),
        Err(PFErrorCode::WRITE_ACCESS),
        "A kernel write to an unmapped page should fault as not present"
    );
    assert_eq!(
        pt.translate(ro, true, true),
        Err(PFErrorCode::USER | PFErrorCode::WRITE_ACCESS | PFErrorCode::PRESENT),
        "Writing a read-only page should fault as a protection violation"
    );
    assert!(
        !pt.is_dirty(ro),
        "A faulting write should not set the dirty bit"
    );
    assert_eq!(
        pt.translate(kernel_only, false, true),
        Err(PFErrorCode::USER | PFErrorCode::PRESENT),
        "User code should not access a supervisor page"
    );
    assert_eq!(
        pt.translate(kernel_only, true, false),
        Ok(pa(0x20_1000)),
        "The kernel may access a supervisor page"
    );
}

#[test]
fn clear_removes_every_mapping() {
    let mut pt = PageTable::new();
    for i in 0..16 {
        pt.map(
            va(0x40_0000 + i * PAGE_SIZE * 513),
            pa(0x20_0000 + i * PAGE_SIZE),
            Permission::READ,
        )
        .unwrap();
    }
    assert_eq!(pt.mapped(), 16);
    pt.clear();
    assert_eq!(pt.mapped(), 0);
    for i in 0..16 {
        assert!(!pt.is_present(va(0x40_0000 + i * PAGE_SIZE * 513)));
    }
}
