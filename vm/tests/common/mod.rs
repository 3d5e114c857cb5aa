#![allow(dead_code)]

use pagos::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::{self, FileBlockNumber, MemFile, RegularFile},
    interrupt::PFErrorCode,
    swap::{self, MemDisk, Sector, SwapTable},
};
use pagos_vm::{FrameTable, Process, SystemConfigurationBuilder};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

pub fn va(addr: usize) -> Va {
    Va::new(addr).unwrap()
}

/// A system with `frames` user frames and `slots` swap slots.
pub fn system(frames: usize, slots: usize) -> Arc<FrameTable> {
    init_logger();
    SystemConfigurationBuilder::new()
        .user_frames(frames)
        .swap(Box::new(SwapTable::new(MemDisk::with_slots(slots))))
        .build()
}

pub fn process(frames: usize) -> Process {
    Process::new(system(frames, 64))
}

pub fn file(data: &[u8]) -> RegularFile {
    RegularFile::new(MemFile::new(data))
}

/// Counts the block reads and writes made to a file, and fails them while
/// `fail` is set.
#[derive(Clone, Default)]
pub struct IoMonitor {
    pub reads: Arc<AtomicUsize>,
    pub writes: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
}

impl IoMonitor {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn file_hook(&self) -> fs::Hook {
        let monitor = self.clone();
        Arc::new(move |_: FileBlockNumber, is_write| monitor.check(is_write))
    }

    pub fn disk_hook(&self) -> swap::Hook {
        let monitor = self.clone();
        Arc::new(move |_: Sector, is_write| monitor.check(is_write))
    }

    fn check(&self, is_write: bool) -> Result<(), KernelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(KernelError::IOError);
        }
        if is_write {
            self.writes.fetch_add(1, Ordering::SeqCst);
        } else {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub fn monitored_file(data: &[u8], monitor: &IoMonitor) -> RegularFile {
    RegularFile::new(MemFile::new(data).hook(monitor.file_hook()))
}

/// A page worth of bytes, distinct for each `seed`.
pub fn pattern(seed: u8) -> Vec<u8> {
    (0..PAGE_SIZE)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn read_page(process: &Process, addr: Va) -> Result<Vec<u8>, KernelError> {
    let mut buf = vec![0; PAGE_SIZE];
    process.user_read(addr, &mut buf)?;
    Ok(buf)
}

pub fn file_contents(file: &RegularFile) -> Vec<u8> {
    let len = file.size();
    let mut buf = vec![0; len];
    assert_eq!(file.read(0, &mut buf), Ok(len));
    buf
}

pub const USER_READ: PFErrorCode = PFErrorCode::USER;

pub fn user_write() -> PFErrorCode {
    PFErrorCode::USER | PFErrorCode::WRITE_ACCESS
}
