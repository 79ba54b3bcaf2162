pub mod ata;
pub mod block;
pub mod console;
pub mod kbd;
pub mod timer;

use crate::{filesys, printlnk};

use alloc::sync::Arc;
use block::BlockDevice;

/// Bring up the legacy device set: PIT, ATA, and the filesystem on top
/// of it. The console needs no init beyond the VGA clear in `kindle`;
/// the keyboard is purely interrupt-driven.
pub fn init_device() {
    timer::init(timer::SCHED_HZ);

    let disk = Arc::new(ata::AtaDisk::primary_master());
    printlnk!(
        "ata: primary master, {} MiB",
        disk.block_count() * disk.block_size() as u64 / 1024 / 1024
    );
    filesys::mount(disk);
}
