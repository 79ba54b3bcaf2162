//! The flat filesystem: a superblock at sector 17, a linear inode table,
//! direct block lists, no directories, read-only at runtime. Inodes are
//! created exclusively by the offline image builder.
//!
//! On-disk records are tightly packed, so every copy out of a sector
//! buffer goes through zerocopy reads; wide struct copies of misaligned
//! records are exactly the class of bug this environment cannot afford.

use crate::{device::block::BlockDevice, printk, printlnk, sync::KernelMutex};

use alloc::{string::String, sync::Arc, vec, vec::Vec};
use sfs::{Inode, Superblock, BLOCK_SIZE, INODE_SIZE, SUPERBLOCK_LBA};
use spin::RwLock;
use zerocopy::FromBytes;

struct MountedFs {
    dev: Arc<dyn BlockDevice>,
    sb: Superblock
}

static FS: RwLock<Option<MountedFs>> = RwLock::new(None);

// One reader at a time on the ATA channel; PIO register sequences do not
// interleave.
static FS_LOCK: KernelMutex = KernelMutex::new();

/// Mount the filesystem. A bad magic fails soft: log it and continue
/// with the FS unmounted; every lookup will then miss.
pub fn mount(dev: Arc<dyn BlockDevice>) {
    let mut buf = [0u8; BLOCK_SIZE];
    if let Err(err) = dev.read_block(&mut buf, SUPERBLOCK_LBA) {
        printlnk!("fs: superblock read failed: {}", err);
        return;
    }

    let Ok(sb) = Superblock::read_from_bytes(&buf[..]) else {
        printlnk!("fs: superblock unreadable");
        return;
    };

    if !sb.valid() {
        printlnk!("fs: bad magic {:#010x}, not mounting", sb.magic.get());
        return;
    }

    let capacity = dev.block_count();
    if capacity > 0 && sb.total_blocks.get() as u64 > capacity {
        printlnk!(
            "fs: superblock claims {} blocks but the disk has {}",
            sb.total_blocks.get(),
            capacity
        );
    }

    printlnk!(
        "fs: mounted, {} blocks, {} inode slots",
        sb.total_blocks.get(),
        sb.inode_count.get()
    );
    *FS.write() = Some(MountedFs { dev, sb });
}

/// Linear scan of the inode table for a used inode named `name`.
fn find(fs: &MountedFs, name: &str) -> Result<Option<Inode>, String> {
    let per_block = BLOCK_SIZE / INODE_SIZE;
    let table_blocks =
        (fs.sb.inode_count.get() as usize).div_ceil(per_block) as u32;

    let mut buf = [0u8; BLOCK_SIZE];
    for i in 0..table_blocks {
        fs.dev.read_block(&mut buf, fs.sb.inode_table_block.get() + i)?;

        for raw in buf.chunks_exact(INODE_SIZE) {
            let Ok(inode) = Inode::read_from_bytes(raw) else { continue; };
            if inode.name_matches(name) {
                return Ok(Some(inode));
            }
        }
    }
    return Ok(None);
}

/// Read a whole file. The buffer is sized in whole sectors, then
/// truncated to the byte size: the driver always writes full sectors,
/// and an undersized buffer would let the tail of the last read trample
/// the heap.
pub fn read_file(name: &str) -> Result<Vec<u8>, String> {
    FS_LOCK.with(|| {
        let fs = FS.read();
        let fs = fs.as_ref().ok_or("filesystem not mounted")?;

        let inode = find(fs, name)?.ok_or("file not found")?;

        let blocks = inode.block_count() as usize;
        let mut buf = vec![0u8; blocks * BLOCK_SIZE];

        for (i, chunk) in buf.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            fs.dev.read_block(chunk, inode.blocks[i].get())?;
        }

        buf.truncate(inode.size.get() as usize);
        return Ok(buf);
    })
}

/// Print every used inode: name and byte size. Backs syscall 13.
pub fn list() {
    FS_LOCK.with(|| {
        let fs = FS.read();
        let Some(fs) = fs.as_ref() else {
            printlnk!("fs: not mounted");
            return;
        };

        let per_block = BLOCK_SIZE / INODE_SIZE;
        let table_blocks =
            (fs.sb.inode_count.get() as usize).div_ceil(per_block) as u32;

        let mut buf = [0u8; BLOCK_SIZE];
        for i in 0..table_blocks {
            if fs.dev.read_block(&mut buf, fs.sb.inode_table_block.get() + i).is_err() {
                return;
            }

            for raw in buf.chunks_exact(INODE_SIZE) {
                let Ok(inode) = Inode::read_from_bytes(raw) else { continue; };
                if inode.used != 1 { continue; }

                match core::str::from_utf8(inode.name()) {
                    Ok(name) => printk!("{}", name),
                    Err(_) => printk!("<bad name>")
                }
                printlnk!("  {} bytes", inode.size.get());
            }
        }
    });
}
