//! On-disk layout of the flat filesystem, shared by the kernel and the
//! image builder.
//!
//! The disk is a flat array of 512-byte blocks (block == sector):
//!
//! +-------------------+ - sector 0
//! |        MBR        | stage 1, 0x55AA signature at offset 510
//! +-------------------+ - sector 1
//! |      stage 2      | 16 sectors reserved regardless of actual size
//! +-------------------+ - sector 17
//! |     superblock    |
//! +-------------------+ - sector 18
//! |    inode bitmap   | one bit per inode
//! +-------------------+ - sector 19
//! |    inode table    | 2 inodes per sector, 256 B each
//! +-------------------+ - sector 27
//! |    data blocks    | allocated contiguously by the builder
//! +-------------------+
//!
//! All records are read and written through zerocopy; nothing in here may
//! ever be materialized by a wide struct copy out of a sector buffer.

#![no_std]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, LE, U32};

pub const BLOCK_SIZE: usize = 512;

pub const SUPERBLOCK_LBA: u32 = 17;
pub const INODE_BITMAP_LBA: u32 = 18;
pub const INODE_TABLE_LBA: u32 = 19;
pub const DATA_START_LBA: u32 = 27;

pub const SFS_MAGIC: u32 = 0x12345678;

pub const NAME_LEN: usize = 32;
pub const DIRECT_BLOCKS: usize = 48;

pub const INODE_SIZE: usize = 256;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const INODE_TABLE_BLOCKS: usize = (DATA_START_LBA - INODE_TABLE_LBA) as usize;
pub const INODE_COUNT: usize = INODE_TABLE_BLOCKS * INODES_PER_BLOCK;

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Superblock {
    pub magic: U32<LE>,
    pub total_blocks: U32<LE>,
    pub inode_bitmap_block: U32<LE>,
    pub inode_table_block: U32<LE>,
    pub data_start_block: U32<LE>,
    pub inode_count: U32<LE>,
    pub reserved: [u8; BLOCK_SIZE - 24]
}

#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Inode {
    pub used: u8,
    pub name: [u8; NAME_LEN],
    pub size: U32<LE>,
    pub blocks: [U32<LE>; DIRECT_BLOCKS],
    pub padding: [u8; 27]
}

const _: () = assert!(size_of::<Superblock>() == BLOCK_SIZE);
const _: () = assert!(size_of::<Inode>() == INODE_SIZE);

impl Superblock {
    pub fn new(total_blocks: u32) -> Self {
        return Self {
            magic: SFS_MAGIC.into(),
            total_blocks: total_blocks.into(),
            inode_bitmap_block: INODE_BITMAP_LBA.into(),
            inode_table_block: INODE_TABLE_LBA.into(),
            data_start_block: DATA_START_LBA.into(),
            inode_count: (INODE_COUNT as u32).into(),
            reserved: [0; BLOCK_SIZE - 24]
        };
    }

    pub fn valid(&self) -> bool {
        return self.magic.get() == SFS_MAGIC;
    }
}

impl Inode {
    pub fn empty() -> Self {
        return Self {
            used: 0,
            name: [0; NAME_LEN],
            size: 0.into(),
            blocks: [0.into(); DIRECT_BLOCKS],
            padding: [0; 27]
        };
    }

    /// Build a used inode for `name` spanning `block_count` contiguous
    /// blocks from `first_block`. Names longer than the field truncate.
    pub fn new(name: &str, size: u32, first_block: u32, block_count: u32) -> Self {
        let mut inode = Self::empty();
        inode.used = 1;
        inode.size = size.into();

        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        inode.name[..len].copy_from_slice(&bytes[..len]);

        for i in 0..(block_count as usize).min(DIRECT_BLOCKS) {
            inode.blocks[i] = (first_block + i as u32).into();
        }
        return inode;
    }

    /// The stored name up to its NUL terminator.
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        return &self.name[..len];
    }

    pub fn name_matches(&self, query: &str) -> bool {
        return self.used == 1 && self.name() == query.as_bytes();
    }

    /// Blocks occupied by the file contents.
    pub fn block_count(&self) -> u32 {
        return self.size.get().div_ceil(BLOCK_SIZE as u32);
    }
}

/// Number of whole blocks needed to hold `bytes` bytes.
pub fn blocks_for(bytes: usize) -> usize {
    return bytes.div_ceil(BLOCK_SIZE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromBytes;

    #[test]
    fn superblock_layout() {
        let sb = Superblock::new(20480);
        let bytes = sb.as_bytes();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert_eq!(&bytes[0..4], &0x12345678u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &20480u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &18u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &19u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &27u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &32u32.to_le_bytes());
    }

    #[test]
    fn superblock_magic_check() {
        let mut raw = [0u8; BLOCK_SIZE];
        raw[0..4].copy_from_slice(&SFS_MAGIC.to_le_bytes());
        let sb = Superblock::read_from_bytes(&raw[..]).unwrap();
        assert!(sb.valid());

        raw[0] = 0;
        let sb = Superblock::read_from_bytes(&raw[..]).unwrap();
        assert!(!sb.valid());
    }

    #[test]
    fn inode_field_offsets() {
        let inode = Inode::new("kernel.bin", 0x1234, 27, 3);
        let bytes = inode.as_bytes();
        assert_eq!(bytes.len(), INODE_SIZE);
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..11], b"kernel.bin");
        assert_eq!(bytes[11], 0);
        assert_eq!(&bytes[33..37], &0x1234u32.to_le_bytes());
        assert_eq!(&bytes[37..41], &27u32.to_le_bytes());
        assert_eq!(&bytes[41..45], &28u32.to_le_bytes());
    }

    #[test]
    fn inode_roundtrip_through_sector_buffer() {
        let mut sector = [0u8; BLOCK_SIZE];
        let a = Inode::new("hello.elf", 700, 30, 2);
        let b = Inode::new("shell.elf", 512, 32, 1);
        sector[..INODE_SIZE].copy_from_slice(a.as_bytes());
        sector[INODE_SIZE..].copy_from_slice(b.as_bytes());

        let back = Inode::read_from_bytes(&sector[INODE_SIZE..]).unwrap();
        assert!(back.name_matches("shell.elf"));
        assert!(!back.name_matches("hello.elf"));
        assert_eq!(back.size.get(), 512);
        assert_eq!(back.blocks[0].get(), 32);
        assert_eq!(back.blocks[1].get(), 0);
    }

    #[test]
    fn name_truncates_and_stays_terminated() {
        let long = "a-rather-long-file-name-exceeding-the-field.elf";
        let inode = Inode::new(long, 1, 27, 1);
        assert_eq!(inode.name().len(), NAME_LEN - 1);
        assert_eq!(inode.name[NAME_LEN - 1], 0);
    }

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(Inode::new("a", 0, 27, 0).block_count(), 0);
        assert_eq!(Inode::new("a", 1, 27, 1).block_count(), 1);
        assert_eq!(Inode::new("a", 512, 27, 1).block_count(), 1);
        assert_eq!(Inode::new("a", 513, 27, 2).block_count(), 2);
        assert_eq!(blocks_for(24 * 1024), 48);
    }
}
