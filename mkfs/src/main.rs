//! Offline disk-image builder. Produces the raw boot disk:
//!
//!   sector 0       MBR (stage 1)
//!   sectors 1..16  stage 2, 16 sectors reserved regardless of size
//!   sector 17      superblock
//!   sector 18      inode bitmap
//!   sectors 19..26 inode table
//!   sector 27..    data, allocated contiguously
//!
//! The kernel image is inode 0. It may outgrow the 48 direct block
//! slots of an inode; that is fine for booting, because stage 2 only
//! needs the size and the first block and the extents are contiguous.
//! Every *runtime* file (anything execve may load) must fit its block
//! list, and the builder enforces that.

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use sfs::{
    blocks_for, Inode, Superblock, BLOCK_SIZE, DATA_START_LBA, DIRECT_BLOCKS,
    INODE_BITMAP_LBA, INODE_COUNT, INODE_SIZE, INODE_TABLE_LBA, SUPERBLOCK_LBA
};
use std::fs;
use std::path::PathBuf;
use zerocopy::IntoBytes;

const STAGE2_SECTORS: usize = 16;
const DEFAULT_SIZE: usize = 10 * 1024 * 1024;

#[derive(Parser)]
#[command(about = "Build a bootable cinder disk image")]
struct Args {
    /// Stage 1 boot sector (512 bytes, 0x55AA-signed)
    #[arg(long)]
    mbr: PathBuf,

    /// Stage 2 loader binary (at most 16 sectors)
    #[arg(long)]
    stage2: PathBuf,

    /// Flat kernel binary, becomes inode 0
    #[arg(long)]
    kernel: PathBuf,

    /// User programs to install, named by their file name
    files: Vec<PathBuf>,

    /// Output image path
    #[arg(short, long, default_value = "disk.img")]
    output: PathBuf,

    /// Image size in bytes
    #[arg(long, default_value_t = DEFAULT_SIZE)]
    size: usize
}

pub struct ImageBuilder {
    image: Vec<u8>,
    next_block: u32,
    inode_count: usize
}

impl ImageBuilder {
    pub fn new(size: usize) -> Self {
        return Self {
            image: vec![0; size],
            next_block: DATA_START_LBA,
            inode_count: 0
        };
    }

    fn sector_mut(&mut self, lba: u32) -> &mut [u8] {
        let start = lba as usize * BLOCK_SIZE;
        return &mut self.image[start..start + BLOCK_SIZE];
    }

    pub fn write_boot(&mut self, mbr: &[u8], stage2: &[u8]) -> Result<()> {
        ensure!(mbr.len() == BLOCK_SIZE, "MBR must be exactly one sector");
        ensure!(
            mbr[510] == 0x55 && mbr[511] == 0xaa,
            "MBR lacks the 0x55AA signature"
        );
        ensure!(
            stage2.len() <= STAGE2_SECTORS * BLOCK_SIZE,
            "stage 2 is {} bytes, more than the {} reserved sectors",
            stage2.len(),
            STAGE2_SECTORS
        );

        self.image[..BLOCK_SIZE].copy_from_slice(mbr);
        self.image[BLOCK_SIZE..BLOCK_SIZE + stage2.len()].copy_from_slice(stage2);
        return Ok(());
    }

    /// Append a file: one inode, contiguous data extents. Boot-only
    /// files (the kernel) may exceed the direct block list.
    pub fn add_file(&mut self, name: &str, data: &[u8], boot_only: bool) -> Result<u32> {
        ensure!(self.inode_count < INODE_COUNT, "inode table is full");

        let blocks = blocks_for(data.len());
        if !boot_only {
            ensure!(
                blocks <= DIRECT_BLOCKS,
                "{}: {} blocks exceeds the {} direct slots",
                name,
                blocks,
                DIRECT_BLOCKS
            );
        }

        let first = self.next_block;
        let end = first as usize + blocks;
        ensure!(end * BLOCK_SIZE <= self.image.len(), "image full writing {}", name);

        let start = first as usize * BLOCK_SIZE;
        self.image[start..start + data.len()].copy_from_slice(data);
        self.next_block = end as u32;

        let inode = Inode::new(name, data.len() as u32, first, blocks as u32);
        let offset =
            INODE_TABLE_LBA as usize * BLOCK_SIZE + self.inode_count * INODE_SIZE;
        self.image[offset..offset + INODE_SIZE].copy_from_slice(inode.as_bytes());
        self.inode_count += 1;

        return Ok(first);
    }

    pub fn finish(mut self) -> Vec<u8> {
        let total_blocks = (self.image.len() / BLOCK_SIZE) as u32;
        let sb = Superblock::new(total_blocks);

        let count = self.inode_count;
        let sb_sector = self.sector_mut(SUPERBLOCK_LBA);
        sb_sector.copy_from_slice(sb.as_bytes());

        // One bit per used inode, low bits first.
        let bitmap = self.sector_mut(INODE_BITMAP_LBA);
        for i in 0..count {
            bitmap[i / 8] |= 1 << (i % 8);
        }

        return self.image;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mbr = fs::read(&args.mbr).with_context(|| format!("reading {:?}", args.mbr))?;
    let stage2 =
        fs::read(&args.stage2).with_context(|| format!("reading {:?}", args.stage2))?;
    let kernel =
        fs::read(&args.kernel).with_context(|| format!("reading {:?}", args.kernel))?;

    let mut builder = ImageBuilder::new(args.size);
    builder.write_boot(&mbr, &stage2)?;

    // Inode 0 is the kernel; stage 2 depends on that.
    builder.add_file("kernel.bin", &kernel, true)?;
    println!("kernel.bin: {} bytes", kernel.len());

    for path in &args.files {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            bail!("bad file name: {:?}", path);
        };
        let data = fs::read(path).with_context(|| format!("reading {:?}", path))?;
        builder.add_file(name, &data, false)?;
        println!("{}: {} bytes", name, data.len());
    }

    let image = builder.finish();
    fs::write(&args.output, &image)
        .with_context(|| format!("writing {:?}", args.output))?;
    println!("wrote {:?} ({} bytes)", args.output, image.len());

    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromBytes;

    fn fake_mbr() -> Vec<u8> {
        let mut mbr = vec![0u8; BLOCK_SIZE];
        mbr[510] = 0x55;
        mbr[511] = 0xaa;
        return mbr;
    }

    fn build(kernel_len: usize, files: &[(&str, usize)]) -> Vec<u8> {
        let mut builder = ImageBuilder::new(DEFAULT_SIZE);
        builder.write_boot(&fake_mbr(), &vec![0x90; 700]).unwrap();

        let kernel: Vec<u8> = (0..kernel_len).map(|i| i as u8).collect();
        builder.add_file("kernel.bin", &kernel, true).unwrap();

        for &(name, len) in files {
            let data = vec![0xabu8; len];
            builder.add_file(name, &data, false).unwrap();
        }
        return builder.finish();
    }

    fn inode_at(image: &[u8], index: usize) -> Inode {
        let offset = INODE_TABLE_LBA as usize * BLOCK_SIZE + index * INODE_SIZE;
        return Inode::read_from_bytes(&image[offset..offset + INODE_SIZE]).unwrap();
    }

    #[test]
    fn superblock_lands_on_sector_17() {
        let image = build(4096, &[]);
        let offset = SUPERBLOCK_LBA as usize * BLOCK_SIZE;
        let sb = Superblock::read_from_bytes(&image[offset..offset + BLOCK_SIZE]).unwrap();
        assert!(sb.valid());
        assert_eq!(sb.total_blocks.get() as usize, DEFAULT_SIZE / BLOCK_SIZE);
        assert_eq!(sb.data_start_block.get(), DATA_START_LBA);
    }

    #[test]
    fn kernel_is_inode_zero_with_contiguous_extents() {
        let image = build(3 * BLOCK_SIZE + 17, &[]);
        let inode = inode_at(&image, 0);

        assert_eq!(inode.used, 1);
        assert!(inode.name_matches("kernel.bin"));
        assert_eq!(inode.size.get() as usize, 3 * BLOCK_SIZE + 17);
        assert_eq!(inode.blocks[0].get(), DATA_START_LBA);
        assert_eq!(inode.blocks[3].get(), DATA_START_LBA + 3);

        // Data really lives at the first extent.
        let data_off = DATA_START_LBA as usize * BLOCK_SIZE;
        assert_eq!(image[data_off], 0);
        assert_eq!(image[data_off + 5], 5);
    }

    #[test]
    fn files_pack_after_the_kernel() {
        let image = build(2 * BLOCK_SIZE, &[("hello.elf", 700), ("shell.elf", 100)]);

        let hello = inode_at(&image, 1);
        assert!(hello.name_matches("hello.elf"));
        assert_eq!(hello.size.get(), 700);
        assert_eq!(hello.blocks[0].get(), DATA_START_LBA + 2);
        assert_eq!(hello.blocks[1].get(), DATA_START_LBA + 3);

        let shell = inode_at(&image, 2);
        assert_eq!(shell.blocks[0].get(), DATA_START_LBA + 4);
    }

    #[test]
    fn bitmap_tracks_used_inodes() {
        let image = build(512, &[("a.elf", 10), ("b.elf", 10)]);
        let bitmap_off = INODE_BITMAP_LBA as usize * BLOCK_SIZE;
        // 3 inodes: kernel + two files
        assert_eq!(image[bitmap_off], 0b0000_0111);
        assert_eq!(image[bitmap_off + 1], 0);
    }

    #[test]
    fn oversized_runtime_file_is_refused() {
        let mut builder = ImageBuilder::new(DEFAULT_SIZE);
        builder.write_boot(&fake_mbr(), &[0x90]).unwrap();

        let too_big = vec![0u8; (DIRECT_BLOCKS + 1) * BLOCK_SIZE];
        assert!(builder.add_file("big.elf", &too_big, false).is_err());
        // The same size is fine for the boot-only kernel.
        assert!(builder.add_file("kernel.bin", &too_big, true).is_ok());
    }

    #[test]
    fn stage2_larger_than_reserved_is_refused() {
        let mut builder = ImageBuilder::new(DEFAULT_SIZE);
        let stage2 = vec![0u8; STAGE2_SECTORS * BLOCK_SIZE + 1];
        assert!(builder.write_boot(&fake_mbr(), &stage2).is_err());
    }

    #[test]
    fn unsigned_mbr_is_refused() {
        let mut builder = ImageBuilder::new(DEFAULT_SIZE);
        assert!(builder.write_boot(&vec![0u8; BLOCK_SIZE], &[0x90]).is_err());
    }
}
