//! Physical frame allocator: a bitmap over the low 128 MiB plus one
//! 8-bit reference count per frame. The refcounts carry copy-on-write
//! sharing; 0xff is the saturation sentinel and pins a frame forever.
//!
//! A frame is allocatable iff its used bit is clear and its refcount is
//! zero. `free` decrements and only releases the frame at zero.

use crate::{
    printlnk,
    ram::{align_up, mutex::{irq_lock, IrqLock}, p2v, DIRECT_MAP_SIZE, PAGE_4KIB}
};

use zerocopy::{FromBytes, Immutable, KnownLayout, LE, U32, U64};

pub const MAX_FRAMES: usize = DIRECT_MAP_SIZE / PAGE_4KIB;
const BITMAP_LEN: usize = MAX_FRAMES / 8;

const REF_PINNED: u8 = 0xff;

/// The bootloader deposits the E820 map here: a u16 entry count, then
/// 24-byte entries.
const E820_BASE: u32 = 0x8000;
const E820_USABLE: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, FromBytes, KnownLayout, Immutable)]
struct E820Entry {
    base: U64<LE>,
    length: U64<LE>,
    typ: U32<LE>,
    attrs: U32<LE>
}

const _: () = assert!(size_of::<E820Entry>() == 24);

struct FrameAllocData {
    bitmap: [u8; BITMAP_LEN],
    refs: [u8; MAX_FRAMES],
    total: usize,
    used: usize,
    is_init: bool
}

pub struct FrameAlloc(IrqLock<FrameAllocData>);

pub static FRAME_ALLOC: FrameAlloc = FrameAlloc(irq_lock(FrameAllocData {
    bitmap: [0xff; BITMAP_LEN],
    refs: [0; MAX_FRAMES],
    total: 0,
    used: 0,
    is_init: false
}));

impl FrameAllocData {
    fn set(&mut self, frame: usize) {
        self.bitmap[frame / 8] |= 1 << (frame % 8);
    }

    fn clear(&mut self, frame: usize) {
        self.bitmap[frame / 8] &= !(1 << (frame % 8));
    }

    fn test(&self, frame: usize) -> bool {
        return self.bitmap[frame / 8] & (1 << (frame % 8)) != 0;
    }

    fn init(&mut self, kernel_end_phys: u32) {
        if self.is_init { return; }

        // Everything starts out reserved; E820 punches the usable holes.
        let count = unsafe { (p2v(E820_BASE) as *const u16).read() } as usize;
        let table = unsafe {
            core::slice::from_raw_parts(p2v(E820_BASE + 4) as *const u8, count * size_of::<E820Entry>())
        };

        let mut max_ram: u32 = 0;

        for raw in table.chunks_exact(size_of::<E820Entry>()) {
            let Ok(entry) = E820Entry::read_from_bytes(raw) else { continue; };

            // Entries above 4 GiB mean nothing to a 32-bit kernel.
            if entry.base.get() >> 32 != 0 { continue; }
            if entry.typ.get() != E820_USABLE { continue; }

            let start = entry.base.get() as u32;
            let end = (entry.base.get() + entry.length.get()).min(u32::MAX as u64) as u32;
            if end > max_ram { max_ram = end; }

            // Partial frames at region edges stay reserved: round the
            // start up and the end down.
            let first = start.div_ceil(PAGE_4KIB as u32) as usize;
            let last = (end as usize) / PAGE_4KIB;

            for frame in first..last.min(MAX_FRAMES) {
                self.clear(frame);
            }
        }

        self.total = ((max_ram as usize) / PAGE_4KIB).min(MAX_FRAMES);

        // Re-reserve the kernel image (and everything below it: BIOS area,
        // the E820 table itself, stage 2 scratch).
        let kernel_frames = align_up(kernel_end_phys as usize, PAGE_4KIB) / PAGE_4KIB;
        for frame in 0..kernel_frames.min(MAX_FRAMES) {
            self.set(frame);
        }

        // The top 16 KiB of detected RAM held the early boot stack; keep
        // those pages out of circulation.
        let stack_top = (max_ram & !0xf) as usize;
        let stack_first = stack_top.saturating_sub(16 * 1024) / PAGE_4KIB;
        for frame in stack_first..self.total {
            self.set(frame);
        }

        // Everything still marked used at this point is permanently
        // reserved; pin it so a stray free can never release it and the
        // used-implies-referenced rule holds from the start.
        self.used = 0;
        for frame in 0..self.total {
            if self.test(frame) {
                self.refs[frame] = REF_PINNED;
                self.used += 1;
            }
        }
        self.is_init = true;
    }

    fn first_free(&self) -> Option<usize> {
        for (i, &byte) in self.bitmap[..self.total.div_ceil(8)].iter().enumerate() {
            if byte == 0xff { continue; } // skip full bytes
            let bit = byte.trailing_ones() as usize;
            let frame = i * 8 + bit;
            if frame < self.total { return Some(frame); }
        }
        return None;
    }

    fn alloc(&mut self) -> Option<u32> {
        let frame = self.first_free()?;
        self.set(frame);
        self.refs[frame] = 1;
        self.used += 1;
        return Some((frame * PAGE_4KIB) as u32);
    }

    fn alloc_run(&mut self, count: usize) -> Option<u32> {
        if count == 0 || count > self.total { return None; }

        let mut start = 0;
        while start + count <= self.total {
            match (start..start + count).find(|&frame| self.test(frame)) {
                Some(occupied) => start = occupied + 1,
                None => {
                    for frame in start..start + count {
                        self.set(frame);
                        self.refs[frame] = 1;
                    }
                    self.used += count;
                    return Some((start * PAGE_4KIB) as u32);
                }
            }
        }
        return None;
    }

    fn free(&mut self, pa: u32) {
        let frame = pa as usize / PAGE_4KIB;
        if frame >= self.total || !self.test(frame) { return; }

        match self.refs[frame] {
            REF_PINNED => {} // pinned frames never go back
            0 | 1 => {
                self.refs[frame] = 0;
                self.clear(frame);
                self.used -= 1;
            }
            _ => self.refs[frame] -= 1
        }
    }

    fn retain(&mut self, pa: u32) {
        let frame = pa as usize / PAGE_4KIB;
        if frame >= self.total { return; }
        if self.refs[frame] < REF_PINNED {
            self.refs[frame] += 1;
        }
    }

    fn refs(&self, pa: u32) -> u8 {
        let frame = pa as usize / PAGE_4KIB;
        if frame >= self.total { return 0; }
        return self.refs[frame];
    }
}

impl FrameAlloc {
    pub fn init(&self, kernel_end_phys: u32) {
        self.0.lock().init(kernel_end_phys);
        let (total, used) = self.stats();
        printlnk!(
            "ram: {} MiB usable, {} KiB reserved",
            total * PAGE_4KIB / 1024 / 1024,
            used * PAGE_4KIB / 1024
        );
    }

    /// A fresh frame with refcount 1. Contents are whatever was there
    /// before; callers zero when their semantics require it.
    pub fn alloc(&self) -> Option<u32> {
        return self.0.lock().alloc();
    }

    /// `count` physically contiguous frames, each with refcount 1.
    pub fn alloc_run(&self, count: usize) -> Option<u32> {
        return self.0.lock().alloc_run(count);
    }

    /// Drop one reference; the frame is released when the count hits zero.
    pub fn free(&self, pa: u32) {
        self.0.lock().free(pa);
    }

    /// Add a reference (saturating at the pin sentinel).
    pub fn retain(&self, pa: u32) {
        self.0.lock().retain(pa);
    }

    pub fn refs(&self, pa: u32) -> u8 {
        return self.0.lock().refs(pa);
    }

    pub fn stats(&self) -> (usize, usize) {
        let data = self.0.lock();
        return (data.total, data.used);
    }
}
