pub mod frames;
pub mod mutex;
pub mod paging;

use crate::ram::frames::FRAME_ALLOC;

use core::alloc::Layout;
use spin::Mutex;
use talc::{OomHandler, Span, Talc, Talck};

// Virtual layout
// +------------------+ - 0xffff_ffff
// |      unused      |
// +------------------+ - 0xc800_0000
// |    direct map    | kernel-only map of physical 0 .. 128 MiB
// |                  | kernel image inside it at 0xc010_0000
// +------------------+ - 0xc000_0000
// |    user space    | per-process; text at 0x0040_0000,
// |                  | stack page at 0x00f0_0000
// +------------------+ - 0x0000_0000

pub const PAGE_4KIB: usize = 0x1000;
pub const KERNEL_BASE: usize = 0xc000_0000;
pub const DIRECT_MAP_SIZE: usize = 128 * 1024 * 1024;
pub const KSTACK_SIZE: usize = 0x4000;

/// Physical-to-virtual through the direct map. Only defined for the low
/// 128 MiB; user virtual addresses must never pass through here.
#[inline(always)]
pub fn p2v(pa: u32) -> usize {
    debug_assert!((pa as usize) < DIRECT_MAP_SIZE);
    return pa as usize + KERNEL_BASE;
}

#[inline(always)]
pub fn v2p(va: usize) -> u32 {
    debug_assert!(va >= KERNEL_BASE && va < KERNEL_BASE + DIRECT_MAP_SIZE);
    return (va - KERNEL_BASE) as u32;
}

pub fn align_up(val: usize, align: usize) -> usize {
    if align == 0 { return val; }
    return val.div_ceil(align) * align;
}

pub fn align_down(val: usize, align: usize) -> usize {
    if align == 0 { return val; }
    return val / align * align;
}

const HEAP_MIN_GROW: usize = 0x40000; // 256 KiB per refill

/// Grows the kernel heap out of physical frame runs reached through the
/// direct map. A refill contiguous with the previous arena extends it;
/// anything else is claimed as a fresh span.
pub struct KheapHandler {
    heap: Span
}

impl KheapHandler {
    const fn new() -> Self {
        return Self { heap: Span::empty() };
    }
}

impl OomHandler for KheapHandler {
    fn handle_oom(talc: &mut Talc<Self>, layout: Layout) -> Result<(), ()> {
        let size = align_up(layout.size() * 2, PAGE_4KIB).max(HEAP_MIN_GROW);
        let pa = FRAME_ALLOC.alloc_run(size / PAGE_4KIB).ok_or(())?;
        let base = p2v(pa) as *mut u8;

        unsafe {
            let old = talc.oom_handler.heap;
            let adjacent = !old.is_empty()
                && old.get_base_acme().map(|(_, acme)| acme) == Some(base);

            let grown = if adjacent {
                talc.extend(old, old.extend(0, size))
            } else {
                talc.claim(Span::from_base_size(base, size))?
            };
            talc.oom_handler.heap = grown;
        }

        return Ok(());
    }
}

#[global_allocator]
pub static KHEAP: Talck<Mutex<()>, KheapHandler> = Talc::new(KheapHandler::new()).lock();
