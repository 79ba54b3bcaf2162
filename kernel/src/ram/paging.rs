//! Two-level paging. The kernel owns one directory whose top quarter
//! (PDEs 768..1023) maps physical 0..128 MiB at `KERNEL_BASE`; every
//! address space links those PDEs by value, so the kernel half is
//! identical everywhere and never copied. User halves are per-process,
//! cloned copy-on-write by `fork`.

use crate::{
    arch::{self, trap::{self, TrapFrame}},
    printlnk,
    ram::{frames::FRAME_ALLOC, p2v, v2p, DIRECT_MAP_SIZE, KERNEL_BASE, PAGE_4KIB}
};

use alloc::string::String;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicU32, Ordering as AtomOrd};

#[allow(dead_code)]
pub mod flags {
    pub const PRESENT: u32 = 1 << 0;
    pub const WRITABLE: u32 = 1 << 1;
    pub const USER: u32 = 1 << 2;
    pub const WRITETHROUGH: u32 = 1 << 3;
    pub const NOCACHE: u32 = 1 << 4;
    pub const ACCESSED: u32 = 1 << 5;
    pub const DIRTY: u32 = 1 << 6;
    // Bits 9..11 are "available to OS"; bit 9 tags copy-on-write pages.
    pub const COW: u32 = 1 << 9;

    pub const FRAME_MASK: u32 = 0xffff_f000;
    pub const FLAG_MASK: u32 = 0x0000_0fff;

    pub const K_RW: u32 = PRESENT | WRITABLE;
    pub const U_RW: u32 = PRESENT | WRITABLE | USER;
}

use flags::*;

const ENTRIES: usize = 1024;
const KERNEL_PDE_FIRST: usize = KERNEL_BASE >> 22; // 768
const DIRECT_TABLES: usize = DIRECT_MAP_SIZE >> 22; // 32

#[repr(C, align(4096))]
struct PageTable([u32; ENTRIES]);

const EMPTY_TABLE: PageTable = PageTable([0; ENTRIES]);

// The tables backing the direct map live in the kernel image itself, so
// they exist before the frame allocator can serve the first table.
static mut DIRECT_MAP_TABLES: [PageTable; DIRECT_TABLES] = [EMPTY_TABLE; DIRECT_TABLES];

static KERNEL_DIR: AtomicU32 = AtomicU32::new(0);

pub fn kernel_dir() -> u32 {
    return KERNEL_DIR.load(AtomOrd::Relaxed);
}

fn table_mut(pa: u32) -> &'static mut [u32; ENTRIES] {
    return unsafe { &mut *(p2v(pa) as *mut [u32; ENTRIES]) };
}

fn zero_frame(pa: u32) {
    unsafe { (p2v(pa) as *mut u8).write_bytes(0, PAGE_4KIB); }
}

/// Build the kernel directory and switch onto it, replacing the 4 MiB
/// boot mapping with the full direct map.
pub fn init() {
    let dir_pa = FRAME_ALLOC.alloc().expect("no frame for the kernel page directory");
    zero_frame(dir_pa);
    let dir = table_mut(dir_pa);

    for i in 0..DIRECT_TABLES {
        let table = unsafe { &mut (*addr_of_mut!(DIRECT_MAP_TABLES))[i] };

        // Commit-reveal: the table is filled completely before its
        // directory entry goes live, and CR3 is reloaded afterwards.
        // Publishing the PDE first would let the CPU walk a half-built
        // table through a stale TLB.
        for j in 0..ENTRIES {
            table.0[j] = ((i << 22) + (j << 12)) as u32 | K_RW;
        }
        dir[KERNEL_PDE_FIRST + i] = v2p(table as *const PageTable as usize) | K_RW;
    }

    KERNEL_DIR.store(dir_pa, AtomOrd::Relaxed);
    unsafe { arch::set_cr3(dir_pa); }

    printlnk!("ram: direct map up, {} MiB at {:#010x}", DIRECT_MAP_SIZE >> 20, KERNEL_BASE);
}

/// A user address space: owns its page directory frame and every user
/// page table under it. The kernel half is shared by construction.
/// Thread groups share one `AddrSpace` behind an `Arc`; the last owner's
/// drop releases the user frames, the tables and the directory.
pub struct AddrSpace {
    dir: u32
}

unsafe impl Send for AddrSpace {}
unsafe impl Sync for AddrSpace {}

impl AddrSpace {
    /// Fresh space: empty user half, kernel PDEs linked by value.
    pub fn new() -> Result<Self, String> {
        let dir_pa = FRAME_ALLOC.alloc().ok_or("no frame for page directory")?;
        let dir = table_mut(dir_pa);
        let kdir = table_mut(kernel_dir());

        for i in 0..KERNEL_PDE_FIRST { dir[i] = 0; }
        for i in KERNEL_PDE_FIRST..ENTRIES { dir[i] = kdir[i]; }

        return Ok(Self { dir: dir_pa });
    }

    pub fn dir_pa(&self) -> u32 {
        return self.dir;
    }

    pub fn is_current(&self) -> bool {
        return arch::cr3() == self.dir;
    }

    /// Map one page. The PDE is always present+writable; the user bit
    /// propagates up from the requested flags. Flushes the TLB entry if
    /// this space is installed.
    pub fn map_page(&self, va: usize, pa: u32, pte_flags: u32) -> Result<(), String> {
        let dir = table_mut(self.dir);
        let pde_i = va >> 22;
        let pte_i = (va >> 12) & 0x3ff;

        if dir[pde_i] & PRESENT == 0 {
            let table_pa = FRAME_ALLOC.alloc().ok_or("no frame for page table")?;
            zero_frame(table_pa);
            dir[pde_i] = table_pa | PRESENT | WRITABLE | (pte_flags & USER);
        } else if pte_flags & USER != 0 {
            dir[pde_i] |= USER;
        }

        let table = table_mut(dir[pde_i] & FRAME_MASK);
        table[pte_i] = (pa & FRAME_MASK) | (pte_flags & FLAG_MASK);

        if self.is_current() { arch::invlpg(va); }
        return Ok(());
    }

    /// The PTE covering `va`, if its table exists.
    pub fn pte(&self, va: usize) -> Option<u32> {
        let dir = table_mut(self.dir);
        let pde = dir[va >> 22];
        if pde & PRESENT == 0 { return None; }
        return Some(table_mut(pde & FRAME_MASK)[(va >> 12) & 0x3ff]);
    }

    pub fn is_mapped(&self, va: usize) -> bool {
        return self.pte(va).is_some_and(|pte| pte & PRESENT != 0);
    }

    /// Whether `[va, va+len)` lies below the kernel half and is fully
    /// mapped with user permission. Syscalls gate user pointers on this.
    pub fn user_range_mapped(&self, va: usize, len: usize) -> bool {
        if len == 0 { return true; }
        let Some(end) = va.checked_add(len - 1) else { return false; };
        if end >= KERNEL_BASE { return false; }

        let mut page = va & !(PAGE_4KIB - 1);
        loop {
            let present_user = self
                .pte(page)
                .is_some_and(|pte| pte & PRESENT != 0 && pte & USER != 0);
            if !present_user { return false; }
            if page >= end & !(PAGE_4KIB - 1) { return true; }
            page += PAGE_4KIB;
        }
    }

    /// Copy-on-write clone for fork. Kernel PDEs are linked by value;
    /// every present user PTE loses its writable bit in *both* spaces and
    /// gains the COW tag, and the frame's refcount goes up. The parent's
    /// next write takes the same COW fault and receives its own copy, so
    /// stripping its write access is correct, not just convenient.
    /// Runs in O(pages currently mapped in user space).
    pub fn clone_cow(&self) -> Result<AddrSpace, String> {
        let child = AddrSpace::new()?;
        let src_dir = table_mut(self.dir);
        let dst_dir = table_mut(child.dir);

        for i in 0..KERNEL_PDE_FIRST {
            if src_dir[i] & PRESENT == 0 { continue; }

            let table_pa = FRAME_ALLOC.alloc().ok_or("no frame for cloned page table")?;
            zero_frame(table_pa);
            dst_dir[i] = table_pa | (src_dir[i] & FLAG_MASK);

            let src = table_mut(src_dir[i] & FRAME_MASK);
            let dst = table_mut(table_pa);

            for j in 0..ENTRIES {
                let mut pte = src[j];
                if pte & PRESENT == 0 { continue; }

                // The second reference exists before the COW tag does;
                // a fault can never see a tagged page with one holder
                // that was not the in-place case.
                FRAME_ALLOC.retain(pte & FRAME_MASK);

                if pte & WRITABLE != 0 {
                    pte = (pte & !WRITABLE) | COW;
                    src[j] = pte;
                }
                dst[j] = pte;
            }
        }

        // The source just lost write permission on its pages; stale
        // writable TLB entries must go.
        if self.is_current() { arch::reload_cr3(); }

        return Ok(child);
    }

    /// Release every user mapping: each referenced frame, each table,
    /// leaving an empty user half. `execve` runs this before mapping the
    /// incoming image so the outgoing one cannot leak frames.
    pub fn clear_user(&self) {
        let dir = table_mut(self.dir);

        for i in 0..KERNEL_PDE_FIRST {
            if dir[i] & PRESENT == 0 { continue; }
            let table_pa = dir[i] & FRAME_MASK;
            let table = table_mut(table_pa);

            for j in 0..ENTRIES {
                if table[j] & PRESENT != 0 {
                    FRAME_ALLOC.free(table[j] & FRAME_MASK);
                }
                table[j] = 0;
            }

            FRAME_ALLOC.free(table_pa);
            dir[i] = 0;
        }

        if self.is_current() { arch::reload_cr3(); }
    }
}

impl Drop for AddrSpace {
    fn drop(&mut self) {
        self.clear_user();
        FRAME_ALLOC.free(self.dir);
    }
}

/// Page-fault entry. A present+write fault on a COW-tagged page is
/// serviced and resumed; everything else is fatal.
pub fn page_fault(frame: &mut TrapFrame) {
    let va = arch::cr2() as usize;

    if frame.err & 0b11 == 0b11 && resolve_cow(va) {
        return;
    }

    printlnk!("page fault at {:#010x}, error {:#07b}", va, frame.err);
    trap::fatal(frame, "page fault");
}

/// Resolution order is load-bearing: allocate, copy, publish the PTE,
/// then invlpg. Only the last reference gets the in-place fast path.
fn resolve_cow(va: usize) -> bool {
    let dir = table_mut(arch::cr3());
    let pde = dir[va >> 22];
    if pde & PRESENT == 0 { return false; }

    let table = table_mut(pde & FRAME_MASK);
    let pte_i = (va >> 12) & 0x3ff;
    let pte = table[pte_i];
    if pte & PRESENT == 0 || pte & COW == 0 { return false; }

    let old_pa = pte & FRAME_MASK;
    let new_flags = (pte & FLAG_MASK & !COW) | WRITABLE;

    if FRAME_ALLOC.refs(old_pa) == 1 {
        table[pte_i] = old_pa | new_flags;
    } else {
        let Some(new_pa) = FRAME_ALLOC.alloc() else { return false; };
        unsafe {
            core::ptr::copy_nonoverlapping(
                p2v(old_pa) as *const u8,
                p2v(new_pa) as *mut u8,
                PAGE_4KIB
            );
        }
        table[pte_i] = new_pa | new_flags;
        FRAME_ALLOC.free(old_pa);
    }

    arch::invlpg(va);
    return true;
}
