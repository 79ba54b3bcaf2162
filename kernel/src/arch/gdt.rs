//! Flat GDT and the TSS. Selector layout is fixed: ring-0 code 0x08, data
//! 0x10, ring-3 code 0x1b, data 0x23, TSS 0x28. Only `esp0` of the TSS is
//! live state; the scheduler repoints it at the incoming thread's kernel
//! stack on every switch.

use crate::arch::KDATA_SEL;

use core::arch::asm;
use core::ptr::{addr_of, addr_of_mut};

#[repr(C, packed)]
struct GdtPtr {
    limit: u16,
    base: u32
}

#[repr(C, packed)]
pub struct TaskStateSeg {
    _prev: u32,
    esp0: u32,
    ss0: u32,
    _unused: [u32; 22],
    _reserved: u16,
    iomap_base: u16
}

impl TaskStateSeg {
    const fn new() -> Self {
        return Self {
            _prev: 0,
            esp0: 0,
            ss0: KDATA_SEL as u32,
            _unused: [0; 22],
            _reserved: 0,
            iomap_base: size_of::<Self>() as u16
        };
    }
}

const fn gdt_entry(base: u32, limit: u32, access: u8, gran: u8) -> u64 {
    let mut desc = (limit & 0xffff) as u64;
    desc |= ((base & 0xffffff) as u64) << 16;
    desc |= (access as u64) << 40;
    desc |= (((limit >> 16) & 0x0f) as u64) << 48;
    desc |= ((gran & 0xf0) as u64) << 48;
    desc |= ((base >> 24) as u64) << 56;
    return desc;
}

// 0: null, 1: kernel code, 2: kernel data, 3: user code, 4: user data,
// 5: TSS (patched at init, needs the TSS address)
static mut GDT: [u64; 6] = [
    0,
    gdt_entry(0, 0xffffffff, 0x9a, 0xcf),
    gdt_entry(0, 0xffffffff, 0x92, 0xcf),
    gdt_entry(0, 0xffffffff, 0xfa, 0xcf),
    gdt_entry(0, 0xffffffff, 0xf2, 0xcf),
    0
];

static mut TSS: TaskStateSeg = TaskStateSeg::new();

pub fn init() {
    unsafe {
        let tss_base = addr_of!(TSS) as u32;
        let tss_limit = size_of::<TaskStateSeg>() as u32 - 1;
        // 0x89: present, ring 0, 32-bit available TSS
        let gdt = addr_of_mut!(GDT) as *mut u64;
        *gdt.add(5) = gdt_entry(tss_base, tss_limit, 0x89, 0x00);

        let ptr = GdtPtr {
            limit: size_of::<[u64; 6]>() as u16 - 1,
            base: gdt as u32
        };

        asm!(
            "lgdt [{gdtr}]",

            "push 0x08",       // reload CS with a far return
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",

            "mov ax, 0x10",    // reload the data selectors
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",

            "mov ax, 0x28",    // load the task register
            "ltr ax",

            gdtr = in(reg) &ptr,
            out("eax") _
        );
    }
}

/// Point TSS.esp0 at the top of the incoming thread's kernel stack. The
/// CPU loads this on every ring 3 -> ring 0 transition.
pub fn set_kernel_stack(esp0: usize) {
    unsafe {
        let tss = addr_of_mut!(TSS);
        (*tss).esp0 = esp0 as u32;
    }
}
