//! Trap entry and exit. Every ring transition funnels through one stub
//! pair: the entry stub materializes a `TrapFrame` on the current kernel
//! stack and calls the dispatcher; `trap_return` restores that frame and
//! irets. The same epilogue doubles as the launchpad into ring 3: a
//! forged frame with user selectors fully determines the outgoing ring,
//! CS/SS and EFLAGS.

use crate::{arch, printlnk};

use core::arch::{asm, global_asm};

/// Fixed-layout record of the interrupted context, fields in ascending
/// stack-address order. `esp_k` is pusha's snapshot of the kernel ESP and
/// is ignored on restore; `useresp`/`ss` exist only on cross-ring entries
/// and on forged ring-3 frames.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_k: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vec: u32,
    pub err: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32
}

impl TrapFrame {
    /// A frame that irets into ring 3 at `entry` with the given user
    /// stack, interrupts enabled, all general-purpose registers zeroed.
    pub fn user(entry: usize, user_stack: usize) -> Self {
        return Self {
            gs: arch::UDATA_SEL as u32,
            fs: arch::UDATA_SEL as u32,
            es: arch::UDATA_SEL as u32,
            ds: arch::UDATA_SEL as u32,
            edi: 0, esi: 0, ebp: 0, esp_k: 0,
            ebx: 0, edx: 0, ecx: 0, eax: 0,
            vec: 0, err: 0,
            eip: entry as u32,
            cs: arch::UCODE_SEL as u32,
            eflags: 0x202, // IF | reserved bit 1
            useresp: user_stack as u32,
            ss: arch::UDATA_SEL as u32
        };
    }
}

global_asm!(r#"
.macro TRAP_NOERR vec
.global vec\vec
vec\vec:
    push 0
    push \vec
    jmp trap_common
.endm

.macro TRAP_ERR vec
.global vec\vec
vec\vec:
    push \vec
    jmp trap_common
.endm

// CPU exceptions. 8, 10..14 and 17 push an error code themselves.
TRAP_NOERR 0
TRAP_NOERR 1
TRAP_NOERR 2
TRAP_NOERR 3
TRAP_NOERR 4
TRAP_NOERR 5
TRAP_NOERR 6
TRAP_NOERR 7
TRAP_ERR 8
TRAP_NOERR 9
TRAP_ERR 10
TRAP_ERR 11
TRAP_ERR 12
TRAP_ERR 13
TRAP_ERR 14
TRAP_NOERR 15
TRAP_NOERR 16
TRAP_ERR 17
TRAP_NOERR 18
TRAP_NOERR 19

// IRQs and the syscall gate
TRAP_NOERR 32
TRAP_NOERR 33
TRAP_NOERR 128

trap_common:
    pusha
    push ds
    push es
    push fs
    push gs

    mov ax, 0x10           // kernel data selectors for the handler
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    push esp               // &mut TrapFrame
    call trap_dispatch
    add esp, 4

.global trap_return
trap_return:
    pop gs
    pop fs
    pop es
    pop ds
    popa
    add esp, 8             // vec + err
    iretd
"#);

extern "C" {
    fn trap_return();
}

/// Address of the shared trap epilogue. Forged fork/clone stacks return
/// here to restore their `TrapFrame`.
pub fn trap_return_addr() -> usize {
    return trap_return as usize;
}

/// Restore a trap frame that lives on the current kernel stack and leave
/// through the shared epilogue. Used to launch the first ring-3 context
/// of a process; never returns.
pub unsafe fn resume(frame: &TrapFrame) -> ! {
    unsafe {
        asm!(
            "mov esp, {frame}",
            "jmp trap_return",
            frame = in(reg) frame,
            options(noreturn)
        );
    }
}

const EXCEPTION_NAMES: [&str; 20] = [
    "divide error", "debug", "nmi", "breakpoint",
    "overflow", "bound range", "invalid opcode", "device not available",
    "double fault", "coprocessor overrun", "invalid tss", "segment not present",
    "stack fault", "general protection fault", "page fault", "reserved",
    "fpu error", "alignment check", "machine check", "simd error"
];

#[no_mangle]
extern "C" fn trap_dispatch(frame: &mut TrapFrame) {
    match frame.vec {
        14 => crate::ram::paging::page_fault(frame),
        32 => crate::device::timer::handle_tick(),
        33 => crate::device::kbd::handle_irq(),
        128 => crate::syscall::dispatch(frame),
        vec => {
            let name = EXCEPTION_NAMES
                .get(vec as usize)
                .copied()
                .unwrap_or("unexpected trap");
            fatal(frame, name);
        }
    }
}

/// Processor faults with no recovery path: dump and halt.
pub fn fatal(frame: &TrapFrame, what: &str) -> ! {
    printlnk!("fatal: {} (vec {} err {:#x})", what, frame.vec, frame.err);
    printlnk!("  eip {:#010x} cs {:#06x} eflags {:#010x}", frame.eip, frame.cs, frame.eflags);
    printlnk!(
        "  eax {:#010x} ebx {:#010x} ecx {:#010x} edx {:#010x}",
        frame.eax, frame.ebx, frame.ecx, frame.edx
    );
    printlnk!(
        "  esi {:#010x} edi {:#010x} ebp {:#010x} cr2 {:#010x}",
        frame.esi, frame.edi, frame.ebp, arch::cr2()
    );

    arch::int_set(false);
    loop { arch::halt(); }
}
