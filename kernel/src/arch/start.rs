//! Kernel entry. Stage 2 drops us here at physical 1 MiB, in protected
//! mode, paging off, with the E820 map parked at 0x8000. Code is linked at
//! 0xC0100000, so everything before the far jump must address symbols
//! through their physical aliases (`sym - 0xC0000000`).

use core::arch::global_asm;

global_asm!(r#"
.section .boot, "ax"
.code32
.global _start
_start:
    cli
    cld

    // The flat binary carries no .bss, zero it before Rust sees it.
    mov edi, offset __bss_start - 0xC0000000
    mov ecx, offset __bss_end - 0xC0000000
    sub ecx, edi
    shr ecx, 2
    xor eax, eax
    rep stosd

    // Identity-map the first 4 MiB so the next instruction keeps executing
    // once CR0.PG goes live.
    mov edi, offset boot_pt - 0xC0000000
    mov eax, 0x003                     // present | writable
    mov ecx, 1024
1:
    mov [edi], eax
    add eax, 0x1000
    add edi, 4
    loop 1b

    // PDE 0 (identity) and PDE 768 (0xC0000000) share the same table.
    mov edi, offset boot_pd - 0xC0000000
    mov eax, offset boot_pt - 0xC0000000
    or eax, 0x003
    mov [edi], eax
    mov [edi + 768 * 4], eax

    mov cr3, edi

    // PG together with WP: ring 0 must honor read-only PTEs, otherwise
    // copy-on-write is unsound.
    mov eax, cr0
    or eax, 0x80010000
    mov cr0, eax

    mov eax, offset 2f
    jmp eax

.section .text
2:
    // Higher half from here on. Drop the identity mapping and flush.
    mov dword ptr [boot_pd], 0
    mov eax, cr3
    mov cr3, eax

    mov esp, offset boot_stack_top
    xor ebp, ebp
    call kindle
3:
    hlt
    jmp 3b

.section .bss
.align 4096
boot_pd:
    .skip 4096
boot_pt:
    .skip 4096
.align 16
boot_stack:
    .skip 16384
boot_stack_top:
"#);

extern "C" {
    static __kernel_end: u8;
}

/// One past the last byte of the kernel image, as linked (higher half).
pub fn kernel_end() -> usize {
    return unsafe { &__kernel_end as *const u8 as usize };
}
