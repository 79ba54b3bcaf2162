//! Stage 2. Everything the kernel assumes on entry happens here:
//!
//!   1. A20 gate opened.
//!   2. E820 memory map collected at physical 0x8000 (u16 entry count,
//!      then 24-byte entries from 0x8004).
//!   3. Flat GDT loaded, protected mode entered.
//!   4. The kernel image (inode 0 of the flat filesystem, laid out
//!      contiguously by the builder) read over ATA PIO to 1 MiB.
//!   5. Jump to 0x100000.

#![no_std]
#![no_main]

use core::arch::global_asm;
use core::panic::PanicInfo;

global_asm!(r#"
.section .text._start
.code16
.global _start
_start:
    cld

    // A20 through the fast gate
    in al, 0x92
    or al, 2
    out 0x92, al

    // E820 map to 0x8000: count first, entries from 0x8004
    mov di, 0x8004
    xor ebx, ebx
    xor bp, bp
e820_loop:
    mov eax, 0xe820
    mov edx, 0x534d4150        // 'SMAP'
    mov ecx, 24
    mov dword ptr [di + 20], 1 // ACPI 3.x extended attribute default
    int 0x15
    jc e820_done
    cmp eax, 0x534d4150
    jne e820_done
    inc bp
    add di, 24
    test ebx, ebx
    jnz e820_loop
e820_done:
    mov word ptr [0x8000], bp

    // Protected mode
    cli
    lgdt [gdtr]
    mov eax, cr0
    or eax, 1
    mov cr0, eax
    // far jump, 16-bit encoding with a 32-bit offset
    .byte 0x66, 0xea
    .long pm_entry
    .word 0x08

.code32
pm_entry:
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    mov ss, ax
    mov esp, 0x90000

    // First sector of the inode table; inode 0 is the kernel image.
    // Scratch at 0xb000, just past our own 16 sectors.
    mov eax, 19
    mov edi, 0xb000
    call ata_read

    // Packed inode: byte 0 used, size dword at +33, blocks[0] at +37.
    mov ecx, [0xb000 + 33]
    add ecx, 511
    shr ecx, 9                 // size in sectors
    mov esi, [0xb000 + 37]     // first LBA, contiguous from here
    mov edi, 0x100000

load_loop:
    mov eax, esi
    push ecx
    call ata_read              // advances edi one sector
    pop ecx
    inc esi
    dec ecx
    jnz load_loop

    mov eax, 0x100000
    jmp eax

// One sector, LBA28 PIO. eax = lba, edi = destination (advanced by 512).
ata_read:
    push ebx
    mov ebx, eax

1:  mov dx, 0x1f7              // wait for BSY to clear
    in al, dx
    test al, 0x80
    jnz 1b

    mov eax, ebx
    shr eax, 24
    and al, 0x0f
    or al, 0xe0                // LBA mode, master
    mov dx, 0x1f6
    out dx, al

    mov dx, 0x1f2
    mov al, 1
    out dx, al

    mov eax, ebx
    mov dx, 0x1f3
    out dx, al
    shr eax, 8
    mov dx, 0x1f4
    out dx, al
    shr eax, 8
    mov dx, 0x1f5
    out dx, al

    mov dx, 0x1f7
    mov al, 0x20               // READ SECTORS
    out dx, al

2:  in al, dx                  // BSY clear and DRQ set
    test al, 0x80
    jnz 2b
    test al, 0x08
    jz 2b

    mov dx, 0x1f0
    mov ecx, 256
3:  in ax, dx
    mov [edi], ax
    add edi, 2
    loop 3b

    pop ebx
    ret

.align 8
gdt:
    .quad 0
    .quad 0x00cf9a000000ffff   // ring-0 code, flat 4 GiB
    .quad 0x00cf92000000ffff   // ring-0 data, flat 4 GiB
gdtr:
    .word 23
    .long gdt
"#);

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}
