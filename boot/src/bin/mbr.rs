//! Stage 1: the master boot record. Loads the 16 reserved sectors of
//! stage 2 to 0x9000 with one INT 13h extended read and jumps there.
//! 0x9000 keeps stage 2 clear of the E820 staging area at 0x8000. The
//! BIOS hands us the boot drive in DL; it is passed along untouched.

#![no_std]
#![no_main]

use core::arch::global_asm;
use core::panic::PanicInfo;

global_asm!(r#"
.section .text._start
.code16
.global _start
_start:
    cli
    xor ax, ax
    mov ds, ax
    mov es, ax
    mov ss, ax
    mov sp, 0x7c00
    sti
    cld

    // DAP read: 16 sectors from LBA 1 to 0000:9000
    mov si, offset dap
    mov ah, 0x42
    int 0x13
    jc disk_error

    // far jump to 0000:9000, raw 16-bit encoding
    .byte 0xea
    .word 0x9000
    .word 0x0000

disk_error:
    mov si, offset msg_error
1:
    lodsb
    test al, al
    jz 2f
    mov ah, 0x0e           // BIOS teletype
    int 0x10
    jmp 1b
2:
    hlt
    jmp 2b

.align 4
dap:
    .byte 0x10, 0          // packet size, reserved
    .word 16               // sector count
    .word 0x9000, 0x0000   // destination offset:segment
    .quad 1                // start LBA

msg_error:
    .asciz "stage2 read failed"

    .org 0x1fe
    .word 0xaa55
"#);

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    loop {}
}
