//! PS/2 keyboard. The ISR translates set-1 scancodes to ASCII and is the
//! sole producer of the 256-byte ring; the read syscall is the sole
//! consumer. A counting semaphore tracks buffered bytes so readers block
//! instead of spinning. Overflow drops characters silently.

use crate::{arch::{idt, inb}, ram::mutex::{irq_lock, IrqLock}, sync::Semaphore};

use core::sync::atomic::{AtomicBool, Ordering as AtomOrd};

const DATA_PORT: u16 = 0x60;
const RING_SIZE: usize = 256;

// US QWERTY, scancodes 0x00..0x39
#[rustfmt::skip]
const ASCII: [u8; 58] = [
    0, 0, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08,
    b'\t', b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']',
    b'\n', 0, b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`',
    0, b'\\', b'z', b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0,
    b'*', 0, b' '
];

#[rustfmt::skip]
const ASCII_SHIFT: [u8; 58] = [
    0, 0, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08,
    b'\t', b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}',
    b'\n', 0, b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~',
    0, b'|', b'Z', b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0,
    b'*', 0, b' '
];

struct Ring {
    buf: [u8; RING_SIZE],
    head: usize,
    tail: usize
}

static RING: IrqLock<Ring> = irq_lock(Ring {
    buf: [0; RING_SIZE],
    head: 0,
    tail: 0
});

static AVAILABLE: Semaphore = Semaphore::new(0);
static SHIFT: AtomicBool = AtomicBool::new(false);

impl Ring {
    fn push(&mut self, byte: u8) -> bool {
        let next = (self.head + 1) % RING_SIZE;
        if next == self.tail { return false; } // full, drop
        self.buf[self.head] = byte;
        self.head = next;
        return true;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail { return None; }
        let byte = self.buf[self.tail];
        self.tail = (self.tail + 1) % RING_SIZE;
        return Some(byte);
    }
}

pub fn handle_irq() {
    let scancode = inb(DATA_PORT);

    match scancode {
        0x2a | 0x36 => SHIFT.store(true, AtomOrd::Relaxed),  // shift make
        0xaa | 0xb6 => SHIFT.store(false, AtomOrd::Relaxed), // shift break
        code if code < 0x80 => {
            let table = if SHIFT.load(AtomOrd::Relaxed) { &ASCII_SHIFT } else { &ASCII };
            let ascii = table.get(code as usize).copied().unwrap_or(0);
            if ascii != 0 && RING.lock().push(ascii) {
                AVAILABLE.signal();
            }
        }
        _ => {} // break codes of ordinary keys
    }

    idt::pic_eoi();
}

/// Block until a character arrives.
pub fn getchar() -> u8 {
    loop {
        AVAILABLE.wait();
        if let Some(byte) = RING.lock().pop() {
            return byte;
        }
    }
}

/// Drain one character if any is buffered.
pub fn try_getchar() -> Option<u8> {
    if !AVAILABLE.try_wait() { return None; }
    return RING.lock().pop();
}
