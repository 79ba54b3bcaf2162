//! PIT channel 0 as the scheduler clock. The ISR acknowledges the PIC
//! *before* calling the scheduler; doing it after would park the EOI on
//! a thread that may not run again for a while, wedging timer delivery.

use crate::{arch::{idt, outb}, printlnk, proc};

// 1.193182 MHz input clock
const PIT_FREQ: u32 = 1_193_182;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

pub const SCHED_HZ: u32 = 50;

pub fn init(freq: u32) {
    let divisor = PIT_FREQ / freq;

    // 0x36: channel 0, lo/hi access, mode 3 (square wave), binary
    outb(PIT_COMMAND, 0x36);
    outb(PIT_CHANNEL0, divisor as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);

    printlnk!("timer: PIT at {} Hz", freq);
}

pub fn handle_tick() {
    idt::pic_eoi();
    proc::schedule();
}
