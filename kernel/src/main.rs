//!                                 cinder                                 !//
//!
//! A 32-bit higher-half Unix-like kernel for i686: copy-on-write fork,
//! preemptive round-robin scheduling, a flat filesystem on ATA PIO, an
//! ELF32 loader, and enough syscalls to run a shell.

#![no_std]
#![no_main]

extern crate alloc;

mod arch; mod device;
mod elfload; mod filesys;
mod proc; mod ram;
mod sync; mod syscall;

use crate::ram::{frames::FRAME_ALLOC, v2p};

use core::panic::PanicInfo;

#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = core::write!($crate::device::console::ConsoleWriter, $($arg)*);
    }};
}

#[macro_export]
macro_rules! printlnk {
    () => { $crate::printk!("\r\n"); };
    ($($arg:tt)*) => { $crate::printk!("{}\r\n", format_args!($($arg)*)) };
}

#[no_mangle]
pub extern "C" fn kindle() -> ! {
    arch::init_serial();
    device::console::clear();
    printlnk!("cinder, an i686 time-sharing kernel");

    arch::gdt::init();
    arch::idt::init();

    FRAME_ALLOC.init(v2p(arch::start::kernel_end()));
    ram::paging::init();

    proc::init();
    device::init_device();

    proc::create_task(proc::reaper);
    match proc::create_user_task(proc::first_user) {
        Ok(pid) => printlnk!("proc: shell bootstrap is pid {}", pid),
        Err(err) => printlnk!("proc: no shell: {}", err)
    }

    // PID 0 from here on: the idler. The first timer tick starts the
    // rotation.
    loop {
        arch::idle();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    printlnk!("kernel panic: {}", info);
    arch::int_set(false);
    loop { arch::halt(); }
}
