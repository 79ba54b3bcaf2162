#![no_std]
#![no_main]

use ulib::{exit, print};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    print("Hello from User Space!\n");
    print("This is a real program loaded from disk.\n");
    exit(0);
}
