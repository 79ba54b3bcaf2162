//! Copy-on-write probe. The child rewrites a data-segment global and
//! exits; the parent must still observe the original value afterwards.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicI32, Ordering};
use ulib::{exit, fork, print, print_dec, wait};

static GLOBAL_VAR: AtomicI32 = AtomicI32::new(100);

#[no_mangle]
pub extern "C" fn _start() -> ! {
    print("COW fork test starting...\n");
    print("Parent: global_var = ");
    print_dec(GLOBAL_VAR.load(Ordering::Relaxed));
    print("\n");

    let pid = fork();

    if pid == 0 {
        print("Child: writing global_var = 200 (triggers COW)...\n");
        GLOBAL_VAR.store(200, Ordering::Relaxed);
        print("Child: global_var is now ");
        print_dec(GLOBAL_VAR.load(Ordering::Relaxed));
        print("\n");
        exit(0);
    }

    if pid < 0 {
        print("fork failed\n");
        exit(-1);
    }

    let mut status = 0;
    wait(Some(&mut status));

    let value = GLOBAL_VAR.load(Ordering::Relaxed);
    print("Parent: child exited, global_var = ");
    print_dec(value);
    print("\n");

    if value == 100 {
        print("COW TEST PASSED: parent memory stayed private.\n");
        exit(0);
    } else {
        print("COW TEST FAILED: parent memory was clobbered.\n");
        exit(1);
    }
}
