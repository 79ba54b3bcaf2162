//! Three threads bump a shared counter 10000 times each behind the
//! futex mutex. The load/store pair inside the lock is deliberately not
//! atomic; only the mutex keeps the total at 30000.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};
use ulib::{exit, print, print_dec, thread_create, wait, Mutex, ThreadStack};

const ROUNDS: u32 = 10_000;
const THREADS: u32 = 3;

static COUNTER: AtomicU32 = AtomicU32::new(0);
static LOCK: Mutex = Mutex::new();

static STACK1: ThreadStack = ThreadStack::new();
static STACK2: ThreadStack = ThreadStack::new();
static STACK3: ThreadStack = ThreadStack::new();

extern "C" fn worker(id: usize) -> ! {
    print("Thread ");
    print_dec(id as i32);
    print(" starting...\n");

    for _ in 0..ROUNDS {
        LOCK.with(|| {
            let value = COUNTER.load(Ordering::Relaxed);
            COUNTER.store(value + 1, Ordering::Relaxed);
        });
    }

    print("Thread ");
    print_dec(id as i32);
    print(" finished.\n");
    exit(0);
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    print("Thread test: 3 threads x 10000 increments under a mutex.\n");

    thread_create(worker, 1, &STACK1);
    thread_create(worker, 2, &STACK2);
    thread_create(worker, 3, &STACK3);

    for _ in 0..THREADS {
        wait(None);
    }

    let total = COUNTER.load(Ordering::Relaxed);
    print("Final counter: ");
    print_dec(total as i32);
    print(" (expected ");
    print_dec((ROUNDS * THREADS) as i32);
    print(")\n");

    if total == ROUNDS * THREADS {
        print("THREAD TEST PASSED\n");
        exit(0);
    } else {
        print("THREAD TEST FAILED\n");
        exit(1);
    }
}
