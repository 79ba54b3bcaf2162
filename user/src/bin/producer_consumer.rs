//! Classic bounded buffer: 2 producers make 10 items each, 4 consumers
//! take 5 each, buffer of 5 slots. Two counting semaphores track empty
//! and full slots; a mutex guards the indices. The buffer is small on
//! purpose, it maximizes blocking and wakeups.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use ulib::{exit, print, print_dec, thread_create, wait, Mutex, Semaphore, ThreadStack};

const BUFFER_SIZE: usize = 5;
const PRODUCE_COUNT: u32 = 10; // each of 2 producers
const CONSUME_COUNT: u32 = 5;  // each of 4 consumers

static BUFFER: [AtomicU32; BUFFER_SIZE] = [
    AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0),
    AtomicU32::new(0), AtomicU32::new(0)
];
static BUF_HEAD: AtomicUsize = AtomicUsize::new(0);
static BUF_TAIL: AtomicUsize = AtomicUsize::new(0);

static EMPTY_SLOTS: Semaphore = Semaphore::new(BUFFER_SIZE as u32);
static FULL_SLOTS: Semaphore = Semaphore::new(0);
static BUF_LOCK: Mutex = Mutex::new();

static P1_STACK: ThreadStack = ThreadStack::new();
static P2_STACK: ThreadStack = ThreadStack::new();
static C1_STACK: ThreadStack = ThreadStack::new();
static C2_STACK: ThreadStack = ThreadStack::new();
static C3_STACK: ThreadStack = ThreadStack::new();
static C4_STACK: ThreadStack = ThreadStack::new();

extern "C" fn producer(id: usize) -> ! {
    for i in 0..PRODUCE_COUNT {
        let item = id as u32 * 100 + i;

        EMPTY_SLOTS.wait();
        BUF_LOCK.with(|| {
            let tail = BUF_TAIL.load(Ordering::Relaxed);
            BUFFER[tail % BUFFER_SIZE].store(item, Ordering::Relaxed);
            BUF_TAIL.store(tail + 1, Ordering::Relaxed);

            print("[P");
            print_dec(id as i32);
            print("] produced ");
            print_dec(item as i32);
            print("\n");
        });
        FULL_SLOTS.post();
    }

    print("[P");
    print_dec(id as i32);
    print("] done.\n");
    exit(0);
}

extern "C" fn consumer(id: usize) -> ! {
    for _ in 0..CONSUME_COUNT {
        FULL_SLOTS.wait();
        BUF_LOCK.with(|| {
            let head = BUF_HEAD.load(Ordering::Relaxed);
            let item = BUFFER[head % BUFFER_SIZE].load(Ordering::Relaxed);
            BUF_HEAD.store(head + 1, Ordering::Relaxed);

            print("  [C");
            print_dec(id as i32);
            print("] consumed ");
            print_dec(item as i32);
            print("\n");
        });
        EMPTY_SLOTS.post();
    }

    print("  [C");
    print_dec(id as i32);
    print("] done.\n");
    exit(0);
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    print("=== Producer/consumer (2P x 10 / 4C x 5, buffer 5) ===\n");

    thread_create(producer, 1, &P1_STACK);
    thread_create(producer, 2, &P2_STACK);
    thread_create(consumer, 1, &C1_STACK);
    thread_create(consumer, 2, &C2_STACK);
    thread_create(consumer, 3, &C3_STACK);
    thread_create(consumer, 4, &C4_STACK);

    for _ in 0..6 {
        wait(None);
    }

    let head = BUF_HEAD.load(Ordering::Relaxed);
    let tail = BUF_TAIL.load(Ordering::Relaxed);

    print("head = ");
    print_dec(head as i32);
    print(", tail = ");
    print_dec(tail as i32);
    print("\n");

    if head == tail && head == 20 {
        print("PRODUCER/CONSUMER PASSED: all 20 items moved once.\n");
        exit(0);
    } else {
        print("PRODUCER/CONSUMER FAILED\n");
        exit(1);
    }
}
