//! The interrupt lock. On this uniprocessor a critical section is just
//! an interrupts-off window, so the raw lock below never spins: taking
//! it turns interrupts off and remembers whether they were on, releasing
//! it puts them back. Expressed as a `lock_api::RawMutex` so the guard
//! types, `Deref` plumbing and poisoning-free semantics all come from
//! lock_api rather than hand-rolled wrappers.
//!
//! Nesting works because each lock instance keeps its own saved flag and
//! guards drop in reverse order. Re-locking the same lock from the same
//! thread is a bug and panics instead of deadlocking silently.

use crate::arch;

use core::sync::atomic::{AtomicBool, Ordering};
use lock_api::{GuardSend, RawMutex};

pub struct RawIrqMutex {
    taken: AtomicBool,
    int_was_on: AtomicBool
}

unsafe impl RawMutex for RawIrqMutex {
    const INIT: Self = Self {
        taken: AtomicBool::new(false),
        int_was_on: AtomicBool::new(false)
    };

    type GuardMarker = GuardSend;

    fn lock(&self) {
        if !self.try_lock() {
            // One CPU, interrupts off: nobody else can be holding it.
            panic!("irq lock re-entered");
        }
    }

    fn try_lock(&self) -> bool {
        let was_on = arch::int_enabled();
        arch::int_set(false);

        if self.taken.load(Ordering::Relaxed) {
            arch::int_set(was_on);
            return false;
        }

        // Safe to stash the flag in the lock itself: it is only read
        // back by the unlock of this same acquisition.
        self.int_was_on.store(was_on, Ordering::Relaxed);
        self.taken.store(true, Ordering::Relaxed);
        return true;
    }

    unsafe fn unlock(&self) {
        self.taken.store(false, Ordering::Relaxed);
        arch::int_set(self.int_was_on.load(Ordering::Relaxed));
    }
}

pub type IrqLock<T> = lock_api::Mutex<RawIrqMutex, T>;

/// Const constructor for statics.
pub const fn irq_lock<T>(data: T) -> IrqLock<T> {
    return lock_api::Mutex::const_new(RawIrqMutex::INIT, data);
}
