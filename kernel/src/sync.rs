//! Kernel blocking primitives and the futex backend.
//!
//! All of these are Mesa-style: a woken thread re-checks its predicate,
//! it is never handed the resource directly. Wait queues hold pids; the
//! process table does the actual state flips.

use crate::{
    arch,
    proc::{self, Pid, WaitKind, PROCS},
    ram::mutex::{irq_lock, IrqLock}
};

use alloc::collections::{btree_map::BTreeMap, vec_deque::VecDeque};

struct SemData {
    value: i32,
    queue: VecDeque<Pid>
}

/// Counting semaphore with a FIFO wait queue.
pub struct Semaphore(IrqLock<SemData>);

impl Semaphore {
    pub const fn new(value: i32) -> Self {
        return Self(irq_lock(SemData { value, queue: VecDeque::new() }));
    }

    pub fn wait(&self) {
        let int_flag = arch::int_enabled();

        loop {
            {
                let mut sem = self.0.lock();
                if sem.value > 0 {
                    sem.value -= 1;
                    break;
                }

                // Queue up, block, and let the scheduler take over. The
                // wakeup races other waiters for the count, hence the loop.
                let cur = PROCS.current_pid();
                sem.queue.push_back(cur);
                PROCS.block_current(WaitKind::Queue);
            }
            proc::schedule();
        }

        arch::int_set(int_flag);
    }

    /// Take the count without blocking. Mesa consumers use this to drain
    /// opportunistically.
    pub fn try_wait(&self) -> bool {
        let mut sem = self.0.lock();
        if sem.value > 0 {
            sem.value -= 1;
            return true;
        }
        return false;
    }

    pub fn signal(&self) {
        let mut sem = self.0.lock();
        sem.value += 1;
        if let Some(pid) = sem.queue.pop_front() {
            PROCS.wake(pid);
        }
    }
}

/// Binary semaphore with owner tracking; only the owner may unlock.
pub struct KernelMutex {
    sem: Semaphore,
    owner: IrqLock<Option<Pid>>
}

impl KernelMutex {
    pub const fn new() -> Self {
        return Self {
            sem: Semaphore::new(1),
            owner: irq_lock(None)
        };
    }

    pub fn lock(&self) {
        self.sem.wait();
        *self.owner.lock() = Some(PROCS.current_pid());
    }

    pub fn unlock(&self) {
        {
            let mut owner = self.owner.lock();
            if *owner != Some(PROCS.current_pid()) { return; }
            *owner = None;
        }
        self.sem.signal();
    }

    /// Run `f` with the mutex held.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock();
        let result = f();
        self.unlock();
        return result;
    }
}

/// Futex wait queues, keyed by user virtual address.
static FUTEX_TABLE: IrqLock<BTreeMap<usize, VecDeque<Pid>>> =
    irq_lock(BTreeMap::new());

/// Sleep iff `*addr == expected`, checked and enqueued atomically with
/// respect to interrupts so a wake between check and sleep cannot be
/// lost. Returns -1 for a bad address, 0 otherwise.
pub fn futex_wait(addr: usize, expected: u32) -> isize {
    let Some(space) = PROCS.current_space() else { return -1; };
    if addr % 4 != 0 || !space.user_range_mapped(addr, 4) { return -1; }

    let int_flag = arch::int_enabled();

    {
        let mut table = FUTEX_TABLE.lock();

        let current = unsafe { (addr as *const u32).read_volatile() };
        if current != expected {
            drop(table);
            arch::int_set(int_flag);
            return 0;
        }

        let cur = PROCS.current_pid();
        table.entry(addr).or_insert_with(VecDeque::new).push_back(cur);
        PROCS.block_current(WaitKind::Futex(addr));
    }

    proc::schedule();

    arch::int_set(int_flag);
    return 0;
}

/// Wake one sleeper on `addr`, if any. Returns how many woke (0 or 1).
pub fn futex_wake(addr: usize) -> isize {
    let mut table = FUTEX_TABLE.lock();

    let Some(queue) = table.get_mut(&addr) else { return 0; };
    let Some(pid) = queue.pop_front() else { return 0; };
    if queue.is_empty() {
        table.remove(&addr);
    }

    PROCS.wake(pid);
    return 1;
}
