//! The process table and the scheduler, plus the process-lifetime
//! syscalls (fork, clone, execve, exit, wait).
//!
//! PID 0 is the kernel itself: it never leaves the table, idles in `hlt`
//! when nothing else is runnable, and adopts orphans. Scheduling is
//! round-robin in ascending PID order with wrap-around, skipping
//! everything not READY.

pub mod ctrlblk;

use crate::{
    arch::{self, gdt, task::switch_stacks, trap::TrapFrame},
    elfload,
    printlnk,
    ram::{
        frames::FRAME_ALLOC,
        mutex::{irq_lock, IrqLock},
        paging::{flags, AddrSpace},
        PAGE_4KIB
    }
};
pub use ctrlblk::{Pcb, Pid, ProcState, WaitKind};

use alloc::{collections::btree_map::BTreeMap, string::String, sync::Arc};

pub const USER_STACK_PAGE: usize = 0x00f0_0000;
pub const USER_STACK_INIT: usize = 0x00f0_0ffc;

struct ProcTableData {
    procs: BTreeMap<Pid, Pcb>,
    current: Pid,
    pid_rr: Pid
}

pub struct ProcTable(IrqLock<ProcTableData>);

pub static PROCS: ProcTable = ProcTable(irq_lock(ProcTableData {
    procs: BTreeMap::new(),
    current: 0,
    pid_rr: 1
}));

impl ProcTableData {
    fn alloc_pid(&mut self) -> Pid {
        loop {
            let pid = self.pid_rr;
            self.pid_rr = self.pid_rr.wrapping_add(1).max(1);
            if !self.procs.contains_key(&pid) {
                return pid;
            }
        }
    }

    /// Next READY pid after `from` in ring order. PID 0 takes part like
    /// anyone else; it is READY whenever it is not running.
    fn pick_next(&self, from: Pid) -> Option<Pid> {
        let after = self.procs.range(from + 1..);
        let before = self.procs.range(..=from);
        return after
            .chain(before)
            .find(|(_, pcb)| pcb.state == ProcState::Ready)
            .map(|(&pid, _)| pid);
    }
}

impl ProcTable {
    pub fn current_pid(&self) -> Pid {
        return self.0.lock().current;
    }

    pub fn current_space(&self) -> Option<Arc<AddrSpace>> {
        let table = self.0.lock();
        return table.procs.get(&table.current).and_then(|pcb| pcb.space.clone());
    }

    /// Mark the current thread blocked. The caller must invoke
    /// `schedule()` afterwards; Mesa-style users re-check their predicate
    /// on wakeup.
    pub fn block_current(&self, on: WaitKind) {
        let mut table = self.0.lock();
        let cur = table.current;
        if let Some(pcb) = table.procs.get_mut(&cur) {
            pcb.state = ProcState::Blocked(on);
        }
    }

    /// READY a blocked thread. No-op for anything not blocked.
    pub fn wake(&self, pid: Pid) {
        let mut table = self.0.lock();
        if let Some(pcb) = table.procs.get_mut(&pid) {
            if matches!(pcb.state, ProcState::Blocked(_)) {
                pcb.state = ProcState::Ready;
            }
        }
    }
}

pub fn init() {
    let mut table = PROCS.0.lock();
    table.procs.insert(0, Pcb::kernel_idle());
    table.current = 0;
    printlnk!("proc: table up, kernel is pid 0");
}

/// Spawn a kernel thread.
pub fn create_task(entry: extern "C" fn()) -> Pid {
    let mut table = PROCS.0.lock();
    let pid = table.alloc_pid();
    let ppid = table.current;
    table.procs.insert(pid, Pcb::kernel_thread(pid, ppid, entry));
    return pid;
}

/// Spawn a thread with a fresh, empty address space; `entry` runs in that
/// space and is expected to build a user image and iret into it.
pub fn create_user_task(entry: extern "C" fn()) -> Result<Pid, String> {
    let space = Arc::new(AddrSpace::new()?);
    let mut table = PROCS.0.lock();
    let pid = table.alloc_pid();
    let ppid = table.current;
    table.procs.insert(pid, Pcb::user_bootstrap(pid, ppid, space, entry));
    return Ok(pid);
}

/// Round-robin reschedule. Entered with interrupts in any state; they are
/// forced off here and stay off across the stack switch. The incoming
/// thread re-enables them through its own saved EFLAGS (trap epilogue) or
/// the launch stub's `sti`.
pub fn schedule() {
    arch::int_set(false);

    let next_esp;
    let prev_slot;

    {
        let mut table = PROCS.0.lock();
        let prev = table.current;

        let Some(next) = table.pick_next(prev) else { return; };
        if next == prev { return; }

        if let Some(pcb) = table.procs.get_mut(&prev) {
            if pcb.state == ProcState::Running {
                pcb.state = ProcState::Ready;
            }
        }

        let next_pcb = table.procs.get_mut(&next).unwrap();
        next_pcb.state = ProcState::Running;

        // Incoming thread's kernel stack for the next ring crossing.
        gdt::set_kernel_stack(next_pcb.kstack.top());

        // Swap address spaces only when they differ; the kernel half is
        // identical in all of them.
        let next_dir = next_pcb.dir_pa();
        if next_dir != arch::cr3() {
            unsafe { arch::set_cr3(next_dir); }
        }

        next_esp = next_pcb.saved_esp;
        let prev_pcb = table.procs.get_mut(&prev).unwrap();
        prev_slot = &mut prev_pcb.saved_esp as *mut usize;

        table.current = next;
        // The guard restores the flag state found at lock(), which was
        // "off": interrupts stay disabled until the switch completes.
    }

    unsafe { switch_stacks(next_esp, prev_slot); }
}

/// fork: duplicate the caller. COW-clone of the address space, a byte
/// copy of the trap frame with EAX=0, a forged stack that irets straight
/// back to user mode. Parent gets the child pid, child gets 0.
pub fn sys_fork(frame: &TrapFrame) -> isize {
    let Some(parent_space) = PROCS.current_space() else { return -1; };

    let child_space = match parent_space.clone_cow() {
        Ok(space) => Arc::new(space),
        Err(err) => {
            printlnk!("fork: {}", err);
            return -1;
        }
    };

    let mut table = PROCS.0.lock();
    let pid = table.alloc_pid();
    let ppid = table.current;
    table.procs.insert(pid, Pcb::forked(pid, ppid, child_space, frame));
    return pid as isize;
}

/// clone: a new thread in the caller's address space, starting at
/// `entry` on the caller-provided stack.
pub fn sys_clone(frame: &TrapFrame, user_esp: usize, entry: usize) -> isize {
    let Some(space) = PROCS.current_space() else { return -1; };

    let mut table = PROCS.0.lock();
    let pid = table.alloc_pid();
    let ppid = table.current;
    table.procs.insert(pid, Pcb::cloned(pid, ppid, space, frame, user_esp, entry));
    return pid as isize;
}

/// execve: replace the caller's user image. The old image is torn down
/// before the new one maps, so its frames cannot leak; a failure after
/// teardown leaves nothing to return to and terminates the caller.
pub fn sys_execve(frame: &mut TrapFrame, path_ptr: usize) -> isize {
    let Some(space) = PROCS.current_space() else { return -1; };
    let Some(path) = copy_user_str(&space, path_ptr) else { return -1; };

    // Everything validated before teardown happens in open(); a miss here
    // leaves the old image intact.
    let image = match elfload::open(&path) {
        Ok(image) => image,
        Err(err) => {
            printlnk!("execve: {}: {}", path, err);
            return -1;
        }
    };

    arch::int_set(false);

    let entry = match image.install(&space) {
        Ok(entry) => entry,
        Err(err) => {
            printlnk!("execve: {}: {}", path, err);
            exit_current(-1);
        }
    };

    if let Err(err) = map_user_stack(&space) {
        printlnk!("execve: {}: {}", path, err);
        exit_current(-1);
    }

    // On iret: new entry point, fresh stack, zeroed registers. EAX is
    // overwritten with this syscall's return value afterwards.
    *frame = TrapFrame::user(entry, USER_STACK_INIT);

    arch::int_set(true);
    return 0;
}

/// exit: terminal. Zombie until a wait reaps it; children go to PID 0.
pub fn exit_current(code: i32) -> ! {
    {
        let mut table = PROCS.0.lock();
        let cur = table.current;

        if let Some(pcb) = table.procs.get_mut(&cur) {
            pcb.exit_code = code;
            pcb.state = ProcState::Terminated;
        }

        // Reparent children so they never become unreapable.
        let orphans: alloc::vec::Vec<Pid> = table
            .procs
            .values()
            .filter(|pcb| pcb.ppid == cur && pcb.pid != cur)
            .map(|pcb| pcb.pid)
            .collect();
        for pid in orphans {
            table.procs.get_mut(&pid).unwrap().ppid = 0;
        }

        let ppid = table.procs.get(&cur).map(|pcb| pcb.ppid).unwrap_or(0);
        if let Some(parent) = table.procs.get_mut(&ppid) {
            if parent.state == ProcState::Blocked(WaitKind::Child) {
                parent.state = ProcState::Ready;
            }
        }

        printlnk!("proc {} exited with code {}", cur, code);
    }

    schedule();

    // A TERMINATED thread is never picked again; this line is
    // unreachable unless the table is corrupt.
    loop { arch::halt(); }
}

/// wait: reap one zombie child, writing its exit code through
/// `status_ptr` when non-null. Blocks while children are alive, returns
/// -1 when there are none. The scan is O(table) per wakeup, which is
/// fine at this scale.
pub fn sys_wait(status_ptr: usize) -> isize {
    loop {
        {
            let mut table = PROCS.0.lock();
            let cur = table.current;

            let mut have_children = false;
            let mut zombie = None;

            for pcb in table.procs.values() {
                if pcb.ppid == cur && pcb.pid != cur {
                    have_children = true;
                    if pcb.state == ProcState::Terminated {
                        zombie = Some((pcb.pid, pcb.exit_code));
                        break;
                    }
                }
            }

            if let Some((pid, code)) = zombie {
                if status_ptr != 0 {
                    let space = table.procs.get(&cur).and_then(|pcb| pcb.space.clone());
                    let valid = space
                        .map(|space| space.user_range_mapped(status_ptr, 4))
                        .unwrap_or(false);
                    if !valid { return -1; }
                    unsafe { (status_ptr as *mut i32).write(code); }
                }

                // Dropping the PCB drops the Arc on its address space
                // (frames, tables, directory if last) and its kernel
                // stack. The zombie is gone for good.
                table.procs.remove(&pid);
                return pid as isize;
            }

            if !have_children {
                return -1;
            }

            let cur_pid = table.current;
            table.procs.get_mut(&cur_pid).unwrap().state =
                ProcState::Blocked(WaitKind::Child);
        }

        schedule();
    }
}

/// Kernel thread that disposes of orphans. Exited children get
/// reparented to PID 0 and nobody will ever wait on them; this reaps
/// them so they do not linger as zombies forever.
pub extern "C" fn reaper() {
    loop {
        reap_orphans();
        arch::idle();
    }
}

fn reap_orphans() {
    let mut table = PROCS.0.lock();
    let dead: alloc::vec::Vec<Pid> = table
        .procs
        .values()
        .filter(|pcb| pcb.pid != 0 && pcb.ppid == 0 && pcb.state == ProcState::Terminated)
        .map(|pcb| pcb.pid)
        .collect();
    for pid in dead {
        table.procs.remove(&pid);
    }
}

/// Map and zero the fixed user stack page.
fn map_user_stack(space: &AddrSpace) -> Result<(), String> {
    if space.is_mapped(USER_STACK_PAGE) {
        unsafe { (USER_STACK_PAGE as *mut u8).write_bytes(0, PAGE_4KIB); }
        return Ok(());
    }

    let pa = FRAME_ALLOC.alloc().ok_or("no frame for user stack")?;
    unsafe { (crate::ram::p2v(pa) as *mut u8).write_bytes(0, PAGE_4KIB); }
    return space.map_page(USER_STACK_PAGE, pa, flags::U_RW);
}

/// Copy a NUL-terminated string out of user memory, bounded by the inode
/// name length. Returns None when the range is unmapped.
fn copy_user_str(space: &AddrSpace, ptr: usize) -> Option<String> {
    let mut bytes = alloc::vec::Vec::new();
    for i in 0..sfs::NAME_LEN {
        if !space.user_range_mapped(ptr + i, 1) { return None; }
        let byte = unsafe { ((ptr + i) as *const u8).read() };
        if byte == 0 { break; }
        bytes.push(byte);
    }
    return String::from_utf8(bytes).ok();
}

/// The bootstrap entry of the first user process: build the shell image
/// inside our own (empty) address space and iret into ring 3.
pub extern "C" fn first_user() {
    let space = PROCS.current_space().expect("first_user needs an address space");

    let launched: Result<(), String> = (|| {
        let image = elfload::open("shell.elf")?;
        let entry = image.install(&space)?;
        map_user_stack(&space)?;

        let frame = crate::arch::trap::TrapFrame::user(entry, USER_STACK_INIT);
        unsafe { crate::arch::trap::resume(&frame); }
    })();

    if let Err(err) = launched {
        printlnk!("failed to start shell.elf: {}", err);
    }
}
