//! Process control blocks and kernel-stack forging. Every runnable PCB
//! owns a 16 KiB kernel stack holding one of two resume shapes:
//!
//!   - a callee-saved register block left by `switch_stacks` (a thread
//!     that was previously switched out), or
//!   - a forged block whose return address leads into `kthread_launch`
//!     (new kernel thread) or the trap epilogue (fork/clone child, first
//!     user entry) with a full `TrapFrame` above it.
//!
//! The forging constructors build the second shape; the switch itself
//! maintains the first.

use crate::{
    arch::{task, trap::{trap_return_addr, TrapFrame}},
    ram::{paging::AddrSpace, KSTACK_SIZE}
};

use alloc::{boxed::Box, sync::Arc, vec};

pub type Pid = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcState {
    Ready,
    Running,
    Blocked(WaitKind),
    Terminated
}

/// What a blocked thread is waiting for. `exit` wakes `Child` waiters;
/// the futex and queue primitives wake their own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitKind {
    Child,
    Futex(usize),
    Queue
}

pub struct KernelStack {
    buf: Box<[u8]>
}

impl KernelStack {
    fn new() -> Self {
        return Self { buf: vec![0u8; KSTACK_SIZE].into_boxed_slice() };
    }

    /// Top of the stack, 16-byte aligned. This is also what TSS.esp0 gets.
    pub fn top(&self) -> usize {
        return (self.buf.as_ptr() as usize + self.buf.len()) & !0xf;
    }
}

pub struct Pcb {
    pub pid: Pid,
    pub ppid: Pid,
    pub state: ProcState,
    pub saved_esp: usize,
    pub kstack: KernelStack,
    /// None for the kernel itself and kernel threads; they run on
    /// whichever directory is installed (the kernel half is everywhere).
    pub space: Option<Arc<AddrSpace>>,
    pub exit_code: i32
}

impl Pcb {
    /// PID 0: already running on the boot stack, nothing to forge.
    pub fn kernel_idle() -> Self {
        return Self {
            pid: 0,
            ppid: 0,
            state: ProcState::Running,
            saved_esp: 0,
            kstack: KernelStack::new(),
            space: None,
            exit_code: 0
        };
    }

    /// A kernel thread that starts at `entry` with interrupts enabled.
    pub fn kernel_thread(pid: Pid, ppid: Pid, entry: extern "C" fn()) -> Self {
        let mut pcb = Self {
            pid,
            ppid,
            state: ProcState::Ready,
            saved_esp: 0,
            kstack: KernelStack::new(),
            space: None,
            exit_code: 0
        };
        pcb.saved_esp = forge_switch_record(
            pcb.kstack.top(),
            entry as usize,
            task::kthread_launch_addr()
        );
        return pcb;
    }

    /// Like a kernel thread, but with its own address space. The entry
    /// builds the user image and irets into it; the shell starts this way.
    pub fn user_bootstrap(pid: Pid, ppid: Pid, space: Arc<AddrSpace>, entry: extern "C" fn()) -> Self {
        let mut pcb = Self::kernel_thread(pid, ppid, entry);
        pcb.space = Some(space);
        return pcb;
    }

    /// Fork child: the parent's entire trap frame, with EAX forced to 0
    /// so the two returns of fork disagree exactly once.
    pub fn forked(pid: Pid, ppid: Pid, space: Arc<AddrSpace>, frame: &TrapFrame) -> Self {
        let mut child_frame = *frame;
        child_frame.eax = 0;
        return Self::from_trap_frame(pid, ppid, space, child_frame);
    }

    /// Clone child: shares the address space, runs `entry` on the
    /// caller-provided user stack. EBP is cleared so unwinding the new
    /// thread's stack terminates instead of walking into the creator's.
    pub fn cloned(
        pid: Pid, ppid: Pid, space: Arc<AddrSpace>,
        frame: &TrapFrame, user_esp: usize, entry: usize
    ) -> Self {
        let mut child_frame = *frame;
        child_frame.eax = 0;
        child_frame.ebp = 0;
        child_frame.eip = entry as u32;
        child_frame.useresp = user_esp as u32;
        return Self::from_trap_frame(pid, ppid, space, child_frame);
    }

    fn from_trap_frame(pid: Pid, ppid: Pid, space: Arc<AddrSpace>, frame: TrapFrame) -> Self {
        let mut pcb = Self {
            pid,
            ppid,
            state: ProcState::Ready,
            saved_esp: 0,
            kstack: KernelStack::new(),
            space: Some(space),
            exit_code: 0
        };
        pcb.saved_esp = forge_trap_resume(pcb.kstack.top(), frame);
        return pcb;
    }

    pub fn dir_pa(&self) -> u32 {
        return match &self.space {
            Some(space) => space.dir_pa(),
            None => crate::ram::paging::kernel_dir()
        };
    }
}

/// Lay out `[ebp][edi][esi][ebx][ret]` so `switch_stacks` pops straight
/// into `ret`. The EBX slot doubles as the entry-point carrier for
/// `kthread_launch`.
fn forge_switch_record(stack_top: usize, ebx: usize, ret: usize) -> usize {
    let mut sp = stack_top;
    unsafe {
        sp -= 4; (sp as *mut u32).write(ret as u32);
        sp -= 4; (sp as *mut u32).write(ebx as u32);
        sp -= 4; (sp as *mut u32).write(0); // esi
        sp -= 4; (sp as *mut u32).write(0); // edi
        sp -= 4; (sp as *mut u32).write(0); // ebp
    }
    return sp;
}

/// A full trap frame topped by a switch record that returns into the
/// trap epilogue: the first switch to this stack irets straight out.
fn forge_trap_resume(stack_top: usize, frame: TrapFrame) -> usize {
    let mut sp = stack_top;
    unsafe {
        sp -= size_of::<TrapFrame>();
        (sp as *mut TrapFrame).write(frame);
    }
    return forge_switch_record(sp, 0, trap_return_addr());
}
