//! Syscall dispatch. Vector 0x80, trap gate, DPL 3. Number in EAX,
//! arguments in EBX/ECX/EDX, result back in EAX. Unknown numbers log a
//! diagnostic and leave EAX untouched.

use crate::{
    arch::trap::TrapFrame,
    device::{console, kbd},
    filesys, printlnk, proc, sync
};

const SYS_READ: u32 = 0;
const SYS_WRITE: u32 = 1;
const SYS_EXIT: u32 = 2;
const SYS_EXECVE: u32 = 3;
const SYS_FORK: u32 = 4;
const SYS_WAIT: u32 = 5;
const SYS_CLONE: u32 = 10;
const SYS_FUTEX_WAIT: u32 = 11;
const SYS_FUTEX_WAKE: u32 = 12;
const SYS_LS: u32 = 13;

pub fn dispatch(frame: &mut TrapFrame) {
    let (arg1, arg2, arg3) = (frame.ebx as usize, frame.ecx as usize, frame.edx as usize);

    let result: isize = match frame.eax {
        SYS_READ => sys_read(arg1, arg2, arg3),
        SYS_WRITE => sys_write(arg1, arg2, arg3),
        SYS_EXIT => proc::exit_current(arg1 as i32),
        SYS_EXECVE => proc::sys_execve(frame, arg1),
        SYS_FORK => proc::sys_fork(frame),
        SYS_WAIT => proc::sys_wait(arg1),
        SYS_CLONE => proc::sys_clone(frame, arg1, arg2),
        SYS_FUTEX_WAIT => sync::futex_wait(arg1, arg2 as u32),
        SYS_FUTEX_WAKE => sync::futex_wake(arg1),
        SYS_LS => {
            filesys::list();
            0
        }
        num => {
            // Contract violation, not a crime: EAX stays as it was.
            printlnk!("syscall: unknown number {}", num);
            return;
        }
    };

    frame.eax = result as u32;
}

/// read(fd=0, buf, count): block for the first byte of keyboard input,
/// then drain whatever else is already buffered, up to `count`.
fn sys_read(fd: usize, buf: usize, count: usize) -> isize {
    if fd != 0 || count == 0 { return -1; }

    let Some(space) = proc::PROCS.current_space() else { return -1; };
    if !space.user_range_mapped(buf, count) { return -1; }

    let dst = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, count) };

    dst[0] = kbd::getchar();
    let mut read = 1;
    while read < count {
        match kbd::try_getchar() {
            Some(byte) => {
                dst[read] = byte;
                read += 1;
            }
            None => break
        }
    }
    return read as isize;
}

/// write(fd=1, buf, count) to the console. Any other fd is refused.
fn sys_write(fd: usize, buf: usize, count: usize) -> isize {
    if fd != 1 { return -1; }
    if count == 0 { return 0; }

    let Some(space) = proc::PROCS.current_space() else { return -1; };
    if !space.user_range_mapped(buf, count) { return -1; }

    let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, count) };
    console::print_buffer(bytes);
    return count as isize;
}
