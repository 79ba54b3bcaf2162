//! The interactive shell. Line editing is plain: echo, backspace,
//! enter. `exec` forks so the shell survives whatever it launches.

#![no_std]
#![no_main]

use ulib::{exec, fork, ls, print, print_dec, read_line, wait};

#[no_mangle]
pub extern "C" fn _start() -> ! {
    print("\nWelcome to the cinder shell!\n");
    print("Type 'help' for commands.\n");

    let mut buf = [0u8; 128];

    loop {
        print("> ");
        let line = read_line(&mut buf).trim();

        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, "")
        };

        match cmd {
            "" => {}
            "help" => {
                print("Available commands:\n");
                print("  help   - show this message\n");
                print("  clear  - clear the screen\n");
                print("  ls     - list files\n");
            }
            "clear" => {
                // Form feed; the console treats it as a full clear.
                print("\x0c");
            }
            "ls" => ls(),
            "exec" => run(arg),
            _ => {
                print("Unknown command: ");
                print(cmd);
                print("\n");
            }
        }
    }
}

fn run(path: &str) {
    if path.is_empty() {
        print("usage: exec <file>\n");
        return;
    }

    let pid = fork();
    if pid == 0 {
        if exec(path) < 0 {
            print("exec failed: ");
            print(path);
            print("\n");
            ulib::exit(-1);
        }
        // exec does not return on success
        ulib::exit(0);
    } else if pid > 0 {
        let mut status = 0;
        wait(Some(&mut status));
        if status != 0 {
            print("exited with code ");
            print_dec(status);
            print("\n");
        }
    } else {
        print("fork failed\n");
    }
}
