//! Console-facing output. Owns the one-shot re-attach to the parent
//! process's console after a UAC re-exec allocated a fresh one.

use std::io;

use log::{error, info};

pub struct Output {
    console_attached: bool,
}

impl Output {
    pub fn new() -> Self {
        Self {
            console_attached: false,
        }
    }

    /// Re-attaches stdout/stderr to the parent's console. Performed at most
    /// once per process; later calls are no-ops.
    pub fn attach_parent_console(&mut self, parent_pid: u32) -> io::Result<()> {
        if self.console_attached {
            return Ok(());
        }
        self.console_attached = true;

        #[cfg(windows)]
        unsafe {
            use windows::Win32::System::Console::{AttachConsole, FreeConsole};

            if !FreeConsole().as_bool() {
                return Err(io::Error::last_os_error());
            }
            if !AttachConsole(parent_pid).as_bool() {
                return Err(io::Error::last_os_error());
            }
        }
        #[cfg(not(windows))]
        let _ = parent_pid;

        Ok(())
    }

    pub fn message(&self, text: &str) {
        println!("{}", text);
    }

    pub fn success(&self, text: &str) {
        println!("{}", text);
        info!(target: "shellreg", "{}", text.trim());
    }

    pub fn error(&self, text: &str) {
        eprintln!("{}", text);
        error!(target: "shellreg", "{}", text);
    }
}
