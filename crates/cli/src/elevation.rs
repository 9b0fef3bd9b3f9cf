//! The elevation decision and the UAC re-exec that carries it out.

use std::io;

use crate::Verb;

/// Whether the requested work needs administrative rights before any write
/// happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationDecision {
    NotRequired,
    Required,
}

/// Computes the decision from the verb and its options. Writing to an output
/// file needs no OS privilege, and a `--parent` marker means this invocation
/// already is the elevated re-exec.
pub fn decide(verb: &Verb, parent: Option<u32>) -> ElevationDecision {
    if parent.is_some() {
        return ElevationDecision::NotRequired;
    }
    let required = match verb {
        Verb::EnableEventLog => true,
        Verb::Install { user, outfile, .. } | Verb::Uninstall { user, outfile, .. } => {
            !user && outfile.is_none()
        }
        Verb::Config { user, params } => !user && !params.is_empty(),
    };
    if required {
        ElevationDecision::Required
    } else {
        ElevationDecision::NotRequired
    }
}

/// Whether this process already runs with an elevated token.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = HANDLE::default();
        if !OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).as_bool() {
            return false;
        }

        let mut elevation = TOKEN_ELEVATION::default();
        let mut size = std::mem::size_of::<TOKEN_ELEVATION>() as u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            size,
            &mut size,
        )
        .as_bool();
        CloseHandle(token);

        ok && elevation.TokenIsElevated != 0
    }
}

/// No UAC outside Windows; nothing to elevate to.
#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    true
}

/// Relaunches the current executable elevated, forwarding the original
/// arguments plus a `--parent <pid>` back-reference, and blocks until the
/// child exits. Returns the child's exit code, 255 when unobtainable.
#[cfg(windows)]
pub fn relaunch_elevated() -> io::Result<i32> {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject};
    use windows::Win32::System::WindowsProgramming::INFINITE;
    use windows::Win32::UI::Shell::{
        ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW,
    };
    use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;

    let exe = std::env::current_exe()?;
    let parameters = std::env::args()
        .skip(1)
        .map(|arg| quote_windows_arg(&arg))
        .chain(["--parent".to_owned(), std::process::id().to_string()])
        .collect::<Vec<_>>()
        .join(" ");

    let verb = to_wide("runas");
    let file = to_wide(&exe.to_string_lossy());
    let params = to_wide(&parameters);

    let mut info = SHELLEXECUTEINFOW {
        cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
        fMask: SEE_MASK_NOCLOSEPROCESS,
        lpVerb: PCWSTR(verb.as_ptr()),
        lpFile: PCWSTR(file.as_ptr()),
        lpParameters: PCWSTR(params.as_ptr()),
        nShow: SW_HIDE.0 as i32,
        ..Default::default()
    };

    unsafe {
        // Launch fails when the user declines the elevation prompt.
        if !ShellExecuteExW(&mut info).as_bool() {
            return Err(io::Error::last_os_error());
        }

        WaitForSingleObject(info.hProcess, INFINITE);
        let mut code: u32 = 255;
        if !GetExitCodeProcess(info.hProcess, &mut code).as_bool() {
            code = 255;
        }
        CloseHandle(info.hProcess);
        Ok(code as i32)
    }
}

#[cfg(not(windows))]
pub fn relaunch_elevated() -> io::Result<i32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "elevation requires Windows",
    ))
}

#[cfg(windows)]
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(windows)]
fn quote_windows_arg(arg: &str) -> String {
    if arg.contains([' ', '\t', '\n', '\r', '"']) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_owned()
    }
}
