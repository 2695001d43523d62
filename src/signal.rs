//! Platform glue for asking a child process to stop.

/// Ask `child` to terminate gracefully, the way `Ctrl+C` would.
///
/// - on `cfg(unix)`: sends `SIGINT`.
/// - on `cfg(windows)`: sends a `CTRL_C_EVENT`.
/// - panics on any other platform.
///
/// A child that was already polled to completion has no pid anymore; that
/// is not an error.
pub(crate) fn send_interrupt(child: &tokio::process::Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(std::io::Error::other)?;
        Ok(())
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CTRL_C_EVENT;
        use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;

        let success = unsafe { GenerateConsoleCtrlEvent(CTRL_C_EVENT, pid) };
        if success == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(all(not(windows), not(unix)))]
    {
        panic!("Cannot send interrupt signal to process. Platform is unsupported.")
    }
}
