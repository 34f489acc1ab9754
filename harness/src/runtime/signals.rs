//! Process signalling
//!
//! Thin seam over `kill(2)` so supervisors can be tested without sending
//! real signals.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

#[cfg_attr(test, mockall::automock)]
pub trait ProcessSignals: Send + Sync {
    /// Ask the process to shut down (SIGTERM)
    fn terminate(&self, pid: u32) -> io::Result<()>;

    /// Kill the process outright (SIGKILL)
    fn force_kill(&self, pid: u32) -> io::Result<()>;
}

/// Signals delivered with `kill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSignals;

impl UnixSignals {
    fn send(pid: u32, sig: Signal) -> io::Result<()> {
        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;

        match signal::kill(Pid::from_raw(pid), sig) {
            Ok(()) => Ok(()),
            // Already gone
            Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }
}

impl ProcessSignals for UnixSignals {
    fn terminate(&self, pid: u32) -> io::Result<()> {
        Self::send(pid, Signal::SIGTERM)
    }

    fn force_kill(&self, pid: u32) -> io::Result<()> {
        Self::send(pid, Signal::SIGKILL)
    }
}
