//! Signalling NGINX master processes.
//!
//! [`NginxCommand`](crate::NginxCommand) reloads through a [`Signaller`].

use std::io;

use tracing::trace;

use crate::error::{NginxError, NginxResult};

pub trait Signaller: Send + Sync {
    /// Sends `SIGHUP` to `pid`.
    fn hangup(&self, pid: u32) -> NginxResult<()>;
}

/// Signals processes on this host with `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSignaller;

impl Signaller for SystemSignaller {
    #[cfg(unix)]
    fn hangup(&self, pid: u32) -> NginxResult<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| NginxError::signal(pid, io::Error::from(io::ErrorKind::InvalidInput)))?;
        trace!(pid, "sending SIGHUP");
        kill(Pid::from_raw(raw), Signal::SIGHUP)
            .map_err(|errno| NginxError::signal(pid, io::Error::from(errno)))
    }

    #[cfg(not(unix))]
    fn hangup(&self, pid: u32) -> NginxResult<()> {
        trace!(pid, "signals unsupported on this platform");
        Err(NginxError::signal(
            pid,
            io::Error::new(io::ErrorKind::Unsupported, "process signals need unix"),
        ))
    }
}
