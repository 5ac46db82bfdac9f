// src/exec/group.rs

//! Process groups for spawned commands.
//!
//! Build steps and the user application each lead their own process group,
//! so stopping them reaches everything they forked and not just the direct
//! child. The group id equals the leader's pid.

use tokio::process::Command;
#[cfg(unix)]
use tracing::{debug, warn};

/// Make `cmd` the leader of a fresh process group when spawned.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Send `signal` to every member of the group led by `pgid`.
#[cfg(unix)]
pub fn signal(pgid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // 0 and 1 would address our own group or every process we may signal.
    let pgid = match libc::pid_t::try_from(pgid) {
        Ok(id) if id > 1 => id,
        _ => return Err(std::io::Error::from(std::io::ErrorKind::InvalidInput)),
    };
    // SAFETY: plain syscall; a negative pid addresses the process group.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// SIGKILL whatever is left in the group. An empty group is not an error.
#[cfg(unix)]
pub fn kill_remaining(pgid: u32) {
    match signal(pgid, libc::SIGKILL) {
        Ok(()) => debug!(pgid, "killed remaining process group members"),
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
pub fn kill_remaining(_pgid: u32) {}
