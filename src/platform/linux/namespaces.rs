use nix::errno::Errno;
use nix::sched::{clone, CloneFlags};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use crate::core::chain::ChildFn;
use crate::core::error::ChainError;

/// Flags for each new generation: only a new PID namespace. Mount, network
/// and the other namespaces are shared with the parent.
pub fn chain_clone_flags() -> CloneFlags {
    CloneFlags::CLONE_NEWPID
}

/// `clone(2)` `child` onto `stack` in a new PID namespace nested in the
/// caller's. `SIGCHLD` as the exit signal makes it reapable with a plain
/// `waitpid`.
pub fn clone_into_new_pid_ns(
    stack: &mut [u8],
    level: u32,
    child: ChildFn<'_>,
) -> Result<Pid, ChainError> {
    // SAFETY: the caller is single-threaded, and the child gets its own
    // copy of the address space, so it cannot observe the parent's memory
    // changing underneath it.
    let pid = unsafe {
        clone(
            child,
            stack,
            chain_clone_flags(),
            Some(Signal::SIGCHLD as libc::c_int),
        )
    }
    .map_err(|source| ChainError::Spawn { level, source })?;

    tracing::debug!(child = pid.as_raw(), "cloned child into new PID namespace");
    Ok(pid)
}

/// Wait for `pid` to terminate and return how it ended.
pub fn wait_for_child(pid: Pid) -> Result<WaitStatus, ChainError> {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => return Ok(status),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(source) => return Err(ChainError::Wait { pid, source }),
        }
    }
}
