use std::ffi::CString;
use std::path::Path;

use nix::sys::wait::WaitStatus;
use nix::unistd::{execvp, Pid};

use crate::core::chain::{ChildFn, Host};
use crate::core::config::ChainConfig;
use crate::core::error::ChainError;
use crate::core::model::{ChainLink, Workload};
use crate::platform::linux::{mounts, namespaces, stack::ChildStack};

/// The real host: clone, mount and exec on this Linux system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxHost;

impl Host for LinuxHost {
    type Stack = ChildStack;

    fn mount_info_fs(&self, target: &Path) -> Result<(), ChainError> {
        mounts::mount_proc_at(target)
    }

    fn allocate_stack(&self, size: usize) -> Result<ChildStack, ChainError> {
        ChildStack::allocate(size)
    }

    fn spawn_nested(
        &self,
        stack: &mut ChildStack,
        level: u32,
        child: ChildFn<'_>,
    ) -> Result<Pid, ChainError> {
        namespaces::clone_into_new_pid_ns(stack.as_mut_slice(), level, child)
    }

    fn wait(&self, child: Pid) -> Result<WaitStatus, ChainError> {
        namespaces::wait_for_child(child)
    }

    fn exec_workload(&self, workload: &Workload) -> ChainError {
        match exec_workload(workload) {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }
}

/// Build the whole chain from this process.
///
/// Each generation calls `clone()` without `CLONE_VM`. Like `fork()` this
/// is only sound while no other threads are running, so call it before
/// starting any.
pub fn run_chain(config: &ChainConfig) -> Result<(), ChainError> {
    tracing::info!(
        depth = config.depth,
        workload = %config.workload,
        "building nested PID namespace chain"
    );
    crate::core::chain::run_link(&LinuxHost, config, ChainLink::initial(config.depth))
}

/// Replace the current process image with `workload`, searching `PATH` for
/// the program. Returns only on failure.
pub fn exec_workload(workload: &Workload) -> Result<std::convert::Infallible, ChainError> {
    let cmd = &workload.command;
    let Some(first) = cmd.first() else {
        return Err(ChainError::InvalidWorkload("no command specified".into()));
    };

    let program = CString::new(first.as_str())
        .map_err(|_| ChainError::InvalidWorkload(format!("invalid command: '{first}'")))?;
    let args: Vec<CString> = cmd
        .iter()
        .map(|a| {
            CString::new(a.as_str())
                .map_err(|_| ChainError::InvalidWorkload(format!("invalid argument: {a:?}")))
        })
        .collect::<Result<_, _>>()?;

    execvp(&program, &args).map_err(|source| ChainError::Exec {
        program: first.clone(),
        source,
    })
}
