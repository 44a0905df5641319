use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

/// Fatal conditions of the chain builder.
///
/// None of these are retried: the link that hits one reports it and exits
/// with a failure status.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The child stack could not be mapped.
    #[error("failed to allocate a {size}-byte child stack")]
    Allocate {
        size: usize,
        #[source]
        source: Errno,
    },

    /// `clone(CLONE_NEWPID)` failed.
    #[error("failed to create the level {level} child in a new PID namespace")]
    Spawn {
        level: u32,
        #[source]
        source: Errno,
    },

    /// `waitpid` failed for a reason other than the child terminating.
    #[error("failed to wait for child {pid}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },

    /// The child stack could not be unmapped after its child was reaped.
    #[error("failed to release the child stack")]
    Release {
        #[source]
        source: Errno,
    },

    #[error("failed to create mount point {}", path.display())]
    MountDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to mount proc at {}", path.display())]
    Mount {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    /// Replacing the process image with the workload failed.
    #[error("failed to exec workload '{program}'")]
    Exec {
        program: String,
        #[source]
        source: Errno,
    },

    #[error("invalid workload: {0}")]
    InvalidWorkload(String),
}
