use serde::{Deserialize, Serialize};
use std::fmt;

/// One generation of the namespace chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    /// Remaining number of nested namespaces to create below this link.
    pub level: u32,
    /// True only for the link run by the process that started the chain.
    /// That process is not in a namespace of its own making, so it skips the
    /// proc mount.
    pub is_first_invocation: bool,
}

impl ChainLink {
    /// The link the initial process starts with.
    pub fn initial(depth: u32) -> Self {
        Self {
            level: depth,
            is_first_invocation: true,
        }
    }

    /// The link a freshly cloned child runs, or `None` for the terminal link.
    pub fn descend(self) -> Option<Self> {
        self.level.checked_sub(1).map(|level| Self {
            level,
            is_first_invocation: false,
        })
    }

    pub fn is_terminal(self) -> bool {
        self.level == 0
    }
}

/// Where a link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    /// Proc is mounted for this link's namespace.
    MountedInfoFs,
    /// First invocation: nothing to mount.
    SkippedMount,
    /// Blocked on the child in the next nested namespace.
    Recursing,
    /// About to replace the process image with the workload.
    Terminal,
    Exited,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::MountedInfoFs => write!(f, "mounted-procfs"),
            Self::SkippedMount => write!(f, "skipped-mount"),
            Self::Recursing => write!(f, "recursing"),
            Self::Terminal => write!(f, "terminal"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// The command the terminal link execs. `command[0]` is looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workload {
    pub command: Vec<String>,
}

impl Workload {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self::new(["sleep", "1000"])
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command.join(" "))
    }
}
