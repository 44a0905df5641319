use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::model::Workload;
use crate::util::fs::read_to_string;

/// Depth used when neither the command line nor a config file sets one.
pub const DEFAULT_DEPTH: u32 = 5;
/// Size of each child's initial stack.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_MOUNT_PREFIX: &str = "/proc";
/// Smallest child stack we accept.
pub const MIN_STACK_SIZE: usize = 64 * 1024;
/// The kernel refuses to nest PID namespaces deeper than this.
pub const MAX_PID_NS_NESTING: u32 = 32;

/// Everything the chain builder needs to know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Number of nested PID namespaces to create.
    pub depth: u32,
    /// Bytes mapped for each child's initial stack.
    pub stack_size: usize,
    /// Proc for level `n` is mounted at `<mount_prefix><n>`.
    pub mount_prefix: PathBuf,
    /// Command the terminal link execs.
    pub workload: Workload,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            stack_size: DEFAULT_STACK_SIZE,
            mount_prefix: PathBuf::from(DEFAULT_MOUNT_PREFIX),
            workload: Workload::default(),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub depth: Option<u32>,
    pub stack_size: Option<usize>,
    pub mount_prefix: Option<PathBuf>,
    pub workload: Option<Vec<String>>,
}

impl ChainConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = read_to_string(path)?;
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn apply_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(depth) = overrides.depth {
            self.depth = depth;
        }
        if let Some(size) = overrides.stack_size {
            self.stack_size = size;
        }
        if let Some(prefix) = overrides.mount_prefix {
            self.mount_prefix = prefix;
        }
        if let Some(cmd) = overrides.workload.filter(|c| !c.is_empty()) {
            self.workload = Workload { command: cmd };
        }
        self
    }

    /// Reject configurations the builder cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.workload.command.is_empty() {
            bail!("workload command must not be empty");
        }
        if let Some(arg) = self.workload.command.iter().find(|a| a.contains('\0')) {
            bail!("workload argument {arg:?} contains a NUL byte");
        }
        if self.workload.program() == Some("") {
            bail!("workload program must not be empty");
        }
        if !self.mount_prefix.is_absolute() {
            bail!(
                "mount prefix '{}' must be an absolute path",
                self.mount_prefix.display()
            );
        }
        if self.stack_size < MIN_STACK_SIZE {
            bail!(
                "stack size {} is below the minimum of {MIN_STACK_SIZE} bytes",
                self.stack_size
            );
        }
        if self.depth > MAX_PID_NS_NESTING {
            tracing::warn!(
                depth = self.depth,
                limit = MAX_PID_NS_NESTING,
                "requested depth exceeds the kernel's PID namespace nesting limit; \
                 the deepest clone will fail"
            );
        }
        Ok(())
    }
}
