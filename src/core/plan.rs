use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::config::{ChainConfig, MAX_PID_NS_NESTING};
use super::model::ChainLink;

/// Mount point for the proc filesystem of the namespace at `level`.
///
/// The level is rendered in decimal, so distinct levels never share a path.
pub fn mount_point(prefix: &Path, level: u32) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(level.to_string());
    PathBuf::from(path)
}

/// What a generation does once its mount step is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Clone a child into a new nested PID namespace and wait for it.
    Spawn,
    /// Replace the process image with the workload.
    Exec,
    /// The clone this generation would issue goes past the kernel's nesting
    /// limit and will fail; the chain ends here.
    ExceedsLimit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn => write!(f, "spawn"),
            Self::Exec => write!(f, "exec"),
            Self::ExceedsLimit => write!(f, "exceeds-limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    /// 0 for the initial process, +1 per nested namespace.
    pub generation: u32,
    pub level: u32,
    pub mount_point: Option<PathBuf>,
    pub action: Action,
}

/// The generations a run goes through, in order, without running anything.
#[derive(Debug, Clone, Serialize)]
pub struct ChainPlan {
    pub depth: u32,
    pub workload: Vec<String>,
    pub generations: Vec<Generation>,
}

impl ChainPlan {
    /// Generations past the kernel's nesting limit are never reached, so the
    /// plan stops at the first generation whose clone would exceed it.
    pub fn for_config(config: &ChainConfig) -> Self {
        let mut generations = Vec::new();
        let mut link = Some(ChainLink::initial(config.depth));
        let mut generation = 0;

        while let Some(current) = link {
            let action = if current.is_terminal() {
                Action::Exec
            } else if generation >= MAX_PID_NS_NESTING {
                Action::ExceedsLimit
            } else {
                Action::Spawn
            };
            generations.push(Generation {
                generation,
                level: current.level,
                mount_point: (!current.is_first_invocation)
                    .then(|| mount_point(&config.mount_prefix, current.level)),
                action,
            });
            if action == Action::ExceedsLimit {
                break;
            }
            link = current.descend();
            generation += 1;
        }

        Self {
            depth: config.depth,
            workload: config.workload.command.clone(),
            generations,
        }
    }

    pub fn spawn_count(&self) -> usize {
        self.generations
            .iter()
            .filter(|g| g.action == Action::Spawn)
            .count()
    }

    /// True when the requested depth cannot be reached on any kernel.
    pub fn exceeds_limit(&self) -> bool {
        self.generations
            .last()
            .is_some_and(|g| g.action == Action::ExceedsLimit)
    }

    pub fn mount_count(&self) -> usize {
        self.generations
            .iter()
            .filter(|g| g.mount_point.is_some())
            .count()
    }
}

impl fmt::Display for ChainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} {:<7} {:<14} MOUNT POINT", "GENERATION", "LEVEL", "ACTION")?;
        for g in &self.generations {
            let mount = g
                .mount_point
                .as_deref()
                .map_or_else(|| "-".to_string(), |p| p.display().to_string());
            writeln!(
                f,
                "{:<12} {:<7} {:<14} {}",
                g.generation, g.level, g.action, mount
            )?;
        }
        write!(f, "workload: {}", self.workload.join(" "))
    }
}
