pub mod commands;

use std::path::PathBuf;

use clap::Parser;

/// nestns: build a chain of nested PID namespaces.
///
/// Each generation clones a child into a new PID namespace nested inside its
/// own and mounts proc for it; the last generation execs the workload.
#[derive(Parser, Debug)]
#[command(name = "nestns", version, about)]
pub struct Cli {
    /// Number of nested PID namespaces to create (default 5).
    pub depth: Option<u32>,

    /// JSON config file. Command-line flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Size in bytes of each child's initial stack.
    #[arg(long, value_name = "BYTES")]
    pub stack_size: Option<usize>,

    /// Proc for level N is mounted at <PREFIX>N (default: /proc).
    #[arg(long, value_name = "PREFIX")]
    pub mount_prefix: Option<PathBuf>,

    /// Print the generations that would run, then exit.
    #[arg(long)]
    pub dry_run: bool,

    /// With --dry-run, print the plan as JSON.
    #[arg(long, requires = "dry_run")]
    pub json: bool,

    /// Log filter, e.g. "debug" or "nestns=trace". RUST_LOG takes precedence.
    #[arg(long, default_value = "info", value_name = "FILTER")]
    pub log_level: String,

    /// Workload the final generation execs (default: sleep 1000).
    /// Everything after `--` is treated as the command.
    #[arg(last = true, value_name = "COMMAND")]
    pub cmd: Vec<String>,
}

/// Parse CLI arguments. Called from `main`.
pub fn parse() -> Cli {
    Cli::parse()
}
