use anyhow::{Context, Result};

use crate::cli::Cli;
use crate::core::config::{ChainConfig, Overrides};
use crate::core::plan::ChainPlan;

/// Resolve the configuration, then either print the plan or build the chain.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    if cli.dry_run {
        return cmd_plan(&config, cli.json);
    }
    cmd_run(&config)
}

/// Defaults, then the config file, then command-line flags.
fn resolve_config(cli: &Cli) -> Result<ChainConfig> {
    let base = match &cli.config {
        Some(path) => ChainConfig::load(path)?,
        None => ChainConfig::default(),
    };

    let config = base.apply_overrides(Overrides {
        depth: cli.depth,
        stack_size: cli.stack_size,
        mount_prefix: cli.mount_prefix.clone(),
        workload: Some(cli.cmd.clone()),
    });
    config.validate().context("invalid configuration")?;
    tracing::debug!(?config, "resolved configuration");
    Ok(config)
}

// ─── plan ───────────────────────────────────────────────────────────────────

fn cmd_plan(config: &ChainConfig, json: bool) -> Result<()> {
    let plan = ChainPlan::for_config(config);
    tracing::debug!(
        spawns = plan.spawn_count(),
        mounts = plan.mount_count(),
        "planned chain"
    );
    if plan.exceeds_limit() {
        tracing::warn!(
            depth = config.depth,
            "the chain stops where a clone would exceed the kernel's PID namespace nesting limit"
        );
    }
    if json {
        let out = serde_json::to_string_pretty(&plan).context("failed to serialize plan")?;
        println!("{out}");
    } else {
        println!("{plan}");
    }
    Ok(())
}

// ─── run ────────────────────────────────────────────────────────────────────

fn cmd_run(config: &ChainConfig) -> Result<()> {
    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        anyhow::bail!("nestns only runs on Linux");
    }

    #[cfg(target_os = "linux")]
    {
        crate::platform::linux::process::run_chain(config)?;
        Ok(())
    }
}
