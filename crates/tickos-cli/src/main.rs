//! tickos CLI entry point.
//!
//! This binary boots the simulated teaching kernel: it resolves the machine
//! configuration, runs a built-in workload as the initial process and prints
//! the process listing the machine powered off with.

mod cli;
mod workloads;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tickos_kernel::{Kernel, KernelConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, MachineArgs};
use crate::workloads::Workload;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            machine,
            workload,
            log_level,
        } => cmd_run(&machine, workload, &log_level),
        Commands::Workloads => cmd_workloads(),
        Commands::Config { machine } => cmd_config(&machine),
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Defaults, then the `--config` file, then individual flags.
fn resolve_config(args: &MachineArgs) -> Result<KernelConfig> {
    let mut config = match &args.config {
        Some(path) => KernelConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => KernelConfig::new(),
    };
    if let Some(policy) = args.policy {
        config = config.with_policy(policy);
    }
    if let Some(cpus) = args.cpus {
        config = config.with_cpus(cpus);
    }
    if let Some(limit) = args.tick_limit {
        config = config.with_tick_limit(limit);
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

fn cmd_run(args: &MachineArgs, workload: Workload, log_level: &str) -> Result<()> {
    init_tracing(log_level);

    let config = resolve_config(args)?;
    info!(%workload, policy = %config.policy, cpus = config.cpus, "starting tickos");

    let kernel = Kernel::new(config).context("failed to build kernel")?;
    let report = kernel
        .run(workload.program())
        .with_context(|| format!("workload `{workload}` halted the machine"))?;

    println!();
    println!("  {:>4} {:<6} {:<15}", "PID", "STATE", "NAME");
    for info in &report.procs {
        println!("  {info}");
    }
    println!();
    println!("  ticks: {}", report.ticks);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: workloads
// ---------------------------------------------------------------------------

fn cmd_workloads() -> Result<()> {
    for workload in Workload::value_variants() {
        println!("  {:<12} {}", workload.to_string(), workload.describe());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: config
// ---------------------------------------------------------------------------

fn cmd_config(args: &MachineArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let text = config
        .to_toml_string()
        .context("failed to render configuration")?;
    print!("{text}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default level.
///
/// The `RUST_LOG` environment variable takes precedence if set.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
