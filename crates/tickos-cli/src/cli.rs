//! CLI argument definitions for tickos.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tickos_kernel::PolicyKind;

use crate::workloads::Workload;

/// tickos -- a simulated teaching-kernel scheduler.
#[derive(Parser)]
#[command(
    name = "tickos",
    version,
    about = "tickos -- simulated teaching-kernel scheduler",
    long_about = "Boots a simulated multiprocessor with a chosen scheduling policy, runs a \
                  built-in workload as the initial process and prints the final process \
                  listing."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot the machine and run a workload until it powers off.
    Run {
        #[command(flatten)]
        machine: MachineArgs,

        /// Built-in workload run as the initial process.
        #[arg(long, short, value_enum, default_value_t = Workload::Mixed)]
        workload: Workload,

        /// Default log level when RUST_LOG is unset.
        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// List the built-in workloads.
    Workloads,

    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        machine: MachineArgs,
    },
}

/// Machine configuration: defaults, then `--config`, then individual flags.
#[derive(Args, Debug, Default)]
pub struct MachineArgs {
    /// TOML configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Scheduling policy: round-robin, fcfs, two-level or mlfq.
    #[arg(long, short)]
    pub policy: Option<PolicyKind>,

    /// Number of simulated processors.
    #[arg(long)]
    pub cpus: Option<usize>,

    /// Halt with an error once this many ticks have passed.
    #[arg(long)]
    pub tick_limit: Option<u64>,
}
