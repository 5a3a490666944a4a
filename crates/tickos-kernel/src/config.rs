//! Machine configuration.
//!
//! [`KernelConfig`] fixes everything that the kernel decides once at boot:
//! the scheduling policy, the number of processors, the table capacity and
//! the policy constants.  Defaults follow the classic teaching-kernel values,
//! the struct can be deserialized from TOML, and a builder-style API lets
//! callers override individual fields fluently.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

/// Scheduling policy selected once at boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Scan the table in slot order, one tick per turn.
    #[default]
    RoundRobin,
    /// Run the first runnable record until it blocks, exits, or exhausts
    /// its tick budget.
    Fcfs,
    /// Even pids round-robin at level 0; odd pids run FCFS at level 1.
    TwoLevel,
    /// Two-level multilevel feedback queue with priorities and boosting.
    Mlfq,
}

impl PolicyKind {
    /// Every policy, in declaration order.
    pub const ALL: [PolicyKind; 4] = [
        PolicyKind::RoundRobin,
        PolicyKind::Fcfs,
        PolicyKind::TwoLevel,
        PolicyKind::Mlfq,
    ];

    /// Stable name used in configuration files and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::RoundRobin => "round-robin",
            PolicyKind::Fcfs => "fcfs",
            PolicyKind::TwoLevel => "two-level",
            PolicyKind::Mlfq => "mlfq",
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| KernelError::Config {
                reason: format!("unknown scheduling policy `{s}`"),
            })
    }
}

/// Boot-time parameters of the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Active scheduling policy.
    ///
    /// Default: **round-robin**.
    pub policy: PolicyKind,

    /// Number of processors running the scheduler loop.
    ///
    /// Default: **1**.
    pub cpus: usize,

    /// Capacity of the process table.
    ///
    /// Default: **64**.
    pub nproc: usize,

    /// Open-file slots per process.
    ///
    /// Default: **16**.
    pub nofile: usize,

    /// Ticks a level-0 record may run before demotion.
    ///
    /// Default: **4**.
    pub level0_quantum: i32,

    /// Quantum granted on demotion to level 1.
    ///
    /// Default: **8**.
    pub level1_quantum: i32,

    /// Ticks an FCFS-scheduled record may run before it is killed.
    ///
    /// Default: **200**.
    pub fcfs_budget: u64,

    /// Global tick interval of MLFQ priority boosting.
    ///
    /// Default: **200**.
    pub boost_interval: u64,

    /// Highest priority accepted by `set_priority`.
    ///
    /// Default: **10**.
    pub max_priority: u8,

    /// Token that toggles exclusive mode.
    pub exclusive_secret: u32,

    /// Watchdog: halt with an error once the tick counter passes this value.
    ///
    /// Default: **none**.
    pub tick_limit: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::RoundRobin,
            cpus: 1,
            nproc: 64,
            nofile: 16,
            level0_quantum: 4,
            level1_quantum: 8,
            fcfs_budget: 200,
            boost_interval: 200,
            max_priority: 10,
            exclusive_secret: 2016025032,
            tick_limit: None,
        }
    }
}

impl KernelConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text; missing keys keep defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| KernelError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| KernelError::Config {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml_str(&text)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| KernelError::Internal(e.to_string()))
    }

    /// Reject configurations the kernel cannot boot with.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(KernelError::Config {
                reason: reason.to_string(),
            })
        };
        if self.cpus == 0 {
            return fail("cpus must be at least 1");
        }
        if self.nproc < 2 {
            return fail("nproc must leave room for init and one child");
        }
        if self.nofile == 0 {
            return fail("nofile must be at least 1");
        }
        if self.level0_quantum <= 0 || self.level1_quantum <= 0 {
            return fail("quanta must be positive");
        }
        if self.fcfs_budget == 0 || self.boost_interval == 0 {
            return fail("tick budgets must be positive");
        }
        Ok(())
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_nproc(mut self, nproc: usize) -> Self {
        self.nproc = nproc;
        self
    }

    pub fn with_fcfs_budget(mut self, ticks: u64) -> Self {
        self.fcfs_budget = ticks;
        self
    }

    pub fn with_boost_interval(mut self, ticks: u64) -> Self {
        self.boost_interval = ticks;
        self
    }

    pub fn with_tick_limit(mut self, limit: u64) -> Self {
        self.tick_limit = Some(limit);
        self
    }
}
