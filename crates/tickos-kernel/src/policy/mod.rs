//! Scheduling policies.
//!
//! The per-CPU scheduler loop is identical for every policy; what differs is
//! which runnable records a pass dispatches and what a timer tick does to the
//! running record.  Both decisions live behind [`SchedPolicy`], selected once
//! at boot from [`KernelConfig::policy`].
//!
//! Policies never touch the table lock or a CPU directly.  A pass is driven
//! through [`Dispatch`], which the scheduler implements on top of the locked
//! table and the unit tests implement with a plain recorder.

mod fcfs;
mod mlfq;
mod round_robin;
mod two_level;

pub(crate) use fcfs::Fcfs;
pub(crate) use mlfq::Mlfq;
pub(crate) use round_robin::RoundRobin;
pub(crate) use two_level::TwoLevel;

use crate::config::{KernelConfig, PolicyKind};
use crate::proc::Proc;

/// One scheduling pass over the locked table.
pub(crate) trait Dispatch {
    /// The table slots.  Never hold the slice across [`Dispatch::run`].
    fn procs(&mut self) -> &mut [Proc];

    /// Current tick count.
    fn now(&self) -> u64;

    /// Switch to the runnable record in `slot` and return once it gives the
    /// CPU back.
    fn run(&mut self, slot: usize);
}

/// What the trap layer should do after a timer tick on a running record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
    Continue,
    Yield,
    Kill,
}

pub(crate) trait SchedPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Dispatch zero or more runnable records.
    fn schedule(&self, pass: &mut dyn Dispatch);

    /// Account one timer tick against the running record `p`.
    fn on_tick(&self, p: &mut Proc, now: u64) -> TickAction;

    /// Should every record be boosted back to the top level at `ticks`?
    fn boost_due(&self, _ticks: u64) -> bool {
        false
    }
}

/// Build the policy named by `config`.
pub(crate) fn from_config(config: &KernelConfig) -> Box<dyn SchedPolicy> {
    match config.policy {
        PolicyKind::RoundRobin => Box::new(RoundRobin),
        PolicyKind::Fcfs => Box::new(Fcfs::new(config.fcfs_budget)),
        PolicyKind::TwoLevel => Box::new(TwoLevel::new(config.fcfs_budget)),
        PolicyKind::Mlfq => Box::new(Mlfq::new(
            config.level0_quantum,
            config.level1_quantum,
            config.boost_interval,
        )),
    }
}

/// Has a record started at `started_at` used up an FCFS budget of `budget`?
fn budget_spent(started_at: u64, now: u64, budget: u64) -> bool {
    now.saturating_sub(started_at) >= budget
}
