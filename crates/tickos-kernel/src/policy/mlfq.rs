//! Two-level multilevel feedback queue.
//!
//! Level 0 is round-robin with a short quantum and always takes precedence.
//! A record that burns a whole level-0 quantum drops to level 1, where the
//! highest priority runs first (lowest pid on ties) and every further
//! exhausted tick costs a priority point.  Records in exclusive mode are
//! never charged.  Every `boost_interval` ticks the whole table returns to
//! level 0, priority 0.

use std::cmp::Reverse;

use super::{Dispatch, SchedPolicy, TickAction};
use crate::config::PolicyKind;
use crate::proc::Proc;

#[derive(Debug)]
pub(crate) struct Mlfq {
    level0_quantum: i32,
    level1_quantum: i32,
    boost_interval: u64,
}

impl Mlfq {
    pub(crate) fn new(level0_quantum: i32, level1_quantum: i32, boost_interval: u64) -> Self {
        Self {
            level0_quantum,
            level1_quantum,
            boost_interval,
        }
    }
}

/// Level-1 candidate with the highest priority, lowest pid on ties.
fn pick_level1(procs: &[Proc]) -> Option<usize> {
    procs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_runnable() && p.sched.level == 1)
        .max_by_key(|(_, p)| (p.sched.priority, Reverse(p.pid)))
        .map(|(slot, _)| slot)
}

impl SchedPolicy for Mlfq {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Mlfq
    }

    fn schedule(&self, pass: &mut dyn Dispatch) {
        let top_level = |p: &Proc| p.is_runnable() && p.sched.level == 0;

        if pass.procs().iter().any(top_level) {
            for slot in 0..pass.procs().len() {
                let p = &mut pass.procs()[slot];
                if top_level(&*p) {
                    p.sched.quantum = self.level0_quantum;
                    pass.run(slot);
                }
            }
        } else if let Some(slot) = pick_level1(pass.procs()) {
            pass.run(slot);
        }
    }

    fn on_tick(&self, p: &mut Proc, _now: u64) -> TickAction {
        if p.sched.exclusive {
            return TickAction::Continue;
        }
        p.sched.quantum = p.sched.quantum.saturating_sub(1);
        if p.sched.quantum > 0 {
            return TickAction::Continue;
        }
        if p.sched.level == 0 {
            p.sched.level = 1;
            p.sched.quantum = self.level1_quantum;
        } else {
            p.sched.priority = p.sched.priority.saturating_sub(1);
        }
        TickAction::Yield
    }

    fn boost_due(&self, ticks: u64) -> bool {
        ticks % self.boost_interval == 0
    }
}
