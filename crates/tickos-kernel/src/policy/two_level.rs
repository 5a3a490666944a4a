//! Two-level split by pid parity.
//!
//! Even pids run round-robin at level 0 and always win.  An odd pid runs
//! FCFS-style at level 1, and only when it is the lowest runnable pid and no
//! even pid is runnable at all.

use super::{Dispatch, SchedPolicy, TickAction, budget_spent};
use crate::config::PolicyKind;
use crate::proc::{Pid, Proc};

#[derive(Debug)]
pub(crate) struct TwoLevel {
    budget: u64,
}

impl TwoLevel {
    pub(crate) fn new(budget: u64) -> Self {
        Self { budget }
    }
}

/// May the odd `pid` run FCFS right now?
fn odd_turn(procs: &[Proc], pid: Pid) -> bool {
    let runnable = || procs.iter().filter(|p| p.is_runnable()).filter_map(|p| p.pid);
    let any_even = runnable().any(Pid::is_even);
    let lowest = runnable().min();
    !any_even && lowest == Some(pid)
}

impl SchedPolicy for TwoLevel {
    fn kind(&self) -> PolicyKind {
        PolicyKind::TwoLevel
    }

    fn schedule(&self, pass: &mut dyn Dispatch) {
        for slot in 0..pass.procs().len() {
            let p = &pass.procs()[slot];
            if !p.is_runnable() {
                continue;
            }
            let Some(pid) = p.pid else { continue };

            if pid.is_even() {
                pass.procs()[slot].sched.level = 0;
                pass.run(slot);
            } else if odd_turn(pass.procs(), pid) {
                let now = pass.now();
                let p = &mut pass.procs()[slot];
                p.sched.started_at = now;
                p.sched.level = 1;
                pass.run(slot);
                break;
            }
        }
    }

    fn on_tick(&self, p: &mut Proc, now: u64) -> TickAction {
        if p.sched.level == 0 {
            TickAction::Yield
        } else if budget_spent(p.sched.started_at, now, self.budget) {
            TickAction::Kill
        } else {
            TickAction::Continue
        }
    }
}
