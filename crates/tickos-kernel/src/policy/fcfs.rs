//! First-come-first-served.
//!
//! A pass dispatches only the first runnable record in slot order and
//! records when it started.  The timer never slices it; it keeps the CPU
//! until it blocks or exits, or is killed once it has run for the budget.

use super::{Dispatch, SchedPolicy, TickAction, budget_spent};
use crate::config::PolicyKind;
use crate::proc::Proc;

#[derive(Debug)]
pub(crate) struct Fcfs {
    budget: u64,
}

impl Fcfs {
    pub(crate) fn new(budget: u64) -> Self {
        Self { budget }
    }
}

impl SchedPolicy for Fcfs {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Fcfs
    }

    fn schedule(&self, pass: &mut dyn Dispatch) {
        let Some(slot) = pass.procs().iter().position(Proc::is_runnable) else {
            return;
        };
        let now = pass.now();
        pass.procs()[slot].sched.started_at = now;
        pass.run(slot);
    }

    fn on_tick(&self, p: &mut Proc, now: u64) -> TickAction {
        if budget_spent(p.sched.started_at, now, self.budget) {
            TickAction::Kill
        } else {
            TickAction::Continue
        }
    }
}
