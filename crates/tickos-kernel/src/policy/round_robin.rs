//! Round-robin: every runnable record gets one tick per scan, in slot order.

use super::{Dispatch, SchedPolicy, TickAction};
use crate::config::PolicyKind;
use crate::proc::Proc;

#[derive(Debug, Default)]
pub(crate) struct RoundRobin;

impl SchedPolicy for RoundRobin {
    fn kind(&self) -> PolicyKind {
        PolicyKind::RoundRobin
    }

    fn schedule(&self, pass: &mut dyn Dispatch) {
        for slot in 0..pass.procs().len() {
            if pass.procs()[slot].is_runnable() {
                pass.run(slot);
            }
        }
    }

    fn on_tick(&self, _p: &mut Proc, _now: u64) -> TickAction {
        TickAction::Yield
    }
}
