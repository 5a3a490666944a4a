//! Saved execution contexts and the switch between them.
//!
//! Every kernel context (a process, or a CPU's scheduler loop) runs on its
//! own host thread.  A context that is switched out is parked on a
//! single-slot channel; `swtch` resumes a target by sending it the CPU it
//! should run on and then parks the caller.  Exactly one context per CPU
//! holds that CPU at any time.

use std::panic;
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;

use crate::cpu::{self, Cpu};
use crate::halt::{HaltSignal, Halted};

/// Unwind payload of a process context that has exited for good.
pub(crate) struct Exited;

/// Where to resume a parked kernel context.
#[derive(Clone)]
pub(crate) struct Context {
    resume: Sender<Arc<Cpu>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

/// The receiving side a parked kernel context waits on.
#[derive(Clone)]
pub(crate) struct Park {
    wake: Receiver<Arc<Cpu>>,
}

/// A fresh context and the park its thread will wait on.
pub(crate) fn new() -> (Context, Park) {
    let (resume, wake) = channel::bounded(1);
    (Context { resume }, Park { wake })
}

impl Park {
    /// Wait for the first dispatch of a new context.
    ///
    /// Returns `None` if the context was discarded before it ever ran or the
    /// machine halted.
    pub(crate) fn first_dispatch(&self, halt: &HaltSignal) -> Option<Arc<Cpu>> {
        select! {
            recv(self.wake) -> cpu => cpu.ok(),
            recv(halt.receiver()) -> _ => None,
        }
    }
}

/// Save the calling context and resume `to` on the current CPU.
///
/// Returns once some scheduler hands the caller a CPU again, which may be a
/// different one.
pub(crate) fn swtch(to: &Context) {
    let cpu = cpu::mycpu();
    let park = cpu::my_park();
    tracing::trace!(cpu = cpu.id(), "swtch");
    hand_off(to, Arc::clone(&cpu));

    let resumed = select! {
        recv(park.wake) -> next => next.ok(),
        recv(cpu.halt().receiver()) -> _ => None,
    };
    match resumed {
        Some(next) => cpu::rebind(next),
        None => panic::resume_unwind(Box::new(Halted)),
    }
}

/// Resume `to` and retire the calling context.  Never returns.
pub(crate) fn switch_away(to: &Context) -> ! {
    hand_off(to, cpu::mycpu());
    panic::resume_unwind(Box::new(Exited))
}

fn hand_off(to: &Context, cpu: Arc<Cpu>) {
    let halted = cpu.halt().is_halted();
    if to.resume.send(cpu).is_err() {
        if halted {
            panic::resume_unwind(Box::new(Halted));
        }
        panic!("swtch to a context that no longer exists");
    }
}
