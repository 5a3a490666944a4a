//! Per-CPU scheduler loop and the switch into and out of it.
//!
//! Each CPU runs [`scheduler`] forever.  A pass takes the table lock, lets
//! the active [`SchedPolicy`](crate::policy::SchedPolicy) dispatch records,
//! and releases the lock.  The lock is held across every switch: the record
//! that is switched to releases it (in [`forkret`] or on return from
//! [`sched`]) and takes it again before it gives the CPU back.

use std::sync::Arc;

use crate::context;
use crate::cpu::{self, Cpu};
use crate::kernel::Kernel;
use crate::policy::Dispatch;
use crate::proc::{Proc, ProcHandle, ProcState};
use crate::spinlock::SpinGuard;
use crate::table::ProcTable;
use crate::trap;

/// One policy pass on one CPU, with the table lock held.
struct Pass<'p, 'k> {
    kernel: &'k Kernel,
    table: &'p mut SpinGuard<'k, ProcTable>,
    cpu: Arc<Cpu>,
    dispatched: bool,
}

impl Dispatch for Pass<'_, '_> {
    fn procs(&mut self) -> &mut [Proc] {
        self.table.procs_mut()
    }

    fn now(&self) -> u64 {
        self.kernel.clock.now()
    }

    fn run(&mut self, slot: usize) {
        let Some(handle) = self.table.handle(slot) else {
            panic!("scheduler: slot {slot} is free");
        };
        let target = {
            let p = self.table.record_mut(handle);
            if p.state != ProcState::Runnable {
                panic!("scheduler: pid {} is {}", handle.pid(), p.state.as_str());
            }
            p.state = ProcState::Running;
            match &p.context {
                Some(target) => target.clone(),
                None => panic!("scheduler: pid {} has no context", handle.pid()),
            }
        };

        self.cpu.set_current(Some(handle));
        tracing::trace!(cpu = self.cpu.id(), pid = %handle.pid(), "dispatch");
        context::swtch(&target);

        // The record has changed its own state before switching back.
        self.cpu.set_current(None);
        self.dispatched = true;
    }
}

/// Scheduler loop of the calling CPU.  Never returns.
pub(crate) fn scheduler(kernel: &Kernel) -> ! {
    let cpu = cpu::mycpu();
    cpu.set_current(None);
    tracing::debug!(cpu = cpu.id(), policy = %kernel.policy.kind(), "scheduler started");

    loop {
        cpu.intr_on();
        kernel.halt.bail_if_halted();

        let dispatched = {
            let mut table = kernel.ptable.lock();
            let mut pass = Pass {
                kernel,
                table: &mut table,
                cpu: Arc::clone(&cpu),
                dispatched: false,
            };
            kernel.policy.schedule(&mut pass);
            pass.dispatched
        };

        if !dispatched {
            trap::idle(kernel, &cpu);
        }
    }
}

/// Check the switch invariants shared by [`sched`] and [`sched_exit`].
fn check_sched(kernel: &Kernel, table: &SpinGuard<'_, ProcTable>, me: ProcHandle) -> Arc<Cpu> {
    let cpu = cpu::mycpu();
    if !kernel.ptable.holding() {
        panic!("sched ptable.lock");
    }
    if cpu.ncli() != 1 {
        panic!("sched locks");
    }
    if table.record(me).state == ProcState::Running {
        panic!("sched running");
    }
    if cpu.interrupts_enabled() {
        panic!("sched interruptible");
    }
    cpu
}

/// Switch from the running record `me` to this CPU's scheduler.
///
/// The caller holds only the table lock and has already moved `me` out of
/// `Running`.  Returns when a scheduler dispatches `me` again, possibly on
/// another CPU.
pub(crate) fn sched(kernel: &Kernel, table: &SpinGuard<'_, ProcTable>, me: ProcHandle) {
    let cpu = check_sched(kernel, table, me);
    let intena = cpu.intena();
    let target = cpu.scheduler_context();
    drop(cpu);
    context::swtch(&target);
    cpu::mycpu().set_intena(intena);
}

/// Leave the CPU for good; the scheduler inherits the table lock.
pub(crate) fn sched_exit(
    kernel: &Kernel,
    table: SpinGuard<'_, ProcTable>,
    me: ProcHandle,
) -> ! {
    let cpu = check_sched(kernel, &table, me);
    let target = cpu.scheduler_context();
    drop(cpu);
    std::mem::forget(table);
    context::switch_away(&target)
}

/// Give up the CPU for one scheduling round.
pub(crate) fn yield_cpu(kernel: &Kernel, me: ProcHandle) {
    let mut table = kernel.ptable.lock();
    table.record_mut(me).state = ProcState::Runnable;
    sched(kernel, &table, me);
}

/// First code a new record runs: drop the table lock its scheduler took.
pub(crate) fn forkret(kernel: &Kernel) {
    kernel.ptable.release_handoff();
}
