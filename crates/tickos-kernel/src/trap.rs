//! Trap handling: the clock, timer preemption, user faults and the
//! killed-flag checks at the user/kernel boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::admin;
use crate::cpu::{self, Cpu};
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::lifecycle;
use crate::policy::TickAction;
use crate::proc::{Channel, ProcHandle, ProcState};
use crate::scheduler;
use crate::spinlock::SpinLock;
use crate::sync;

/// How long an idle CPU waits for its next interrupt.
const IDLE_WAIT: Duration = Duration::from_micros(50);

/// The global tick counter.
///
/// `ticks` is only advanced under its own lock, by CPU 0.  The value is also
/// published to an atomic so the table-lock holders can read it without
/// taking the tick lock out of order.
pub(crate) struct Clock {
    pub(crate) ticks: SpinLock<u64>,
    now: AtomicU64,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            ticks: SpinLock::new("time", 0),
            now: AtomicU64::new(0),
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Advance the clock by one tick.
fn clock_tick(kernel: &Kernel) {
    let now = {
        let mut ticks = kernel.clock.ticks.lock();
        *ticks += 1;
        kernel.clock.now.store(*ticks, Ordering::SeqCst);
        sync::wakeup(kernel, Channel::Ticks);
        if kernel.policy.boost_due(*ticks) {
            admin::priority_boost(kernel);
        }
        *ticks
    };
    if let Some(limit) = kernel.config().tick_limit {
        if now > limit {
            kernel.halt.halt(Err(KernelError::TickLimit { limit }));
        }
    }
}

/// Wait for an interrupt on a CPU with nothing to run.
pub(crate) fn idle(kernel: &Kernel, cpu: &Cpu) {
    if cpu.id() == 0 {
        clock_tick(kernel);
    }
    kernel.halt.bail_if_halted();
    thread::sleep(IDLE_WAIT);
}

/// Exit `me` if it has been killed.
pub(crate) fn kill_boundary(kernel: &Kernel, me: ProcHandle) {
    kernel.halt.bail_if_halted();
    let killed = kernel.ptable.lock().record(me).killed;
    if killed {
        lifecycle::exit(kernel, me);
    }
}

/// Timer interrupt taken while `me` runs in user mode.
pub(crate) fn timer_interrupt(kernel: &Kernel, me: ProcHandle) {
    kernel.halt.bail_if_halted();
    if cpu::mycpu().id() == 0 {
        clock_tick(kernel);
    }
    kill_boundary(kernel, me);
    preempt(kernel, me);
    kill_boundary(kernel, me);
}

/// Apply the active policy to the running record for one tick.
fn preempt(kernel: &Kernel, me: ProcHandle) {
    let now = kernel.clock.now();
    let mut table = kernel.ptable.lock();
    let p = table.record_mut(me);
    if p.state != ProcState::Running {
        return;
    }
    match kernel.policy.on_tick(p, now) {
        TickAction::Continue => {}
        TickAction::Kill => {
            p.killed = true;
            info!(pid = %me.pid(), policy = %kernel.policy.kind(), "process killed by tick budget");
        }
        TickAction::Yield => {
            p.state = ProcState::Runnable;
            scheduler::sched(kernel, &table, me);
        }
    }
}

/// A user-mode fault: the process is killed on the spot.
pub(crate) fn user_fault(kernel: &Kernel, me: ProcHandle) -> ! {
    kernel.ptable.lock().record_mut(me).killed = true;
    warn!(pid = %me.pid(), cpu = cpu::mycpu().id(), "user fault--kill proc");
    lifecycle::exit(kernel, me)
}

/// Software interrupt 128.
pub(crate) fn user_interrupt(kernel: &Kernel, me: ProcHandle) -> ! {
    info!(pid = %me.pid(), "user interrupt 128 called!");
    lifecycle::exit(kernel, me)
}

/// Block `me` until `n` ticks have passed.
pub(crate) fn sleep_ticks(kernel: &Kernel, me: ProcHandle, n: u64) -> Result<()> {
    let mut ticks = kernel.clock.ticks.lock();
    let start = *ticks;
    while *ticks - start < n {
        if kernel.ptable.lock().record(me).killed {
            return Err(KernelError::Killed { pid: me.pid() });
        }
        ticks = sync::sleep(kernel, me, Channel::Ticks, ticks);
    }
    Ok(())
}
