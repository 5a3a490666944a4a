//! Sleep and wakeup.
//!
//! A sleeper commits to `Sleeping` while holding the table lock, and every
//! wakeup takes that same lock, so a wakeup issued after the commit can
//! never be missed.  When the sleeper's condition is guarded by some other
//! lock, [`sleep`] takes the table lock *before* letting go of it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::cpu;
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::proc::{Channel, ProcHandle, ProcState};
use crate::scheduler;
use crate::spinlock::{SpinGuard, SpinLock};
use crate::table::ProcTable;

fn ensure_current(me: ProcHandle) {
    if cpu::mycpu().current() != Some(me) {
        panic!("sleep");
    }
}

fn commit(kernel: &Kernel, me: ProcHandle, chan: Channel, table: &mut SpinGuard<'_, ProcTable>) {
    {
        let p = table.record_mut(me);
        p.chan = Some(chan);
        p.state = ProcState::Sleeping;
    }
    tracing::trace!(pid = %me.pid(), ?chan, "sleep");
    scheduler::sched(kernel, table, me);
    table.record_mut(me).chan = None;
}

/// Atomically release `guard` and sleep on `chan`; reacquire it on wakeup.
pub(crate) fn sleep<'a, T>(
    kernel: &Kernel,
    me: ProcHandle,
    chan: Channel,
    guard: SpinGuard<'a, T>,
) -> SpinGuard<'a, T> {
    ensure_current(me);
    let mut table = kernel.ptable.lock();
    let lock = guard.unlock();
    commit(kernel, me, chan, &mut table);
    drop(table);
    lock.lock()
}

/// Sleep on `chan` when the condition is guarded by the table lock itself.
pub(crate) fn sleep_locked(
    kernel: &Kernel,
    me: ProcHandle,
    chan: Channel,
    table: &mut SpinGuard<'_, ProcTable>,
) {
    ensure_current(me);
    commit(kernel, me, chan, table);
}

/// Make every record sleeping on `chan` runnable.
pub(crate) fn wakeup(kernel: &Kernel, chan: Channel) {
    let woken = kernel.ptable.lock().wakeup1(chan);
    if woken > 0 {
        tracing::trace!(?chan, woken, "wakeup");
    }
}

// ---------------------------------------------------------------------------
// Semaphore
// ---------------------------------------------------------------------------

static NEXT_OBJECT: AtomicU64 = AtomicU64::new(1);

/// Counting semaphore for user programs, built on sleep/wakeup.
pub struct Semaphore {
    id: u64,
    count: SpinLock<u64>,
}

impl Semaphore {
    pub fn new(initial: u64) -> Self {
        Self {
            id: NEXT_OBJECT.fetch_add(1, Ordering::Relaxed),
            count: SpinLock::new("semaphore", initial),
        }
    }

    fn channel(&self) -> Channel {
        Channel::Object(self.id)
    }

    /// Take one unit, sleeping while none is available.
    pub(crate) fn down(&self, kernel: &Kernel, me: ProcHandle) -> Result<()> {
        let mut count = self.count.lock();
        while *count == 0 {
            if kernel.ptable.lock().record(me).killed {
                return Err(KernelError::Killed { pid: me.pid() });
            }
            count = sleep(kernel, me, self.channel(), count);
        }
        *count -= 1;
        Ok(())
    }

    /// Return one unit and wake every waiter.
    pub(crate) fn up(&self, kernel: &Kernel) {
        let mut count = self.count.lock();
        *count += 1;
        wakeup(kernel, self.channel());
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").field("id", &self.id).finish_non_exhaustive()
    }
}
