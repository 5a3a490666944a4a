//! Administrative scheduling controls.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::proc::{Pid, ProcHandle};

/// Diagnostic line printed by the `report` system call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcReport {
    pub ticks: u64,
    pub pid: Pid,
    pub name: String,
}

impl std::fmt::Display for ProcReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ticks = {}, pid = {}, name = {}", self.ticks, self.pid, self.name)
    }
}

pub(crate) fn get_level(kernel: &Kernel, me: ProcHandle) -> u8 {
    kernel.ptable.lock().record(me).sched.level
}

/// Set the priority of `pid`, which must be a direct child of `me`.
pub(crate) fn set_priority(kernel: &Kernel, me: ProcHandle, pid: Pid, value: i32) -> Result<()> {
    let max = kernel.config().max_priority;
    let priority = u8::try_from(value)
        .ok()
        .filter(|p| *p <= max)
        .ok_or(KernelError::InvalidPriority { value, max })?;

    let mut table = kernel.ptable.lock();
    let target = table
        .find_pid(pid)
        .ok_or(KernelError::NoSuchProcess { pid })?;
    let p = table.record_mut(target);
    if p.parent != Some(me) {
        return Err(KernelError::NotParent {
            caller: me.pid(),
            pid,
        });
    }
    p.sched.priority = priority;
    debug!(%pid, priority, "priority set");
    Ok(())
}

/// Toggle exclusive mode on `me`.  Returns whether it is now on.
///
/// A wrong token marks the caller killed.  Leaving exclusive mode puts the
/// caller back at level 0, priority 0.
pub(crate) fn toggle_exclusive(kernel: &Kernel, me: ProcHandle, token: u32) -> Result<bool> {
    let mut table = kernel.ptable.lock();
    let p = table.record_mut(me);
    if token != kernel.config().exclusive_secret {
        p.killed = true;
        warn!(pid = %me.pid(), "exclusive-mode token rejected");
        return Err(KernelError::BadToken { pid: me.pid() });
    }

    if p.sched.exclusive {
        p.sched.exclusive = false;
        p.sched.level = 0;
        p.sched.priority = 0;
    } else {
        p.sched.exclusive = true;
    }
    info!(pid = %me.pid(), exclusive = p.sched.exclusive, "exclusive mode toggled");
    Ok(p.sched.exclusive)
}

/// Put every record back at level 0, priority 0.
pub(crate) fn priority_boost(kernel: &Kernel) {
    kernel.ptable.lock().boost();
    debug!(ticks = kernel.clock.now(), "priority boost");
}

pub(crate) fn report(kernel: &Kernel, me: ProcHandle) -> ProcReport {
    let name = kernel.ptable.lock().record(me).name.clone();
    let report = ProcReport {
        ticks: kernel.clock.now(),
        pid: me.pid(),
        name,
    };
    info!("{report}");
    report
}
