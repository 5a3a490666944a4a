//! The process table.
//!
//! A fixed arena of `nproc` slots.  The table itself holds no lock; it is
//! always reached through the kernel's table [`SpinLock`](crate::spinlock::SpinLock),
//! which is what makes every method here race-free.

use crate::machine::{AddressSpace, KernelStack};
use crate::proc::{Channel, Pid, Proc, ProcHandle, ProcInfo, ProcState, SchedMeta};

/// Resources still owned by a record at the moment it is reaped.
#[derive(Debug, Default)]
pub(crate) struct Reaped {
    pub kstack: Option<KernelStack>,
    pub pgdir: Option<AddressSpace>,
}

#[derive(Debug)]
pub(crate) struct ProcTable {
    procs: Vec<Proc>,
    next_pid: u32,
    nofile: usize,
}

impl ProcTable {
    pub fn new(nproc: usize, nofile: usize) -> Self {
        Self {
            procs: (0..nproc).map(|_| Proc::unused(nofile)).collect(),
            next_pid: 1,
            nofile,
        }
    }

    pub fn capacity(&self) -> usize {
        self.procs.len()
    }

    pub fn procs_mut(&mut self) -> &mut [Proc] {
        &mut self.procs
    }

    /// Claim the first free slot as an embryo with a new pid.
    pub fn claim_unused(&mut self, meta: SchedMeta) -> Option<ProcHandle> {
        let slot = self
            .procs
            .iter()
            .position(|p| p.state == ProcState::Unused)?;
        let pid = Pid::new(self.next_pid);
        self.next_pid = self.next_pid.checked_add(1)?;

        let p = &mut self.procs[slot];
        p.state = ProcState::Embryo;
        p.pid = Some(pid);
        p.sched = meta;
        p.killed = false;
        p.chan = None;
        Some(ProcHandle::new(slot, pid))
    }

    /// Handle of the live record in `slot`.
    pub fn handle(&self, slot: usize) -> Option<ProcHandle> {
        let p = self.procs.get(slot)?;
        match (p.state, p.pid) {
            (ProcState::Unused, _) | (_, None) => None,
            (_, Some(pid)) => Some(ProcHandle::new(slot, pid)),
        }
    }

    /// Is `handle` still the record it was taken from?
    pub fn is_live(&self, handle: ProcHandle) -> bool {
        self.handle(handle.slot()) == Some(handle)
    }

    pub fn record(&self, handle: ProcHandle) -> &Proc {
        if !self.is_live(handle) {
            panic!("stale process handle {handle:?}");
        }
        &self.procs[handle.slot()]
    }

    pub fn record_mut(&mut self, handle: ProcHandle) -> &mut Proc {
        if !self.is_live(handle) {
            panic!("stale process handle {handle:?}");
        }
        &mut self.procs[handle.slot()]
    }

    pub fn find_pid(&self, pid: Pid) -> Option<ProcHandle> {
        self.procs
            .iter()
            .position(|p| p.pid == Some(pid) && p.state != ProcState::Unused)
            .map(|slot| ProcHandle::new(slot, pid))
    }

    /// Live records whose parent is `parent`.
    pub fn children(&self, parent: ProcHandle) -> Vec<ProcHandle> {
        self.procs
            .iter()
            .enumerate()
            .filter(|(_, p)| p.parent == Some(parent))
            .filter_map(|(slot, _)| self.handle(slot))
            .collect()
    }

    /// Make every record sleeping on `chan` runnable.  Returns how many woke.
    pub fn wakeup1(&mut self, chan: Channel) -> usize {
        let mut woken = 0;
        for p in &mut self.procs {
            if p.state == ProcState::Sleeping && p.chan == Some(chan) {
                p.state = ProcState::Runnable;
                woken += 1;
            }
        }
        woken
    }

    /// Return a zombie's slot to the free pool.
    pub fn reap(&mut self, handle: ProcHandle) -> Reaped {
        let p = self.record_mut(handle);
        if p.state != ProcState::Zombie {
            panic!("reap of {} record pid {}", p.state.as_str(), handle.pid());
        }
        let reaped = Reaped {
            kstack: p.kstack.take(),
            pgdir: p.pgdir.take(),
        };
        let nofile = self.nofile;
        self.procs[handle.slot()] = Proc::unused(nofile);
        reaped
    }

    /// Return an embryo whose allocation failed to the free pool.
    pub fn discard(&mut self, handle: ProcHandle) -> Reaped {
        let p = self.record_mut(handle);
        if p.state != ProcState::Embryo {
            panic!("discard of {} record pid {}", p.state.as_str(), handle.pid());
        }
        let reaped = Reaped {
            kstack: p.kstack.take(),
            pgdir: p.pgdir.take(),
        };
        let nofile = self.nofile;
        self.procs[handle.slot()] = Proc::unused(nofile);
        reaped
    }

    /// Put every record back at level 0, priority 0.  Exclusive mode is
    /// left alone.
    pub fn boost(&mut self) {
        for p in &mut self.procs {
            p.sched.level = 0;
            p.sched.priority = 0;
        }
    }

    pub fn snapshot(&self) -> Vec<ProcInfo> {
        self.procs
            .iter()
            .filter_map(|p| p.info(p.parent.map(ProcHandle::pid)))
            .collect()
    }
}
