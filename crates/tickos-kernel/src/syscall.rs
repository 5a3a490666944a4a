//! The system-call surface seen by user programs.
//!
//! A user program is a closure that receives a [`UserContext`] bound to its
//! own process.  Every system call checks the killed flag on entry and again
//! before returning to user mode; a killed process exits at either point and
//! the call never returns.

use std::sync::Arc;

use crate::admin::{self, ProcReport};
use crate::error::Result;
use crate::kernel::Kernel;
use crate::lifecycle;
use crate::proc::{Pid, ProcHandle, ProcInfo};
use crate::scheduler;
use crate::sync::Semaphore;
use crate::trap;

/// Handle through which a user program makes system calls.
pub struct UserContext {
    kernel: Arc<Kernel>,
    me: ProcHandle,
}

impl UserContext {
    pub(crate) fn new(kernel: Arc<Kernel>, me: ProcHandle) -> Self {
        Self { kernel, me }
    }

    fn syscall<R>(&mut self, call: impl FnOnce(&Arc<Kernel>, ProcHandle) -> R) -> R {
        trap::kill_boundary(&self.kernel, self.me);
        let ret = call(&self.kernel, self.me);
        trap::kill_boundary(&self.kernel, self.me);
        ret
    }

    #[cfg(test)]
    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn pid(&self) -> Pid {
        self.me.pid()
    }

    /// Value of the return-value register when this program started: zero
    /// in a forked child.
    pub fn fork_ret(&mut self) -> isize {
        self.syscall(|k, me| k.ptable.lock().record(me).tf.ret)
    }

    /// Create a child process that runs `program`.
    pub fn fork<F>(&mut self, program: F) -> Result<Pid>
    where
        F: Fn(&mut UserContext) + Send + Sync + 'static,
    {
        self.syscall(|k, me| lifecycle::fork(k, me, Arc::new(program), None))
    }

    /// Like [`fork`](Self::fork), naming the child.
    pub fn fork_named<F>(&mut self, name: &str, program: F) -> Result<Pid>
    where
        F: Fn(&mut UserContext) + Send + Sync + 'static,
    {
        self.syscall(|k, me| lifecycle::fork(k, me, Arc::new(program), Some(name)))
    }

    pub fn exit(&mut self) -> ! {
        trap::kill_boundary(&self.kernel, self.me);
        lifecycle::exit(&self.kernel, self.me)
    }

    /// Reap one exited child and return its pid.
    pub fn wait(&mut self) -> Result<Pid> {
        self.syscall(|k, me| lifecycle::wait(k, me))
    }

    pub fn kill(&mut self, pid: Pid) -> Result<()> {
        self.syscall(|k, _| lifecycle::kill(k, pid))
    }

    pub fn yield_now(&mut self) {
        self.syscall(|k, me| scheduler::yield_cpu(k, me));
    }

    /// Sleep for `ticks` clock ticks.
    pub fn sleep(&mut self, ticks: u64) -> Result<()> {
        self.syscall(|k, me| trap::sleep_ticks(k, me, ticks))
    }

    /// Ticks since boot.
    pub fn uptime(&mut self) -> u64 {
        self.syscall(|k, _| k.clock.now())
    }

    /// Grow (or shrink) user memory by `delta` bytes; returns the old size.
    pub fn sbrk(&mut self, delta: isize) -> Result<usize> {
        self.syscall(|k, me| lifecycle::growproc(k, me, delta))
    }

    pub fn open(&mut self, path: &str) -> Result<usize> {
        self.syscall(|k, me| lifecycle::open(k, me, path))
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        self.syscall(|k, me| lifecycle::close(k, me, fd))
    }

    /// Run `units` units of user-mode work, taking one timer interrupt per
    /// unit.
    pub fn compute(&mut self, units: u64) {
        for _ in 0..units {
            trap::timer_interrupt(&self.kernel, self.me);
        }
    }

    /// Current scheduling level.
    pub fn getlev(&mut self) -> u8 {
        self.syscall(|k, me| admin::get_level(k, me))
    }

    pub fn set_priority(&mut self, pid: Pid, priority: i32) -> Result<()> {
        self.syscall(|k, me| admin::set_priority(k, me, pid, priority))
    }

    /// Toggle exclusive mode.  A wrong token kills the caller.
    pub fn monopolize(&mut self, token: u32) -> Result<bool> {
        self.syscall(|k, me| admin::toggle_exclusive(k, me, token))
    }

    pub fn report(&mut self) -> ProcReport {
        self.syscall(|k, me| admin::report(k, me))
    }

    /// Trigger a user-mode fault.
    pub fn fault(&mut self) -> ! {
        trap::user_fault(&self.kernel, self.me)
    }

    /// Raise software interrupt 128.
    pub fn user_interrupt(&mut self) -> ! {
        trap::user_interrupt(&self.kernel, self.me)
    }

    pub fn sem_down(&mut self, sem: &Semaphore) -> Result<()> {
        self.syscall(|k, me| sem.down(k, me))
    }

    pub fn sem_up(&mut self, sem: &Semaphore) {
        self.syscall(|k, _| sem.up(k));
    }

    /// Listing of every live record.
    pub fn procdump(&mut self) -> Vec<ProcInfo> {
        self.syscall(|k, _| k.procdump())
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext").field("pid", &self.me.pid()).finish()
    }
}
