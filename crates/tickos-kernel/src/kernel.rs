//! The simulated machine: boot, run, and power off.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use crate::config::{KernelConfig, PolicyKind};
use crate::context::{self, Context, Exited, Park};
use crate::cpu::{self, Cpu};
use crate::error::{KernelError, Result};
use crate::halt::{HaltSignal, Halted};
use crate::lifecycle;
use crate::machine::Machine;
use crate::policy::{self, SchedPolicy};
use crate::proc::{ProcHandle, ProcInfo};
use crate::scheduler;
use crate::spinlock::SpinLock;
use crate::syscall::UserContext;
use crate::table::ProcTable;
use crate::trap::Clock;

/// Final state of a machine that powered off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Tick counter at power-off.
    pub ticks: u64,
    /// Every record still live at power-off.
    pub procs: Vec<ProcInfo>,
}

/// Host thread backing a scheduler loop or a process context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KernelThread {
    Cpu(usize),
    Proc(ProcHandle),
}

/// A booted kernel: process table, per-CPU state and collaborators.
pub struct Kernel {
    config: KernelConfig,
    pub(crate) policy: Box<dyn SchedPolicy>,
    pub(crate) ptable: SpinLock<ProcTable>,
    pub(crate) clock: Clock,
    cpus: Vec<Arc<Cpu>>,
    pub(crate) machine: Machine,
    initproc: OnceLock<ProcHandle>,
    pub(crate) halt: Arc<HaltSignal>,
    threads: DashMap<KernelThread, JoinHandle<()>>,
}

impl Kernel {
    /// Build a kernel on the simulated machine.
    pub fn new(config: KernelConfig) -> Result<Self> {
        Self::with_machine(config, Machine::simulated())
    }

    /// Build a kernel on the given collaborators.
    pub fn with_machine(config: KernelConfig, machine: Machine) -> Result<Self> {
        config.validate()?;
        let halt = Arc::new(HaltSignal::new());
        let cpus = (0..config.cpus)
            .map(|id| Arc::new(Cpu::new(id, Arc::clone(&halt))))
            .collect();
        Ok(Self {
            policy: policy::from_config(&config),
            ptable: SpinLock::new("ptable", ProcTable::new(config.nproc, config.nofile)),
            clock: Clock::new(),
            cpus,
            machine,
            initproc: OnceLock::new(),
            halt,
            threads: DashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy.kind()
    }

    /// Boot with `init` as the first user program and run until the machine
    /// powers off.
    ///
    /// The machine powers off cleanly when `init` returns.  A kernel panic or
    /// the tick-limit watchdog halts it with an error instead.
    pub fn run<F>(self, init: F) -> Result<RunReport>
    where
        F: Fn(&mut UserContext) + Send + Sync + 'static,
    {
        let kernel = Arc::new(self);
        info!(
            policy = %kernel.policy.kind(),
            cpus = kernel.cpus.len(),
            nproc = kernel.config.nproc,
            "booting"
        );

        cpu::bind(Arc::clone(&kernel.cpus[0]), None);
        let boot = panic::catch_unwind(AssertUnwindSafe(|| {
            lifecycle::spawn_init(&kernel, Arc::new(init))
        }));
        cpu::unbind();
        match boot {
            Ok(Ok(_)) => {
                for cpu in &kernel.cpus {
                    if let Err(err) = kernel.start_cpu(cpu) {
                        kernel.halt.halt(Err(err));
                        break;
                    }
                }
            }
            Ok(Err(err)) => kernel.halt.halt(Err(err)),
            Err(payload) => finish_thread(&kernel.halt, Err(payload)),
        }

        kernel.halt.wait();
        kernel.join_all();

        let ticks = kernel.clock.now();
        let outcome = kernel.halt.outcome();
        let kernel = Arc::try_unwrap(kernel)
            .map_err(|_| KernelError::Internal("kernel still referenced after halt".into()))?;
        let procs = kernel.ptable.into_inner().snapshot();
        outcome?;
        info!(ticks, live = procs.len(), "shut down");
        Ok(RunReport { ticks, procs })
    }

    pub(crate) fn initproc(&self) -> ProcHandle {
        match self.initproc.get() {
            Some(init) => *init,
            None => panic!("no init process"),
        }
    }

    pub(crate) fn set_initproc(&self, handle: ProcHandle) {
        if self.initproc.set(handle).is_err() {
            panic!("init process created twice");
        }
    }

    /// Listing of every live record.
    pub(crate) fn procdump(&self) -> Vec<ProcInfo> {
        let listing = self.ptable.lock().snapshot();
        for info in &listing {
            tracing::debug!("{info}");
        }
        listing
    }

    // -----------------------------------------------------------------------
    // Kernel threads
    // -----------------------------------------------------------------------

    fn track(&self, thread: KernelThread, handle: JoinHandle<()>) {
        self.threads.insert(thread, handle);
    }

    /// Join the host thread of a record that has been reaped or discarded.
    ///
    /// The record's context is already gone, so the thread is unwinding or
    /// about to return.  Must not be called with the table lock held.
    pub(crate) fn join_process(&self, handle: ProcHandle) {
        if let Some((_, thread)) = self.threads.remove(&KernelThread::Proc(handle)) {
            let _ = thread.join();
        }
    }

    fn join_all(&self) {
        loop {
            let remaining: Vec<_> = self.threads.iter().map(|entry| *entry.key()).collect();
            if remaining.is_empty() {
                break;
            }
            for thread in remaining {
                if let Some((_, handle)) = self.threads.remove(&thread) {
                    let _ = handle.join();
                }
            }
        }
    }

    /// Number of host threads not yet joined.
    #[cfg(test)]
    pub(crate) fn live_threads(&self) -> usize {
        self.threads.len()
    }

    /// Start the scheduler loop of `cpu` on its own thread.
    fn start_cpu(self: &Arc<Self>, cpu: &Arc<Cpu>) -> Result<()> {
        let (ctx, park) = context::new();
        cpu.set_scheduler(ctx);
        let kernel = Arc::clone(self);
        let id = cpu.id();
        let cpu = Arc::clone(cpu);
        let handle = thread::Builder::new()
            .name(format!("cpu{id}"))
            .spawn(move || cpu_main(kernel, cpu, park))
            .map_err(|e| KernelError::Internal(format!("start cpu thread: {e}")))?;
        self.track(KernelThread::Cpu(id), handle);
        Ok(())
    }

    /// Create the execution context of a new record.  The context first runs
    /// when a scheduler dispatches `me`.
    pub(crate) fn spawn_process(self: &Arc<Self>, me: ProcHandle) -> Result<Context> {
        let (ctx, park) = context::new();
        let kernel = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("pid{}", me.pid()))
            .spawn(move || process_main(kernel, me, park))
            .map_err(|_| KernelError::StackExhausted)?;
        self.track(KernelThread::Proc(me), handle);
        Ok(ctx)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("policy", &self.policy.kind())
            .field("cpus", &self.cpus.len())
            .field("ticks", &self.clock.now())
            .finish_non_exhaustive()
    }
}

fn cpu_main(kernel: Arc<Kernel>, cpu: Arc<Cpu>, park: Park) {
    cpu::bind(cpu, Some(park));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        scheduler::scheduler(&kernel);
    }));
    finish_thread(&kernel.halt, outcome);
    cpu::unbind();
}

fn process_main(kernel: Arc<Kernel>, me: ProcHandle, park: Park) {
    let Some(cpu) = park.first_dispatch(&kernel.halt) else {
        return;
    };
    cpu::bind(cpu, Some(park));
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        scheduler::forkret(&kernel);
        kernel.halt.bail_if_halted();

        let program = kernel.ptable.lock().record(me).tf.entry.clone();
        let mut user = UserContext::new(Arc::clone(&kernel), me);
        if let Some(program) = program {
            program(&mut user);
        }

        if me == kernel.initproc() {
            kernel.halt.halt(Ok(()));
            panic::resume_unwind(Box::new(Halted));
        }
        user.exit();
    }));
    finish_thread(&kernel.halt, outcome);
    cpu::unbind();
}

/// Classify how a kernel thread ended.  A genuine panic halts the machine.
fn finish_thread(halt: &HaltSignal, outcome: std::thread::Result<()>) {
    let Err(payload) = outcome else {
        return;
    };
    if payload.is::<Exited>() || payload.is::<Halted>() {
        return;
    }
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    halt.halt(Err(KernelError::Panic(message)));
}
