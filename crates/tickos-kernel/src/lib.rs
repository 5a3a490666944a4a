//! tickos process core.
//!
//! The process scheduler and lifecycle manager of a small Unix-like teaching
//! kernel, running on a hosted, simulated multiprocessor:
//!
//! - **[`proc`]** / **`table`** -- Process records in a fixed-capacity table
//!   guarded by a single processor-owned spin lock.
//! - **`lifecycle`** -- fork, exit, wait and kill, with reparenting of
//!   orphans to the initial process.
//! - **`scheduler`** -- The per-CPU scheduler loop and the switch into and
//!   out of it.
//! - **`policy`** -- Round-robin, FCFS, two-level and MLFQ policies behind
//!   one strategy trait, chosen once at boot.
//! - **`sync`** -- Sleep/wakeup on opaque channels, and a counting
//!   [`Semaphore`] built on it.
//! - **`trap`** -- The tick counter, timer preemption, user faults and the
//!   killed-flag boundary checks.
//! - **[`machine`]** -- Contracts for the address-space manager, kernel stack
//!   allocator and file layer, with in-memory simulators.
//! - **[`config`]** -- Boot-time [`KernelConfig`], loadable from TOML.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! User programs are closures that make system calls through a
//! [`UserContext`].  [`Kernel::run`] boots the machine with the initial
//! program and returns once it powers off.

pub mod config;
pub mod error;
pub mod machine;
pub mod proc;

mod admin;
mod context;
mod cpu;
mod halt;
mod kernel;
mod lifecycle;
mod policy;
mod scheduler;
mod spinlock;
mod sync;
mod syscall;
mod table;
mod trap;

// Re-export the most commonly used types at the crate root for convenience.
pub use admin::ProcReport;
pub use config::{KernelConfig, PolicyKind};
pub use error::{KernelError, Result};
pub use kernel::{Kernel, RunReport};
pub use machine::Machine;
pub use proc::{Pid, ProcInfo, ProcState, Program};
pub use sync::Semaphore;
pub use syscall::UserContext;
