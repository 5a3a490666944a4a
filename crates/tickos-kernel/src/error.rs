//! Kernel error types.
//!
//! Every recoverable failure in the process subsystem surfaces through
//! [`KernelError`].  Resource exhaustion and invalid arguments are returned to
//! the caller without any partial state left behind; protocol violations are
//! not errors at all but kernel panics, which halt the machine and are
//! reported once as [`KernelError::Panic`] from [`crate::Kernel::run`].

use crate::proc::Pid;

/// Unified error type for the tickos kernel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    // -- Resource exhaustion -------------------------------------------------
    /// Every slot in the process table is in use.
    #[error("process table full ({capacity} slots)")]
    TableFull { capacity: usize },

    /// The kernel stack allocator has no stacks left.
    #[error("kernel stack allocation failed")]
    StackExhausted,

    /// The address-space manager could not satisfy a create/duplicate/grow.
    #[error("out of memory: {reason}")]
    OutOfMemory { reason: String },

    /// The per-process open-file table is full.
    #[error("no free file descriptor (limit {limit})")]
    NoFileDescriptor { limit: usize },

    // -- Lookup / process relationship ----------------------------------------
    /// No live record carries the given pid.
    #[error("no such process: {pid}")]
    NoSuchProcess { pid: Pid },

    /// `wait` was called by a process that has no live children.
    #[error("process {pid} has no children")]
    NoChildren { pid: Pid },

    /// The caller was killed while blocked and must not block any further.
    #[error("process {pid} was killed")]
    Killed { pid: Pid },

    /// The file descriptor does not refer to an open file.
    #[error("bad file descriptor {fd}")]
    BadFileDescriptor { fd: usize },

    // -- Invalid arguments -----------------------------------------------------
    /// A priority outside `0..=max` was requested.
    #[error("priority {value} out of range 0..={max}")]
    InvalidPriority { value: i32, max: u8 },

    /// Only the direct parent may change a process's priority.
    #[error("process {caller} is not the parent of {pid}")]
    NotParent { caller: Pid, pid: Pid },

    /// The exclusive-mode token did not match; the caller has been killed.
    #[error("exclusive-mode token rejected for process {pid}")]
    BadToken { pid: Pid },

    // -- Machine -----------------------------------------------------------
    /// The configuration failed validation or could not be parsed.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A fatal protocol violation halted the machine.
    #[error("kernel panic: {0}")]
    Panic(String),

    /// The watchdog tick limit was reached before the machine powered off.
    #[error("tick limit {limit} exceeded")]
    TickLimit { limit: u64 },

    /// Catch-all for unexpected internal errors that don't fit a specific
    /// variant.
    #[error("internal kernel error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
