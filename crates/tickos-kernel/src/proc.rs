//! Process records.
//!
//! A [`Proc`] is one slot of the fixed-capacity process table.  Every field
//! is read and written only while the table lock is held; the record is
//! addressed from outside the table through a [`ProcHandle`], which pairs the
//! slot index with the pid that owned it when the handle was taken so a
//! handle can never silently refer to a reused slot.
//!
//! # State machine
//!
//! ```text
//! Unused --> Embryo --> Runnable <--> Running --> Zombie --> Unused
//!                          ^            |
//!                          +- Sleeping <+
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::machine::{AddressSpace, DirRef, FileRef, KernelStack};
use crate::syscall::UserContext;

/// Longest process name kept in a record.
pub const NAME_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Process identifier.  Pids start at 1 and are never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_even(self) -> bool {
        self.0 % 2 == 0
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed reference to a live record: slot index plus the owning pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcHandle {
    slot: usize,
    pid: Pid,
}

impl ProcHandle {
    pub(crate) const fn new(slot: usize, pid: Pid) -> Self {
        Self { slot, pid }
    }

    pub fn slot(self) -> usize {
        self.slot
    }

    pub fn pid(self) -> Pid {
        self.pid
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcState {
    #[default]
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

impl ProcState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Embryo => "embryo",
            ProcState::Sleeping => "sleep",
            ProcState::Runnable => "runble",
            ProcState::Running => "run",
            ProcState::Zombie => "zombie",
        }
    }
}

impl std::fmt::Display for ProcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Opaque value a sleeping record waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A process waiting in `wait` sleeps on its own pid.
    Proc(Pid),
    /// The global tick counter.
    Ticks,
    /// Any other kernel object, by identity.
    Object(u64),
}

// ---------------------------------------------------------------------------
// Scheduling metadata
// ---------------------------------------------------------------------------

/// Per-record state consulted by the scheduling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedMeta {
    /// Queue index: 0 (short quantum) or 1 (FCFS-like).
    pub level: u8,
    /// Ticks left before the policy reconsiders this record.
    pub quantum: i32,
    /// Level-1 priority in `0..=max_priority`.
    pub priority: u8,
    /// Exempt from quantum accounting.
    pub exclusive: bool,
    /// Tick at which the record was last dispatched FCFS-style.
    pub started_at: u64,
}

impl SchedMeta {
    /// Metadata of a freshly allocated record.
    pub const fn fresh(level0_quantum: i32) -> Self {
        Self {
            level: 0,
            quantum: level0_quantum,
            priority: 0,
            exclusive: false,
            started_at: 0,
        }
    }
}

impl Default for SchedMeta {
    fn default() -> Self {
        Self::fresh(4)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Entry point of a user program.
pub type Program = Arc<dyn Fn(&mut UserContext) + Send + Sync>;

/// Registers restored on return to user mode.
#[derive(Clone, Default)]
pub(crate) struct TrapFrame {
    /// Where user execution starts.
    pub entry: Option<Program>,
    /// Return-value register.
    pub ret: isize,
}

impl std::fmt::Debug for TrapFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapFrame")
            .field("entry", &self.entry.as_ref().map(|_| "<program>"))
            .field("ret", &self.ret)
            .finish()
    }
}

/// One slot of the process table.
#[derive(Debug)]
pub(crate) struct Proc {
    /// `None` while the slot is free.
    pub pid: Option<Pid>,
    pub state: ProcState,
    pub parent: Option<ProcHandle>,
    pub kstack: Option<KernelStack>,
    pub pgdir: Option<AddressSpace>,
    /// Size of user memory in bytes.
    pub sz: usize,
    pub ofile: Vec<Option<FileRef>>,
    pub cwd: Option<DirRef>,
    pub name: String,
    pub killed: bool,
    pub sched: SchedMeta,
    pub chan: Option<Channel>,
    /// Where `swtch` resumes this record.
    pub context: Option<Context>,
    pub tf: TrapFrame,
}

impl Proc {
    /// A free slot with `nofile` empty descriptor entries.
    pub fn unused(nofile: usize) -> Self {
        Self {
            pid: None,
            state: ProcState::Unused,
            parent: None,
            kstack: None,
            pgdir: None,
            sz: 0,
            ofile: vec![None; nofile],
            cwd: None,
            name: String::new(),
            killed: false,
            sched: SchedMeta::default(),
            chan: None,
            context: None,
            tf: TrapFrame::default(),
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.chars().take(NAME_LEN - 1).collect();
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ProcState::Runnable
    }

    /// Snapshot for diagnostics; `None` for free slots.
    pub fn info(&self, parent: Option<Pid>) -> Option<ProcInfo> {
        let pid = self.pid?;
        if self.state == ProcState::Unused {
            return None;
        }
        Some(ProcInfo {
            pid,
            parent,
            state: self.state,
            name: self.name.clone(),
            level: self.sched.level,
            priority: self.sched.priority,
            exclusive: self.sched.exclusive,
            killed: self.killed,
            size: self.sz,
        })
    }
}

/// Externally visible snapshot of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub state: ProcState,
    pub name: String,
    pub level: u8,
    pub priority: u8,
    pub exclusive: bool,
    pub killed: bool,
    pub size: usize,
}

impl std::fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parent = self
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{:>4} {:<6} {:<15} ppid={:<4} lev={} prio={:<2}",
            self.pid, self.state, self.name, parent, self.level, self.priority
        )?;
        if self.exclusive {
            f.write_str(" mono")?;
        }
        if self.killed {
            f.write_str(" killed")?;
        }
        Ok(())
    }
}
