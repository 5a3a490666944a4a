//! Per-processor state.
//!
//! A [`Cpu`] is touched only by the kernel thread currently executing on it,
//! so its fields are plain atomics rather than lock-protected.  Which CPU a
//! host thread is on is tracked in a thread-local that the context-switch
//! layer rebinds every time a thread is resumed.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam::atomic::AtomicCell;

use crate::context::{Context, Park};
use crate::halt::HaltSignal;
use crate::proc::ProcHandle;

/// Processor descriptor.
pub struct Cpu {
    id: usize,
    /// Record running on this CPU, if any.
    current: AtomicCell<Option<ProcHandle>>,
    /// Saved context of this CPU's scheduler loop.
    scheduler: OnceLock<Context>,
    /// Depth of `push_off` nesting.
    ncli: AtomicU32,
    /// Were interrupts enabled before the outermost `push_off`?
    intena: AtomicBool,
    /// Simulated interrupt-enable flag.
    intr: AtomicBool,
    halt: Arc<HaltSignal>,
}

impl Cpu {
    pub(crate) fn new(id: usize, halt: Arc<HaltSignal>) -> Self {
        Self {
            id,
            current: AtomicCell::new(None),
            scheduler: OnceLock::new(),
            ncli: AtomicU32::new(0),
            intena: AtomicBool::new(false),
            intr: AtomicBool::new(false),
            halt,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn current(&self) -> Option<ProcHandle> {
        self.current.load()
    }

    pub(crate) fn set_current(&self, handle: Option<ProcHandle>) {
        self.current.store(handle);
    }

    pub(crate) fn halt(&self) -> &HaltSignal {
        &self.halt
    }

    pub(crate) fn set_scheduler(&self, context: Context) {
        if self.scheduler.set(context).is_err() {
            panic!("cpu{}: scheduler context installed twice", self.id);
        }
    }

    pub(crate) fn scheduler_context(&self) -> Context {
        match self.scheduler.get() {
            Some(context) => context.clone(),
            None => panic!("cpu{}: no scheduler context", self.id),
        }
    }

    pub(crate) fn interrupts_enabled(&self) -> bool {
        self.intr.load(Ordering::SeqCst)
    }

    pub(crate) fn intr_on(&self) {
        self.intr.store(true, Ordering::SeqCst);
    }

    pub(crate) fn intr_off(&self) {
        self.intr.store(false, Ordering::SeqCst);
    }

    pub(crate) fn ncli(&self) -> u32 {
        self.ncli.load(Ordering::SeqCst)
    }

    pub(crate) fn intena(&self) -> bool {
        self.intena.load(Ordering::SeqCst)
    }

    pub(crate) fn set_intena(&self, enabled: bool) {
        self.intena.store(enabled, Ordering::SeqCst);
    }

    /// Disable interrupts, remembering the outermost previous state.
    ///
    /// It takes two `pop_off`s to undo two `push_off`s, and interrupts that
    /// were off to begin with stay off.
    pub(crate) fn push_off(&self) {
        let was_on = self.interrupts_enabled();
        self.intr_off();
        if self.ncli.fetch_add(1, Ordering::SeqCst) == 0 {
            self.set_intena(was_on);
        }
    }

    pub(crate) fn pop_off(&self) {
        if self.interrupts_enabled() {
            panic!("cpu{}: pop_off - interruptible", self.id);
        }
        let depth = self.ncli();
        if depth == 0 {
            panic!("cpu{}: pop_off without push_off", self.id);
        }
        self.ncli.store(depth - 1, Ordering::SeqCst);
        if depth == 1 && self.intena() {
            self.intr_on();
        }
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("id", &self.id)
            .field("current", &self.current())
            .field("ncli", &self.ncli())
            .field("intena", &self.intena())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Thread binding
// ---------------------------------------------------------------------------

struct KThread {
    cpu: Arc<Cpu>,
    park: Option<Park>,
}

thread_local! {
    static KTHREAD: RefCell<Option<KThread>> = const { RefCell::new(None) };
}

/// Attach the calling host thread to `cpu`, parking on `park` when it
/// switches away.
pub(crate) fn bind(cpu: Arc<Cpu>, park: Option<Park>) {
    KTHREAD.with(|k| *k.borrow_mut() = Some(KThread { cpu, park }));
}

/// Record that a resumed thread now runs on `cpu`.
pub(crate) fn rebind(cpu: Arc<Cpu>) {
    KTHREAD.with(|k| match k.borrow_mut().as_mut() {
        Some(thread) => thread.cpu = cpu,
        None => panic!("rebind: thread is not a kernel thread"),
    });
}

pub(crate) fn unbind() {
    KTHREAD.with(|k| k.borrow_mut().take());
}

/// The CPU the calling kernel thread is executing on.
pub(crate) fn mycpu() -> Arc<Cpu> {
    KTHREAD.with(|k| match k.borrow().as_ref() {
        Some(thread) => Arc::clone(&thread.cpu),
        None => panic!("mycpu called outside a processor"),
    })
}

/// Where the calling kernel thread waits while switched out.
pub(crate) fn my_park() -> Park {
    KTHREAD.with(|k| match k.borrow().as_ref().and_then(|t| t.park.clone()) {
        Some(park) => park,
        None => panic!("swtch from a thread with no saved context"),
    })
}
