//! Machine power-off.
//!
//! Halting is a one-shot broadcast: the first caller records the outcome and
//! drops the only sender of a zero-capacity channel, which wakes every
//! context parked in [`crate::context`] at once.

use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::Result;

/// Unwind payload of a kernel thread torn down by a halt.
pub(crate) struct Halted;

pub(crate) struct HaltSignal {
    halted: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    notify: Receiver<()>,
    outcome: Mutex<Option<Result<()>>>,
}

impl HaltSignal {
    pub(crate) fn new() -> Self {
        let (trigger, notify) = channel::bounded(0);
        Self {
            halted: AtomicBool::new(false),
            trigger: Mutex::new(Some(trigger)),
            notify,
            outcome: Mutex::new(None),
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Power the machine off.  Only the first outcome is kept.
    pub(crate) fn halt(&self, outcome: Result<()>) {
        {
            let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                match &outcome {
                    Ok(()) => tracing::info!("machine powered off"),
                    Err(err) => tracing::error!(error = %err, "machine halted"),
                }
                *slot = Some(outcome);
            }
        }
        self.halted.store(true, Ordering::Release);
        self.trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Receiver that disconnects when the machine halts.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.notify
    }

    /// Block the calling host thread until the machine halts.
    pub(crate) fn wait(&self) {
        let _ = self.notify.recv();
    }

    /// Unwind the calling kernel thread if the machine is halting.
    pub(crate) fn bail_if_halted(&self) {
        if self.is_halted() {
            panic::resume_unwind(Box::new(Halted));
        }
    }

    pub(crate) fn outcome(&self) -> Result<()> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(Ok(()))
    }
}
