//! Mutual-exclusion spin lock.
//!
//! The lock belongs to a *processor*, not to a host thread: acquiring it
//! disables interrupts on the current [`Cpu`](crate::cpu::Cpu) and records
//! that CPU as the owner.  That lets the table lock be taken by one kernel
//! context and released by the context it switches to on the same CPU.
//!
//! The underlying [`spin::Mutex`] guard is leaked on acquire and the mutex is
//! force-unlocked on release, so whichever context holds the CPU can let go.

use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use spin::{Mutex, MutexGuard};

use crate::cpu::{self, Cpu};

const NO_CPU: usize = usize::MAX;

/// Spins between checks for a halted machine.
const SPINS_PER_CHECK: u32 = 1024;

pub(crate) struct SpinLock<T> {
    name: &'static str,
    inner: Mutex<T>,
    owner: AtomicUsize,
}

impl<T> SpinLock<T> {
    pub(crate) const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
            owner: AtomicUsize::new(NO_CPU),
        }
    }

    /// Acquire the lock, spinning until it is free.
    ///
    /// Panics if the current CPU already holds it.
    pub(crate) fn lock(&self) -> SpinGuard<'_, T> {
        let cpu = cpu::mycpu();
        cpu.push_off();
        if self.held_by(&cpu) {
            panic!("acquire {}", self.name);
        }

        let mut spins: u32 = 0;
        let data = loop {
            if let Some(guard) = self.inner.try_lock() {
                break MutexGuard::leak(guard) as *mut T;
            }
            spins = spins.wrapping_add(1);
            if spins % SPINS_PER_CHECK == 0 {
                cpu.halt().bail_if_halted();
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
        };
        self.owner.store(cpu.id(), Ordering::Relaxed);
        SpinGuard { lock: self, data }
    }

    /// Does the current CPU hold this lock?
    pub(crate) fn holding(&self) -> bool {
        self.held_by(&cpu::mycpu())
    }

    fn held_by(&self, cpu: &Cpu) -> bool {
        self.inner.is_locked() && self.owner.load(Ordering::Relaxed) == cpu.id()
    }

    /// Release a lock this CPU inherited from the context that switched to
    /// it, with no guard of its own.
    pub(crate) fn release_handoff(&self) {
        self.release();
    }

    fn release(&self) {
        let cpu = cpu::mycpu();
        if !self.held_by(&cpu) {
            panic!("release {}", self.name);
        }
        self.owner.store(NO_CPU, Ordering::Relaxed);
        // SAFETY: this CPU owns the mutex and its guard was leaked on acquire.
        unsafe { self.inner.force_unlock() };
        cpu.pop_off();
    }

    pub(crate) fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> std::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof that the current CPU holds a [`SpinLock`].
///
/// Dropping the guard releases the lock, except while the thread is
/// unwinding: a context torn down by exit or halt no longer owns its CPU.
pub(crate) struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
    data: *mut T,
}

impl<'a, T> SpinGuard<'a, T> {
    /// Release the lock and hand back the lock itself for re-acquisition.
    pub(crate) fn unlock(self) -> &'a SpinLock<T> {
        let lock = self.lock;
        drop(self);
        lock
    }
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard exists only while this CPU holds the lock.
        unsafe { &*self.data }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard exists only while this CPU holds the lock.
        unsafe { &mut *self.data }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        self.lock.release();
    }
}
