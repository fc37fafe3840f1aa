//! Critical-section cell for state shared between the bus-cycle interrupt
//! context and the background task.
//!
//! On the target, [`IrqMutex::lock`] corresponds to a short interrupts-off
//! span. On a host build it is a mutex, which gives the same all-or-nothing
//! visibility for multi-field updates. Callers keep the closure short: no
//! storage I/O and no spinning inside it.

use std::sync::{Mutex, PoisonError};

/// Shared state reachable from both execution contexts.
#[derive(Debug, Default)]
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    /// Wraps `value` for cross-context sharing.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Runs `f` with exclusive access to the shared state.
    ///
    /// A panic inside an earlier critical section does not wedge the
    /// firmware; the state is handed out as-is.
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Consumes the cell and returns the state.
    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
