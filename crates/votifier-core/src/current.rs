//! A mutex-guarded "current value" cell.
//!
//! Some state (the loaded configuration and key pair) is read by every
//! connection and by the test client, and can be replaced wholesale at any
//! time by a restart or a `genkeypair`.  Readers must never observe half of
//! an old value and half of a new one, so the cell hands out `Arc`
//! snapshots: [`Current::get`] clones the `Arc` under the lock and the caller
//! keeps using that snapshot even if the cell is swapped a moment later.
//!
//! The lock is held only for the pointer clone or swap, never across I/O or
//! an `.await`, so a `std::sync::Mutex` is sufficient.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Holder for the current value of `T`, swapped by reference.
#[derive(Debug)]
pub struct Current<T> {
    inner: Mutex<Arc<T>>,
}

impl<T> Current<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Arc::new(value)),
        }
    }

    /// Returns a consistent snapshot of the current value.
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.lock())
    }

    /// Replaces the current value and returns the previous one.
    pub fn replace(&self, value: T) -> Arc<T> {
        self.swap(Arc::new(value))
    }

    /// Replaces the current value with an existing `Arc` and returns the previous one.
    pub fn swap(&self, value: Arc<T>) -> Arc<T> {
        std::mem::replace(&mut *self.lock(), value)
    }

    /// Derives a new value from the current one and installs it atomically.
    ///
    /// No other `replace`/`update` can interleave between the read and the
    /// write.  Returns the newly installed snapshot.
    pub fn update<F>(&self, f: F) -> Arc<T>
    where
        F: FnOnce(&T) -> T,
    {
        let mut guard = self.lock();
        let next = Arc::new(f(&guard));
        *guard = Arc::clone(&next);
        next
    }

    fn lock(&self) -> MutexGuard<'_, Arc<T>> {
        // A panic while holding the lock can only happen inside `update`'s
        // closure; the stored Arc is still a complete value.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
