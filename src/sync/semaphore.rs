//! Counting semaphore with an optional release ceiling.
//!
//! A semaphore manages a permit counter: [`Semaphore::acquire`] takes a
//! permit, blocking while none are available, and [`Semaphore::release`]
//! returns one. The bounded variant refuses to let the counter climb above
//! its initial value, which catches unmatched releases the same way the task
//! queue catches unmatched `task_done` calls.
//!
//! # Example
//!
//! ```
//! use hopper::sync::semaphore::Semaphore;
//!
//! let gate = Semaphore::bounded(2);
//!
//! let permit = gate.access();
//! assert!(gate.try_acquire());
//! // Both permits held: a third acquire would block.
//! assert!(!gate.try_acquire());
//!
//! drop(permit);
//! assert!(gate.try_acquire());
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::trace::trace;

/// Error returned by [`Semaphore::release`] when a bounded semaphore already
/// holds its full permit count.
///
/// Signals an acquire/release bookkeeping bug in the caller; the permit
/// counter is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("semaphore released more times than acquired")]
pub struct ReleaseError;

struct Shared {
    /// Maximum permit count, when the semaphore is bounded.
    ceiling: Option<usize>,
    permits: Mutex<usize>,
    available: Condvar,
}

impl Shared {
    /// The counter is consistent whenever the lock is released, so a
    /// poisoned mutex still holds a valid permit count.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns one permit and wakes one waiter. Callers enforce the ceiling.
    fn give_back(&self) {
        let mut permits = self.lock();
        *permits += 1;
        trace!(permits = *permits, "permit released");
        self.available.notify_one();
    }
}

/// Handle to a shared counting semaphore.
///
/// Cloning is cheap and every clone operates on the same permit counter.
pub struct Semaphore {
    shared: Arc<Shared>,
}

impl Clone for Semaphore {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Semaphore {
    /// Creates a semaphore with the given number of permits and no release
    /// ceiling.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self::build(permits, None)
    }

    /// Creates a semaphore whose permit count may never exceed `permits`.
    ///
    /// Releasing a permit that was never acquired is reported as a
    /// [`ReleaseError`] instead of silently widening the gate.
    #[must_use]
    pub fn bounded(permits: usize) -> Self {
        Self::build(permits, Some(permits))
    }

    fn build(permits: usize, ceiling: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                ceiling,
                permits: Mutex::new(permits),
                available: Condvar::new(),
            }),
        }
    }

    /// Takes a permit, blocking until one is available.
    pub fn acquire(&self) {
        let mut permits = self.shared.lock();
        while *permits == 0 {
            permits = self
                .shared
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
        trace!(permits = *permits, "permit acquired");
    }

    /// Attempts to take a permit without blocking.
    ///
    /// Returns false if none are available.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.shared.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        trace!(permits = *permits, "permit acquired");
        true
    }

    /// Returns a permit and wakes one blocked acquirer.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] if a bounded semaphore is already at its full
    /// permit count. The counter is not modified in that case.
    pub fn release(&self) -> Result<(), ReleaseError> {
        let mut permits = self.shared.lock();
        if let Some(ceiling) = self.shared.ceiling
            && *permits >= ceiling
        {
            return Err(ReleaseError);
        }
        *permits += 1;
        trace!(permits = *permits, "permit released");
        self.shared.available.notify_one();
        Ok(())
    }

    /// Takes a permit and returns a guard that gives it back on drop.
    ///
    /// Blocks until a permit is available.
    #[must_use]
    pub fn access(&self) -> SemaphoreGuard<'_> {
        self.acquire();
        SemaphoreGuard { semaphore: self }
    }

    /// Returns the number of permits currently available.
    ///
    /// Stale by the time the caller observes it when other threads are
    /// active; diagnostics only.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        *self.shared.lock()
    }
}

/// Scoped permit returned by [`Semaphore::access`].
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        // This permit was taken by `access`, so returning it cannot exceed
        // a bounded semaphore's ceiling.
        self.semaphore.shared.give_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_release() {
        let sem = Semaphore::new(2);

        sem.acquire();
        sem.acquire();
        assert_eq!(sem.available_permits(), 0);

        sem.release().unwrap();
        assert_eq!(sem.available_permits(), 1);
        sem.release().unwrap();
        assert_eq!(sem.available_permits(), 2);
    }

    #[test]
    fn test_try_acquire() {
        let sem = Semaphore::new(1);

        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());

        sem.release().unwrap();
        assert!(sem.try_acquire());
    }

    #[test]
    fn test_bounded_over_release() {
        let sem = Semaphore::bounded(1);

        assert_eq!(sem.release(), Err(ReleaseError));
        assert_eq!(sem.available_permits(), 1);

        sem.acquire();
        assert!(sem.release().is_ok());
        assert_eq!(sem.release(), Err(ReleaseError));
    }

    #[test]
    fn test_unbounded_release_widens() {
        let sem = Semaphore::new(0);

        sem.release().unwrap();
        sem.release().unwrap();
        assert_eq!(sem.available_permits(), 2);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let sem = Semaphore::bounded(1);

        {
            let _permit = sem.access();
            assert_eq!(sem.available_permits(), 0);
        }
        assert_eq!(sem.available_permits(), 1);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let sem = Semaphore::new(0);

        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.acquire())
        };

        // Give the waiter time to park on the empty counter.
        thread::sleep(Duration::from_millis(50));
        sem.release().unwrap();

        waiter.join().unwrap();
        assert_eq!(sem.available_permits(), 0);
    }
}
