//! Blocking MPMC task queue for in-process (inter-thread) communication.
//!
//! A FIFO queue guarded by one mutex and three condition variables, safe for
//! any number of concurrent producers and consumers. An optional capacity
//! bound applies backpressure: producers block while the queue is full.
//! Every accepted item counts toward a completion counter that consumers
//! retire with [`TaskQueue::task_done`], and [`TaskQueue::join`] blocks until
//! that counter drains to zero.
//!
//! # Overview
//!
//! - [`TaskQueue`] - cloneable handle; all clones share the same queue
//! - [`Capacity`] - bounded (backpressure) or unbounded growth
//! - Blocking [`put`](TaskQueue::put)/[`get`](TaskQueue::get) plus wait-free
//!   [`try_put`](TaskQueue::try_put)/[`try_get`](TaskQueue::try_get)
//!
//! # Example
//!
//! ```
//! use hopper::sync::task_queue::TaskQueue;
//!
//! let queue = TaskQueue::bounded(2);
//!
//! let worker = {
//!     let queue = queue.clone();
//!     std::thread::spawn(move || {
//!         let item: u64 = queue.get();
//!         queue.task_done().unwrap();
//!         item
//!     })
//! };
//!
//! queue.put(42);
//! queue.join();
//! assert_eq!(worker.join().unwrap(), 42);
//! ```
//!
//! # Blocking behavior
//!
//! `put` on a full bounded queue, `get` on an empty queue, and `join` while
//! work is outstanding all suspend the calling thread indefinitely. There is
//! no timeout and no cancellation; a suspended call returns only when a
//! concurrent operation satisfies its predicate.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::trace::{debug, trace};

/// Capacity policy for a [`TaskQueue`].
///
/// Converting from a `usize` follows the convention that `0` means unbounded:
///
/// ```
/// use hopper::sync::task_queue::Capacity;
///
/// assert_eq!(Capacity::from(0), Capacity::Unbounded);
/// assert_eq!(Capacity::from(8), Capacity::Bounded(8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// The queue grows without limit; `put` never blocks.
    Unbounded,
    /// At most this many items may be queued at once.
    Bounded(usize),
}

impl From<usize> for Capacity {
    fn from(max: usize) -> Self {
        match max {
            0 => Self::Unbounded,
            max => Self::Bounded(max),
        }
    }
}

/// Error returned by [`TaskQueue::task_done`] when every accepted item has
/// already been marked done.
///
/// This signals a put/task_done bookkeeping bug in the caller, not a
/// transient condition; the completion counter is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task_done called more times than items put")]
pub struct InvalidStateError;

/// Queue contents and completion counter, guarded jointly by one mutex.
struct State<T> {
    items: VecDeque<T>,
    unfinished: usize,
}

struct Shared<T> {
    capacity: Capacity,
    state: Mutex<State<T>>,

    /// Signaled by `put` whenever an item is added; `get` waiters re-check here.
    not_empty: Condvar,

    /// Signaled by `get` whenever an item is removed; `put` waiters re-check here.
    not_full: Condvar,

    /// Signaled by `task_done` when the completion counter reaches zero;
    /// `join` waiters re-check here.
    all_done: Condvar,
}

impl<T> Shared<T> {
    /// Locks the queue state.
    ///
    /// State is consistent whenever the lock is released, so a poisoned
    /// mutex still holds a valid queue.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(
        &self,
        cond: &Condvar,
        guard: MutexGuard<'a, State<T>>,
    ) -> MutexGuard<'a, State<T>> {
        cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a shared blocking task queue.
///
/// Cloning is cheap and every clone operates on the same queue, so a handle
/// can be moved into each producer and consumer thread. Items are returned
/// by [`get`](Self::get) in the exact order [`put`](Self::put) inserted them;
/// no ordering is promised about which of several blocked callers wakes
/// first.
pub struct TaskQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> TaskQueue<T> {
    /// Creates an empty queue with the given capacity policy.
    ///
    /// Accepts a [`Capacity`] or a plain `usize`, where `0` means unbounded.
    ///
    /// # Panics
    ///
    /// Panics if passed `Capacity::Bounded(0)` directly; a queue that can
    /// never hold an item would block every `put` forever.
    #[must_use]
    pub fn new(capacity: impl Into<Capacity>) -> Self {
        let capacity = capacity.into();
        assert!(
            capacity != Capacity::Bounded(0),
            "bounded capacity must be greater than 0"
        );
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    unfinished: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                all_done: Condvar::new(),
            }),
        }
    }

    /// Creates an empty queue holding at most `max` items.
    ///
    /// # Panics
    ///
    /// Panics if `max` is 0.
    #[must_use]
    pub fn bounded(max: usize) -> Self {
        assert!(max > 0, "bounded capacity must be greater than 0");
        Self::new(Capacity::Bounded(max))
    }

    /// Creates an empty queue that grows without limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(Capacity::Unbounded)
    }

    /// Returns the capacity policy this queue was created with.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    /// Inserts an item at the back of the queue, blocking while it is full.
    ///
    /// On a bounded queue this suspends the calling thread until a concurrent
    /// [`get`](Self::get) makes room; on an unbounded queue it never blocks.
    /// The item counts as one outstanding task until a consumer calls
    /// [`task_done`](Self::task_done).
    pub fn put(&self, item: T) {
        let mut state = self.shared.lock();
        if let Capacity::Bounded(max) = self.shared.capacity {
            while state.items.len() >= max {
                state = self.shared.wait(&self.shared.not_full, state);
            }
        }
        state.items.push_back(item);
        state.unfinished += 1;
        trace!(
            len = state.items.len(),
            unfinished = state.unfinished,
            "item enqueued"
        );
        self.shared.not_empty.notify_one();
    }

    /// Attempts to insert an item without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut state = self.shared.lock();
        if let Capacity::Bounded(max) = self.shared.capacity
            && state.items.len() >= max
        {
            return Err(item);
        }
        state.items.push_back(item);
        state.unfinished += 1;
        trace!(
            len = state.items.len(),
            unfinished = state.unfinished,
            "item enqueued"
        );
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Removes and returns the front item, blocking while the queue is empty.
    ///
    /// Retrieving an item does not retire it; the consumer signals completion
    /// separately via [`task_done`](Self::task_done).
    #[must_use]
    pub fn get(&self) -> T {
        let mut state = self.shared.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                trace!(len = state.items.len(), "item dequeued");
                self.shared.not_full.notify_one();
                return item;
            }
            state = self.shared.wait(&self.shared.not_empty, state);
        }
    }

    /// Attempts to remove the front item without blocking.
    ///
    /// Returns `None` if the queue is empty.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        let mut state = self.shared.lock();
        let item = state.items.pop_front()?;
        trace!(len = state.items.len(), "item dequeued");
        self.shared.not_full.notify_one();
        Some(item)
    }

    /// Marks one previously retrieved item as fully processed.
    ///
    /// When the last outstanding task is retired, every thread blocked in
    /// [`join`](Self::join) is released.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStateError`] if called more times than items were
    /// put. The completion counter is not modified in that case.
    pub fn task_done(&self) -> Result<(), InvalidStateError> {
        let mut state = self.shared.lock();
        let remaining = state.unfinished.checked_sub(1).ok_or(InvalidStateError)?;
        state.unfinished = remaining;
        trace!(unfinished = remaining, "task completed");
        if remaining == 0 {
            debug!("all tasks done, releasing joiners");
            self.shared.all_done.notify_all();
        }
        Ok(())
    }

    /// Blocks until every item accepted by `put` has been retired by
    /// `task_done`.
    ///
    /// Returns immediately if nothing is outstanding. Multiple concurrent
    /// joiners are all released together.
    pub fn join(&self) {
        let mut state = self.shared.lock();
        while state.unfinished > 0 {
            state = self.shared.wait(&self.shared.all_done, state);
        }
    }

    /// Returns the number of queued items.
    ///
    /// The value is taken under the queue lock but is stale by the time the
    /// caller observes it when other threads are active. Use for diagnostics,
    /// never for control flow.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Returns true if no items are queued. Stale-on-return, like [`len`](Self::len).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.lock().items.is_empty()
    }

    /// Returns true if a bounded queue is at capacity.
    ///
    /// Always false for an unbounded queue. Stale-on-return, like
    /// [`len`](Self::len).
    #[must_use]
    pub fn is_full(&self) -> bool {
        let state = self.shared.lock();
        match self.shared.capacity {
            Capacity::Unbounded => false,
            Capacity::Bounded(max) => state.items.len() >= max,
        }
    }

    /// Returns the number of items put but not yet retired via `task_done`.
    ///
    /// Stale-on-return, like [`len`](Self::len).
    #[must_use]
    pub fn unfinished_tasks(&self) -> usize {
        self.shared.lock().unfinished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = TaskQueue::bounded(8);

        for i in 0..8 {
            queue.put(i);
        }

        for i in 0..8 {
            assert_eq!(queue.get(), i);
        }
    }

    #[test]
    fn test_zero_means_unbounded() {
        let queue: TaskQueue<u64> = TaskQueue::new(0);
        assert_eq!(queue.capacity(), Capacity::Unbounded);

        for i in 0..1000 {
            queue.put(i);
        }
        assert_eq!(queue.len(), 1000);
        assert!(!queue.is_full());
    }

    #[test]
    #[should_panic(expected = "bounded capacity must be greater than 0")]
    fn test_bounded_zero_rejected() {
        let _ = TaskQueue::<u64>::bounded(0);
    }

    #[test]
    fn test_try_put_full() {
        let queue = TaskQueue::bounded(2);

        assert!(queue.try_put(1).is_ok());
        assert!(queue.try_put(2).is_ok());
        assert_eq!(queue.try_put(3), Err(3));

        assert_eq!(queue.get(), 1);
        assert!(queue.try_put(3).is_ok());
    }

    #[test]
    fn test_try_get_empty() {
        let queue: TaskQueue<u64> = TaskQueue::unbounded();

        assert_eq!(queue.try_get(), None);
        queue.put(7);
        assert_eq!(queue.try_get(), Some(7));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn test_queries() {
        let queue = TaskQueue::bounded(2);

        assert!(queue.is_empty());
        assert!(!queue.is_full());
        assert_eq!(queue.len(), 0);

        queue.put("a");
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
        assert!(!queue.is_full());

        queue.put("b");
        assert_eq!(queue.len(), 2);
        assert!(queue.is_full());

        let _ = queue.get();
        let _ = queue.get();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_task_done_overflow() {
        let queue = TaskQueue::unbounded();

        queue.put(1);
        assert_eq!(queue.get(), 1);
        assert!(queue.task_done().is_ok());

        // Counter is drained; a further task_done is a caller bug.
        assert_eq!(queue.task_done(), Err(InvalidStateError));
        assert_eq!(queue.unfinished_tasks(), 0);

        // The rejected decrement must not corrupt the counter.
        queue.put(2);
        assert_eq!(queue.get(), 2);
        assert!(queue.task_done().is_ok());
    }

    #[test]
    fn test_join_immediate_when_nothing_put() {
        let queue: TaskQueue<u64> = TaskQueue::unbounded();
        queue.join();
    }

    #[test]
    fn test_clone_shares_queue() {
        let queue = TaskQueue::unbounded();
        let other = queue.clone();

        queue.put(5);
        assert_eq!(other.get(), 5);
        assert!(other.task_done().is_ok());
        queue.join();
    }

    #[test]
    fn test_get_blocks_until_put() {
        let queue: TaskQueue<u64> = TaskQueue::unbounded();

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.get())
        };

        // Give the consumer time to park on the empty queue.
        thread::sleep(Duration::from_millis(50));
        queue.put(99);

        assert_eq!(consumer.join().unwrap(), 99);
    }

    #[test]
    fn test_concurrent_put_get() {
        let queue = TaskQueue::bounded(4);
        let count = 1000u64;

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..count {
                    queue.put(i);
                }
            })
        };

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut received = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    received.push(queue.get());
                }
                received
            })
        };

        producer.join().unwrap();
        let received = consumer.join().unwrap();

        // Verify FIFO order
        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }
}
