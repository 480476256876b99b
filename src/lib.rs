//! Blocking synchronization primitives for thread pipelines.

pub mod sync;
pub mod trace;

#[doc(inline)]
pub use sync::task_queue::{Capacity, InvalidStateError, TaskQueue};

#[doc(inline)]
pub use sync::semaphore::{ReleaseError, Semaphore};

pub use trace::init_tracing;
