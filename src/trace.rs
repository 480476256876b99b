//! Tracing infrastructure for debugging hopper.
//!
//! Enable with `--features tracing`. The macros compile to nothing when the
//! feature is off, so instrumented queue operations cost nothing otherwise.

/// Initialize the tracing subscriber with timestamps.
///
/// Call this at the start of tests or the bench binary to enable trace
/// output. Does nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hopper=trace"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

// With the feature on, instrumentation goes straight to the tracing crate.
#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, trace};

// With the feature off, the same macro names expand to nothing.
#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
