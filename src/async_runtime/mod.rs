//! Thin wrapper around the async runtime used by this crate.
//!
//! Kept as its own module, rather than calling into `tokio` directly from
//! everywhere, so the rest of the crate doesn't need to know which runtime
//! backs `spawn`/`block_on`.

use std::future::Future;

pub type JoinHandle<T> = ::tokio::task::JoinHandle<T>;

pub type Runtime = ::tokio::runtime::Runtime;

/// Builds a multi-threaded runtime with `num_threads` worker threads.
pub fn init(num_threads: usize) -> Result<Runtime, ()> {
    ::tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_threads.max(1))
        .thread_name("nodes-hub-worker")
        .thread_stack_size(2 * 1024 * 1024)
        .enable_all()
        .build()
        .map_err(|_| ())
}

/// Spawns a future onto the ambient tokio runtime.
///
/// Must be called from within a tokio runtime context (i.e. from a task
/// that is itself running on a `Runtime` built by [`init`], or on any other
/// tokio runtime the embedding test harness has already started).
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    ::tokio::task::spawn(future)
}
