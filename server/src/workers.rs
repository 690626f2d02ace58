//! Worker thread management utilities.

use std::thread::{self, JoinHandle};

/// Handle to a spawned worker thread.
pub struct WorkerHandle<R> {
    /// The thread handle
    pub handle: JoinHandle<R>,
    /// The worker ID (0-indexed)
    pub worker_id: usize,
}

/// Spawn named worker threads, each receiving its own context.
pub fn spawn_workers<C, F, R>(contexts: Vec<C>, name_prefix: &str, worker_fn: F) -> Vec<WorkerHandle<R>>
where
    C: Send + 'static,
    F: Fn(usize, C) -> R + Send + Clone + 'static,
    R: Send + 'static,
{
    let mut handles = Vec::with_capacity(contexts.len());

    for (worker_id, context) in contexts.into_iter().enumerate() {
        let worker_fn = worker_fn.clone();
        let thread_name = format!("{}-{}", name_prefix, worker_id);

        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker_fn(worker_id, context))
            .expect("failed to spawn worker thread");

        handles.push(WorkerHandle { handle, worker_id });
    }

    handles
}

/// Wait for all worker threads to complete.
pub fn join_workers<R>(handles: Vec<WorkerHandle<R>>) -> Vec<R> {
    handles
        .into_iter()
        .map(|h| h.handle.join().expect("worker thread panicked"))
        .collect()
}
