//! Worker pool for background parses.
//!
//! Background parses block on a bounded queue until their consumer catches
//! up, so a fixed-size pool could starve: every worker blocked on a slow
//! consumer while another consumer waits for its own parse to start. Jobs
//! therefore run on the blocking pool of a private tokio runtime, which
//! spawns a thread whenever no idle one is free (up to `max_workers`) and
//! lets idle threads exit after `keep_alive`. Jobs beyond the limit wait in
//! FIFO order.
//!
//! The runtime is built on the first submitted job and shut down without
//! waiting when the last handle to the pool goes away.

use crate::error::RdfItError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

struct Threads {
    runtime: Option<Runtime>,
}

impl Drop for Threads {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            log::trace!("shutting down worker pool");
            runtime.shutdown_background();
        }
    }
}

struct PoolShared {
    threads: Mutex<Option<Threads>>,
    max_workers: usize,
    keep_alive: Duration,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, Option<Threads>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> Result<Handle, RdfItError> {
        let mut threads = self.lock();
        if let Some(Threads {
            runtime: Some(runtime),
        }) = threads.as_ref()
        {
            return Ok(runtime.handle().clone());
        }
        let counter = AtomicUsize::new(0);
        let runtime = Builder::new_current_thread()
            .max_blocking_threads(self.max_workers)
            .thread_keep_alive(self.keep_alive)
            .thread_name_fn(move || {
                format!("rdfit-worker-{}", counter.fetch_add(1, Ordering::Relaxed) + 1)
            })
            .build()
            .map_err(|e| RdfItError::Other(Box::new(e)))?;
        log::debug!("started worker pool (max {} threads)", self.max_workers);
        let handle = runtime.handle().clone();
        *threads = Some(Threads {
            runtime: Some(runtime),
        });
        Ok(handle)
    }
}

/// Shared pool of background worker threads.
///
/// Cheap to clone; clones share the threads.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.shared.max_workers)
            .field("keep_alive", &self.shared.keep_alive)
            .field("started", &self.shared.lock().is_some())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(max_workers: usize, keep_alive: Duration) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                threads: Mutex::new(None),
                max_workers: max_workers.max(1),
                keep_alive,
            }),
        }
    }

    /// Queue `job` on a worker thread.
    ///
    /// The returned handle can cancel the job as long as it has not started.
    /// A panicking job is contained to its own task.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>, RdfItError> {
        Ok(self.shared.handle()?.spawn_blocking(job))
    }

    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    pub fn keep_alive(&self) -> Duration {
        self.shared.keep_alive
    }
}
