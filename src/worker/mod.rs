//! Worker pool for jobs submitted by the webhook.
//!
//! Every task gets a completion callback, so a job never finishes unobserved.
//! The pool also counts the jobs in flight. Two jobs running at the same time
//! may read the same first row, so an overlap is logged rather than hidden.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::dispatch::JobPanic;

pub struct JobPool {
    pool: ThreadPool,
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight counter even if the callback panics.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl JobPool {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("ytsheet-job-{i}"))
            .build()?;
        Ok(Self {
            pool,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue `task`; `on_done` receives its result or the panic it raised.
    pub fn submit<T, F, C>(&self, task: F, on_done: C)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        C: FnOnce(Result<T, JobPanic>) + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        self.pool.spawn(move || {
            let running = in_flight.fetch_add(1, Ordering::SeqCst);
            let _guard = InFlight(in_flight);
            if running > 0 {
                warn!(
                    "job started while {} other job(s) are running; they may pick the same row",
                    running
                );
            }
            debug!("job started");
            let result = panic::catch_unwind(AssertUnwindSafe(task)).map_err(JobPanic::from_payload);
            on_done(result);
        });
    }
}
