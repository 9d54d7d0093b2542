//! Bounded worker pool.
//!
//! Jobs are queued FIFO up to a fixed bound; submissions past the bound are
//! refused rather than queued. Each worker thread blocks on the queue's
//! semaphore, pops one job under the queue lock, then runs it outside any
//! lock with one resource checked out of the shared [`ResourcePool`] for the
//! duration of the job.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error};

use super::PoolError;
use super::resource::ResourcePool;
use super::semaphore::Semaphore;

/// A refused submission. The job is handed back to the caller.
#[derive(Error)]
pub enum SubmitError<J> {
    #[error("job queue is full")]
    Full(J),
    #[error("worker pool is stopped")]
    Stopped(J),
}

impl<J> SubmitError<J> {
    pub fn into_job(self) -> J {
        match self {
            SubmitError::Full(job) | SubmitError::Stopped(job) => job,
        }
    }
}

impl<J> fmt::Debug for SubmitError<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Full(_) => f.write_str("Full(..)"),
            SubmitError::Stopped(_) => f.write_str("Stopped(..)"),
        }
    }
}

struct JobQueue<J> {
    jobs: Mutex<VecDeque<J>>,
    available: Semaphore,
    max_requests: usize,
    stop: AtomicBool,
}

impl<J> JobQueue<J> {
    fn lock(&self) -> MutexGuard<'_, VecDeque<J>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkerPool<J> {
    queue: Arc<JobQueue<J>>,
    threads: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawns `threads` workers. Each job runs as `handler(job, resource)`
    /// with `resource` checked out of `resources`.
    pub fn new<R, F>(
        threads: usize,
        max_requests: usize,
        resources: Arc<ResourcePool<R>>,
        handler: F,
    ) -> Result<Self, PoolError>
    where
        R: Send + 'static,
        F: Fn(J, &mut R) + Send + Sync + 'static,
    {
        if threads == 0 {
            return Err(PoolError::NoThreads);
        }
        if max_requests == 0 {
            return Err(PoolError::NoQueue);
        }

        let mut pool = Self {
            queue: Arc::new(JobQueue {
                jobs: Mutex::new(VecDeque::new()),
                available: Semaphore::new(0),
                max_requests,
                stop: AtomicBool::new(false),
            }),
            threads: Vec::with_capacity(threads),
        };

        let handler = Arc::new(handler);
        for i in 0..threads {
            let queue = pool.queue.clone();
            let resources = resources.clone();
            let handler = handler.clone();
            // On failure `pool` drops here, stopping the threads already spawned.
            let handle = thread::Builder::new()
                .name(format!("warden-worker-{i}"))
                .spawn(move || run(&queue, &resources, &*handler))?;
            pool.threads.push(handle);
        }

        debug!(threads, max_requests, "Worker pool started");
        Ok(pool)
    }

    /// Queues a job. Never blocks; a full queue refuses the job.
    pub fn submit(&self, job: J) -> Result<(), SubmitError<J>> {
        {
            let mut jobs = self.queue.lock();
            if self.queue.stop.load(Ordering::Acquire) {
                return Err(SubmitError::Stopped(job));
            }
            if jobs.len() >= self.queue.max_requests {
                return Err(SubmitError::Full(job));
            }
            jobs.push_back(job);
        }
        self.queue.available.post();
        Ok(())
    }

    /// Jobs waiting to be picked up. Racy; diagnostics only.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }
}

impl<J> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.queue.stop.store(true, Ordering::Release);
        for _ in 0..self.threads.len() {
            self.queue.available.post();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn run<J, R, F>(queue: &JobQueue<J>, resources: &ResourcePool<R>, handler: &F)
where
    F: Fn(J, &mut R),
{
    loop {
        queue.available.wait();
        if queue.stop.load(Ordering::Acquire) {
            break;
        }
        let Some(job) = queue.lock().pop_front() else {
            continue;
        };

        let mut resource = resources.acquire();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(job, &mut resource)));
        drop(resource);

        if let Err(payload) = outcome {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(worker = ?thread::current().name(), %reason, "Job panicked");
        }
    }
}
