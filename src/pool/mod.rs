//! Blocking pools shared by the worker threads.
//!
//! - **`resource`**: a fixed set of reusable handles checked out under a
//!   counting semaphore, returned by an RAII guard
//! - **`worker`**: a bounded FIFO job queue drained by a fixed set of threads,
//!   each job running with one resource checked out
//! - **`semaphore`**: the counting semaphore both pools block on

pub mod resource;
pub mod semaphore;
pub mod worker;

use thiserror::Error;

pub use resource::{PoolGuard, ResourcePool};
pub use semaphore::Semaphore;
pub use worker::{SubmitError, WorkerPool};

/// Construction-time pool misconfiguration.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("resource pool needs at least one handle")]
    Empty,
    #[error("worker pool needs at least one thread")]
    NoThreads,
    #[error("worker queue bound must be positive")]
    NoQueue,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
