//! Runtime Module - Collaborator Interfaces
//!
//! The table depends on two services of the host runtime:
//!
//! - a [`TaskPool`] that runs sweep tasks on worker threads
//! - a [`MutatorSuspender`] that brings every mutator to a safepoint before
//!   deferred entries are released
//!
//! Both are passed in explicitly. [`SweepThreadPool`] and [`SafepointManager`] are
//! standalone implementations for hosts without their own.

pub mod safepoint;
pub mod worker_pool;

pub use safepoint::{MutatorRegistration, SafepointManager};
pub use worker_pool::{SweepPoolStats, SweepThreadPool, WorkerStats};

use crate::error::Result;

/// Unit of work posted to a [`TaskPool`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool consumed by the sweep coordinator
pub trait TaskPool: Send + Sync {
    /// Number of worker threads that may run tasks in parallel
    fn total_thread_num(&self) -> usize;

    /// Queue a task for execution on some worker
    fn post_task(&self, task: Task) -> Result<()>;
}

/// Global safepoint primitive of the collector
pub trait MutatorSuspender: Send + Sync {
    /// Block until every mutator is stopped at a safepoint
    fn suspend_all(&self);

    /// Let the mutators stopped by [`suspend_all`](Self::suspend_all) run again
    fn resume_all(&self);

    /// Safepoint poll of a mutator; blocks while a suspension is requested
    fn poll(&self) {}
}

/// Suspender for hosts that rely on epoch reclamation alone
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSuspension;

impl MutatorSuspender for NoSuspension {
    fn suspend_all(&self) {}

    fn resume_all(&self) {}
}
