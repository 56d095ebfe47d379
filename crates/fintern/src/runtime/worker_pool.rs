//! Sweep Threads - Worker Pool for Parallel Sweeping
//!
//! A fixed set of named worker threads pulling boxed tasks from a shared crossbeam
//! channel. The pool lives as long as the collector; closing it drops the sender,
//! which lets every worker drain the queue and exit, and then joins them.

use super::{Task, TaskPool};
use crate::config::{ConfigError, TableConfig};
use crate::error::{InternError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Sweep Worker Thread state
struct SweepWorker {
    /// Worker ID
    id: usize,
    /// Tasks run to completion
    processed_count: AtomicUsize,
    /// Tasks that panicked
    panicked_count: AtomicUsize,
    /// Worker is running a task
    busy: AtomicBool,
}

impl SweepWorker {
    fn new(id: usize) -> Self {
        Self {
            id,
            processed_count: AtomicUsize::new(0),
            panicked_count: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
        }
    }

    fn start(self: &Arc<Self>, receiver: Receiver<Task>) -> Result<JoinHandle<()>> {
        let worker = Arc::clone(self);
        thread::Builder::new()
            .name(format!("sweep-worker-{}", self.id))
            .spawn(move || worker.run(receiver))
            .map_err(|e| InternError::ThreadSpawn(e.to_string()))
    }

    fn run(&self, receiver: Receiver<Task>) {
        for task in receiver.iter() {
            self.busy.store(true, Ordering::Relaxed);
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(()) => {
                    self.processed_count.fetch_add(1, Ordering::Relaxed);
                },
                Err(_) => {
                    self.panicked_count.fetch_add(1, Ordering::Relaxed);
                    log::error!("[Sweep Worker {}] task panicked", self.id);
                },
            }
            self.busy.store(false, Ordering::Relaxed);
        }
        log::trace!("[Sweep Worker {}] exiting", self.id);
    }
}

/// Sweep Thread Pool
pub struct SweepThreadPool {
    workers: Vec<Arc<SweepWorker>>,
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SweepThreadPool {
    /// Spawn `count` workers
    pub fn new(count: usize) -> Result<Self> {
        if count == 0 {
            return Err(ConfigError::InvalidSweepThreads("pool needs at least one worker".into()).into());
        }

        let (sender, receiver) = channel::unbounded::<Task>();
        let workers: Vec<_> = (0..count).map(|id| Arc::new(SweepWorker::new(id))).collect();

        let pool = Self {
            workers,
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(Vec::with_capacity(count)),
        };
        for worker in &pool.workers {
            // On failure the pool is dropped, which joins the workers already running.
            let handle = worker.start(receiver.clone())?;
            pool.handles.lock().push(handle);
        }
        Ok(pool)
    }

    /// Pool sized by `config.sweep_threads`, or `min(4, num_cpus / 2)` when unset
    pub fn from_config(config: &TableConfig) -> Result<Self> {
        Self::new(config.sweep_thread_count())
    }

    /// Get number of workers in the pool
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Check if the pool still accepts tasks
    pub fn is_active(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stop accepting tasks, run the queued ones, and join every worker
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                log::error!("sweep worker exited abnormally");
            }
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> SweepPoolStats {
        let worker_stats: Vec<_> = self
            .workers
            .iter()
            .map(|worker| WorkerStats {
                id: worker.id,
                processed_count: worker.processed_count.load(Ordering::Relaxed),
                panicked_count: worker.panicked_count.load(Ordering::Relaxed),
                is_busy: worker.busy.load(Ordering::Relaxed),
            })
            .collect();

        SweepPoolStats {
            total_workers: self.workers.len(),
            busy_workers: worker_stats.iter().filter(|w| w.is_busy).count(),
            total_processed: worker_stats.iter().map(|w| w.processed_count).sum(),
            total_panicked: worker_stats.iter().map(|w| w.panicked_count).sum(),
            is_active: self.is_active(),
            worker_stats,
        }
    }
}

impl TaskPool for SweepThreadPool {
    fn total_thread_num(&self) -> usize {
        self.workers.len()
    }

    fn post_task(&self, task: Task) -> Result<()> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(task).map_err(|_| InternError::PoolClosed),
            None => Err(InternError::PoolClosed),
        }
    }
}

impl Drop for SweepThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Statistics for individual worker
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub processed_count: usize,
    pub panicked_count: usize,
    pub is_busy: bool,
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct SweepPoolStats {
    pub total_workers: usize,
    pub busy_workers: usize,
    pub total_processed: usize,
    pub total_panicked: usize,
    pub is_active: bool,
    pub worker_stats: Vec<WorkerStats>,
}
