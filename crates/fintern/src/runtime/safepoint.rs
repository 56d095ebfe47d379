//! Safepoint Management
//!
//! A safepoint is a point where mutator threads can be stopped by the collector.
//! Before deferred entries of a sweep generation are released, the coordinator
//! brings every registered mutator to a safepoint.
//!
//! ## Protocol
//!
//! 1. Mutators register once and poll at operation boundaries
//! 2. The collector requests a suspension and waits until every registered
//!    mutator has arrived (or is parked)
//! 3. The collector does its work and releases the suspension
//! 4. Arrived mutators resume
//!
//! A mutator about to block on something the collector may need (a lock, a
//! condition variable) runs the blocking call inside [`SafepointManager::parked`],
//! so it counts as stopped for the duration.
//!
//! The suspending thread must not itself be a registered, running mutator.

use super::MutatorSuspender;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct SafepointState {
    /// A suspension is in effect
    requested: bool,
    /// Registered mutator threads
    registered: usize,
    /// Threads stopped at a poll or inside a parked region
    arrived: usize,
    /// Completed suspensions
    suspensions: u64,
}

/// SafepointManager - safepoint coordination between collector and mutators
///
/// # Examples
///
/// ```rust,no_run
/// use fintern::{MutatorSuspender, SafepointManager};
/// use std::sync::Arc;
///
/// let safepoint = Arc::new(SafepointManager::new());
///
/// let mutator = {
///     let safepoint = Arc::clone(&safepoint);
///     std::thread::spawn(move || {
///         let _registration = safepoint.register();
///         for _ in 0..1000 {
///             safepoint.poll();
///         }
///     })
/// };
///
/// safepoint.suspend_all();
/// // every registered mutator is stopped here
/// safepoint.resume_all();
/// mutator.join().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct SafepointManager {
    state: Mutex<SafepointState>,
    /// Fast-path mirror of `state.requested`
    requested: AtomicBool,
    /// Signalled when a mutator arrives or deregisters
    arrived: Condvar,
    /// Signalled when a suspension is released
    released: Condvar,
}

impl SafepointManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread as a mutator
    ///
    /// Registration waits out a suspension already in effect. The thread stays
    /// registered until the returned guard is dropped.
    pub fn register(&self) -> MutatorRegistration<'_> {
        let mut state = self.state.lock();
        while state.requested {
            self.released.wait(&mut state);
        }
        state.registered += 1;
        MutatorRegistration { manager: self }
    }

    /// Check if a suspension is requested
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Run `f` as a stopped thread
    ///
    /// The collector may suspend while `f` runs; on return the thread waits for
    /// that suspension to end before continuing as a mutator.
    pub fn parked<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut state = self.state.lock();
            state.arrived += 1;
            self.arrived.notify_all();
        }

        let result = f();

        let mut state = self.state.lock();
        while state.requested {
            self.released.wait(&mut state);
        }
        state.arrived -= 1;
        result
    }

    /// Number of registered mutators
    pub fn registered(&self) -> usize {
        self.state.lock().registered
    }

    /// Number of threads currently stopped
    pub fn threads_at_safepoint(&self) -> usize {
        self.state.lock().arrived
    }

    /// Number of suspensions released so far
    pub fn suspensions(&self) -> u64 {
        self.state.lock().suspensions
    }

    fn block_at_safepoint(&self) {
        let mut state = self.state.lock();
        if !state.requested {
            return;
        }
        state.arrived += 1;
        self.arrived.notify_all();
        while state.requested {
            self.released.wait(&mut state);
        }
        state.arrived -= 1;
    }
}

impl MutatorSuspender for SafepointManager {
    fn suspend_all(&self) {
        let mut state = self.state.lock();
        // One suspension at a time
        while state.requested {
            self.released.wait(&mut state);
        }
        state.requested = true;
        self.requested.store(true, Ordering::Release);

        while state.arrived < state.registered {
            self.arrived.wait(&mut state);
        }
        log::trace!(
            "safepoint reached: {} of {} mutators stopped",
            state.arrived,
            state.registered
        );
    }

    fn resume_all(&self) {
        let mut state = self.state.lock();
        if !state.requested {
            return;
        }
        state.requested = false;
        state.suspensions += 1;
        self.requested.store(false, Ordering::Release);
        self.released.notify_all();
    }

    fn poll(&self) {
        if self.is_requested() {
            self.block_at_safepoint();
        }
    }
}

/// Mutator registration for RAII
#[derive(Debug)]
pub struct MutatorRegistration<'a> {
    manager: &'a SafepointManager,
}

impl Drop for MutatorRegistration<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.state.lock();
        state.registered -= 1;
        self.manager.arrived.notify_all();
    }
}
