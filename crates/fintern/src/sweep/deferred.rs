//! Deferred Free List
//!
//! Entries unlinked while mutators may still be traversing their chain are parked
//! here, tagged with the sweep generation that unlinked them. They are handed to
//! the epoch collector only once the coordinator has moved that generation past
//! its safepoint; the epoch then holds them until the last reader pinned before
//! the unlink has left its scope.

use crate::assert_context;
use crate::trie::node::Entry;
use crossbeam::epoch::{Guard, Owned, Shared};
use parking_lot::Mutex;
use std::fmt;

/// An unlinked entry waiting for reclamation
struct Retired {
    entry: *mut Entry,
    generation: u64,
}

// Retired entries are unreachable from the trie; only the list owns them.
unsafe impl Send for Retired {}

/// Per-shard list of unlinked entries
pub struct DeferredFreeList {
    retired: Mutex<Vec<Retired>>,
}

impl DeferredFreeList {
    pub fn new() -> Self {
        Self {
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Take ownership of an entry that was just unlinked
    pub(crate) fn retire(&self, entry: Shared<'_, Entry>, generation: u64) {
        self.retired.lock().push(Retired {
            entry: entry.as_raw() as *mut Entry,
            generation,
        });
    }

    /// Take ownership of a batch unlinked by one shard sweep
    pub(crate) fn retire_batch(&self, entries: Vec<*mut Entry>, generation: u64) {
        if entries.is_empty() {
            return;
        }
        let mut retired = self.retired.lock();
        retired.extend(
            entries
                .into_iter()
                .map(|entry| Retired { entry, generation }),
        );
    }

    /// Hand every parked entry to the epoch collector
    ///
    /// `safe_generation` is the newest generation known to be past its safepoint.
    /// Releasing an entry from a younger generation is a use-after-free hazard and
    /// aborts.
    pub(crate) fn release(&self, safe_generation: u64, guard: &Guard) -> usize {
        let drained = std::mem::take(&mut *self.retired.lock());
        let released = drained.len();
        for retired in drained {
            assert_context!(
                retired.generation <= safe_generation,
                "entry of generation {} released before generation {} passed its safepoint",
                retired.generation,
                safe_generation
            );
            unsafe { guard.defer_destroy(Shared::from(retired.entry as *const Entry)) };
        }
        released
    }

    pub fn len(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.retired.lock().is_empty()
    }
}

impl Default for DeferredFreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredFreeList {
    fn drop(&mut self) {
        for retired in self.retired.get_mut().drain(..) {
            drop(unsafe { Owned::from_raw(retired.entry) });
        }
    }
}

impl fmt::Debug for DeferredFreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredFreeList")
            .field("len", &self.len())
            .finish()
    }
}
