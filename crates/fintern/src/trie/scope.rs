//! In-use scope
//!
//! Every operation that touches trie memory runs inside an [`InUseScope`]. The
//! scope pins the reclamation epoch, which is what keeps retired nodes alive for
//! as long as the operation may still hold pointers to them, and bumps the
//! table's in-use counter for diagnostics.

use crossbeam::epoch::{self, Guard};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// RAII guard marking "this thread is touching trie memory"
pub struct InUseScope<'t> {
    counter: &'t AtomicU32,
    guard: Guard,
}

impl<'t> InUseScope<'t> {
    pub(crate) fn enter(counter: &'t AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter,
            guard: epoch::pin(),
        }
    }

    /// Epoch guard protecting node pointers obtained under this scope
    #[inline]
    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    pub(crate) fn belongs_to(&self, counter: &AtomicU32) -> bool {
        std::ptr::eq(self.counter, counter)
    }
}

impl Drop for InUseScope<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for InUseScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InUseScope")
            .field("in_use", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}
