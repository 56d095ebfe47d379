//! Object references and weak value slots
//!
//! The table never looks inside a string object. It stores the object's address in
//! a [`ValueSlot`], which the collector may clear (referent died) or rewrite
//! (referent moved) while mutators read it.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Address of a heap string object
///
/// Never null: absence is expressed as `Option<ObjectRef>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroUsize);

impl ObjectRef {
    /// Wrap a raw address, returning None for null
    pub fn new(address: usize) -> Option<Self> {
        NonZeroUsize::new(address).map(ObjectRef)
    }

    /// Raw address of the object
    pub fn address(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.address())
    }
}

/// Weak value slot of an interned entry
///
/// A slot reading null means the referent was collected and the entry is dead,
/// whether or not a sweep has unlinked it yet.
pub struct ValueSlot {
    referent: AtomicUsize,
}

impl ValueSlot {
    /// Create a slot holding `object`
    pub fn new(object: ObjectRef) -> Self {
        Self {
            referent: AtomicUsize::new(object.address()),
        }
    }

    /// Raw read of the referent, without any barrier
    pub fn get(&self) -> Option<ObjectRef> {
        ObjectRef::new(self.referent.load(Ordering::Acquire))
    }

    /// Point the slot at a relocated referent
    pub fn set(&self, object: ObjectRef) {
        self.referent.store(object.address(), Ordering::Release);
    }

    /// Replace `old` with `new` only if the slot still holds `old`
    ///
    /// Used to heal a slot after a read barrier resolved a forwarded referent.
    pub fn heal(&self, old: ObjectRef, new: ObjectRef) -> bool {
        self.referent
            .compare_exchange(
                old.address(),
                new.address(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Called by the collector when the referent is dead
    pub fn clear(&self) {
        self.referent.store(0, Ordering::Release);
    }

    /// Check if the referent is gone
    pub fn is_cleared(&self) -> bool {
        self.referent.load(Ordering::Acquire) == 0
    }
}

impl fmt::Debug for ValueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueSlot").field(&self.get()).finish()
    }
}
