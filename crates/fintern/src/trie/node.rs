//! Trie nodes
//!
//! A child slot is an `Atomic<Indirect>` whose low tag bit says whether the
//! pointee is really an [`Entry`]. Entries are leaves heading an overflow chain of
//! same-key collisions; [`Indirect`] nodes fan out on the next slice of the key.
//!
//! ```text
//!  root (level 0)
//!  ┌──┬──┬──┬──┬──┬──┬──┬──┐
//!  │  │E │  │I │  │  │  │  │      E = Entry ──overflow──▶ Entry ──▶ null
//!  └──┴──┴──┴┬─┴──┴──┴──┴──┘      I = Indirect (level 1)
//!            ▼
//!  ┌──┬──┬──┬──┬──┬──┬──┬──┐
//!  │E │  │  │  │E │  │  │  │
//!  └──┴──┴──┴──┴──┴──┴──┴──┘
//! ```

use crate::assert_context;
use crate::config::HASH_BITS;
use crate::object::{ObjectRef, ValueSlot};
use crossbeam::epoch::{Atomic, Guard, Shared};
use std::ptr;
use std::sync::atomic::Ordering;

/// A child slot: null, tagged `Entry`, or `Indirect`
pub(crate) type Slot = Atomic<Indirect>;

/// Tag bit marking an entry pointer stored in a child slot
const ENTRY_TAG: usize = 0b1;

/// Leaf node: one interned string
pub(crate) struct Entry {
    key: u32,
    value: ValueSlot,
    overflow: Atomic<Entry>,
}

impl Entry {
    pub(crate) fn new(key: u32, value: ObjectRef, overflow: Shared<'_, Entry>) -> Self {
        Self {
            key,
            value: ValueSlot::new(value),
            overflow: Atomic::from(overflow),
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> u32 {
        self.key
    }

    #[inline]
    pub(crate) fn value(&self) -> &ValueSlot {
        &self.value
    }

    /// Next entry of the collision chain
    #[inline]
    pub(crate) fn overflow(&self) -> &Atomic<Entry> {
        &self.overflow
    }
}

/// Internal node: fixed fan-out of child slots
pub(crate) struct Indirect {
    children: Box<[Slot]>,
    /// Diagnostics only, never followed by lookups
    parent: *const Indirect,
    level: u32,
}

// `parent` is only read by `HashTrie::height`, under an epoch pin.
unsafe impl Send for Indirect {}
unsafe impl Sync for Indirect {}

impl Indirect {
    pub(crate) fn new(children: usize, parent: *const Indirect, level: u32) -> Self {
        Self {
            children: (0..children).map(|_| Slot::null()).collect(),
            parent,
            level,
        }
    }

    pub(crate) fn root(children: usize) -> Self {
        Self::new(children, ptr::null(), 0)
    }

    #[inline]
    pub(crate) fn child(&self, index: usize) -> &Slot {
        &self.children[index]
    }

    #[inline]
    pub(crate) fn children(&self) -> &[Slot] {
        &self.children
    }

    #[inline]
    pub(crate) fn level(&self) -> u32 {
        self.level
    }

    #[inline]
    pub(crate) fn parent(&self) -> *const Indirect {
        self.parent
    }
}

/// Decoded content of a child slot
#[derive(Clone, Copy)]
pub(crate) enum Node<'g> {
    Empty,
    Entry(Shared<'g, Entry>),
    Indirect(Shared<'g, Indirect>),
}

impl<'g> Node<'g> {
    pub(crate) fn classify(raw: Shared<'g, Indirect>) -> Self {
        if raw.is_null() {
            Node::Empty
        } else if raw.tag() & ENTRY_TAG != 0 {
            Node::Entry(Shared::from(raw.as_raw() as *const Entry))
        } else {
            Node::Indirect(raw)
        }
    }

    pub(crate) fn expect_indirect(self) -> Shared<'g, Indirect> {
        match self {
            Node::Indirect(indirect) => indirect,
            _ => {
                assert_context!(false, "indirect accessor used on a non-indirect slot");
                unreachable!()
            },
        }
    }
}

/// Slot value publishing `entry`; a null entry maps to an empty slot
#[inline]
pub(crate) fn entry_slot(entry: Shared<'_, Entry>) -> Shared<'_, Indirect> {
    if entry.is_null() {
        Shared::null()
    } else {
        Shared::from(entry.as_raw() as *const Indirect).with_tag(ENTRY_TAG)
    }
}

/// Splits a key into per-level child indices, most significant bits first
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeySlicer {
    bits: u32,
    max_levels: u32,
}

impl KeySlicer {
    pub(crate) fn new(bits: u32) -> Self {
        Self {
            bits,
            max_levels: HASH_BITS.div_ceil(bits),
        }
    }

    /// Child index of `key` in an `Indirect` at `level`
    #[inline]
    pub(crate) fn index(&self, key: u32, level: u32) -> usize {
        assert_context!(
            level < self.max_levels,
            "hash bits exhausted at level {} (max {})",
            level,
            self.max_levels
        );
        let remaining = HASH_BITS - level * self.bits;
        let width = remaining.min(self.bits);
        ((key >> (remaining - width)) & ((1u32 << width) - 1)) as usize
    }
}

/// Free every node reachable from a slot value
///
/// Returns the number of entries freed.
///
/// # Safety
///
/// No other thread may access the subtree, now or later.
pub(crate) unsafe fn free_subtree<'g>(node: Shared<'g, Indirect>, guard: &'g Guard) -> usize {
    match Node::classify(node) {
        Node::Empty => 0,
        Node::Entry(head) => unsafe { free_chain(head, guard) },
        Node::Indirect(indirect) => {
            let mut freed = 0;
            for child in unsafe { indirect.deref() }.children() {
                freed += unsafe { free_subtree(child.load(Ordering::Acquire, guard), guard) };
            }
            drop(unsafe { indirect.into_owned() });
            freed
        },
    }
}

/// Free an overflow chain
///
/// # Safety
///
/// Same contract as [`free_subtree`].
pub(crate) unsafe fn free_chain<'g>(mut entry: Shared<'g, Entry>, guard: &'g Guard) -> usize {
    let mut freed = 0;
    while !entry.is_null() {
        let next = unsafe { entry.deref() }.overflow().load(Ordering::Acquire, guard);
        drop(unsafe { entry.into_owned() });
        entry = next;
        freed += 1;
    }
    freed
}
