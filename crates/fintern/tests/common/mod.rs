//! Test Utilities for the fintern Test Suite
//!
//! A simulated string heap standing in for the host runtime: objects are fake
//! addresses mapped to their contents, the test decides which ones die and which
//! ones move, and the heap hands out the read barrier and sweep visitors a real
//! collector would supply.
//!
//! ============================================================================
//! Every helper asserts strictly; a helper that papers over a table bug hides it.
//! ============================================================================

#![allow(dead_code)]

use fintern::{
    BarrierMode, HashTrie, LoadResult, ObjectRef, SlotBarrier, SweepVisitor, TableConfig,
    ValueSlot,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Maximum time a test waits on another thread
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// First fake object address
const HEAP_BASE: usize = 0x10_0000;

/// Object alignment; keeps the low bits of every address clear
const OBJECT_ALIGN: usize = 16;

/// ============================================================================
/// SIMULATED HEAP
/// ============================================================================

/// Simulated heap of string objects
///
/// **Bug this finds:** Tables that compare addresses instead of contents, or that
/// keep handing out objects the collector declared dead
#[derive(Default)]
pub struct TestHeap {
    next: AtomicUsize,
    contents: RwLock<HashMap<usize, String>>,
    dead: RwLock<HashSet<usize>>,
    forwarding: RwLock<HashMap<usize, usize>>,
    allocations: AtomicUsize,
}

impl TestHeap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a string object
    pub fn allocate(&self, contents: &str) -> ObjectRef {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let address = HEAP_BASE + index * OBJECT_ALIGN;
        self.contents.write().insert(address, contents.to_string());
        self.allocations.fetch_add(1, Ordering::Relaxed);
        ObjectRef::new(address).unwrap()
    }

    /// Objects allocated so far, including losers of insert races
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Contents of a live object, following forwarding
    pub fn contents(&self, object: ObjectRef) -> Option<String> {
        let current = self.resolve(object)?;
        self.contents.read().get(&current.address()).cloned()
    }

    /// Declare an object dead
    pub fn kill(&self, object: ObjectRef) {
        let current = self.resolve(object).unwrap_or(object);
        self.dead.write().insert(current.address());
    }

    /// Kill every live object whose contents match `predicate`
    pub fn kill_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
        let contents = self.contents.read();
        let forwarded: HashSet<usize> = self.forwarding.read().keys().copied().collect();
        let mut dead = self.dead.write();
        let mut killed = 0;
        for (address, text) in contents.iter() {
            if !forwarded.contains(address) && predicate(text) && dead.insert(*address) {
                killed += 1;
            }
        }
        killed
    }

    /// Move an object to a fresh address; the old address forwards to it
    pub fn relocate(&self, object: ObjectRef) -> ObjectRef {
        let contents = self
            .contents(object)
            .unwrap_or_else(|| panic!("relocating dead object {:?}", object));
        let moved = self.allocate(&contents);
        self.allocations.fetch_sub(1, Ordering::Relaxed);
        self.forwarding
            .write()
            .insert(object.address(), moved.address());
        moved
    }

    pub fn is_live(&self, object: ObjectRef) -> bool {
        self.resolve(object).is_some()
    }

    /// Current address of an object, or None if it died
    pub fn resolve(&self, object: ObjectRef) -> Option<ObjectRef> {
        let mut address = object.address();
        {
            let forwarding = self.forwarding.read();
            while let Some(next) = forwarding.get(&address) {
                address = *next;
            }
        }
        if self.dead.read().contains(&address) {
            None
        } else {
            ObjectRef::new(address)
        }
    }

    /// Read barrier resolving forwarding and hiding dead referents
    ///
    /// Heals the slot to the forwarded address, like a load barrier would.
    pub fn read_barrier(self: &Arc<Self>) -> SlotBarrier {
        let heap = Arc::clone(self);
        SlotBarrier::need(move |slot: &ValueSlot| {
            let old = slot.get()?;
            let current = heap.resolve(old)?;
            if current != old {
                slot.heal(old, current);
            }
            Some(current)
        })
    }

    /// Weak field visitor of a moving collector
    pub fn weak_field_visitor(self: &Arc<Self>) -> SweepVisitor {
        let heap = Arc::clone(self);
        SweepVisitor::weak_field(move |slot: &ValueSlot| {
            let Some(old) = slot.get() else {
                return false;
            };
            match heap.resolve(old) {
                Some(current) => {
                    if current != old {
                        slot.set(current);
                    }
                    true
                },
                None => false,
            }
        })
    }

    /// Root visitor of a non-moving (or forwarding-aware) collector
    pub fn root_visitor(self: &Arc<Self>) -> SweepVisitor {
        let heap = Arc::clone(self);
        SweepVisitor::root(move |object: ObjectRef| heap.resolve(object))
    }

    /// Intern `text` under its natural hash
    pub fn intern(&self, table: &HashTrie, text: &str) -> ObjectRef {
        self.intern_with_hash(table, hash_of(text), text)
    }

    /// Intern `text` under a chosen hash, to force collisions
    pub fn intern_with_hash(&self, table: &HashTrie, hash: u32, text: &str) -> ObjectRef {
        table.load_or_store(
            hash,
            |candidate| self.contents(candidate).as_deref() == Some(text),
            || self.allocate(text),
        )
    }

    /// Look `text` up without inserting
    pub fn lookup(&self, table: &HashTrie, text: &str) -> Option<ObjectRef> {
        self.lookup_with_hash(table, hash_of(text), text)
    }

    pub fn lookup_with_hash(&self, table: &HashTrie, hash: u32, text: &str) -> Option<ObjectRef> {
        let scope = table.scope();
        match table.load(&scope, hash, |candidate| {
            self.contents(candidate).as_deref() == Some(text)
        }) {
            LoadResult::Found(object) => Some(object),
            LoadResult::NotFound(_) => None,
        }
    }

    /// Number of linked entries whose live referent has contents `text`
    pub fn count_live(&self, table: &HashTrie, text: &str) -> usize {
        table
            .entries()
            .into_iter()
            .filter_map(|(_, value)| value)
            .filter(|object| self.contents(*object).as_deref() == Some(text))
            .count()
    }
}

/// ============================================================================
/// TABLE FIXTURES
/// ============================================================================

/// FNV-1a, standing in for the runtime's string hash
pub fn hash_of(text: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Configuration with `root_size` shards in `mode`
pub fn config(mode: BarrierMode, root_size: usize) -> TableConfig {
    TableConfig {
        barrier_mode: mode,
        root_size,
        ..Default::default()
    }
}

/// Table for a moving collector, reading through the heap's barrier
///
/// **Bug this finds:** Lookups that bypass the read barrier
pub fn need_table(heap: &Arc<TestHeap>, root_size: usize) -> HashTrie {
    HashTrie::new(
        config(BarrierMode::NeedSlotBarrier, root_size),
        heap.read_barrier(),
    )
    .expect("valid NeedSlotBarrier configuration")
}

/// Table for a non-moving collector
pub fn no_barrier_table(root_size: usize) -> HashTrie {
    HashTrie::new(
        config(BarrierMode::NoSlotBarrier, root_size),
        SlotBarrier::NoSlotBarrier,
    )
    .expect("valid NoSlotBarrier configuration")
}

/// Distinct test strings
pub fn words(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{}-{}", prefix, i)).collect()
}

/// ============================================================================
/// ASSERTIONS
/// ============================================================================

/// Assert every string of `texts` is interned exactly once
///
/// **Bug this finds:** Duplicate entries after racing inserts
pub fn assert_unique(heap: &TestHeap, table: &HashTrie, texts: &[String]) {
    for text in texts {
        assert_eq!(
            heap.count_live(table, text),
            1,
            "{:?} must be interned exactly once",
            text
        );
    }
}
