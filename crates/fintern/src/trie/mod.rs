//! Trie Module - Concurrent Hash Trie
//!
//! The interning table is a set of independent shards, each a radix tree over the
//! bits of a 32-bit string hash. Lookups and inserts are lock-free: every child
//! slot is read with acquire loads and published with a CAS, and an inserted entry
//! is fully built before its pointer becomes visible.
//!
//! Insert protocol:
//! 1. [`HashTrie::load`] descends and reports either the matching value or the
//!    position (parent node, level, observed slot) where the descent stopped
//! 2. [`HashTrie::store_or_load`] resumes from that position and either CASes a new
//!    entry into an empty slot, links it in front of a chain of same-key entries,
//!    or expands the slot into a deeper [`Indirect`] when the head key differs
//! 3. Any CAS failure re-reads the same slot and re-checks for a match before
//!    retrying, so equal contents are never interned twice
//! 4. Every step reloads the shard root; if [`HashTrie::clear`] replaced it, the
//!    descent restarts from the new root
//!
//! Memory reachable from a [`Shared`] returned here is protected by the epoch pin
//! of the [`InUseScope`] it was loaded under.

pub(crate) mod node;
pub mod scope;
mod sweep;

pub use scope::InUseScope;

use crate::assert_context;
use crate::barrier::{BarrierMode, SlotBarrier};
use crate::config::{ConfigError, TableConfig};
use crate::error::{InternError, Result};
use crate::object::ObjectRef;
use crate::runtime::MutatorSuspender;
use crate::stats::{StatsSnapshot, TableMetrics, TableStats};
use crate::sweep::deferred::DeferredFreeList;
use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use node::{entry_slot, free_subtree, Entry, Indirect, KeySlicer, Node, Slot};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// One independent trie rooted at a fixed `Indirect`
pub(crate) struct Shard {
    root: Atomic<Indirect>,
    deferred: DeferredFreeList,
}

impl Shard {
    fn new(children: usize) -> Self {
        Self {
            root: Atomic::new(Indirect::root(children)),
            deferred: DeferredFreeList::new(),
        }
    }
}

/// Where a failed [`HashTrie::load`] stopped
///
/// Valid only under the scope it was produced in.
#[derive(Clone, Copy)]
pub struct Position<'g> {
    shard: usize,
    root: Shared<'g, Indirect>,
    parent: Shared<'g, Indirect>,
    level: u32,
    observed: Shared<'g, Indirect>,
}

impl fmt::Debug for Position<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Position")
            .field("shard", &self.shard)
            .field("level", &self.level)
            .field("occupied", &!self.observed.is_null())
            .finish()
    }
}

/// Result of [`HashTrie::load`]
#[derive(Debug, Clone, Copy)]
pub enum LoadResult<'g> {
    /// An entry with equal contents exists
    Found(ObjectRef),
    /// No match; carries the descent position for a later store
    NotFound(Position<'g>),
}

impl LoadResult<'_> {
    pub fn value(&self) -> Option<ObjectRef> {
        match self {
            LoadResult::Found(value) => Some(*value),
            LoadResult::NotFound(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, LoadResult::Found(_))
    }
}

/// Candidate value of an insert, built lazily and at most once
enum Candidate<F> {
    Future(F),
    Built(ObjectRef),
    Consumed,
}

impl<F: FnOnce() -> ObjectRef> Candidate<F> {
    fn get(&mut self) -> ObjectRef {
        let value = match std::mem::replace(self, Candidate::Consumed) {
            Candidate::Future(make_new) => make_new(),
            Candidate::Built(value) => value,
            Candidate::Consumed => unreachable!("candidate value lost"),
        };
        *self = Candidate::Built(value);
        value
    }
}

/// Concurrent string-interning hash trie
pub struct HashTrie {
    shards: Box<[Shard]>,
    slicer: KeySlicer,
    children: usize,
    barrier: SlotBarrier,
    safepoint: Option<Arc<dyn MutatorSuspender>>,
    /// Serializes clear and sweep-state transitions
    mutex: Mutex<()>,
    in_use: AtomicU32,
    sweeping: AtomicBool,
    generation: AtomicU64,
    stats: TableStats,
    config: TableConfig,
}

impl HashTrie {
    /// Create an empty table
    ///
    /// The barrier strategy must match `config.barrier_mode`.
    pub fn new(config: TableConfig, barrier: SlotBarrier) -> Result<Self> {
        config.validate()?;
        if barrier.mode() != config.barrier_mode {
            return Err(ConfigError::BarrierMismatch(format!(
                "table configured for {:?} but given a {:?} barrier",
                config.barrier_mode,
                barrier.mode()
            ))
            .into());
        }

        let children = config.children();
        let shards = (0..config.root_size).map(|_| Shard::new(children)).collect();

        Ok(Self {
            shards,
            slicer: KeySlicer::new(config.children_log2),
            children,
            barrier,
            safepoint: None,
            mutex: Mutex::new(()),
            in_use: AtomicU32::new(0),
            sweeping: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            stats: TableStats::new(),
            config,
        })
    }

    /// Create a table whose [`load_or_store`](Self::load_or_store) polls `safepoint`
    pub fn with_safepoint(
        config: TableConfig,
        barrier: SlotBarrier,
        safepoint: Arc<dyn MutatorSuspender>,
    ) -> Result<Self> {
        let mut table = Self::new(config, barrier)?;
        table.safepoint = Some(safepoint);
        Ok(table)
    }

    /// Enter an in-use scope on this table
    pub fn scope(&self) -> InUseScope<'_> {
        InUseScope::enter(&self.in_use)
    }

    /// Look up `hash` without mutating the trie
    ///
    /// `equals` is called with the (barrier-resolved) value of every entry whose
    /// key is `hash` until it returns true.
    pub fn load<'g, E>(&self, scope: &'g InUseScope<'_>, hash: u32, mut equals: E) -> LoadResult<'g>
    where
        E: FnMut(ObjectRef) -> bool,
    {
        self.check_scope(scope);
        let guard = scope.guard();
        self.stats.record_lookup(1);

        let shard = self.shard_index(hash);
        let root = self.root(shard, guard);
        let mut parent = root;
        let mut level = 0;
        loop {
            let slot = unsafe { parent.deref() }.child(self.slicer.index(hash, level));
            let observed = slot.load(Ordering::Acquire, guard);
            match Node::classify(observed) {
                Node::Empty => break,
                Node::Indirect(child) => {
                    parent = child;
                    level += 1;
                },
                Node::Entry(head) => {
                    let head = self.prune_head(shard, slot, head, guard);
                    if let Some(found) = self.find_in_chain(head, hash, &mut equals, guard) {
                        self.stats.record_hit(1);
                        return LoadResult::Found(found);
                    }
                    return LoadResult::NotFound(Position {
                        shard,
                        root,
                        parent,
                        level,
                        observed,
                    });
                },
            }
        }

        LoadResult::NotFound(Position {
            shard,
            root,
            parent,
            level,
            observed: Shared::null(),
        })
    }

    /// Insert a new value unless equal contents are already interned
    ///
    /// Resumes from the position of a previous [`load`](Self::load) under the same
    /// scope. `make_new` runs at most once, and only if an insert is attempted.
    /// Returns the interned value, which is the new one only if this call won.
    pub fn store_or_load<'g, E, F>(
        &self,
        scope: &'g InUseScope<'_>,
        hash: u32,
        result: LoadResult<'g>,
        mut equals: E,
        make_new: F,
    ) -> ObjectRef
    where
        E: FnMut(ObjectRef) -> bool,
        F: FnOnce() -> ObjectRef,
    {
        let position = match result {
            LoadResult::Found(value) => return value,
            LoadResult::NotFound(position) => position,
        };
        self.check_scope(scope);
        assert_context!(
            position.shard == self.shard_index(hash),
            "load position of shard {} reused for hash {:#x}",
            position.shard,
            hash
        );

        let guard = scope.guard();
        let mut candidate = Candidate::Future(make_new);
        let mut pending: Shared<'g, Entry> = Shared::null();
        let Position {
            shard,
            mut root,
            mut parent,
            mut level,
            mut observed,
        } = position;

        loop {
            // A clear swapped the shard root; descend the fresh one instead
            let current = self.root(shard, guard);
            if current != root {
                root = current;
                parent = current;
                level = 0;
                observed = unsafe { current.deref() }
                    .child(self.slicer.index(hash, 0))
                    .load(Ordering::Acquire, guard);
            }

            let slot = unsafe { parent.deref() }.child(self.slicer.index(hash, level));
            let overflow = match Node::classify(observed) {
                Node::Indirect(child) => {
                    parent = child;
                    level += 1;
                    observed = unsafe { child.deref() }
                        .child(self.slicer.index(hash, level))
                        .load(Ordering::Acquire, guard);
                    continue;
                },
                Node::Empty => Shared::null(),
                Node::Entry(head) => {
                    if unsafe { head.deref() }.key() != hash {
                        self.expand(parent, level, slot, head, guard);
                        observed = slot.load(Ordering::Acquire, guard);
                        continue;
                    }
                    let live_head = self.prune_head(shard, slot, head, guard);
                    if let Some(found) = self.find_in_chain(live_head, hash, &mut equals, guard) {
                        if !pending.is_null() {
                            drop(unsafe { pending.into_owned() });
                        }
                        self.stats.record_hit(1);
                        return found;
                    }
                    head
                },
            };

            if pending.is_null() {
                let value = candidate.get();
                pending = Owned::new(Entry::new(hash, value, overflow)).into_shared(guard);
            } else {
                unsafe { pending.deref() }
                    .overflow()
                    .store(overflow, Ordering::Relaxed);
            }

            match slot.compare_exchange(
                observed,
                entry_slot(pending),
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    self.stats.record_insert(1);
                    return candidate.get();
                },
                Err(err) => {
                    self.stats.record_cas_retry(1);
                    observed = err.current;
                },
            }
        }
    }

    /// Intern in one call: look up, and insert `loader()` on a miss
    ///
    /// Polls the safepoint (if one was attached) before touching the trie.
    pub fn load_or_store<E, L>(&self, hash: u32, equals: E, loader: L) -> ObjectRef
    where
        E: FnMut(ObjectRef) -> bool,
        L: FnOnce() -> ObjectRef,
    {
        if let Some(safepoint) = &self.safepoint {
            safepoint.poll();
        }
        self.load_or_store_in_scope(hash, equals, loader)
    }

    /// Same as [`load_or_store`](Self::load_or_store), callable from compiler
    /// threads that are not registered mutators
    pub fn load_or_store_for_jit<E, L>(&self, hash: u32, equals: E, loader: L) -> ObjectRef
    where
        E: FnMut(ObjectRef) -> bool,
        L: FnOnce() -> ObjectRef,
    {
        self.load_or_store_in_scope(hash, equals, loader)
    }

    fn load_or_store_in_scope<E, L>(&self, hash: u32, mut equals: E, loader: L) -> ObjectRef
    where
        E: FnMut(ObjectRef) -> bool,
        L: FnOnce() -> ObjectRef,
    {
        let scope = self.scope();
        let result = self.load(&scope, hash, &mut equals);
        self.store_or_load(&scope, hash, result, equals, loader)
    }

    /// Drop every entry
    ///
    /// Each shard root is swapped for a fresh node; the old subtrees are freed once
    /// every reader pinned before the swap has left its scope.
    pub fn clear(&self) -> Result<()> {
        let _lock = self.mutex.lock();
        if self.is_sweeping() {
            return Err(InternError::invalid_state("not sweeping", "sweeping"));
        }

        let guard = epoch::pin();
        for shard in self.shards.iter() {
            let fresh = Owned::new(Indirect::root(self.children));
            let old = shard.root.swap(fresh, Ordering::AcqRel, &guard);
            let old = old.as_raw();
            unsafe {
                guard.defer_unchecked(move || {
                    free_subtree(Shared::from(old), epoch::unprotected());
                });
            }
        }
        guard.flush();
        log::debug!("cleared {} shards", self.shards.len());
        Ok(())
    }

    /// Number of entries currently linked into the trie, dead or alive
    pub fn len(&self) -> usize {
        let mut count = 0;
        self.walk(|_, entry| {
            if entry.is_some() {
                count += 1;
            }
        });
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key and raw value of every linked entry; cleared values show as None
    pub fn entries(&self) -> Vec<(u32, Option<ObjectRef>)> {
        let mut entries = Vec::new();
        self.walk(|_, entry| {
            if let Some(entry) = entry {
                entries.push((entry.key(), entry.value().get()));
            }
        });
        entries
    }

    /// Deepest `Indirect` level in any shard; 0 for a table of bare roots
    pub fn height(&self) -> u32 {
        let mut height = 0;
        self.walk(|indirect, entry| {
            if entry.is_some() {
                return;
            }
            let mut depth = 0;
            let mut node = indirect.parent();
            while !node.is_null() {
                depth += 1;
                node = unsafe { (*node).parent() };
            }
            assert_context!(
                depth == indirect.level(),
                "indirect at level {} has {} ancestors",
                indirect.level(),
                depth
            );
            height = height.max(depth);
        });
        height
    }

    /// Entries unlinked but not yet handed to the epoch collector
    pub fn deferred_len(&self) -> usize {
        self.shards.iter().map(|shard| shard.deferred.len()).sum()
    }

    /// Threads currently inside an in-use scope
    pub fn in_use_count(&self) -> u32 {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn barrier_mode(&self) -> BarrierMode {
        self.barrier.mode()
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn root_size(&self) -> usize {
        self.shards.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn metrics(&self) -> TableMetrics {
        TableMetrics::from_snapshot(&self.stats.snapshot(), self.len(), self.deferred_len())
    }

    /// Root node of `shard`; a root is never an entry
    #[inline]
    fn root<'g>(&self, shard: usize, guard: &'g Guard) -> Shared<'g, Indirect> {
        Node::classify(self.shards[shard].root.load(Ordering::Acquire, guard)).expect_indirect()
    }

    #[inline]
    fn shard_index(&self, hash: u32) -> usize {
        hash as usize & (self.shards.len() - 1)
    }

    #[inline]
    fn check_scope(&self, scope: &InUseScope<'_>) {
        assert_context!(
            scope.belongs_to(&self.in_use),
            "in-use scope belongs to another table"
        );
    }

    /// First value in the chain with key `hash` that `equals` accepts
    fn find_in_chain<E>(
        &self,
        head: Shared<'_, Entry>,
        hash: u32,
        equals: &mut E,
        guard: &Guard,
    ) -> Option<ObjectRef>
    where
        E: FnMut(ObjectRef) -> bool,
    {
        let mut current = head;
        while let Some(entry) = unsafe { current.as_ref() } {
            if entry.key() == hash {
                if let Some(value) = self.barrier.read_value(entry.value()) {
                    if equals(value) {
                        return Some(value);
                    }
                }
            }
            current = entry.overflow().load(Ordering::Acquire, guard);
        }
        None
    }

    /// Push the entry at `slot` one level down so a different key can branch off
    ///
    /// A lost CAS discards the new node; the caller re-reads the slot.
    fn expand<'g>(
        &self,
        parent: Shared<'g, Indirect>,
        level: u32,
        slot: &Slot,
        head: Shared<'g, Entry>,
        guard: &'g Guard,
    ) {
        let child_level = level + 1;
        let head_key = unsafe { head.deref() }.key();
        let indirect = Indirect::new(self.children, parent.as_raw(), child_level);
        indirect
            .child(self.slicer.index(head_key, child_level))
            .store(entry_slot(head), Ordering::Relaxed);
        let indirect = Owned::new(indirect).into_shared(guard);

        match slot.compare_exchange(
            entry_slot(head),
            indirect,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => {
                self.stats.record_expansion(1);
                log::trace!("expanded key {:#x} to level {}", head_key, child_level);
            },
            Err(_) => {
                self.stats.record_cas_retry(1);
                drop(unsafe { indirect.into_owned() });
            },
        }
    }

    /// Visit every `Indirect` (with None) and every linked entry (with its node)
    fn walk<F>(&self, mut visit: F)
    where
        F: FnMut(&Indirect, Option<&Entry>),
    {
        let guard = &epoch::pin();
        let mut stack = Vec::new();
        for shard in 0..self.shards.len() {
            stack.push(self.root(shard, guard));
        }

        while let Some(node) = stack.pop() {
            let indirect = unsafe { node.deref() };
            for slot in indirect.children() {
                match Node::classify(slot.load(Ordering::Acquire, guard)) {
                    Node::Empty => {},
                    Node::Indirect(child) => stack.push(child),
                    Node::Entry(head) => {
                        let mut current = head;
                        while let Some(entry) = unsafe { current.as_ref() } {
                            visit(indirect, Some(entry));
                            current = entry.overflow().load(Ordering::Acquire, guard);
                        }
                    },
                }
            }
            visit(indirect, None);
        }
    }
}

impl Drop for HashTrie {
    fn drop(&mut self) {
        unsafe {
            let guard = epoch::unprotected();
            for shard in self.shards.iter() {
                let root = shard.root.swap(Shared::null(), Ordering::Relaxed, guard);
                free_subtree(root, guard);
            }
        }
    }
}

impl fmt::Debug for HashTrie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTrie")
            .field("root_size", &self.shards.len())
            .field("children", &self.children)
            .field("barrier", &self.barrier)
            .field("sweeping", &self.is_sweeping())
            .field("generation", &self.generation())
            .finish()
    }
}
