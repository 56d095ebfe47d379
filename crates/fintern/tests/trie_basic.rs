//! Trie Tests - Single-Threaded Protocol
//!
//! These tests verify the insert and lookup protocol:
//! - Interning returns one object per contents
//! - Load positions resume correctly in store_or_load
//! - Expansion on hash prefixes shared down to the last level
//! - Same-hash overflow chains
//! - Clear semantics

mod common;

use common::{hash_of, need_table, no_barrier_table, words, TestHeap};
use fintern::{LoadResult, ObjectRef, TableMetrics};
use std::cell::Cell;

/// ============================================================================
/// INTERNING
/// ============================================================================

/// Equal contents must resolve to the object interned first
///
/// **Bug this finds:** Inserts that skip the equality check
#[test]
fn test_intern_returns_same_object() {
    // Arrange
    let heap = TestHeap::new();
    let table = need_table(&heap, 16);

    // Act
    let first = heap.intern(&table, "hello");
    let second = heap.intern(&table, "hello");

    // Assert
    assert_eq!(first, second);
    assert_eq!(table.len(), 1);
    assert_eq!(heap.allocations(), 1);
}

/// Different contents get different objects
#[test]
fn test_distinct_contents_distinct_objects() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 16);
    let texts = words("w", 200);

    let objects: Vec<ObjectRef> = texts.iter().map(|t| heap.intern(&table, t)).collect();

    let mut unique = objects.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), texts.len());
    assert_eq!(table.len(), texts.len());
    for (text, object) in texts.iter().zip(&objects) {
        assert_eq!(heap.lookup(&table, text), Some(*object));
    }
}

/// The constructor only runs on a miss
///
/// **Bug this finds:** Eager construction of candidate values
#[test]
fn test_constructor_runs_only_on_miss() {
    let heap = TestHeap::new();
    let table = no_barrier_table(4);
    let calls = Cell::new(0);
    let hash = hash_of("lazy");

    for _ in 0..5 {
        table.load_or_store(
            hash,
            |candidate| heap.contents(candidate).as_deref() == Some("lazy"),
            || {
                calls.set(calls.get() + 1);
                heap.allocate("lazy")
            },
        );
    }

    assert_eq!(calls.get(), 1);
}

/// Load followed by store_or_load under one scope
#[test]
fn test_load_then_store_or_load() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 16);
    let hash = hash_of("two-step");
    let equals = |candidate: ObjectRef| heap.contents(candidate).as_deref() == Some("two-step");

    let scope = table.scope();
    let miss = table.load(&scope, hash, equals);
    assert!(matches!(miss, LoadResult::NotFound(_)));
    let stored = table.store_or_load(&scope, hash, miss, equals, || heap.allocate("two-step"));

    let hit = table.load(&scope, hash, equals);
    assert_eq!(hit.value(), Some(stored));
    // A found result short-circuits without calling the constructor.
    let again = table.store_or_load(&scope, hash, hit, equals, || unreachable!());
    assert_eq!(again, stored);
    drop(scope);

    assert_eq!(table.in_use_count(), 0);
}

/// The compiler-thread variant interns into the same table
#[test]
fn test_jit_variant_shares_entries() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 16);
    let hash = hash_of("jit");

    let from_jit = table.load_or_store_for_jit(
        hash,
        |candidate| heap.contents(candidate).as_deref() == Some("jit"),
        || heap.allocate("jit"),
    );

    assert_eq!(heap.intern(&table, "jit"), from_jit);
}

/// ============================================================================
/// EXPANSION AND COLLISIONS
/// ============================================================================

/// Keys equal in every bit but the last expand down to the final level
///
/// **Bug this finds:** Off-by-one in hash slicing, non-terminating expansion
#[test]
fn test_expansion_to_last_level() {
    // Arrange - one shard so both keys share a root
    let heap = TestHeap::new();
    let table = need_table(&heap, 1);
    let max_level = table.config().max_levels() - 1;

    // Act
    let a = heap.intern_with_hash(&table, 0b10, "a");
    let b = heap.intern_with_hash(&table, 0b11, "b");

    // Assert
    assert_ne!(a, b);
    assert_eq!(table.height(), max_level);
    assert_eq!(table.stats().expansions, max_level as u64);
    assert_eq!(heap.lookup_with_hash(&table, 0b10, "a"), Some(a));
    assert_eq!(heap.lookup_with_hash(&table, 0b11, "b"), Some(b));
    assert_eq!(heap.lookup_with_hash(&table, 0b11, "a"), None);
}

/// Full hash collisions chain in one slot and stay unique
///
/// **Bug this finds:** Chains that compare keys but not contents
#[test]
fn test_same_hash_chain() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 1);
    let texts = words("collide", 32);

    let objects: Vec<ObjectRef> = texts
        .iter()
        .map(|t| heap.intern_with_hash(&table, 7, t))
        .collect();
    let again: Vec<ObjectRef> = texts
        .iter()
        .map(|t| heap.intern_with_hash(&table, 7, t))
        .collect();

    assert_eq!(objects, again);
    assert_eq!(table.len(), texts.len());
    assert_eq!(table.height(), 0);
    assert!(table.entries().iter().all(|(key, _)| *key == 7));
}

/// Colliding chain below an expanded node
#[test]
fn test_chain_survives_expansion() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 1);

    let first = heap.intern_with_hash(&table, 0x8000_0000, "x");
    let second = heap.intern_with_hash(&table, 0x8000_0000, "y");
    // Same top slice, different second slice: pushes the chain down one level
    let other = heap.intern_with_hash(&table, 0x8400_0000, "z");

    assert_eq!(table.height(), 1);
    assert_eq!(heap.lookup_with_hash(&table, 0x8000_0000, "x"), Some(first));
    assert_eq!(heap.lookup_with_hash(&table, 0x8000_0000, "y"), Some(second));
    assert_eq!(heap.lookup_with_hash(&table, 0x8400_0000, "z"), Some(other));
}

/// ============================================================================
/// CLEAR
/// ============================================================================

/// Clear empties every shard and the table can be refilled
///
/// **Bug this finds:** Stale roots after clear, leaked subtrees
#[test]
fn test_clear_then_repopulate() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 8);
    let texts = words("c", 100);
    let before: Vec<ObjectRef> = texts.iter().map(|t| heap.intern(&table, t)).collect();

    table.clear().unwrap();

    assert!(table.is_empty());
    assert_eq!(table.height(), 0);
    for text in &texts {
        assert_eq!(heap.lookup(&table, text), None);
    }

    let after: Vec<ObjectRef> = texts.iter().map(|t| heap.intern(&table, t)).collect();
    assert_eq!(table.len(), texts.len());
    assert!(before.iter().zip(&after).all(|(b, a)| b != a));
}

/// Clear on an empty table is a no-op
#[test]
fn test_clear_idempotent() {
    let table = no_barrier_table(4);
    table.clear().unwrap();
    table.clear().unwrap();
    assert!(table.is_empty());
}

/// An insert resumed after a clear lands in the fresh root
///
/// **Bug this finds:** store_or_load publishing into the detached subtree, so the
/// returned object is missing and equal contents get interned twice
#[test]
fn test_store_after_clear_is_visible() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 1);
    let hash = hash_of("survivor");
    let equals = |candidate: ObjectRef| heap.contents(candidate).as_deref() == Some("survivor");

    let scope = table.scope();
    let miss = table.load(&scope, hash, equals);
    assert!(!miss.is_found());
    table.clear().unwrap();
    let stored = table.store_or_load(&scope, hash, miss, equals, || heap.allocate("survivor"));
    drop(scope);

    assert_eq!(table.len(), 1);
    assert_eq!(heap.lookup(&table, "survivor"), Some(stored));
    assert_eq!(heap.intern(&table, "survivor"), stored);
    assert_eq!(heap.allocations(), 1);
}

/// Same as above, with the load stopping on an occupied chain head
#[test]
fn test_store_after_clear_from_chain_position() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 1);
    let hash = 0x1234_5678;
    heap.intern_with_hash(&table, hash, "neighbour");
    let equals = |candidate: ObjectRef| heap.contents(candidate).as_deref() == Some("late");

    let scope = table.scope();
    let miss = table.load(&scope, hash, equals);
    assert!(!miss.is_found());
    table.clear().unwrap();
    let stored = table.store_or_load(&scope, hash, miss, equals, || heap.allocate("late"));
    drop(scope);

    // The cleared neighbour must not come back through the new entry's chain
    assert_eq!(table.len(), 1);
    assert_eq!(heap.lookup_with_hash(&table, hash, "neighbour"), None);
    assert_eq!(heap.lookup_with_hash(&table, hash, "late"), Some(stored));
}

/// ============================================================================
/// MONITORING
/// ============================================================================

#[test]
fn test_stats_and_metrics() {
    let heap = TestHeap::new();
    let table = need_table(&heap, 4);
    heap.intern(&table, "m");
    heap.intern(&table, "m");

    let stats = table.stats();
    assert_eq!(stats.lookups, 2);
    assert_eq!(stats.inserts, 1);
    assert_eq!(stats.hits, 1);

    let metrics: TableMetrics = table.metrics();
    let text = metrics.to_prometheus();
    assert!(text.contains("fintern_inserts_total 1"));
    assert!(text.contains("fintern_entries 1"));
}
