//! Barrier Module - Slot Barriers & Sweep Visitors
//!
//! The table runs under one of two slot-barrier modes, chosen once at
//! construction:
//!
//! - **NeedSlotBarrier**: the collector can move strings and exposes weak
//!   references. Mutators read value slots through a [`ReadBarrier`], and sweeps
//!   take a [`WeakRefFieldVisitor`] that decides liveness per slot. Unlinked
//!   entries are reclaimed only after the sweep generation is past its safepoint.
//! - **NoSlotBarrier**: the collector is non-moving or answers liveness through a
//!   root visitor returning the (possibly forwarded) address. Slots are read raw
//!   and sweeping is a plain synchronous pass.
//!
//! A [`SweepVisitor`] whose mode differs from the table's is a contract violation.

use crate::object::{ObjectRef, ValueSlot};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Slot-barrier mode of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BarrierMode {
    /// Moving collector with per-slot weak visiting
    NeedSlotBarrier,
    /// Non-moving collector, or liveness via root visitor
    NoSlotBarrier,
}

/// Read barrier hook supplied by the collector
///
/// Returns the current referent of a slot, resolving forwarding if the object was
/// relocated, or None if the referent is dead.
pub trait ReadBarrier: Send + Sync {
    fn read(&self, slot: &ValueSlot) -> Option<ObjectRef>;
}

impl<F> ReadBarrier for F
where
    F: Fn(&ValueSlot) -> Option<ObjectRef> + Send + Sync,
{
    fn read(&self, slot: &ValueSlot) -> Option<ObjectRef> {
        self(slot)
    }
}

/// Read barrier for collectors that never forward: a plain acquire load
#[derive(Debug, Default, Clone, Copy)]
pub struct RawReadBarrier;

impl ReadBarrier for RawReadBarrier {
    fn read(&self, slot: &ValueSlot) -> Option<ObjectRef> {
        slot.get()
    }
}

/// Slot-reading strategy, selected once per table
#[derive(Clone)]
pub enum SlotBarrier {
    NeedSlotBarrier(Arc<dyn ReadBarrier>),
    NoSlotBarrier,
}

impl SlotBarrier {
    /// Strategy for a moving collector
    pub fn need(barrier: impl ReadBarrier + 'static) -> Self {
        SlotBarrier::NeedSlotBarrier(Arc::new(barrier))
    }

    pub fn mode(&self) -> BarrierMode {
        match self {
            SlotBarrier::NeedSlotBarrier(_) => BarrierMode::NeedSlotBarrier,
            SlotBarrier::NoSlotBarrier => BarrierMode::NoSlotBarrier,
        }
    }

    /// Read the referent of `slot`, None if dead
    #[inline]
    pub fn read_value(&self, slot: &ValueSlot) -> Option<ObjectRef> {
        match self {
            SlotBarrier::NeedSlotBarrier(barrier) => barrier.read(slot),
            SlotBarrier::NoSlotBarrier => slot.get(),
        }
    }
}

impl fmt::Debug for SlotBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotBarrier::{:?}", self.mode())
    }
}

/// Weak field visitor for `NeedSlotBarrier` sweeps
///
/// Returns whether the referent of `slot` survived. A visitor for a moving
/// collector rewrites the slot to the forwarded address before returning true.
pub trait WeakRefFieldVisitor: Send + Sync {
    fn visit_field(&self, slot: &ValueSlot) -> bool;
}

impl<F> WeakRefFieldVisitor for F
where
    F: Fn(&ValueSlot) -> bool + Send + Sync,
{
    fn visit_field(&self, slot: &ValueSlot) -> bool {
        self(slot)
    }
}

/// Weak root visitor for `NoSlotBarrier` sweeps
///
/// Returns the referent's current address, or None if it died.
pub trait WeakRootVisitor: Send + Sync {
    fn visit_root(&self, object: ObjectRef) -> Option<ObjectRef>;
}

impl<F> WeakRootVisitor for F
where
    F: Fn(ObjectRef) -> Option<ObjectRef> + Send + Sync,
{
    fn visit_root(&self, object: ObjectRef) -> Option<ObjectRef> {
        self(object)
    }
}

/// Liveness verdict for one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Dead,
    Live,
    Relocated,
}

/// Visitor of one sweep generation
#[derive(Clone)]
pub enum SweepVisitor {
    WeakField(Arc<dyn WeakRefFieldVisitor>),
    Root(Arc<dyn WeakRootVisitor>),
}

impl SweepVisitor {
    pub fn weak_field(visitor: impl WeakRefFieldVisitor + 'static) -> Self {
        SweepVisitor::WeakField(Arc::new(visitor))
    }

    pub fn root(visitor: impl WeakRootVisitor + 'static) -> Self {
        SweepVisitor::Root(Arc::new(visitor))
    }

    /// Barrier mode this visitor belongs to
    pub fn mode(&self) -> BarrierMode {
        match self {
            SweepVisitor::WeakField(_) => BarrierMode::NeedSlotBarrier,
            SweepVisitor::Root(_) => BarrierMode::NoSlotBarrier,
        }
    }

    /// Decide liveness of `slot`, updating it for relocated referents
    ///
    /// Dead slots are cleared so that readers still traversing the chain stop
    /// matching the entry before it is unlinked.
    pub(crate) fn evaluate(&self, slot: &ValueSlot) -> Liveness {
        let before = match slot.get() {
            Some(object) => object,
            None => return Liveness::Dead,
        };

        let verdict = match self {
            SweepVisitor::WeakField(visitor) => {
                if !visitor.visit_field(slot) {
                    Liveness::Dead
                } else if slot.get() == Some(before) {
                    Liveness::Live
                } else {
                    Liveness::Relocated
                }
            },
            SweepVisitor::Root(visitor) => match visitor.visit_root(before) {
                None => Liveness::Dead,
                Some(after) if after == before => Liveness::Live,
                Some(after) => {
                    slot.set(after);
                    Liveness::Relocated
                },
            },
        };

        if verdict == Liveness::Dead {
            slot.clear();
        }
        verdict
    }
}

impl fmt::Debug for SweepVisitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepVisitor::WeakField(_) => write!(f, "SweepVisitor::WeakField"),
            SweepVisitor::Root(_) => write!(f, "SweepVisitor::Root"),
        }
    }
}
