use resim_core::{NodeId, PersistentMap, Value};
use tracing::trace;

use crate::scaffold::Scaffold;
use crate::trace::{ConcreteTrace, TraceStore};

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Held(Value),
    Cleared,
}

/// Copy-on-write view of a base trace.
///
/// Writes land in persistent overlay maps, so branching a particle is a
/// constant-time clone that shares every earlier write with its source.
/// The base is borrowed immutably and can only change once the overlay is
/// handed back through [`ConcreteTrace::commit`].
#[derive(Debug, Clone)]
pub struct Particle<'t> {
    base: &'t ConcreteTrace,
    values: PersistentMap<NodeId, Slot>,
    counts: PersistentMap<NodeId, usize>,
}

/// Writes made by a particle, detached from the trace it borrowed.
#[derive(Debug, Clone)]
pub struct Overlay {
    values: PersistentMap<NodeId, Slot>,
    counts: PersistentMap<NodeId, usize>,
}

impl<'t> Particle<'t> {
    /// Empty overlay over `base`.
    pub fn new(base: &'t ConcreteTrace) -> Self {
        Self {
            base,
            values: PersistentMap::new(),
            counts: PersistentMap::new(),
        }
    }

    /// Independent copy sharing every write made so far.
    pub fn branch(&self) -> Self {
        self.clone()
    }

    /// Releases the borrow of the base, keeping the writes.
    pub fn into_overlay(self) -> Overlay {
        Overlay {
            values: self.values,
            counts: self.counts,
        }
    }
}

impl TraceStore for Particle<'_> {
    fn structure(&self) -> &ConcreteTrace {
        self.base
    }

    fn value(&self, node: NodeId) -> Option<Value> {
        match self.values.lookup(&node) {
            Some(Slot::Held(value)) => Some(value.clone()),
            Some(Slot::Cleared) => None,
            None => self.base.value(node),
        }
    }

    fn set_value(&mut self, node: NodeId, value: Value) {
        self.values = self.values.insert(node, Slot::Held(value));
    }

    fn clear_value(&mut self, node: NodeId) {
        self.values = self.values.insert(node, Slot::Cleared);
    }

    fn regen_count(&self, scaffold: &Scaffold, node: NodeId) -> usize {
        self.counts
            .lookup(&node)
            .copied()
            .unwrap_or_else(|| self.base.regen_count(scaffold, node))
    }

    fn set_regen_count(&mut self, _scaffold: &Scaffold, node: NodeId, count: usize) {
        self.counts = self.counts.insert(node, count);
    }
}

impl ConcreteTrace {
    /// Applies a particle's writes to the trace.
    pub fn commit(&mut self, overlay: Overlay, scaffold: &Scaffold) {
        trace!(
            values = overlay.values.len(),
            counts = overlay.counts.len(),
            "committing overlay"
        );
        for (node, slot) in overlay.values.iter() {
            match slot {
                Slot::Held(value) => self.set_value(*node, value.clone()),
                Slot::Cleared => self.clear_value(*node),
            }
        }
        for (node, count) in overlay.counts.iter() {
            self.set_regen_count(scaffold, *node, *count);
        }
    }
}
