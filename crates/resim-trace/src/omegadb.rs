use std::collections::BTreeMap;

use resim_core::{NodeId, Value};

/// Parameter gradients of variational kernels, keyed by node.
pub type Gradients = BTreeMap<NodeId, Vec<f64>>;

/// Values and partial derivatives captured while detaching a scaffold.
///
/// Restoring regeneration reads values back from here, so a rejected
/// proposal reinstates the exact previous state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OmegaDB {
    values: BTreeMap<NodeId, Value>,
    partials: BTreeMap<NodeId, f64>,
}

impl OmegaDB {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the value removed from `node`.
    pub fn extract_value(&mut self, node: NodeId, value: Value) {
        self.values.insert(node, value);
    }

    /// Value recorded for `node`.
    pub fn value(&self, node: NodeId) -> Option<&Value> {
        self.values.get(&node)
    }

    /// Number of recorded values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Accumulates `delta` into the partial derivative at `node`.
    pub fn add_partial(&mut self, node: NodeId, delta: f64) {
        *self.partials.entry(node).or_insert(0.0) += delta;
    }

    /// Partial derivative accumulated at `node`; zero if none.
    pub fn partial(&self, node: NodeId) -> f64 {
        self.partials.get(&node).copied().unwrap_or(0.0)
    }
}
