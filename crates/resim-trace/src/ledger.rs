use std::collections::BTreeMap;

use resim_core::NodeId;

/// Weight contributions keyed by node, summed in handle order.
///
/// Detach and regeneration visit nodes in opposite orders; summing by handle
/// makes the detach weight of a state bit-identical to the weight of
/// regenerating the same state.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    terms: BTreeMap<NodeId, f64>,
}

impl Ledger {
    pub(crate) fn add(&mut self, node: NodeId, weight: f64) {
        *self.terms.entry(node).or_insert(0.0) += weight;
    }

    pub(crate) fn total(&self) -> f64 {
        self.terms.values().sum()
    }
}
