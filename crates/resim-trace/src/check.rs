use resim_core::InferError;

use crate::scaffold::Scaffold;
use crate::trace::TraceStore;

/// Fails unless every regenerated node of `scaffold` is detached.
pub fn assert_torus<S: TraceStore>(store: &S, scaffold: &Scaffold) -> Result<(), InferError> {
    for node in scaffold.drg_nodes() {
        let count = store.regen_count(scaffold, node);
        if count != 0 {
            return Err(InferError::invariant("torus-count", "detached node still counted")
                .with_context("node", node)
                .with_context("count", count));
        }
        if store.value(node).is_some() {
            return Err(InferError::invariant("torus-value", "detached node still holds a value")
                .with_context("node", node));
        }
    }
    Ok(())
}

/// Fails unless every regenerated node of `scaffold` is fully attached.
pub fn assert_whole<S: TraceStore>(store: &S, scaffold: &Scaffold) -> Result<(), InferError> {
    for node in scaffold.drg_nodes() {
        let count = store.regen_count(scaffold, node);
        let total = scaffold.regen_total(node);
        if count != total {
            return Err(InferError::invariant("whole-count", "regeneration count is incomplete")
                .with_context("node", node)
                .with_context("count", count)
                .with_context("total", total));
        }
        if store.value(node).is_none() {
            return Err(InferError::invariant("whole-value", "regenerated node has no value")
                .with_context("node", node));
        }
    }
    Ok(())
}
