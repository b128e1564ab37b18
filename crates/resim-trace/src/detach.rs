use std::sync::Arc;

use resim_core::{InferError, NodeId};

use crate::ledger::Ledger;
use crate::omegadb::OmegaDB;
use crate::scaffold::Scaffold;
use crate::trace::{NodeKind, TraceStore};

/// Detaches the scaffold region feeding `border`, undoing a regeneration.
///
/// Border nodes are visited in reverse. Every removed value is recorded in
/// the returned [`OmegaDB`]; with `compute_gradient` set, the partial
/// derivatives of the detached weight are accumulated there too.
pub fn detach_and_extract<S: TraceStore>(
    store: &mut S,
    border: &[NodeId],
    scaffold: &Scaffold,
    compute_gradient: bool,
) -> Result<(f64, OmegaDB), InferError> {
    let mut pass = DetachPass {
        store,
        scaffold,
        compute_gradient,
        db: OmegaDB::new(),
        ledger: Ledger::default(),
    };
    for node in border.iter().rev() {
        if scaffold.is_absorbing(*node) {
            pass.unabsorb(*node)?;
        } else {
            pass.extract(*node)?;
        }
    }
    Ok((pass.ledger.total(), pass.db))
}

struct DetachPass<'a, S: TraceStore> {
    store: &'a mut S,
    scaffold: &'a Scaffold,
    compute_gradient: bool,
    db: OmegaDB,
    ledger: Ledger,
}

impl<'a, S: TraceStore> DetachPass<'a, S> {
    fn unabsorb(&mut self, node: NodeId) -> Result<(), InferError> {
        let psp = Arc::clone(self.store.structure().psp(node)?);
        let args = self.store.args(node)?;
        let value = self.store.value(node).ok_or_else(|| {
            InferError::invariant("absorbing-inactive", "absorbing node has no value")
                .with_context("node", node)
        })?;
        self.ledger.add(node, psp.log_density(&value, &args)?);
        if self.compute_gradient {
            let (_, dargs) = psp.gradient_of_log_density(&value, &args)?;
            self.spread_partials(node, &dargs)?;
        }
        self.extract_parents(node)
    }

    fn extract(&mut self, node: NodeId) -> Result<(), InferError> {
        if !self.scaffold.is_resampling(node) {
            return Ok(());
        }
        let count = self.store.regen_count(self.scaffold, node);
        if count == 0 {
            return Err(InferError::invariant("extract-inactive", "node is already detached")
                .with_context("node", node));
        }
        self.store.set_regen_count(self.scaffold, node, count - 1);
        if count == 1 {
            self.unapply(node)?;
            self.extract_parents(node)?;
        }
        Ok(())
    }

    fn extract_parents(&mut self, node: NodeId) -> Result<(), InferError> {
        let parents = self.store.structure().parents(node)?.to_vec();
        for parent in parents.into_iter().rev() {
            self.extract(parent)?;
        }
        Ok(())
    }

    fn spread_partials(&mut self, node: NodeId, dargs: &[f64]) -> Result<(), InferError> {
        let operands = self.store.structure().operands(node)?;
        for (operand, delta) in operands.iter().zip(dargs) {
            self.db.add_partial(*operand, *delta);
        }
        Ok(())
    }

    fn unapply(&mut self, node: NodeId) -> Result<(), InferError> {
        let value = self.store.value(node).ok_or_else(|| {
            InferError::invariant("extract-inactive", "regenerated node has no value")
                .with_context("node", node)
        })?;
        let kind = self.store.structure().kind(node)?.clone();
        match kind {
            NodeKind::Lookup(source) => {
                if self.compute_gradient {
                    self.db.add_partial(source, self.db.partial(node));
                }
            }
            NodeKind::Application { psp, .. } => {
                let args = self.store.args(node)?;
                let kernel = self.scaffold.lkernel(node);
                self.ledger
                    .add(node, kernel.weight(psp.as_ref(), &value, &args)?);
                if self.compute_gradient {
                    if psp.is_random() {
                        if kernel.weighs_density() {
                            let (dvalue, dargs) = psp.gradient_of_log_density(&value, &args)?;
                            self.db.add_partial(node, dvalue);
                            self.spread_partials(node, &dargs)?;
                        }
                    } else {
                        let direction = self.db.partial(node);
                        if direction != 0.0 {
                            let dargs = psp.gradient_of_simulate(&args, &value, direction)?;
                            self.spread_partials(node, &dargs)?;
                        }
                    }
                }
            }
            NodeKind::Constant(_) => {
                return Err(InferError::invariant(
                    "extract-constant",
                    "constants are never regenerated",
                )
                .with_context("node", node))
            }
        }
        self.db.extract_value(node, value);
        self.store.clear_value(node);
        Ok(())
    }
}
