use std::collections::BTreeSet;
use std::sync::Arc;

use resim_core::{InferError, NodeId, RngHandle, Value};
use tracing::debug;

use crate::ledger::Ledger;
use crate::lkernel::LKernel;
use crate::omegadb::{Gradients, OmegaDB};
use crate::scaffold::Scaffold;
use crate::trace::{NodeKind, TraceStore};

/// Regenerates the scaffold region feeding `border` and attaches absorbing nodes.
///
/// With `restore` set, values come back from `db` instead of being proposed.
/// Returns the summed kernel and absorbing weights. On error every value and
/// regeneration count touched by the pass is put back, leaving the store as
/// it was before the call.
pub fn regen_and_attach<S: TraceStore>(
    store: &mut S,
    border: &[NodeId],
    scaffold: &Scaffold,
    restore: bool,
    db: &OmegaDB,
    gradients: Option<&mut Gradients>,
    rng: &mut RngHandle,
) -> Result<f64, InferError> {
    let mut pass = RegenPass {
        store,
        scaffold,
        restore,
        db,
        gradients,
        rng,
        ledger: Ledger::default(),
        journal: Vec::new(),
        touched: BTreeSet::new(),
    };
    let outcome = border.iter().try_for_each(|node| {
        if pass.scaffold.is_absorbing(*node) {
            pass.attach(*node)
        } else {
            pass.regen(*node)
        }
    });
    match outcome {
        Ok(()) => Ok(pass.ledger.total()),
        Err(err) => {
            debug!(error = %err, touched = pass.journal.len(), "rolling back regeneration");
            pass.rollback();
            Err(err)
        }
    }
}

struct Undo {
    node: NodeId,
    value: Option<Value>,
    count: usize,
}

struct RegenPass<'a, S: TraceStore> {
    store: &'a mut S,
    scaffold: &'a Scaffold,
    restore: bool,
    db: &'a OmegaDB,
    gradients: Option<&'a mut Gradients>,
    rng: &'a mut RngHandle,
    ledger: Ledger,
    journal: Vec<Undo>,
    touched: BTreeSet<NodeId>,
}

impl<'a, S: TraceStore> RegenPass<'a, S> {
    fn remember(&mut self, node: NodeId) {
        if self.touched.insert(node) {
            self.journal.push(Undo {
                node,
                value: self.store.value(node),
                count: self.store.regen_count(self.scaffold, node),
            });
        }
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.journal.pop() {
            match undo.value {
                Some(value) => self.store.set_value(undo.node, value),
                None => self.store.clear_value(undo.node),
            }
            self.store.set_regen_count(self.scaffold, undo.node, undo.count);
        }
    }

    fn attach(&mut self, node: NodeId) -> Result<(), InferError> {
        self.regen_parents(node)?;
        let psp = Arc::clone(self.store.structure().psp(node)?);
        let args = self.store.args(node)?;
        let value = self.store.value(node).ok_or_else(|| {
            InferError::invariant("absorbing-inactive", "absorbing node has no value")
                .with_context("node", node)
        })?;
        self.ledger.add(node, psp.log_density(&value, &args)?);
        Ok(())
    }

    fn regen(&mut self, node: NodeId) -> Result<(), InferError> {
        if !self.scaffold.is_resampling(node) {
            return Ok(());
        }
        self.remember(node);
        let count = self.store.regen_count(self.scaffold, node);
        if count == 0 {
            self.regen_parents(node)?;
            self.apply(node)?;
        }
        self.store.set_regen_count(self.scaffold, node, count + 1);
        Ok(())
    }

    fn regen_parents(&mut self, node: NodeId) -> Result<(), InferError> {
        let parents = self.store.structure().parents(node)?.to_vec();
        for parent in parents {
            self.regen(parent)?;
        }
        Ok(())
    }

    fn apply(&mut self, node: NodeId) -> Result<(), InferError> {
        let kind = self.store.structure().kind(node)?.clone();
        match kind {
            NodeKind::Lookup(source) => {
                let value = self.store.value(source).ok_or_else(|| {
                    InferError::invariant("inactive-source", "lookup source has no value")
                        .with_context("node", node)
                })?;
                self.store.set_value(node, value);
            }
            NodeKind::Application { psp, .. } => {
                let args = self.store.args(node)?;
                let scaffold = self.scaffold;
                let kernel = scaffold.lkernel(node);
                let value = if self.restore {
                    self.db.value(node).cloned().ok_or_else(|| {
                        InferError::invariant("missing-restore-value", "no recorded value to restore")
                            .with_context("node", node)
                    })?
                } else {
                    kernel.simulate(psp.as_ref(), &args, self.rng)?
                };
                let weight = kernel.weight(psp.as_ref(), &value, &args)?;
                if let (Some(gradients), LKernel::Variational(family)) =
                    (self.gradients.as_deref_mut(), kernel)
                {
                    gradients.insert(node, family.gradient_of_log_density(&value)?);
                }
                self.store.set_value(node, value);
                self.ledger.add(node, weight);
            }
            NodeKind::Constant(_) => {
                return Err(InferError::invariant(
                    "regen-constant",
                    "constants are never regenerated",
                )
                .with_context("node", node))
            }
        }
        Ok(())
    }
}
