use resim_core::{InferError, NodeId, RngHandle};
use resim_trace::{
    detach_and_extract, regen_and_attach, ConcreteTrace, Gradients, LKernel, OmegaDB, Scaffold,
    TraceStore,
};
use tracing::{debug, trace};

use super::{InPlace, MhOperator, Operator};

/// Mean-field variational proposal over the first scaffold stage.
///
/// Fits a variational family at every eligible regenerated choice by
/// stochastic gradient steps, then proposes from the fitted families.
/// Scaffolds without an eligible choice fall back to resimulation MH.
#[derive(Debug)]
pub struct MeanfieldOperator {
    iterations: usize,
    step_size: f64,
    state: InPlace,
    fallback: MhOperator,
    delegated: bool,
}

impl MeanfieldOperator {
    /// Creates the operator running `iterations` optimisation rounds.
    pub fn new(iterations: usize, step_size: f64) -> Self {
        Self {
            iterations,
            step_size,
            state: InPlace::default(),
            fallback: MhOperator::new(),
            delegated: false,
        }
    }

    /// Whether the last proposal fell back to resimulation MH.
    pub fn delegated(&self) -> bool {
        self.delegated
    }

    fn eligible(trace: &ConcreteTrace, scaffold: &Scaffold) -> Result<Vec<NodeId>, InferError> {
        let mut nodes = Vec::new();
        for node in scaffold.drg_nodes() {
            if !trace.is_random_choice(node) || trace.is_constrained(node) || scaffold.is_aaa(node) {
                continue;
            }
            if trace.psp(node)?.has_variational_kernel() {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    fn install_kernels(
        trace: &ConcreteTrace,
        scaffold: &mut Scaffold,
        nodes: &[NodeId],
    ) -> Result<(), InferError> {
        for node in nodes {
            let args = trace.args(*node)?;
            let family = trace.psp(*node)?.variational_kernel(&args)?;
            scaffold.install_lkernel(*node, LKernel::Variational(family));
        }
        Ok(())
    }

    fn optimise(
        &self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        for round in 0..self.iterations {
            let mut gradients = Gradients::new();
            let gain = match regen_and_attach(
                trace,
                scaffold.stage(0),
                scaffold,
                false,
                &OmegaDB::new(),
                Some(&mut gradients),
                rng,
            ) {
                Ok(gain) => gain,
                Err(err) if err.is_recoverable() => {
                    trace!(round, error = %err, "skipping optimisation round");
                    continue;
                }
                Err(err) => return Err(err),
            };
            detach_and_extract(trace, scaffold.stage(0), scaffold, false)?;
            if !gain.is_finite() {
                trace!(round, gain, "skipping update with non-finite gain");
                continue;
            }
            for (node, kernel) in scaffold.lkernels_mut() {
                if let (LKernel::Variational(family), Some(gradient)) = (kernel, gradients.get(&node)) {
                    family.update_parameters(gradient, gain, self.step_size);
                }
            }
        }
        Ok(())
    }
}

impl Default for MeanfieldOperator {
    fn default() -> Self {
        Self::new(20, 0.01)
    }
}

impl Operator for MeanfieldOperator {
    fn name(&self) -> &'static str {
        "meanfield"
    }

    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError> {
        let nodes = Self::eligible(trace, scaffold)?;
        self.delegated = nodes.is_empty();
        if self.delegated {
            debug!("no variational family in scaffold, delegating to resimulation MH");
            return self.fallback.propose(trace, scaffold, rng);
        }
        Self::install_kernels(trace, scaffold, &nodes)?;
        self.state.prepare(trace, scaffold, false)?;
        self.optimise(trace, scaffold, rng)?;

        let rho_db = self.state.rho_db()?.clone();
        let rho = regen_and_attach(trace, scaffold.stage(0), scaffold, true, &rho_db, None, rng)?;
        detach_and_extract(trace, scaffold.stage(0), scaffold, false)?;
        debug!(kernels = nodes.len(), rho, "variational families fitted");

        Ok(match self.state.regenerate(trace, scaffold, rng)? {
            Some(xi) => xi - rho,
            None => f64::NEG_INFINITY,
        })
    }

    fn accept(&mut self, trace: &mut ConcreteTrace, scaffold: &mut Scaffold) -> Result<(), InferError> {
        if self.delegated {
            return self.fallback.accept(trace, scaffold);
        }
        self.state.finish();
        Ok(())
    }

    fn reject(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        if self.delegated {
            return self.fallback.reject(trace, scaffold, rng);
        }
        self.state.restore(trace, scaffold, rng)
    }
}
