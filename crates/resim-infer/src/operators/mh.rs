use resim_core::{InferError, RngHandle};
use resim_trace::{ConcreteTrace, Scaffold};

use super::{InPlace, Operator};

/// Resimulation Metropolis-Hastings over the first stage of a scaffold.
#[derive(Debug, Default)]
pub struct MhOperator {
    state: InPlace,
}

impl MhOperator {
    /// Creates the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Operator for MhOperator {
    fn name(&self) -> &'static str {
        "mh"
    }

    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError> {
        let rho = self.state.prepare(trace, scaffold, false)?;
        Ok(match self.state.regenerate(trace, scaffold, rng)? {
            Some(xi) => xi - rho,
            None => f64::NEG_INFINITY,
        })
    }

    fn accept(&mut self, _trace: &mut ConcreteTrace, _scaffold: &mut Scaffold) -> Result<(), InferError> {
        self.state.finish();
        Ok(())
    }

    fn reject(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        self.state.restore(trace, scaffold, rng)
    }
}
