use resim_core::{InferError, RngHandle, Value};

use crate::psp::{Psp, VariationalKernel};

/// Local kernel proposing the value of a regenerated application.
#[derive(Debug)]
pub enum LKernel {
    /// Sample from the procedure itself; contributes no weight.
    Resimulation,
    /// Propose a fixed value, weighted by its density under the procedure.
    Deterministic(Value),
    /// Sample from a tunable family, weighted by `log p - log q`.
    Variational(Box<dyn VariationalKernel>),
}

impl LKernel {
    /// Proposes a value for an application of `psp` to `args`.
    pub fn simulate(
        &self,
        psp: &dyn Psp,
        args: &[Value],
        rng: &mut RngHandle,
    ) -> Result<Value, InferError> {
        match self {
            LKernel::Resimulation => psp.simulate(args, rng),
            LKernel::Deterministic(value) => Ok(value.clone()),
            LKernel::Variational(family) => Ok(family.simulate(rng)),
        }
    }

    /// Weight of having proposed `value`.
    pub fn weight(&self, psp: &dyn Psp, value: &Value, args: &[Value]) -> Result<f64, InferError> {
        match self {
            LKernel::Resimulation => Ok(0.0),
            LKernel::Deterministic(_) => psp.log_density(value, args),
            LKernel::Variational(family) => {
                Ok(psp.log_density(value, args)? - family.log_density(value)?)
            }
        }
    }

    /// Upper bound on [`LKernel::weight`] over the operands reported as `None`.
    pub fn weight_bound(&self, psp: &dyn Psp, args: &[Option<Value>]) -> Result<f64, InferError> {
        match self {
            LKernel::Resimulation => Ok(0.0),
            LKernel::Deterministic(value) => psp.log_density_bound(value, args),
            LKernel::Variational(_) => Err(InferError::no_static_bound(
                "variational-unbounded",
                "variational kernels carry no static weight bound",
            )),
        }
    }

    /// Whether the kernel weight is the procedure density of the proposed value.
    pub fn weighs_density(&self) -> bool {
        matches!(self, LKernel::Deterministic(_))
    }
}
