use resim_core::{InferError, RngHandle};
use resim_trace::{ConcreteTrace, Scaffold};

mod block;
mod subproblem;

pub use block::{BlockSelector, BlockSpec};
pub use subproblem::{SubproblemExpr, SubproblemSelector};

/// Chooses the scaffold a proposal operates on.
pub trait Selector {
    /// Samples a scaffold from the current trace.
    fn sample_index(&self, trace: &ConcreteTrace, rng: &mut RngHandle) -> Result<Scaffold, InferError>;

    /// Log probability that `scaffold` would be selected from `trace`.
    fn log_density_of_index(&self, trace: &ConcreteTrace, scaffold: &Scaffold) -> Result<f64, InferError>;
}
