use resim_core::{InferError, NodeId, RngHandle, Value};
use resim_trace::{detach_and_extract, regen_and_attach, ConcreteTrace, OmegaDB, Scaffold};
use tracing::{debug, trace};

use super::{InPlace, Operator};

/// Figures from the most recent rejection-sampling proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionStats {
    /// Upper bound on the regeneration weight.
    pub bound: f64,
    /// Weight of the accepted regeneration.
    pub accepted_weight: f64,
    /// Regenerations drawn, the accepted one included.
    pub attempts: usize,
}

/// Exact rejection sampling of the first scaffold stage.
///
/// The retry loop has no cap; it ends once a draw is accepted.
#[derive(Debug, Default)]
pub struct RejectionOperator {
    state: InPlace,
    last: Option<RejectionStats>,
}

impl RejectionOperator {
    /// Creates the operator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of the last completed proposal.
    pub fn last_stats(&self) -> Option<RejectionStats> {
        self.last
    }
}

/// Operand values of `node` with every regenerated operand unknown.
fn masked_args(
    trace: &ConcreteTrace,
    scaffold: &Scaffold,
    node: NodeId,
) -> Result<Vec<Option<Value>>, InferError> {
    Ok(trace
        .operands(node)?
        .iter()
        .map(|operand| {
            if scaffold.is_resampling(*operand) {
                None
            } else {
                trace.value_at(*operand).cloned()
            }
        })
        .collect())
}

/// Upper bound on the weight of regenerating `border` in `scaffold`.
///
/// Sums, over absorbing, AAA and observation border nodes, the weight bound
/// of the installed kernel or the density bound of the procedure. The trace
/// must be whole.
pub fn compute_rejection_bound(
    trace: &ConcreteTrace,
    scaffold: &Scaffold,
    border: &[NodeId],
) -> Result<f64, InferError> {
    let mut bound = 0.0;
    for node in border {
        let observation = trace.is_observation(*node);
        if !(scaffold.is_absorbing(*node) || scaffold.is_aaa(*node) || observation) {
            continue;
        }
        let app = if observation {
            trace.outermost_non_reference_application(*node).map_err(|err| {
                InferError::no_static_bound(
                    "unresolved-observation",
                    "observation does not resolve to a static application",
                )
                .with_context("node", node)
                .with_context("cause", err.info().code.clone())
            })?
        } else {
            *node
        };
        let psp = trace.psp(app)?;
        let args = masked_args(trace, scaffold, app)?;
        let term = if scaffold.has_lkernel(app) {
            scaffold.lkernel(app).weight_bound(psp.as_ref(), &args)?
        } else {
            let value = trace.value_at(app).ok_or_else(|| {
                InferError::invariant("bound-inactive", "border node has no value")
                    .with_context("node", app)
            })?;
            psp.log_density_bound(value, &args)?
        };
        bound += term;
    }
    Ok(bound)
}

impl Operator for RejectionOperator {
    fn name(&self) -> &'static str {
        "rejection"
    }

    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError> {
        let bound = compute_rejection_bound(trace, scaffold, scaffold.stage(0))?;
        self.state.prepare(trace, scaffold, false)?;
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            let weight = match regen_and_attach(
                trace,
                scaffold.stage(0),
                scaffold,
                false,
                &OmegaDB::new(),
                None,
                rng,
            ) {
                Ok(weight) => weight,
                Err(err) if err.is_recoverable() => {
                    trace!(error = %err, attempts, "draw failed, retrying");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if rng.uniform() < (weight - bound).exp() {
                debug!(bound, weight, attempts, "rejection sampler accepted");
                self.last = Some(RejectionStats {
                    bound,
                    accepted_weight: weight,
                    attempts,
                });
                self.state.mark_attached();
                return Ok(0.0);
            }
            detach_and_extract(trace, scaffold.stage(0), scaffold, false)?;
        }
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
