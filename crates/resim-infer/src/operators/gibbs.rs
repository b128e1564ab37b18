use resim_core::{exclude_chosen_log_ratio, InferError, RngHandle, Value};
use resim_trace::{
    assert_whole, regen_and_attach, ConcreteTrace, OmegaDB, Overlay, Particle, Scaffold,
    TraceStore,
};
use tracing::{debug, trace};

use super::{InPlace, Operator};

#[derive(Debug, Default)]
enum Outcome {
    #[default]
    Idle,
    /// No alternative existed; the trace already holds its old values.
    Restored,
    /// A candidate was drawn and waits in its overlay.
    Drawn(Overlay),
    /// Every candidate was impossible; the trace is still detached.
    Pending,
}

/// Exact Gibbs step over principal choices with finite support.
///
/// Every joint assignment of the principal nodes other than the current one
/// is scored in its own particle; the new assignment is drawn in proportion
/// to those weights.
#[derive(Debug, Default)]
pub struct EnumerativeGibbsOperator {
    state: InPlace,
    outcome: Outcome,
}

impl EnumerativeGibbsOperator {
    /// Creates the operator.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Every combination taking one value from each of `supports`, in row-major order.
pub(crate) fn cartesian_product(supports: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = vec![Vec::new()];
    for support in supports {
        rows = rows
            .iter()
            .flat_map(|row| {
                support.iter().map(move |value| {
                    let mut next = row.clone();
                    next.push(value.clone());
                    next
                })
            })
            .collect();
    }
    rows
}

fn enumerate_principal(
    trace: &ConcreteTrace,
    scaffold: &Scaffold,
) -> Result<(Vec<Value>, Vec<Vec<Value>>), InferError> {
    let mut current = Vec::new();
    let mut supports = Vec::new();
    for node in scaffold.principal_nodes() {
        let psp = trace.psp(*node)?;
        if !psp.can_enumerate() {
            return Err(InferError::config(
                "gibbs-not-enumerable",
                "enumerative Gibbs requires principal choices with finite support",
            )
            .with_context("node", node)
            .with_context("psp", psp.name()));
        }
        supports.push(psp.enumerate_values(&trace.args(*node)?)?);
        current.push(trace.value_at(*node).cloned().ok_or_else(|| {
            InferError::invariant("gibbs-inactive", "principal node has no value")
                .with_context("node", node)
        })?);
    }
    Ok((current, supports))
}

impl Operator for EnumerativeGibbsOperator {
    fn name(&self) -> &'static str {
        "gibbs"
    }

    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError> {
        let (current, supports) = enumerate_principal(trace, scaffold)?;
        let candidates: Vec<Vec<Value>> = cartesian_product(&supports)
            .into_iter()
            .filter(|candidate| *candidate != current)
            .collect();

        scaffold.pin_principal(&current)?;
        let rho = self.state.prepare(trace, scaffold, false)?;

        if candidates.is_empty() {
            let db = self.state.rho_db()?.clone();
            regen_and_attach(trace, scaffold.stage(0), scaffold, true, &db, None, rng)?;
            self.state.finish();
            self.outcome = Outcome::Restored;
            debug!("no alternative assignment, state restored");
            return Ok(0.0);
        }

        let mut weights = Vec::with_capacity(candidates.len());
        let mut overlays = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            scaffold.pin_principal(candidate)?;
            let mut particle = Particle::new(&*trace);
            let empty = OmegaDB::new();
            match regen_and_attach(&mut particle, scaffold.stage(0), scaffold, false, &empty, None, rng) {
                Ok(weight) => {
                    weights.push(weight);
                    overlays.push(Some(particle.into_overlay()));
                }
                Err(err) if err.is_recoverable() => {
                    trace!(error = %err, "candidate assignment impossible");
                    weights.push(f64::NEG_INFINITY);
                    overlays.push(None);
                }
                Err(err) => return Err(err),
            }
        }

        let Some(chosen) = rng.log_categorical(&weights) else {
            debug!(candidates = candidates.len(), "every candidate has zero weight");
            self.outcome = Outcome::Pending;
            return Ok(f64::NEG_INFINITY);
        };
        let overlay = overlays.swap_remove(chosen).ok_or_else(|| {
            InferError::invariant("gibbs-impossible-draw", "drew a candidate with zero weight")
        })?;
        let alpha = exclude_chosen_log_ratio(&weights, chosen, Some(rho));
        trace!(candidates = candidates.len(), chosen, alpha, "candidate drawn");
        self.outcome = Outcome::Drawn(overlay);
        Ok(alpha)
    }

    fn accept(&mut self, trace: &mut ConcreteTrace, scaffold: &mut Scaffold) -> Result<(), InferError> {
        match std::mem::take(&mut self.outcome) {
            Outcome::Restored => Ok(()),
            Outcome::Drawn(overlay) => {
                trace.commit(overlay, scaffold);
                assert_whole(trace, scaffold)?;
                self.state.finish();
                Ok(())
            }
            Outcome::Idle | Outcome::Pending => Err(InferError::invariant(
                "gibbs-nothing-to-accept",
                "no drawn assignment is pending",
            )),
        }
    }

    fn reject(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        match std::mem::take(&mut self.outcome) {
            Outcome::Restored => Ok(()),
            Outcome::Drawn(_) | Outcome::Pending => self.state.restore(trace, scaffold, rng),
            Outcome::Idle => Err(InferError::invariant(
                "gibbs-nothing-to-reject",
                "operator was not prepared",
            )),
        }
    }
}
