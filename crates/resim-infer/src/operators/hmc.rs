use resim_core::{InferError, RngHandle, Value};
use resim_trace::{detach_and_extract, regen_and_attach, ConcreteTrace, OmegaDB, Scaffold};
use tracing::{debug, trace};

use super::{InPlace, Operator};

/// Hamiltonian Monte Carlo over continuous principal choices.
///
/// Gradients of the potential come from a regeneration at pinned positions
/// followed by a gradient-collecting detach. Only single-stage scaffolds are
/// supported.
///
/// `rho` and `xi` are log weights, so the potential is their negation and
/// the log acceptance is `(K0 - K1) + (xi - rho)`.
#[derive(Debug)]
pub struct HmcOperator {
    epsilon: f64,
    num_steps: usize,
    state: InPlace,
}

impl HmcOperator {
    /// Creates the operator with leapfrog step `epsilon` and `num_steps` steps.
    pub fn new(epsilon: f64, num_steps: usize) -> Self {
        Self {
            epsilon,
            num_steps,
            state: InPlace::default(),
        }
    }

    /// Leapfrog step size.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of leapfrog steps.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Integrates from `(q, p)`; returns the final position and the kinetic
    /// energy of the negated final momentum, or `None` when a position is
    /// outside the model's support.
    fn evolve(
        &self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        start_q: Vec<f64>,
        start_grad: Vec<f64>,
        start_p: Vec<f64>,
        rng: &mut RngHandle,
    ) -> Result<Option<(Vec<f64>, f64)>, InferError> {
        let eps = self.epsilon;
        let mut q = start_q;
        let mut p: Vec<f64> = start_p
            .iter()
            .zip(&start_grad)
            .map(|(p, g)| p - g * (eps / 2.0))
            .collect();
        for step in 0..self.num_steps {
            for (q, p) in q.iter_mut().zip(&p) {
                *q += eps * p;
            }
            if step + 1 < self.num_steps {
                let Some(grad) = potential_gradient(trace, scaffold, &q, rng)? else {
                    return Ok(None);
                };
                for (p, g) in p.iter_mut().zip(&grad) {
                    *p -= eps * g;
                }
            }
        }
        let Some(grad) = potential_gradient(trace, scaffold, &q, rng)? else {
            return Ok(None);
        };
        for (p, g) in p.iter_mut().zip(&grad) {
            *p -= g * (eps / 2.0);
        }
        let negated: Vec<f64> = p.iter().map(|p| -p).collect();
        Ok(Some((q, kinetic(&negated))))
    }
}

impl Default for HmcOperator {
    fn default() -> Self {
        Self::new(0.01, 20)
    }
}

fn kinetic(momenta: &[f64]) -> f64 {
    momenta.iter().map(|p| p * p / 2.0).sum()
}

fn pin(scaffold: &mut Scaffold, q: &[f64]) -> Result<(), InferError> {
    let values: Vec<Value> = q.iter().copied().map(Value::Real).collect();
    scaffold.pin_principal(&values)
}

/// Gradient of the potential at position `q`, leaving the trace detached.
/// `None` when the position is outside the support.
fn potential_gradient(
    trace: &mut ConcreteTrace,
    scaffold: &mut Scaffold,
    q: &[f64],
    rng: &mut RngHandle,
) -> Result<Option<Vec<f64>>, InferError> {
    pin(scaffold, q)?;
    match regen_and_attach(trace, scaffold.stage(0), scaffold, false, &OmegaDB::new(), None, rng) {
        Ok(_) => {}
        Err(err) if err.is_recoverable() => {
            trace!(error = %err, "leapfrog left the support");
            return Ok(None);
        }
        Err(err) => return Err(err),
    }
    let (_, db) = detach_and_extract(trace, scaffold.stage(0), scaffold, true)?;
    Ok(Some(scaffold.principal_nodes().iter().map(|node| -db.partial(*node)).collect()))
}

fn current_position(trace: &ConcreteTrace, scaffold: &Scaffold) -> Result<Vec<f64>, InferError> {
    scaffold
        .principal_nodes()
        .iter()
        .map(|node| match trace.value_at(*node) {
            Some(Value::Real(x)) => Ok(*x),
            _ => Err(InferError::config(
                "hmc-continuous",
                "HMC requires real-valued principal choices",
            )
            .with_context("node", node)),
        })
        .collect()
}

impl Operator for HmcOperator {
    fn name(&self) -> &'static str {
        "hmc"
    }

    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError> {
        if scaffold.num_stages() != 1 {
            return Err(InferError::config("hmc-single-stage", "HMC requires a single-stage scaffold")
                .with_context("stages", scaffold.num_stages()));
        }
        let start_q = current_position(trace, scaffold)?;
        pin(scaffold, &start_q)?;
        let rho = self.state.prepare(trace, scaffold, true)?;
        let rho_db = self.state.rho_db()?;
        let start_grad: Vec<f64> = scaffold
            .principal_nodes()
            .iter()
            .map(|node| -rho_db.partial(*node))
            .collect();

        let momenta: Vec<f64> = start_q.iter().map(|_| rng.standard_normal()).collect();
        let start_k = kinetic(&momenta);
        let Some((q, end_k)) = self.evolve(trace, scaffold, start_q, start_grad, momenta, rng)? else {
            return Ok(f64::NEG_INFINITY);
        };

        pin(scaffold, &q)?;
        let Some(xi) = self.state.regenerate(trace, scaffold, rng)? else {
            return Ok(f64::NEG_INFINITY);
        };
        let alpha = (start_k - end_k) + (xi - rho);
        debug!(dims = q.len(), start_k, end_k, rho, xi, alpha, "trajectory integrated");
        Ok(alpha)
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
