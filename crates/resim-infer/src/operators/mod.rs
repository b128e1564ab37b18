use resim_core::{InferError, RngHandle};
use resim_trace::{
    assert_torus, detach_and_extract, regen_and_attach, ConcreteTrace, OmegaDB, Scaffold,
};
use tracing::debug;

mod gibbs;
mod hmc;
mod meanfield;
mod mh;
mod particle_pgibbs;
mod pgibbs;
mod rejection;

pub use gibbs::EnumerativeGibbsOperator;
pub use hmc::HmcOperator;
pub use meanfield::MeanfieldOperator;
pub use mh::MhOperator;
pub use particle_pgibbs::ParticlePGibbsOperator;
pub use pgibbs::PGibbsOperator;
pub use rejection::{compute_rejection_bound, RejectionOperator, RejectionStats};

/// A transition proposal over a scaffold.
///
/// `propose` returns the log acceptance contribution of the operator and
/// may leave the trace mid-proposal; exactly one of `accept` or `reject`
/// must follow, after which the trace is whole again.
pub trait Operator {
    /// Short name used in diagnostics and summaries.
    fn name(&self) -> &'static str;

    /// Proposes a new state for `scaffold`, returning the log acceptance ratio.
    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError>;

    /// Keeps the proposed state.
    fn accept(&mut self, trace: &mut ConcreteTrace, scaffold: &mut Scaffold) -> Result<(), InferError>;

    /// Reinstates the state held before `propose`.
    fn reject(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError>;
}

/// Shared bookkeeping of operators that mutate the trace in place.
#[derive(Debug, Default)]
pub(crate) struct InPlace {
    rho_db: Option<OmegaDB>,
    attached: bool,
}

impl InPlace {
    /// Detaches the first stage and keeps what is needed to restore it.
    pub(crate) fn prepare(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &Scaffold,
        compute_gradient: bool,
    ) -> Result<f64, InferError> {
        let (rho, db) = detach_and_extract(trace, scaffold.stage(0), scaffold, compute_gradient)?;
        assert_torus(trace, scaffold)?;
        self.rho_db = Some(db);
        self.attached = false;
        Ok(rho)
    }

    pub(crate) fn rho_db(&self) -> Result<&OmegaDB, InferError> {
        self.rho_db
            .as_ref()
            .ok_or_else(|| InferError::invariant("no-pending-proposal", "operator was not prepared"))
    }

    /// Regenerates the first stage freshly. Procedure errors leave the trace
    /// detached and yield `None`.
    pub(crate) fn regenerate(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &Scaffold,
        rng: &mut RngHandle,
    ) -> Result<Option<f64>, InferError> {
        match regen_and_attach(trace, scaffold.stage(0), scaffold, false, &OmegaDB::new(), None, rng) {
            Ok(xi) => {
                self.attached = true;
                Ok(Some(xi))
            }
            Err(err) if err.is_recoverable() => {
                debug!(error = %err, "proposal failed, rejecting");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn mark_attached(&mut self) {
        self.attached = true;
    }

    /// Drops the saved state after an accepted proposal.
    pub(crate) fn finish(&mut self) {
        self.rho_db = None;
        self.attached = false;
    }

    /// Puts back the state saved by [`InPlace::prepare`].
    pub(crate) fn restore(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        if self.attached {
            detach_and_extract(trace, scaffold.stage(0), scaffold, false)?;
        }
        assert_torus(trace, scaffold)?;
        let db = self
            .rho_db
            .take()
            .ok_or_else(|| InferError::invariant("no-pending-proposal", "operator was not prepared"))?;
        regen_and_attach(trace, scaffold.stage(0), scaffold, true, &db, None, rng)?;
        self.attached = false;
        Ok(())
    }
}
