use resim_core::{exclude_chosen_log_ratio, InferError, RngHandle};
use resim_trace::{
    assert_torus, assert_whole, detach_and_extract, regen_and_attach, ConcreteTrace, OmegaDB,
    Scaffold,
};
use tracing::{debug, trace};

use super::Operator;

/// Conditional SMC over the ordered stages of a scaffold, in place.
///
/// A single trace is shared by all particles. Each particle's stage is
/// simulated, weighed and detached again; its ancestry is kept as indices
/// so any particle's path can be replayed from the stored databases.
#[derive(Debug)]
pub struct PGibbsOperator {
    particles: usize,
    run: Option<Run>,
}

#[derive(Debug)]
struct Run {
    /// `dbs[t][p]` holds stage `t` of particle `p`; column `particles` is the reference.
    dbs: Vec<Vec<OmegaDB>>,
    /// `ancestors[t][p]` is the particle that stage `t` of `p` extends.
    ancestors: Vec<Vec<usize>>,
    attached: bool,
}

impl PGibbsOperator {
    /// Creates the operator with `particles` proposal particles.
    pub fn new(particles: usize) -> Result<Self, InferError> {
        if particles == 0 {
            return Err(InferError::config("pgibbs-particles", "at least one particle is required")
                .with_context("particles", particles));
        }
        Ok(Self { particles, run: None })
    }

    /// Number of proposal particles.
    pub fn particles(&self) -> usize {
        self.particles
    }
}

/// Ancestors of particle `particle` at stage `stage`, one per earlier stage.
pub(crate) fn ancestor_path(ancestors: &[Vec<usize>], stage: usize, particle: usize) -> Vec<usize> {
    let mut path = Vec::with_capacity(stage);
    if stage == 0 {
        return path;
    }
    path.push(ancestors[stage][particle]);
    for earlier in (1..stage).rev() {
        path.push(ancestors[earlier][path[path.len() - 1]]);
    }
    path.reverse();
    path
}

/// Replays stages `0..path.len()` from the databases the path selects.
fn restore_path(
    trace: &mut ConcreteTrace,
    scaffold: &Scaffold,
    dbs: &[Vec<OmegaDB>],
    path: &[usize],
    rng: &mut RngHandle,
) -> Result<(), InferError> {
    for (stage, particle) in path.iter().enumerate() {
        regen_and_attach(trace, scaffold.stage(stage), scaffold, true, &dbs[stage][*particle], None, rng)?;
    }
    Ok(())
}

/// Detaches stages `0..stages`, last first.
fn detach_rest(trace: &mut ConcreteTrace, scaffold: &Scaffold, stages: usize) -> Result<(), InferError> {
    for stage in (0..stages).rev() {
        detach_and_extract(trace, scaffold.stage(stage), scaffold, false)?;
    }
    Ok(())
}

/// Simulates stage `stage` afresh and detaches it again, returning its weight
/// and values. Impossible draws weigh negative infinity.
fn extend_stage(
    trace: &mut ConcreteTrace,
    scaffold: &Scaffold,
    stage: usize,
    rng: &mut RngHandle,
) -> Result<(f64, OmegaDB), InferError> {
    let border = scaffold.stage(stage);
    match regen_and_attach(trace, border, scaffold, false, &OmegaDB::new(), None, rng) {
        Ok(_) => detach_and_extract(trace, border, scaffold, false),
        Err(err) if err.is_recoverable() => {
            trace!(stage, error = %err, "particle extension impossible");
            Ok((f64::NEG_INFINITY, OmegaDB::new()))
        }
        Err(err) => Err(err),
    }
}

impl Operator for PGibbsOperator {
    fn name(&self) -> &'static str {
        "pgibbs"
    }

    fn propose(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<f64, InferError> {
        assert_whole(trace, scaffold)?;
        let stages = scaffold.num_stages();
        let count = self.particles;
        let mut dbs = vec![vec![OmegaDB::new(); count + 1]; stages];
        let mut ancestors = vec![vec![count; count + 1]; stages];
        let mut rho_weights = vec![0.0; stages];

        for stage in (0..stages).rev() {
            let (weight, db) = detach_and_extract(trace, scaffold.stage(stage), scaffold, false)?;
            rho_weights[stage] = weight;
            dbs[stage][count] = db;
        }
        assert_torus(trace, scaffold)?;

        let mut xi_weights = Vec::with_capacity(count);
        for particle in 0..count {
            let (weight, db) = extend_stage(trace, scaffold, 0, rng)?;
            xi_weights.push(weight);
            dbs[0][particle] = db;
        }

        for stage in 1..stages {
            let mut extended = xi_weights.clone();
            extended.push(rho_weights[stage - 1]);
            let mut next_weights = Vec::with_capacity(count);
            for particle in 0..count {
                ancestors[stage][particle] = rng.log_categorical(&extended).unwrap_or(count);
                let path = ancestor_path(&ancestors, stage, particle);
                restore_path(trace, scaffold, &dbs, &path, rng)?;
                let (weight, db) = extend_stage(trace, scaffold, stage, rng)?;
                next_weights.push(weight);
                dbs[stage][particle] = db;
                detach_rest(trace, scaffold, stage)?;
            }
            xi_weights = next_weights;
            trace!(stage, "particles extended");
        }

        let Some(chosen) = rng.log_categorical(&xi_weights) else {
            debug!(particles = count, "every particle has zero weight");
            self.run = Some(Run { dbs, ancestors, attached: false });
            return Ok(f64::NEG_INFINITY);
        };
        let mut path = ancestor_path(&ancestors, stages - 1, chosen);
        path.push(chosen);
        restore_path(trace, scaffold, &dbs, &path, rng)?;
        assert_whole(trace, scaffold)?;

        let alpha = exclude_chosen_log_ratio(&xi_weights, chosen, Some(rho_weights[stages - 1]));
        debug!(particles = count, stages, chosen, alpha, "particle path drawn");
        self.run = Some(Run { dbs, ancestors, attached: true });
        Ok(alpha)
    }

    fn accept(&mut self, trace: &mut ConcreteTrace, scaffold: &mut Scaffold) -> Result<(), InferError> {
        self.run = None;
        assert_whole(trace, scaffold)
    }

    fn reject(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        let run = self
            .run
            .take()
            .ok_or_else(|| InferError::invariant("no-pending-proposal", "operator was not prepared"))?;
        let stages = scaffold.num_stages();
        if run.attached {
            detach_rest(trace, scaffold, stages)?;
        }
        assert_torus(trace, scaffold)?;
        let mut path = ancestor_path(&run.ancestors, stages - 1, self.particles);
        path.push(self.particles);
        restore_path(trace, scaffold, &run.dbs, &path, rng)?;
        assert_whole(trace, scaffold)
    }
}
