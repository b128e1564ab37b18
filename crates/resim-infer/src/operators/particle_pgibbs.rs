use resim_core::{exclude_chosen_log_ratio, InferError, RngHandle};
use resim_trace::{
    assert_torus, assert_whole, detach_and_extract, regen_and_attach, ConcreteTrace, OmegaDB,
    Overlay, Particle, Scaffold,
};
use tracing::{debug, trace};

use super::Operator;

/// Conditional SMC over the ordered stages of a scaffold using copy-on-write particles.
///
/// Every particle is a branch of the detached trace, so ancestry is carried
/// by the branches themselves. The reference particle replays the detached
/// assignment and must reproduce its detach weights exactly.
#[derive(Debug)]
pub struct ParticlePGibbsOperator {
    particles: usize,
    chosen: Option<Overlay>,
    reference: Option<Overlay>,
}

impl ParticlePGibbsOperator {
    /// Creates the operator with `particles` proposal particles.
    pub fn new(particles: usize) -> Result<Self, InferError> {
        if particles == 0 {
            return Err(InferError::config("pgibbs-particles", "at least one particle is required")
                .with_context("particles", particles));
        }
        Ok(Self {
            particles,
            chosen: None,
            reference: None,
        })
    }

    /// Number of proposal particles.
    pub fn particles(&self) -> usize {
        self.particles
    }
}

fn check_reference(stage: usize, replayed: f64, detached: f64) -> Result<(), InferError> {
    if replayed.to_bits() != detached.to_bits() {
        return Err(InferError::invariant(
            "reference-weight-mismatch",
            "replaying the reference path changed its weight",
        )
        .with_context("stage", stage)
        .with_context("replayed", replayed)
        .with_context("detached", detached));
    }
    Ok(())
}

fn extend(
    particle: &mut Particle<'_>,
    scaffold: &Scaffold,
    stage: usize,
    rng: &mut RngHandle,
) -> Result<f64, InferError> {
    match regen_and_attach(particle, scaffold.stage(stage), scaffold, false, &OmegaDB::new(), None, rng) {
        Ok(weight) => Ok(weight),
        Err(err) if err.is_recoverable() => {
            trace!(stage, error = %err, "particle extension impossible");
            Ok(f64::NEG_INFINITY)
        }
        Err(err) => Err(err),
    }
}

impl Operator for ParticlePGibbsOperator {
    fn name(&self) -> &'static str {
        "func-pgibbs"
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
        let mut rho_weights = vec![0.0; stages];
        let mut rho_dbs = vec![OmegaDB::new(); stages];
        for stage in (0..stages).rev() {
            let (weight, db) = detach_and_extract(trace, scaffold.stage(stage), scaffold, false)?;
            rho_weights[stage] = weight;
            rho_dbs[stage] = db;
        }
        assert_torus(trace, scaffold)?;

        let base: &ConcreteTrace = trace;
        let scaffold: &Scaffold = scaffold;
        let mut particles: Vec<Particle<'_>> = Vec::with_capacity(count + 1);
        let mut weights = Vec::with_capacity(count + 1);
        for _ in 0..count {
            let mut particle = Particle::new(base);
            weights.push(extend(&mut particle, scaffold, 0, rng)?);
            particles.push(particle);
        }
        let mut reference = Particle::new(base);
        let replayed = regen_and_attach(&mut reference, scaffold.stage(0), scaffold, true, &rho_dbs[0], None, rng)?;
        check_reference(0, replayed, rho_weights[0])?;
        particles.push(reference);
        weights.push(replayed);

        for stage in 1..stages {
            let mut next_particles = Vec::with_capacity(count + 1);
            let mut next_weights = Vec::with_capacity(count + 1);
            for _ in 0..count {
                let parent = rng.log_categorical(&weights).unwrap_or(count);
                let mut particle = particles[parent].branch();
                next_weights.push(extend(&mut particle, scaffold, stage, rng)?);
                next_particles.push(particle);
            }
            let mut reference = particles[count].branch();
            let replayed = regen_and_attach(
                &mut reference,
                scaffold.stage(stage),
                scaffold,
                true,
                &rho_dbs[stage],
                None,
                rng,
            )?;
            check_reference(stage, replayed, rho_weights[stage])?;
            next_particles.push(reference);
            next_weights.push(replayed);
            particles = next_particles;
            weights = next_weights;
            trace!(stage, "particles extended");
        }

        let chosen = rng.log_categorical(&weights[..count]);
        let reference = particles.pop().map(Particle::into_overlay);
        self.reference = reference;
        let Some(chosen) = chosen else {
            debug!(particles = count, "every particle has zero weight");
            self.chosen = None;
            return Ok(f64::NEG_INFINITY);
        };
        self.chosen = Some(particles.swap_remove(chosen).into_overlay());
        let alpha = exclude_chosen_log_ratio(&weights[..count], chosen, Some(weights[count]));
        debug!(particles = count, stages, chosen, alpha, "particle drawn");
        Ok(alpha)
    }

    fn accept(&mut self, trace: &mut ConcreteTrace, scaffold: &mut Scaffold) -> Result<(), InferError> {
        self.reference = None;
        let overlay = self
            .chosen
            .take()
            .ok_or_else(|| InferError::invariant("no-pending-proposal", "no particle was drawn"))?;
        trace.commit(overlay, scaffold);
        assert_whole(trace, scaffold)
    }

    fn reject(
        &mut self,
        trace: &mut ConcreteTrace,
        scaffold: &mut Scaffold,
        _rng: &mut RngHandle,
    ) -> Result<(), InferError> {
        self.chosen = None;
        let overlay = self
            .reference
            .take()
            .ok_or_else(|| InferError::invariant("no-pending-proposal", "operator was not prepared"))?;
        trace.commit(overlay, scaffold);
        assert_whole(trace, scaffold)
    }
}
