
use resim_infer::{
    BlockSelector, BlockSpec, EnumerativeGibbsOperator, MhOperator, Operator, PGibbsOperator,
    ParticlePGibbsOperator, RejectionOperator,
};

const OBSERVED: f64 = 1.5;
const STEPS: usize = 4000;

fn two_outcome_frequency(operator: &mut dyn Operator, seed: u64) -> f64 {
    let mut model = fixtures::two_outcome(OBSERVED);
    let selector = BlockSelector::new("default", BlockSpec::One).unwrap();
    let x = model.x;
    let mut ones = 0usize;
    fixtures::run_chain(&mut model.trace, &selector, operator, STEPS, seed, |trace| {
        ones += fixtures::int_at(trace, x) as usize;
    });
    ones as f64 / STEPS as f64
}

fn assert_close(estimate: f64, exact: f64, tolerance: f64) {
    assert!(
        (estimate - exact).abs() < tolerance,
        "estimate {estimate} is not within {tolerance} of {exact}"
    );
}

#[test]
fn resimulation_mh_matches_two_outcome_posterior() {
    let exact = fixtures::two_outcome_posterior(OBSERVED);
    assert_close(two_outcome_frequency(&mut MhOperator::new(), 1), exact, 0.05);
}

#[test]
fn enumerative_gibbs_matches_two_outcome_posterior() {
    let exact = fixtures::two_outcome_posterior(OBSERVED);
    assert_close(two_outcome_frequency(&mut EnumerativeGibbsOperator::new(), 2), exact, 0.05);
}

#[test]
fn rejection_matches_two_outcome_posterior() {
    let exact = fixtures::two_outcome_posterior(OBSERVED);
    assert_close(two_outcome_frequency(&mut RejectionOperator::new(), 3), exact, 0.04);
}

#[test]
fn pgibbs_matches_two_outcome_posterior() {
    let exact = fixtures::two_outcome_posterior(OBSERVED);
    assert_close(two_outcome_frequency(&mut PGibbsOperator::new(3).unwrap(), 4), exact, 0.05);
}

#[test]
fn particle_pgibbs_matches_two_outcome_posterior() {
    let exact = fixtures::two_outcome_posterior(OBSERVED);
    let mut operator = ParticlePGibbsOperator::new(3).unwrap();
    assert_close(two_outcome_frequency(&mut operator, 5), exact, 0.05);
}

#[test]
fn balanced_evidence_gives_even_odds() {
    assert_close(fixtures::two_outcome_posterior(0.5), 0.5, 1e-12);
    let mut model = fixtures::two_outcome(0.5);
    let selector = BlockSelector::new("default", BlockSpec::One).unwrap();
    let x = model.x;
    let mut ones = 0usize;
    let mut operator = MhOperator::new();
    fixtures::run_chain(&mut model.trace, &selector, &mut operator, STEPS, 6, |trace| {
        ones += fixtures::int_at(trace, x) as usize;
    });
    assert_close(ones as f64 / STEPS as f64, 0.5, 0.05);
}

fn chain_marginals(operator: &mut dyn Operator, observed: &[f64], steps: usize, seed: u64) -> Vec<f64> {
    chain_marginals_with(operator, BlockSpec::Ordered, observed, steps, seed)
}

fn chain_marginals_with(
    operator: &mut dyn Operator,
    block: BlockSpec,
    observed: &[f64],
    steps: usize,
    seed: u64,
) -> Vec<f64> {
    let mut chain = fixtures::binary_chain(observed, seed);
    let selector = BlockSelector::new("time", block).unwrap();
    let states = chain.states.clone();
    let mut ones = vec![0usize; states.len()];
    fixtures::run_chain(&mut chain.trace, &selector, operator, steps, seed + 100, |trace| {
        for (count, node) in ones.iter_mut().zip(&states) {
            *count += fixtures::int_at(trace, *node) as usize;
        }
    });
    ones.into_iter().map(|count| count as f64 / steps as f64).collect()
}

#[test]
fn pgibbs_recovers_chain_marginals() {
    let observed = [1.2, -0.3, 0.9];
    let exact = fixtures::binary_chain_marginals(&observed);
    let mut operator = PGibbsOperator::new(4).unwrap();
    let estimate = chain_marginals(&mut operator, &observed, 3000, 7);
    for (estimate, exact) in estimate.iter().zip(&exact) {
        assert_close(*estimate, *exact, 0.06);
    }
}

#[test]
fn particle_pgibbs_recovers_chain_marginals() {
    let observed = [0.1, 1.4, 1.1];
    let exact = fixtures::binary_chain_marginals(&observed);
    let mut operator = ParticlePGibbsOperator::new(4).unwrap();
    let estimate = chain_marginals(&mut operator, &observed, 3000, 8);
    for (estimate, exact) in estimate.iter().zip(&exact) {
        assert_close(*estimate, *exact, 0.06);
    }
}

#[test]
fn pgibbs_moves_the_chain() {
    let mut chain = fixtures::binary_chain(&[0.4, 0.8], 9);
    let selector = BlockSelector::new("time", BlockSpec::Ordered).unwrap();
    let mut operator = PGibbsOperator::new(2).unwrap();
    let accepted = fixtures::run_chain(&mut chain.trace, &selector, &mut operator, 200, 10, |_| {});
    assert!(accepted > 0);
}

#[test]
fn joint_gibbs_over_all_blocks_recovers_chain_marginals() {
    let observed = [1.2, -0.3, 0.9];
    let exact = fixtures::binary_chain_marginals(&observed);
    let mut operator = EnumerativeGibbsOperator::new();
    let estimate = chain_marginals_with(&mut operator, BlockSpec::All, &observed, 3000, 11);
    for (estimate, exact) in estimate.iter().zip(&exact) {
        assert_close(*estimate, *exact, 0.06);
    }
}

#[test]
fn single_particle_pgibbs_recovers_chain_marginals() {
    let observed = [1.2, -0.3, 0.9];
    let exact = fixtures::binary_chain_marginals(&observed);
    let mut operator = PGibbsOperator::new(1).unwrap();
    assert_eq!(operator.particles(), 1);
    let estimate = chain_marginals(&mut operator, &observed, 4000, 12);
    for (estimate, exact) in estimate.iter().zip(&exact) {
        assert_close(*estimate, *exact, 0.07);
    }
}

#[test]
fn single_particle_particle_pgibbs_recovers_chain_marginals() {
    let observed = [1.2, -0.3, 0.9];
    let exact = fixtures::binary_chain_marginals(&observed);
    let mut operator = ParticlePGibbsOperator::new(1).unwrap();
    assert_eq!(operator.particles(), 1);
    let estimate = chain_marginals(&mut operator, &observed, 4000, 13);
    for (estimate, exact) in estimate.iter().zip(&exact) {
        assert_close(*estimate, *exact, 0.07);
    }
}
