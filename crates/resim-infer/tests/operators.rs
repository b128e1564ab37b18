
use std::f64::consts::PI;

use resim_core::{InferError, RngHandle, Value};
use resim_infer::operators::compute_rejection_bound;
use resim_infer::{
    mix_mh, BlockSelector, BlockSpec, EnumerativeGibbsOperator, HmcOperator, MeanfieldOperator,
    Operator, RejectionOperator, Selector,
};
use resim_trace::{builtins, ConcreteTrace};

fn default_one() -> BlockSelector {
    BlockSelector::new("default", BlockSpec::One).unwrap()
}

#[test]
fn rejection_weights_never_exceed_the_bound() {
    let mut model = fixtures::normal_normal(0.2, 0.7);
    let selector = default_one();
    let mut operator = RejectionOperator::new();
    let mut rng = RngHandle::from_seed(21);
    let peak = -0.5 * (2.0 * PI).ln();
    for _ in 0..300 {
        assert!(mix_mh(&mut model.trace, &selector, &mut operator, &mut rng).unwrap());
        let stats = operator.last_stats().unwrap();
        assert!((stats.bound - peak).abs() < 1e-12);
        assert!(stats.accepted_weight <= stats.bound);
        assert!(stats.attempts >= 1);
    }
}

#[test]
fn rejection_bound_is_computed_on_the_whole_trace() {
    let model = fixtures::normal_normal(0.2, 0.7);
    let mut rng = RngHandle::from_seed(22);
    let scaffold = default_one().sample_index(&model.trace, &mut rng).unwrap();
    let bound = compute_rejection_bound(&model.trace, &scaffold, scaffold.stage(0)).unwrap();
    assert!((bound + 0.5 * (2.0 * PI).ln()).abs() < 1e-12);
}

#[test]
fn unbounded_models_refuse_rejection_sampling() {
    let mut trace = ConcreteTrace::new();
    let zero = trace.constant(0.0);
    let one = trace.constant(1.0);
    let lo = trace.constant(0.5);
    let hi = trace.constant(2.0);
    let m = trace.apply_with_value(builtins::normal(), &[zero, one], 0.1).unwrap();
    let s = trace
        .apply_with_value(builtins::uniform_continuous(), &[lo, hi], 1.0)
        .unwrap();
    let y = trace.apply_with_value(builtins::normal(), &[m, s], 0.3).unwrap();
    trace.observe(y, 0.3).unwrap();

    let selector = BlockSelector::new("default", BlockSpec::All).unwrap();
    let mut operator = RejectionOperator::new();
    let mut rng = RngHandle::from_seed(23);
    let err = mix_mh(&mut trace, &selector, &mut operator, &mut rng).unwrap_err();
    assert!(matches!(err, InferError::NoStaticBound(_)), "{err}");
    assert!(trace.is_whole());
    assert_eq!(trace.value_at(m), Some(&Value::Real(0.1)));
}

#[test]
fn hmc_parameters_default_and_override() {
    let operator = HmcOperator::default();
    assert_eq!(operator.epsilon(), 0.01);
    assert_eq!(operator.num_steps(), 20);
    let operator = HmcOperator::new(0.2, 5);
    assert_eq!(operator.epsilon(), 0.2);
    assert_eq!(operator.num_steps(), 5);
}

#[test]
fn hmc_without_motion_is_the_identity() {
    let mut model = fixtures::normal_normal(0.4, 1.0);
    let mut rng = RngHandle::from_seed(24);
    let mut operator = HmcOperator::new(0.0, 0);
    for _ in 0..5 {
        let mut scaffold = default_one().sample_index(&model.trace, &mut rng).unwrap();
        let alpha = operator.propose(&mut model.trace, &mut scaffold, &mut rng).unwrap();
        assert_eq!(alpha, 0.0);
        operator.accept(&mut model.trace, &mut scaffold).unwrap();
        assert!(model.trace.is_whole());
        assert_eq!(fixtures::real_at(&model.trace, model.mu), 0.4);
    }
}

#[test]
fn hmc_rejection_restores_the_start() {
    let mut model = fixtures::normal_normal(-0.8, 1.0);
    let mut rng = RngHandle::from_seed(25);
    let mut operator = HmcOperator::new(0.2, 4);
    let mut scaffold = default_one().sample_index(&model.trace, &mut rng).unwrap();
    let alpha = operator.propose(&mut model.trace, &mut scaffold, &mut rng).unwrap();
    assert!(alpha.is_finite());
    assert_ne!(fixtures::real_at(&model.trace, model.mu), -0.8);
    operator.reject(&mut model.trace, &mut scaffold, &mut rng).unwrap();
    assert!(model.trace.is_whole());
    assert_eq!(fixtures::real_at(&model.trace, model.mu), -0.8);
}

#[test]
fn hmc_samples_the_normal_normal_posterior() {
    let mut model = fixtures::normal_normal(0.0, 1.0);
    let selector = default_one();
    let mut operator = HmcOperator::new(0.3, 5);
    let mu = model.mu;
    let mut samples = Vec::new();
    let accepted = fixtures::run_chain(&mut model.trace, &selector, &mut operator, 3000, 26, |trace| {
        samples.push(fixtures::real_at(trace, mu));
    });
    assert!(accepted > 2500);
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    assert!((mean - 0.5).abs() < 0.07, "mean {mean}");
    assert!((var - 0.5).abs() < 0.1, "variance {var}");
}

#[test]
fn hmc_refuses_discrete_choices() {
    let mut model = fixtures::two_outcome(1.0);
    let mut rng = RngHandle::from_seed(27);
    let mut operator = HmcOperator::default();
    let mut scaffold = default_one().sample_index(&model.trace, &mut rng).unwrap();
    let err = operator.propose(&mut model.trace, &mut scaffold, &mut rng).unwrap_err();
    assert_eq!(err.info().code, "hmc-continuous");
    assert!(model.trace.is_whole());
}

#[test]
fn meanfield_samples_the_normal_normal_posterior() {
    let mut model = fixtures::normal_normal(0.0, 1.0);
    let selector = default_one();
    let mut operator = MeanfieldOperator::new(10, 0.01);
    let mu = model.mu;
    let mut total = 0.0;
    let steps = 3000;
    fixtures::run_chain(&mut model.trace, &selector, &mut operator, steps, 28, |trace| {
        total += fixtures::real_at(trace, mu);
    });
    assert!(!operator.delegated());
    assert!((total / steps as f64 - 0.5).abs() < 0.08);
}

#[test]
fn meanfield_delegates_without_variational_families() {
    let mut trace = ConcreteTrace::new();
    let coin = trace.apply_with_value(builtins::flip(), &[], true).unwrap();
    let selector = default_one();
    let mut operator = MeanfieldOperator::default();
    let mut rng = RngHandle::from_seed(29);
    for _ in 0..20 {
        mix_mh(&mut trace, &selector, &mut operator, &mut rng).unwrap();
        assert!(operator.delegated());
        assert!(trace.is_whole());
    }
    assert!(matches!(trace.value_at(coin), Some(Value::Bool(_))));
}

#[test]
fn gibbs_with_only_impossible_alternatives_keeps_the_state() {
    let mut trace = ConcreteTrace::new();
    let lo = trace.constant(0i64);
    let hi = trace.constant(3i64);
    let width = trace.constant(1i64);
    let x = trace
        .apply_with_value(builtins::uniform_discrete(), &[lo, hi], 0i64)
        .unwrap();
    let top = trace
        .apply_with_value(builtins::add(), &[x, width], 1i64)
        .unwrap();
    let y = trace
        .apply_with_value(builtins::uniform_continuous(), &[x, top], 0.5)
        .unwrap();
    trace.observe(y, 0.5).unwrap();

    let selector = default_one();
    let mut rng = RngHandle::from_seed(30);
    let mut operator = EnumerativeGibbsOperator::new();
    let mut scaffold = selector.sample_index(&trace, &mut rng).unwrap();
    let alpha = operator.propose(&mut trace, &mut scaffold, &mut rng).unwrap();
    assert_eq!(alpha, f64::NEG_INFINITY);
    operator.reject(&mut trace, &mut scaffold, &mut rng).unwrap();
    assert!(trace.is_whole());
    assert_eq!(fixtures::int_at(&trace, x), 0);

    for _ in 0..10 {
        assert!(!mix_mh(&mut trace, &selector, &mut operator, &mut rng).unwrap());
    }
    assert_eq!(fixtures::int_at(&trace, x), 0);
}

#[test]
fn gibbs_without_alternatives_restores_in_place() {
    let mut trace = ConcreteTrace::new();
    let lo = trace.constant(2i64);
    let hi = trace.constant(3i64);
    let one = trace.constant(1.0);
    let x = trace
        .apply_with_value(builtins::uniform_discrete(), &[lo, hi], 2i64)
        .unwrap();
    let y = trace.apply_with_value(builtins::normal(), &[x, one], 2.5).unwrap();
    trace.observe(y, 2.5).unwrap();

    let mut rng = RngHandle::from_seed(31);
    let mut operator = EnumerativeGibbsOperator::new();
    let mut scaffold = default_one().sample_index(&trace, &mut rng).unwrap();
    let alpha = operator.propose(&mut trace, &mut scaffold, &mut rng).unwrap();
    assert_eq!(alpha, 0.0);
    assert!(trace.is_whole());
    operator.accept(&mut trace, &mut scaffold).unwrap();
    assert_eq!(fixtures::int_at(&trace, x), 2);
}

#[test]
fn gibbs_refuses_continuous_choices() {
    let mut model = fixtures::normal_normal(0.0, 1.0);
    let mut rng = RngHandle::from_seed(32);
    let err = mix_mh(&mut model.trace, &default_one(), &mut EnumerativeGibbsOperator::new(), &mut rng)
        .unwrap_err();
    assert_eq!(err.info().code, "gibbs-not-enumerable");
    assert!(model.trace.is_whole());
}
