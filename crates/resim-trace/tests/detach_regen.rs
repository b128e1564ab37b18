
use std::collections::BTreeSet;

use proptest::prelude::*;
use resim_core::{NodeId, RngHandle, Value};
use resim_trace::{
    assert_torus, assert_whole, builtins, construct_scaffold, detach_and_extract,
    regen_and_attach, ConcreteTrace, OmegaDB, TraceStore,
};

fn snapshot(trace: &ConcreteTrace) -> Vec<Option<Value>> {
    trace.node_ids().map(|node| trace.value_at(node).cloned()).collect()
}

#[test]
fn fresh_regen_weighs_the_observation() {
    let mut model = fixtures::normal_normal(0.3, 1.0);
    let scaffold = construct_scaffold(&model.trace, vec![[model.mu].into_iter().collect()]).unwrap();
    let border = scaffold.stage(0).to_vec();
    let (rho, _) = detach_and_extract(&mut model.trace, &border, &scaffold, false).unwrap();
    let expected_rho = -0.5 * (2.0 * std::f64::consts::PI).ln() - 0.5 * 0.7f64.powi(2);
    assert!((rho - expected_rho).abs() < 1e-12);
    assert_torus(&model.trace, &scaffold).unwrap();

    let mut rng = RngHandle::from_seed(11);
    let xi = regen_and_attach(&mut model.trace, &border, &scaffold, false, &OmegaDB::new(), None, &mut rng)
        .unwrap();
    assert_whole(&model.trace, &scaffold).unwrap();
    let mu = model.trace.value_at(model.mu).unwrap().as_real().unwrap();
    let expected_xi = -0.5 * (2.0 * std::f64::consts::PI).ln() - 0.5 * (1.0 - mu).powi(2);
    assert!((xi - expected_xi).abs() < 1e-12);
    assert!(model.trace.is_whole());
}

#[test]
fn failed_regeneration_rolls_back_to_the_torus() {
    let mut trace = ConcreteTrace::new();
    let lo = trace.constant(-1.0);
    let hi = trace.constant(1.0);
    let zero = trace.constant(0.0);
    let x = trace
        .apply_with_value(builtins::uniform_continuous(), &[lo, hi], 0.5)
        .unwrap();
    let z = trace.apply_with_value(builtins::normal(), &[zero, x], 0.1).unwrap();
    let scaffold = construct_scaffold(&trace, vec![[x, z].into_iter().collect()]).unwrap();
    let border = scaffold.stage(0).to_vec();
    assert_eq!(border, vec![z]);

    detach_and_extract(&mut trace, &border, &scaffold, false).unwrap();
    let mut failures = 0;
    for seed in 0..64 {
        let mut rng = RngHandle::from_seed(seed);
        match regen_and_attach(&mut trace, &border, &scaffold, false, &OmegaDB::new(), None, &mut rng) {
            Ok(_) => {
                detach_and_extract(&mut trace, &border, &scaffold, false).unwrap();
            }
            Err(err) => {
                assert!(err.is_recoverable());
                assert_torus(&trace, &scaffold).unwrap();
                failures += 1;
            }
        }
    }
    assert!(failures > 0);
    assert_eq!(trace.regen_count(&scaffold, x), 0);
}

#[test]
fn detach_accumulates_density_gradients() {
    let mut model = fixtures::normal_normal(0.3, 1.0);
    let mut scaffold =
        construct_scaffold(&model.trace, vec![[model.mu].into_iter().collect()]).unwrap();
    scaffold.pin_principal(&[Value::Real(0.3)]).unwrap();
    let border = scaffold.stage(0).to_vec();
    let (_, db) = detach_and_extract(&mut model.trace, &border, &scaffold, true).unwrap();
    let expected = -0.3 + (1.0 - 0.3);
    assert!((db.partial(model.mu) - expected).abs() < 1e-12);
}

#[test]
fn gradients_flow_through_deterministic_nodes() {
    let mut trace = ConcreteTrace::new();
    let zero = trace.constant(0.0);
    let one = trace.constant(1.0);
    let x = trace.apply_with_value(builtins::normal(), &[zero, one], 0.4).unwrap();
    let doubled = trace.apply_with_value(builtins::add(), &[x, x], 0.8).unwrap();
    let y = trace.apply_with_value(builtins::normal(), &[doubled, one], 1.5).unwrap();
    trace.observe(y, 1.5).unwrap();
    let mut scaffold = construct_scaffold(&trace, vec![[x].into_iter().collect()]).unwrap();
    scaffold.pin_principal(&[Value::Real(0.4)]).unwrap();
    let border = scaffold.stage(0).to_vec();
    let (_, db) = detach_and_extract(&mut trace, &border, &scaffold, true).unwrap();
    let expected = -0.4 + 2.0 * (1.5 - 0.8);
    assert!((db.partial(x) - expected).abs() < 1e-12);
}

proptest! {
    #[test]
    fn detach_then_restore_is_identity(len in 1usize..12, seed in 0u64..500, pick in 0usize..64) {
        let mut trace = fixtures::gaussian_chain(len, seed);
        let choices: Vec<NodeId> = trace.unconstrained_choices().into_iter().collect();
        prop_assume!(!choices.is_empty());
        let sets = vec![
            choices.iter().copied().skip(pick % choices.len()).collect::<BTreeSet<_>>(),
        ];
        let scaffold = construct_scaffold(&trace, sets).unwrap();
        let border = scaffold.stage(0).to_vec();
        let before = snapshot(&trace);

        let (rho, db) = detach_and_extract(&mut trace, &border, &scaffold, false).unwrap();
        assert_torus(&trace, &scaffold).unwrap();
        let mut rng = RngHandle::from_seed(seed);
        let restored = regen_and_attach(&mut trace, &border, &scaffold, true, &db, None, &mut rng).unwrap();

        prop_assert_eq!(restored, rho);
        prop_assert_eq!(snapshot(&trace), before);
        prop_assert!(trace.is_whole());
        assert_whole(&trace, &scaffold).unwrap();
    }
}
