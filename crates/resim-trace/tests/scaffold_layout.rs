
use std::collections::BTreeSet;

use resim_core::{InferError, NodeId, RngHandle};
use resim_trace::{builtins, construct_scaffold, ConcreteTrace, NodeRole};

fn set(nodes: &[NodeId]) -> BTreeSet<NodeId> {
    nodes.iter().copied().collect()
}

#[test]
fn observation_child_absorbs() {
    let model = fixtures::normal_normal(0.3, 1.0);
    let scaffold = construct_scaffold(&model.trace, vec![set(&[model.mu])]).unwrap();
    assert_eq!(scaffold.role(model.mu), Some(NodeRole::Resampling));
    assert_eq!(scaffold.role(model.y), Some(NodeRole::Absorbing));
    assert_eq!(scaffold.border(), &[vec![model.y]]);
    assert_eq!(scaffold.regen_total(model.mu), 1);
    assert_eq!(scaffold.principal_nodes(), &[model.mu]);
}

#[test]
fn deterministic_descendants_are_regenerated_with_operand_multiplicity() {
    let mut rng = RngHandle::from_seed(3);
    let mut trace = ConcreteTrace::new();
    let zero = trace.constant(0.0);
    let one = trace.constant(1.0);
    let x = trace.apply(builtins::normal(), &[zero, one], &mut rng).unwrap();
    let doubled = trace.apply(builtins::add(), &[x, x], &mut rng).unwrap();
    let y = trace.apply(builtins::normal(), &[doubled, one], &mut rng).unwrap();
    trace.observe(y, 0.5).unwrap();

    let scaffold = construct_scaffold(&trace, vec![set(&[x])]).unwrap();
    assert_eq!(scaffold.role(doubled), Some(NodeRole::Resampling));
    assert_eq!(scaffold.role(y), Some(NodeRole::Absorbing));
    assert_eq!(scaffold.role(zero), None);
    assert_eq!(scaffold.regen_total(x), 2);
    assert_eq!(scaffold.regen_total(doubled), 1);
    assert_eq!(scaffold.border(), &[vec![y]]);
}

#[test]
fn childless_principal_sits_on_the_border() {
    let mut rng = RngHandle::from_seed(5);
    let mut trace = ConcreteTrace::new();
    let zero = trace.constant(0.0);
    let one = trace.constant(1.0);
    let x = trace.apply(builtins::normal(), &[zero, one], &mut rng).unwrap();
    let scaffold = construct_scaffold(&trace, vec![set(&[x])]).unwrap();
    assert_eq!(scaffold.border(), &[vec![x]]);
    assert_eq!(scaffold.regen_total(x), 1);
}

#[test]
fn ordered_sets_split_the_border_into_stages() {
    let chain = fixtures::binary_chain(&[0.9, 0.1, 1.2], 7);
    let sets = chain.trace.ordered_sets_in_scope("time").unwrap();
    let scaffold = construct_scaffold(&chain.trace, sets).unwrap();
    assert_eq!(scaffold.num_stages(), 3);
    for (stage, obs) in chain.observations.iter().enumerate() {
        assert_eq!(scaffold.stage(stage), &[*obs]);
    }
    assert_eq!(scaffold.regen_total(chain.states[0]), 2);
    assert_eq!(scaffold.regen_total(chain.states[2]), 1);
    assert!(scaffold.stage(3).is_empty());
}

#[test]
fn empty_set_list_yields_one_empty_stage() {
    let model = fixtures::normal_normal(0.0, 0.0);
    let scaffold = construct_scaffold(&model.trace, Vec::new()).unwrap();
    assert_eq!(scaffold.num_stages(), 1);
    assert!(scaffold.stage(0).is_empty());
}

#[test]
fn constrained_principal_is_rejected() {
    let model = fixtures::normal_normal(0.0, 1.0);
    let err = construct_scaffold(&model.trace, vec![set(&[model.y])]).unwrap_err();
    assert!(matches!(err, InferError::Config(ref info) if info.code == "bad-principal"));
}

#[test]
fn selection_trails_serialize_compactly() {
    use resim_trace::Pick;

    let trail = vec![Pick::Block(2i64.into()), Pick::Node(NodeId::from_raw(5))];
    let json = serde_json::to_string(&trail).unwrap();
    assert_eq!(json, r#"[{"block":2},{"node":5}]"#);
    let back: Vec<Pick> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, trail);
    assert_eq!(serde_json::to_string(&NodeRole::Aaa).unwrap(), r#""aaa""#);
}
