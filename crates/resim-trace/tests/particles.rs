
use resim_core::{RngHandle, Value};
use resim_trace::{
    assert_torus, assert_whole, construct_scaffold, detach_and_extract, regen_and_attach,
    OmegaDB, Particle, TraceStore,
};

#[test]
fn regenerating_into_a_particle_leaves_the_base_untouched() {
    let mut model = fixtures::normal_normal(0.3, 1.0);
    let scaffold = construct_scaffold(&model.trace, vec![[model.mu].into_iter().collect()]).unwrap();
    let border = scaffold.stage(0).to_vec();
    detach_and_extract(&mut model.trace, &border, &scaffold, false).unwrap();

    let mut rng = RngHandle::from_seed(21);
    let mut particle = Particle::new(&model.trace);
    regen_and_attach(&mut particle, &border, &scaffold, false, &OmegaDB::new(), None, &mut rng)
        .unwrap();
    assert_whole(&particle, &scaffold).unwrap();
    assert!(particle.value(model.mu).is_some());
    assert_torus(&model.trace, &scaffold).unwrap();
    assert!(model.trace.value_at(model.mu).is_none());
}

#[test]
fn branches_do_not_see_each_other() {
    let mut model = fixtures::normal_normal(0.3, 1.0);
    let scaffold = construct_scaffold(&model.trace, vec![[model.mu].into_iter().collect()]).unwrap();
    let border = scaffold.stage(0).to_vec();
    detach_and_extract(&mut model.trace, &border, &scaffold, false).unwrap();

    let parent = Particle::new(&model.trace);
    let mut left = parent.branch();
    let mut right = parent.branch();
    left.set_value(model.mu, Value::Real(-2.0));
    right.set_value(model.mu, Value::Real(2.0));
    assert_eq!(left.value(model.mu), Some(Value::Real(-2.0)));
    assert_eq!(right.value(model.mu), Some(Value::Real(2.0)));
    assert_eq!(parent.value(model.mu), None);

    let grandchild = left.branch();
    left.clear_value(model.mu);
    assert_eq!(grandchild.value(model.mu), Some(Value::Real(-2.0)));
    assert_eq!(left.value(model.mu), None);
}

#[test]
fn committing_an_overlay_restores_the_whole_state() {
    let mut model = fixtures::normal_normal(0.3, 1.0);
    let scaffold = construct_scaffold(&model.trace, vec![[model.mu].into_iter().collect()]).unwrap();
    let border = scaffold.stage(0).to_vec();
    detach_and_extract(&mut model.trace, &border, &scaffold, false).unwrap();

    let mut rng = RngHandle::from_seed(8);
    let mut particle = Particle::new(&model.trace);
    regen_and_attach(&mut particle, &border, &scaffold, false, &OmegaDB::new(), None, &mut rng)
        .unwrap();
    let proposed = particle.value(model.mu);
    let overlay = particle.into_overlay();
    model.trace.commit(overlay, &scaffold);

    assert_eq!(model.trace.value_at(model.mu).cloned(), proposed);
    assert_whole(&model.trace, &scaffold).unwrap();
    assert!(model.trace.is_whole());
}
