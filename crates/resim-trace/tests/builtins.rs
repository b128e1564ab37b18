use resim_core::{InferError, RngHandle, Value};
use resim_trace::builtins;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

#[test]
fn normal_gradient_matches_finite_differences() {
    let normal = builtins::normal();
    let (x, mu, sigma) = (0.7, -0.2, 1.3);
    let args = [Value::Real(mu), Value::Real(sigma)];
    let (dx, dargs) = normal.gradient_of_log_density(&Value::Real(x), &args).unwrap();
    let h = 1e-6;
    let density = |x: f64, mu: f64, sigma: f64| {
        normal
            .log_density(&Value::Real(x), &[Value::Real(mu), Value::Real(sigma)])
            .unwrap()
    };
    assert!(close(dx, (density(x + h, mu, sigma) - density(x - h, mu, sigma)) / (2.0 * h)));
    assert!(close(dargs[0], (density(x, mu + h, sigma) - density(x, mu - h, sigma)) / (2.0 * h)));
    assert!(close(dargs[1], (density(x, mu, sigma + h) - density(x, mu, sigma - h)) / (2.0 * h)));
}

#[test]
fn bounds_respect_unknown_operands() {
    let normal = builtins::normal();
    let value = Value::Real(1.0);
    let sigma = Some(Value::Real(2.0));
    let bound = normal.log_density_bound(&value, &[None, sigma]).unwrap();
    for mu in [-3.0, 0.0, 1.0, 4.0] {
        let density = normal
            .log_density(&value, &[Value::Real(mu), Value::Real(2.0)])
            .unwrap();
        assert!(density <= bound);
    }
    assert!(matches!(
        normal.log_density_bound(&value, &[None, None]),
        Err(InferError::NoStaticBound(_))
    ));
    assert_eq!(builtins::flip().log_density_bound(&Value::Bool(true), &[None]).unwrap(), 0.0);
}

#[test]
fn discrete_procedures_enumerate_their_support() {
    let values = builtins::uniform_discrete()
        .enumerate_values(&[Value::Int(2), Value::Int(5)])
        .unwrap();
    assert_eq!(values, vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
    assert!(builtins::flip().can_enumerate());
    assert!(!builtins::normal().can_enumerate());
    assert!(matches!(
        builtins::normal().enumerate_values(&[]),
        Err(InferError::Config(_))
    ));
}

#[test]
fn out_of_support_densities_are_negative_infinity() {
    let uniform = builtins::uniform_continuous();
    let density = uniform
        .log_density(&Value::Real(3.0), &[Value::Real(0.0), Value::Real(1.0)])
        .unwrap();
    assert_eq!(density, f64::NEG_INFINITY);
    let density = builtins::bernoulli()
        .log_density(&Value::Int(4), &[Value::Real(0.5)])
        .unwrap();
    assert_eq!(density, f64::NEG_INFINITY);
}

#[test]
fn invalid_sigma_is_a_recoverable_error() {
    let mut rng = RngHandle::from_seed(0);
    let err = builtins::normal()
        .simulate(&[Value::Real(0.0), Value::Real(-1.0)], &mut rng)
        .unwrap_err();
    assert!(err.is_recoverable());
}

#[test]
fn variational_normal_keeps_its_sigma_floor() {
    let mut family = builtins::normal()
        .variational_kernel(&[Value::Real(0.0), Value::Real(1.0)])
        .unwrap();
    family.update_parameters(&[0.0, -1.0], 100.0, 1.0);
    assert_eq!(family.parameters(), vec![0.0, builtins::VARIATIONAL_SIGMA_FLOOR]);
}
