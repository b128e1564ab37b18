//! Built-in procedures: `normal`, `flip`, `bernoulli`, `uniform_discrete`,
//! `uniform_continuous`, `add` and `mul`.

use std::f64::consts::PI;
use std::sync::Arc;

use resim_core::{real_arg, InferError, RngHandle, Value};

use crate::psp::{Psp, VariationalKernel};

/// Smallest standard deviation a variational normal may shrink to.
pub const VARIATIONAL_SIGMA_FLOOR: f64 = 0.1;

/// Shared handle to the `normal(mu, sigma)` procedure.
pub fn normal() -> Arc<dyn Psp> {
    Arc::new(Normal)
}

/// Shared handle to the `flip(p = 0.5)` procedure.
pub fn flip() -> Arc<dyn Psp> {
    Arc::new(Flip)
}

/// Shared handle to the `bernoulli(p = 0.5)` procedure yielding `0` or `1`.
pub fn bernoulli() -> Arc<dyn Psp> {
    Arc::new(Bernoulli)
}

/// Shared handle to the `uniform_discrete(lo, hi)` procedure over `lo..hi`.
pub fn uniform_discrete() -> Arc<dyn Psp> {
    Arc::new(UniformDiscrete)
}

/// Shared handle to the `uniform_continuous(a, b)` procedure.
pub fn uniform_continuous() -> Arc<dyn Psp> {
    Arc::new(UniformContinuous)
}

/// Shared handle to the deterministic n-ary `add` procedure.
pub fn add() -> Arc<dyn Psp> {
    Arc::new(Add)
}

/// Shared handle to the deterministic n-ary `mul` procedure.
pub fn mul() -> Arc<dyn Psp> {
    Arc::new(Mul)
}

fn normal_log_density(x: f64, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 || !sigma.is_finite() {
        return f64::NEG_INFINITY;
    }
    let z = (x - mu) / sigma;
    -0.5 * (2.0 * PI).ln() - sigma.ln() - 0.5 * z * z
}

fn checked_sigma(sigma: f64) -> Result<f64, InferError> {
    if sigma > 0.0 && sigma.is_finite() {
        Ok(sigma)
    } else {
        Err(InferError::procedure("normal-sigma", "normal requires a positive finite sigma")
            .with_context("sigma", sigma))
    }
}

fn optional_real(args: &[Option<Value>], index: usize) -> Result<Option<f64>, InferError> {
    match args.get(index) {
        Some(Some(value)) => value.as_real().map(Some),
        Some(None) => Ok(None),
        None => Err(InferError::procedure("missing-operand", "procedure received too few operands")
            .with_context("index", index)),
    }
}

/// Reads the optional weight of `flip`/`bernoulli`.
fn coin_weight(args: &[Value]) -> Result<f64, InferError> {
    let p = if args.is_empty() { 0.5 } else { real_arg(args, 0)? };
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(InferError::procedure("coin-weight", "coin weight must lie in [0, 1]")
            .with_context("p", p))
    }
}

fn coin_log_density(outcome: bool, p: f64) -> f64 {
    if outcome {
        p.ln()
    } else {
        (1.0 - p).ln()
    }
}

fn coin_bound(outcome: bool, args: &[Option<Value>]) -> Result<f64, InferError> {
    if args.is_empty() {
        return Ok(0.5f64.ln());
    }
    match optional_real(args, 0)? {
        Some(p) => Ok(coin_log_density(outcome, p)),
        None => Ok(0.0),
    }
}

fn coin_gradient(outcome: bool, args: &[Value]) -> Result<(f64, Vec<f64>), InferError> {
    if args.is_empty() {
        return Ok((0.0, Vec::new()));
    }
    let p = coin_weight(args)?;
    let dp = if outcome { 1.0 / p } else { -1.0 / (1.0 - p) };
    Ok((0.0, vec![dp]))
}

#[derive(Debug)]
struct Normal;

impl Psp for Normal {
    fn name(&self) -> &str {
        "normal"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn simulate(&self, args: &[Value], rng: &mut RngHandle) -> Result<Value, InferError> {
        let mu = real_arg(args, 0)?;
        let sigma = checked_sigma(real_arg(args, 1)?)?;
        Ok(Value::Real(mu + sigma * rng.standard_normal()))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64, InferError> {
        Ok(normal_log_density(value.as_real()?, real_arg(args, 0)?, real_arg(args, 1)?))
    }

    fn log_density_bound(&self, value: &Value, args: &[Option<Value>]) -> Result<f64, InferError> {
        let x = value.as_real()?;
        match (optional_real(args, 0)?, optional_real(args, 1)?) {
            (Some(mu), Some(sigma)) => Ok(normal_log_density(x, mu, sigma)),
            (None, Some(sigma)) => Ok(normal_log_density(0.0, 0.0, sigma)),
            // Maximised at sigma = |x - mu|.
            (Some(mu), None) if x != mu => Ok(-(x - mu).abs().ln() - 0.5 * (2.0 * PI).ln() - 0.5),
            _ => Err(InferError::no_static_bound(
                "normal-unbounded",
                "normal density is unbounded when sigma may shrink to the value",
            )),
        }
    }

    fn has_variational_kernel(&self) -> bool {
        true
    }

    fn variational_kernel(&self, args: &[Value]) -> Result<Box<dyn VariationalKernel>, InferError> {
        let mu = real_arg(args, 0)?;
        let sigma = checked_sigma(real_arg(args, 1)?)?;
        Ok(Box::new(NormalVariational { mu, sigma }))
    }

    fn gradient_of_log_density(
        &self,
        value: &Value,
        args: &[Value],
    ) -> Result<(f64, Vec<f64>), InferError> {
        let x = value.as_real()?;
        let mu = real_arg(args, 0)?;
        let sigma = checked_sigma(real_arg(args, 1)?)?;
        let diff = x - mu;
        let var = sigma * sigma;
        let dx = -diff / var;
        let dmu = diff / var;
        let dsigma = -1.0 / sigma + diff * diff / (var * sigma);
        Ok((dx, vec![dmu, dsigma]))
    }
}

/// Normal proposal family with a floored standard deviation.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalVariational {
    mu: f64,
    sigma: f64,
}

impl NormalVariational {
    /// Creates the family with the given initial parameters.
    pub fn new(mu: f64, sigma: f64) -> Self {
        Self {
            mu,
            sigma: sigma.max(VARIATIONAL_SIGMA_FLOOR),
        }
    }
}

impl VariationalKernel for NormalVariational {
    fn simulate(&self, rng: &mut RngHandle) -> Value {
        Value::Real(self.mu + self.sigma * rng.standard_normal())
    }

    fn log_density(&self, value: &Value) -> Result<f64, InferError> {
        Ok(normal_log_density(value.as_real()?, self.mu, self.sigma))
    }

    fn gradient_of_log_density(&self, value: &Value) -> Result<Vec<f64>, InferError> {
        let diff = value.as_real()? - self.mu;
        let var = self.sigma * self.sigma;
        Ok(vec![diff / var, -1.0 / self.sigma + diff * diff / (var * self.sigma)])
    }

    fn update_parameters(&mut self, gradient: &[f64], gain: f64, step_size: f64) {
        if let [dmu, dsigma, ..] = gradient {
            self.mu += step_size * gain * dmu;
            self.sigma = (self.sigma + step_size * gain * dsigma).max(VARIATIONAL_SIGMA_FLOOR);
        }
    }

    fn parameters(&self) -> Vec<f64> {
        vec![self.mu, self.sigma]
    }
}

#[derive(Debug)]
struct Flip;

impl Psp for Flip {
    fn name(&self) -> &str {
        "flip"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn simulate(&self, args: &[Value], rng: &mut RngHandle) -> Result<Value, InferError> {
        let p = coin_weight(args)?;
        Ok(Value::Bool(rng.uniform() < p))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64, InferError> {
        Ok(coin_log_density(value.as_bool()?, coin_weight(args)?))
    }

    fn log_density_bound(&self, value: &Value, args: &[Option<Value>]) -> Result<f64, InferError> {
        coin_bound(value.as_bool()?, args)
    }

    fn can_enumerate(&self) -> bool {
        true
    }

    fn enumerate_values(&self, _args: &[Value]) -> Result<Vec<Value>, InferError> {
        Ok(vec![Value::Bool(true), Value::Bool(false)])
    }

    fn gradient_of_log_density(
        &self,
        value: &Value,
        args: &[Value],
    ) -> Result<(f64, Vec<f64>), InferError> {
        coin_gradient(value.as_bool()?, args)
    }
}

#[derive(Debug)]
struct Bernoulli;

fn bernoulli_outcome(value: &Value) -> Result<Option<bool>, InferError> {
    match value.as_int()? {
        0 => Ok(Some(false)),
        1 => Ok(Some(true)),
        _ => Ok(None),
    }
}

impl Psp for Bernoulli {
    fn name(&self) -> &str {
        "bernoulli"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn simulate(&self, args: &[Value], rng: &mut RngHandle) -> Result<Value, InferError> {
        let p = coin_weight(args)?;
        Ok(Value::Int(i64::from(rng.uniform() < p)))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64, InferError> {
        let p = coin_weight(args)?;
        Ok(bernoulli_outcome(value)?
            .map(|outcome| coin_log_density(outcome, p))
            .unwrap_or(f64::NEG_INFINITY))
    }

    fn log_density_bound(&self, value: &Value, args: &[Option<Value>]) -> Result<f64, InferError> {
        match bernoulli_outcome(value)? {
            Some(outcome) => coin_bound(outcome, args),
            None => Ok(f64::NEG_INFINITY),
        }
    }

    fn can_enumerate(&self) -> bool {
        true
    }

    fn enumerate_values(&self, _args: &[Value]) -> Result<Vec<Value>, InferError> {
        Ok(vec![Value::Int(0), Value::Int(1)])
    }

    fn gradient_of_log_density(
        &self,
        value: &Value,
        args: &[Value],
    ) -> Result<(f64, Vec<f64>), InferError> {
        match bernoulli_outcome(value)? {
            Some(outcome) => coin_gradient(outcome, args),
            None => Ok((0.0, vec![0.0; args.len()])),
        }
    }
}

#[derive(Debug)]
struct UniformDiscrete;

fn int_range(args: &[Value]) -> Result<(i64, i64), InferError> {
    let lo = args
        .first()
        .ok_or_else(|| InferError::procedure("missing-operand", "uniform_discrete needs lo and hi"))?
        .as_int()?;
    let hi = args
        .get(1)
        .ok_or_else(|| InferError::procedure("missing-operand", "uniform_discrete needs lo and hi"))?
        .as_int()?;
    if lo < hi {
        Ok((lo, hi))
    } else {
        Err(InferError::procedure("empty-range", "uniform_discrete needs lo < hi")
            .with_context("lo", lo)
            .with_context("hi", hi))
    }
}

impl Psp for UniformDiscrete {
    fn name(&self) -> &str {
        "uniform_discrete"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn simulate(&self, args: &[Value], rng: &mut RngHandle) -> Result<Value, InferError> {
        let (lo, hi) = int_range(args)?;
        let width = usize::try_from(hi - lo).map_err(|_| {
            InferError::procedure("range-too-wide", "uniform_discrete range does not fit in memory")
        })?;
        Ok(Value::Int(lo + rng.index(width) as i64))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64, InferError> {
        let (lo, hi) = int_range(args)?;
        let n = value.as_int()?;
        if (lo..hi).contains(&n) {
            Ok(-((hi - lo) as f64).ln())
        } else {
            Ok(f64::NEG_INFINITY)
        }
    }

    fn log_density_bound(&self, value: &Value, args: &[Option<Value>]) -> Result<f64, InferError> {
        match (args.first(), args.get(1)) {
            (Some(Some(lo)), Some(Some(hi))) => {
                self.log_density(value, &[lo.clone(), hi.clone()])
            }
            _ => Ok(0.0),
        }
    }

    fn can_enumerate(&self) -> bool {
        true
    }

    fn enumerate_values(&self, args: &[Value]) -> Result<Vec<Value>, InferError> {
        let (lo, hi) = int_range(args)?;
        Ok((lo..hi).map(Value::Int).collect())
    }
}

#[derive(Debug)]
struct UniformContinuous;

fn real_range(a: f64, b: f64) -> Result<(f64, f64), InferError> {
    if a < b {
        Ok((a, b))
    } else {
        Err(InferError::procedure("empty-range", "uniform_continuous needs a < b")
            .with_context("a", a)
            .with_context("b", b))
    }
}

fn uniform_log_density(x: f64, a: f64, b: f64) -> f64 {
    if a < b && (a..=b).contains(&x) {
        -(b - a).ln()
    } else {
        f64::NEG_INFINITY
    }
}

impl Psp for UniformContinuous {
    fn name(&self) -> &str {
        "uniform_continuous"
    }

    fn is_random(&self) -> bool {
        true
    }

    fn simulate(&self, args: &[Value], rng: &mut RngHandle) -> Result<Value, InferError> {
        let (a, b) = real_range(real_arg(args, 0)?, real_arg(args, 1)?)?;
        Ok(Value::Real(a + (b - a) * rng.uniform()))
    }

    fn log_density(&self, value: &Value, args: &[Value]) -> Result<f64, InferError> {
        Ok(uniform_log_density(value.as_real()?, real_arg(args, 0)?, real_arg(args, 1)?))
    }

    fn log_density_bound(&self, value: &Value, args: &[Option<Value>]) -> Result<f64, InferError> {
        match (optional_real(args, 0)?, optional_real(args, 1)?) {
            (Some(a), Some(b)) => Ok(uniform_log_density(value.as_real()?, a, b)),
            _ => Err(InferError::no_static_bound(
                "uniform-unbounded",
                "uniform density is unbounded when its support may shrink",
            )),
        }
    }

    fn gradient_of_log_density(
        &self,
        value: &Value,
        args: &[Value],
    ) -> Result<(f64, Vec<f64>), InferError> {
        let x = value.as_real()?;
        let (a, b) = real_range(real_arg(args, 0)?, real_arg(args, 1)?)?;
        if (a..=b).contains(&x) {
            let width = b - a;
            Ok((0.0, vec![1.0 / width, -1.0 / width]))
        } else {
            Ok((0.0, vec![0.0, 0.0]))
        }
    }
}

#[derive(Debug)]
struct Add;

impl Psp for Add {
    fn name(&self) -> &str {
        "add"
    }

    fn is_random(&self) -> bool {
        false
    }

    fn simulate(&self, args: &[Value], _rng: &mut RngHandle) -> Result<Value, InferError> {
        if args.iter().all(|arg| matches!(arg, Value::Int(_))) {
            let mut total: i64 = 0;
            for arg in args {
                total = total
                    .checked_add(arg.as_int()?)
                    .ok_or_else(|| InferError::procedure("int-overflow", "add overflowed"))?;
            }
            return Ok(Value::Int(total));
        }
        let mut total = 0.0;
        for arg in args {
            total += arg.as_real()?;
        }
        Ok(Value::Real(total))
    }

    fn gradient_of_simulate(
        &self,
        args: &[Value],
        _value: &Value,
        direction: f64,
    ) -> Result<Vec<f64>, InferError> {
        Ok(vec![direction; args.len()])
    }
}

#[derive(Debug)]
struct Mul;

impl Psp for Mul {
    fn name(&self) -> &str {
        "mul"
    }

    fn is_random(&self) -> bool {
        false
    }

    fn simulate(&self, args: &[Value], _rng: &mut RngHandle) -> Result<Value, InferError> {
        if args.iter().all(|arg| matches!(arg, Value::Int(_))) {
            let mut total: i64 = 1;
            for arg in args {
                total = total
                    .checked_mul(arg.as_int()?)
                    .ok_or_else(|| InferError::procedure("int-overflow", "mul overflowed"))?;
            }
            return Ok(Value::Int(total));
        }
        let mut total = 1.0;
        for arg in args {
            total *= arg.as_real()?;
        }
        Ok(Value::Real(total))
    }

    fn gradient_of_simulate(
        &self,
        args: &[Value],
        _value: &Value,
        direction: f64,
    ) -> Result<Vec<f64>, InferError> {
        let reals = args.iter().map(Value::as_real).collect::<Result<Vec<_>, _>>()?;
        Ok((0..reals.len())
            .map(|skip| {
                let others: f64 = reals
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != skip)
                    .map(|(_, x)| *x)
                    .product();
                direction * others
            })
            .collect())
    }
}
