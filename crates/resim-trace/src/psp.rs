use std::fmt;

use resim_core::{InferError, RngHandle, Value};

/// A primitive stochastic procedure applied at a trace node.
///
/// Deterministic procedures report `is_random() == false` and contribute no
/// density. Random procedures must implement [`Psp::log_density`]; the rest
/// of the surface is optional and reported through explicit capability
/// errors so operators can refuse models they cannot handle.
pub trait Psp: fmt::Debug + Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Whether applications of this procedure are random choices.
    fn is_random(&self) -> bool;

    /// Draws an output for the given operand values.
    fn simulate(&self, args: &[Value], rng: &mut RngHandle) -> Result<Value, InferError>;

    /// Log density of `value` given the operands. Out-of-support values
    /// return negative infinity rather than an error.
    fn log_density(&self, _value: &Value, _args: &[Value]) -> Result<f64, InferError> {
        Ok(0.0)
    }

    /// Upper bound on [`Psp::log_density`] of `value` over all settings of
    /// the operands reported as `None`.
    fn log_density_bound(&self, _value: &Value, _args: &[Option<Value>]) -> Result<f64, InferError> {
        Err(InferError::no_static_bound(
            "psp-no-bound",
            "procedure cannot bound its log density",
        )
        .with_context("psp", self.name()))
    }

    /// Whether [`Psp::enumerate_values`] is supported.
    fn can_enumerate(&self) -> bool {
        false
    }

    /// Every value of the support under the given operands.
    fn enumerate_values(&self, _args: &[Value]) -> Result<Vec<Value>, InferError> {
        Err(InferError::config("psp-not-enumerable", "procedure has no finite support")
            .with_context("psp", self.name()))
    }

    /// Whether [`Psp::variational_kernel`] is supported.
    fn has_variational_kernel(&self) -> bool {
        false
    }

    /// Builds a fresh variational family initialised from the operands.
    fn variational_kernel(&self, _args: &[Value]) -> Result<Box<dyn VariationalKernel>, InferError> {
        Err(InferError::config("psp-no-variational", "procedure has no variational family")
            .with_context("psp", self.name()))
    }

    /// Gradient of the log density with respect to the value and to each operand.
    fn gradient_of_log_density(
        &self,
        _value: &Value,
        _args: &[Value],
    ) -> Result<(f64, Vec<f64>), InferError> {
        Err(InferError::config("psp-no-gradient", "procedure has no density gradient")
            .with_context("psp", self.name()))
    }

    /// Pulls `direction`, the partial derivative with respect to the output,
    /// back onto the operands.
    fn gradient_of_simulate(
        &self,
        _args: &[Value],
        _value: &Value,
        _direction: f64,
    ) -> Result<Vec<f64>, InferError> {
        Err(InferError::config("psp-no-gradient", "procedure output is not differentiable")
            .with_context("psp", self.name()))
    }
}

/// Parametric proposal family tuned by mean-field optimisation.
pub trait VariationalKernel: fmt::Debug + Send + Sync {
    /// Draws a value from the current parameters.
    fn simulate(&self, rng: &mut RngHandle) -> Value;

    /// Log density of `value` under the current parameters.
    fn log_density(&self, value: &Value) -> Result<f64, InferError>;

    /// Gradient of [`VariationalKernel::log_density`] with respect to each parameter.
    fn gradient_of_log_density(&self, value: &Value) -> Result<Vec<f64>, InferError>;

    /// Moves the parameters by `step_size * gain * gradient`.
    fn update_parameters(&mut self, gradient: &[f64], gain: f64, step_size: f64);

    /// Current parameter vector.
    fn parameters(&self) -> Vec<f64>;
}
