use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, InferError};

/// Runtime value stored at a trace node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean outcome (e.g. of `flip`).
    Bool(bool),
    /// Integer outcome (e.g. of `uniform_discrete`).
    Int(i64),
    /// Real-valued outcome.
    Real(f64),
}

impl Value {
    /// Reads the value as a real number; integers are widened.
    pub fn as_real(&self) -> Result<f64, InferError> {
        match self {
            Value::Real(x) => Ok(*x),
            Value::Int(n) => Ok(*n as f64),
            Value::Bool(_) => Err(type_error("real", self)),
        }
    }

    /// Reads the value as an integer.
    pub fn as_int(&self) -> Result<i64, InferError> {
        match self {
            Value::Int(n) => Ok(*n),
            _ => Err(type_error("int", self)),
        }
    }

    /// Reads the value as a boolean.
    pub fn as_bool(&self) -> Result<bool, InferError> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(type_error("bool", self)),
        }
    }
}

fn type_error(expected: &str, found: &Value) -> InferError {
    InferError::Procedure(
        ErrorInfo::new("value-type", "value has the wrong type")
            .with_context("expected", expected)
            .with_context("found", found),
    )
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Real(x) => write!(f, "{x}"),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Reads operand `index` as a real number, reporting arity problems as procedure errors.
pub fn real_arg(args: &[Value], index: usize) -> Result<f64, InferError> {
    args.get(index)
        .ok_or_else(|| {
            InferError::Procedure(
                ErrorInfo::new("missing-operand", "procedure received too few operands")
                    .with_context("index", index)
                    .with_context("arity", args.len()),
            )
        })?
        .as_real()
}
