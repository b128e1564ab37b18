//! Structured error types shared across resim crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`InferError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (node handles, scope names, sizes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the inference engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum InferError {
    /// Illegal selector or operator configuration.
    #[error("config error: {0}")]
    Config(ErrorInfo),
    /// Rejection sampling cannot bound the target density of this model.
    #[error("no static bound: {0}")]
    NoStaticBound(ErrorInfo),
    /// A protocol invariant was violated (torus check, reference weight mismatch).
    #[error("invariant violated: {0}")]
    Invariant(ErrorInfo),
    /// Structural errors reported by the trace.
    #[error("trace error: {0}")]
    Trace(ErrorInfo),
    /// A primitive procedure refused its arguments or value.
    #[error("procedure error: {0}")]
    Procedure(ErrorInfo),
    /// Serialization and schedule I/O errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl InferError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            InferError::Config(info)
            | InferError::NoStaticBound(info)
            | InferError::Invariant(info)
            | InferError::Trace(info)
            | InferError::Procedure(info)
            | InferError::Serde(info) => info,
        }
    }

    /// Whether an operator may turn this error into an ordinary rejection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InferError::Procedure(_))
    }

    /// Shorthand for a configuration error.
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        InferError::Config(ErrorInfo::new(code, message))
    }

    /// Shorthand for a missing density bound.
    pub fn no_static_bound(code: impl Into<String>, message: impl Into<String>) -> Self {
        InferError::NoStaticBound(ErrorInfo::new(code, message))
    }

    /// Shorthand for an invariant violation.
    pub fn invariant(code: impl Into<String>, message: impl Into<String>) -> Self {
        InferError::Invariant(ErrorInfo::new(code, message))
    }

    /// Shorthand for a trace structure error.
    pub fn trace(code: impl Into<String>, message: impl Into<String>) -> Self {
        InferError::Trace(ErrorInfo::new(code, message))
    }

    /// Shorthand for a procedure error.
    pub fn procedure(code: impl Into<String>, message: impl Into<String>) -> Self {
        InferError::Procedure(ErrorInfo::new(code, message))
    }

    /// Adds a context entry to whichever payload the error carries.
    pub fn with_context(self, key: impl Into<String>, value: impl ToString) -> Self {
        match self {
            InferError::Config(info) => InferError::Config(info.with_context(key, value)),
            InferError::NoStaticBound(info) => {
                InferError::NoStaticBound(info.with_context(key, value))
            }
            InferError::Invariant(info) => InferError::Invariant(info.with_context(key, value)),
            InferError::Trace(info) => InferError::Trace(info.with_context(key, value)),
            InferError::Procedure(info) => InferError::Procedure(info.with_context(key, value)),
            InferError::Serde(info) => InferError::Serde(info.with_context(key, value)),
        }
    }
}
