//! Error types for formflow-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Unknown field reference: {0}")]
    UnknownField(String),

    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    #[error("Cyclic rule reference: {0}")]
    CyclicRule(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Expression nesting exceeds {0} levels")]
    DepthExceeded(usize),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),
}

impl Error {
    pub(crate) fn type_error(expected: &str, got: &crate::Value) -> Self {
        Error::TypeError {
            expected: expected.to_string(),
            got: got.type_name().to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
