//! Error types for formflow-runtime

use indexmap::IndexMap;
use thiserror::Error;

/// Result type for formflow-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the form runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Field is not declared in the schema
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// Schema failed structural checks at initialization
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Submission or transition blocked by validation errors
    #[error("validation failed: {}", Self::format_field_count(.errors.len()))]
    ValidationFailed {
        /// Field name to messages, non-empty entries only
        errors: IndexMap<String, Vec<String>>,
    },

    /// A field's condition could not be evaluated
    #[error("conditional evaluation failed for '{field}': {source}")]
    ConditionalEvaluation {
        field: String,
        source: formflow_core::Error,
    },

    /// A newer async validation for the same field replaced this one
    #[error("async validation for '{field}' was superseded")]
    AsyncValidationSuperseded { field: String },

    /// Pending async validation was cancelled (reset, restore or explicit cancel)
    #[error("async validation for '{field}' was cancelled")]
    AsyncValidationCancelled { field: String },

    /// Action is not declared in the schema
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// Action is hidden, disabled or its condition does not hold
    #[error("action '{id}' is unavailable: {}", .reasons.join("; "))]
    ActionUnavailable { id: String, reasons: Vec<String> },

    /// No transition for this action from the current stage, or its condition failed
    #[error("workflow transition '{action}' not allowed from stage '{stage}'")]
    WorkflowTransition { stage: String, action: String },

    /// Event is missing data its type requires
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A batch flush callback rejected the batch
    #[error("batch flush failed: {0}")]
    BatchFlush(String),

    /// Operation needs a tokio runtime and none is running
    #[error("no async runtime available")]
    NoAsyncRuntime,

    /// Configuration could not be parsed
    #[error("config error: {0}")]
    Config(#[from] ron::error::SpannedError),

    /// State could not be written out
    #[error("serialization error: {0}")]
    Serialization(#[from] ron::Error),

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] formflow_core::Error),
}

impl Error {
    /// Per-field messages if this is a ValidationFailed error
    pub fn validation_errors(&self) -> Option<&IndexMap<String, Vec<String>>> {
        match self {
            Error::ValidationFailed { errors } => Some(errors),
            _ => None,
        }
    }

    fn format_field_count(count: usize) -> String {
        if count == 1 {
            "1 field has errors".to_string()
        } else {
            format!("{} fields have errors", count)
        }
    }
}

// Compile-time check that Error is Send + Sync so it can cross task boundaries.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}
