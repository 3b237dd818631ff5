//! Error types for formflow-script

use thiserror::Error;

/// Schema loading error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Invalid mixin: {0}")]
    InvalidMixin(String),

    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    #[error("Unknown mixin: {0}")]
    UnknownMixin(String),

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Mixin '{mixin}' conflicts with existing {kind} '{name}'")]
    MixinConflict {
        mixin: String,
        kind: &'static str,
        name: String,
    },

    #[error(transparent)]
    Core(#[from] formflow_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
