use thiserror::Error;

use crate::engine::CompileError;

/// Failures loading or compiling a routing guideline document (§4.B).
#[derive(Error, Debug)]
pub enum GuidelinesError {
    #[error("malformed guideline document: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("guideline document failed schema validation: {0}")]
    SchemaViolation(String),

    #[error("unparsable guideline version: {0}")]
    InvalidVersion(String),

    #[error("guideline document version {available} is incompatible with engine version {supported}")]
    IncompatibleVersion {
        available: String,
        supported: String,
    },

    #[error("route {route:?} destination group references unknown destination class {class:?}")]
    UnknownDestinationClass { route: String, class: String },

    #[error(transparent)]
    Compile(#[from] CompileError),
}
