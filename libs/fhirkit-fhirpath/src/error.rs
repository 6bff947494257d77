//! Error types for FHIRPath compilation and evaluation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("parse error at position {position}: {message}")]
    Parse { message: String, position: usize },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity { function: String, expected: String, got: usize },

    #[error("unknown external constant: {0}")]
    UnknownConstant(String),

    #[error(transparent)]
    Value(#[from] fhirkit_values::Error),

    #[error("{0}")]
    Type(String),

    #[error("{feature} is not supported")]
    Unsupported { feature: String },
}
