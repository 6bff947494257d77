//! Error types for the value model.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by `Element`/`Collection` operations: incompatible operand
/// types, or an empty/oversized collection where a singleton was required.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("expected a single item, found {0}")]
    NotSingleton(usize),

    #[error("expected at most one item, found {0}")]
    TooManyItems(usize),

    #[error("cannot convert {from} to {to}")]
    Conversion { from: &'static str, to: &'static str },

    #[error("invalid {kind} literal: {text}")]
    InvalidLiteral { kind: &'static str, text: String },

    #[error("{0}")]
    TypeError(String),
}
