//! Errors raised while compiling a slicing's discriminators. Data-level
//! classification problems (an unmatched member under `closed` rules) are
//! not errors — they are [`crate::classify::SliceIssue`]s accumulated
//! alongside the classification, per the validator's non-throwing model.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("slicing at {path} has a `value` discriminator on `{discriminator_path}` but not every slice fixes a value there")]
    MissingFixedValue { path: String, discriminator_path: String },

    #[error("slicing at {path} has a `value` discriminator on `{discriminator_path}` with inconsistent fixed values across candidates")]
    AmbiguousFixedValue { path: String, discriminator_path: String },

    #[error("slicing at {path} has a `pattern` discriminator on `{discriminator_path}` with mutually inconsistent patterns across candidates")]
    AmbiguousPattern { path: String, discriminator_path: String },

    #[error("slicing at {path} has an `exists` discriminator on `{discriminator_path}` whose candidates disagree about cardinality")]
    AmbiguousExists { path: String, discriminator_path: String },

    #[error("slicing at {path} has a `type` discriminator on `{discriminator_path}` whose candidates declare more than one type")]
    AmbiguousType { path: String, discriminator_path: String },

    #[error("slicing at {path} has a `type`/`exists` discriminator on `{discriminator_path}` with no candidate element definitions")]
    NoCandidates { path: String, discriminator_path: String },

    #[error(transparent)]
    Fhirpath(#[from] fhirkit_fhirpath::Error),
}
