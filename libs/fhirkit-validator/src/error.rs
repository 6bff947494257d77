//! Implementation-level errors the validator raises outside the normal
//! accumulate-as-diagnostics flow — a caller handed it a profile URL the
//! repository doesn't know about, never a data validation problem.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
}
