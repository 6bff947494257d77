//! Error types for the structure repository.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid FHIR resource: {0}")]
    InvalidResource(String),

    #[error("JSON deserialization failed: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("XML parsing failed: {0}")]
    Xml(String),

    #[error("unresolved base definition {base_url} (needed by {profile_url})")]
    UnresolvedBase { profile_url: String, base_url: String },

    #[error("unresolved element type {type_code} at {path} in {profile_url}")]
    UnresolvedType { profile_url: String, path: String, type_code: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("{} issue(s) found while finalizing the repository", .issues.len())]
    Verification { issues: Vec<String> },
}
