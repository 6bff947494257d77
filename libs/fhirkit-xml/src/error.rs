//! Error types for XML parsing and resource loading.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("expected a root element, found an empty document")]
    EmptyDocument,

    #[error("deserializing {resource_type} failed: {source}")]
    Deserialize {
        resource_type: String,
        #[source]
        source: serde_json::Error,
    },
}
