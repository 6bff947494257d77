//! XML support for the FHIR structure repository: converts FHIR XML into
//! the same JSON shape the wire models already deserialize from, and
//! typed loaders that feed either format into a
//! [`fhirkit_model::RepositoryBuilder`].

pub mod convert;
pub mod error;
pub mod loader;

pub use convert::xml_to_value;
pub use error::{Error, Result};
pub use loader::{load_bundle, load_code_system, load_into, load_structure_definition, load_value_set, sniff_format, SourceFormat};
