//! The FHIR structure repository: wire-format resource models, a loader
//! that links profiles against their base definitions, and the
//! `ProfiledElementTypeInfo` seam that lets `fhirkit-values::Element`
//! carry profile-bound type information.

pub mod error;
pub mod json_host;
pub mod repository;
pub mod snapshot_gen;
pub mod type_info;
pub mod valueset;
pub mod wire;

pub use error::{Error, Result};
pub use json_host::{json_to_element, JsonNode};
pub use repository::{Repository, RepositoryBuilder};
pub use type_info::ProfiledElementTypeInfo;
pub use valueset::FinalizedValueSet;
pub use wire::*;
