//! Raw, serde-deserializable shapes for the conformance resources the
//! repository loads. These mirror the FHIR JSON wire format directly;
//! [`crate::repository::Repository`] turns them into the linked,
//! post-processed form the validator and FHIRPath engine navigate.

pub mod bundle;
pub mod code_system;
pub mod complex;
pub mod element_definition;
pub mod structure_definition;
pub mod value_set;

pub use bundle::*;
pub use code_system::*;
pub use complex::*;
pub use element_definition::*;
pub use structure_definition::*;
pub use value_set::*;
