//! FHIR conformance validation (spec component G): walks a resource
//! instance against one or more activated `StructureDefinition` profiles,
//! checking cardinality, fixed/pattern values, length and numeric bounds,
//! terminology bindings, FHIRPath invariants, slicing, and references.
//!
//! Built strictly on top of `fhirkit-model` (profile/type resolution),
//! `fhirkit-fhirpath` (invariant evaluation, the `conformsTo`/`resolve`
//! host seams) and `fhirkit-slicing` (array classification) — nothing in
//! this crate is depended on by any of the three.

pub mod engine;
pub mod error;
pub mod issue;
pub mod options;
pub mod reference;

pub use engine::Validator;
pub use error::{Error, Result};
pub use issue::{IssueCode, IssueSeverity, ValidationIssue, ValidationResults};
pub use options::{TreatUnknownExtensions, ValidationPlan, ValidatorOptions};
