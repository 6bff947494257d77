//! Value model shared by the FHIRPath engine, the structure repository,
//! and the validator: `Element`, `Collection`, and the primitive types
//! they're built from.
//!
//! This crate has no knowledge of any concrete resource format or of
//! `StructureDefinition`s — it only defines the `HostNode`/`ElementTypeInfo`
//! seams those higher layers implement.

pub mod collection;
pub mod decimal;
pub mod element;
pub mod error;
pub mod quantity;
pub mod temporal;
pub mod tri;

pub use collection::Collection;
pub use element::{Element, ElementType, ElementTypeInfo, HostNode, PrimitiveValue, TypeInfoHandle};
pub use error::{Error, Result};
pub use quantity::Quantity;
pub use temporal::{DateTimePrecision, DateTimeValue, DatePrecision, DateValue, TimePrecision, TimeValue};
pub use tri::Tri;
