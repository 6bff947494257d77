//! Wire model for `StructureDefinition` — the resource that declares a
//! FHIR resource shape, a data type, or a profile constraining one.

use super::complex::{ContactDetail, PublicationStatus, UsageContext};
use super::element_definition::{Differential, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub status: PublicationStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<ContactDetail>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_context: Option<Vec<UsageContext>>,

    #[serde(rename = "fhirVersion", skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    /// Other `StructureDefinition`s this one draws element definitions from
    /// by reference (`contentReference` targets, logical-model imports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<Value>>,

    pub kind: StructureDefinitionKind,

    #[serde(rename = "abstract")]
    pub is_abstract: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<StructureDefinitionContext>>,

    #[serde(rename = "type")]
    pub type_: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<TypeDerivationRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<Differential>,

    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_resource_type() -> String {
    "StructureDefinition".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeDerivationRule {
    Specialization,
    Constraint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinitionContext {
    #[serde(rename = "type")]
    pub context_type: String,
    pub expression: String,
}

impl StructureDefinition {
    /// Is this a `kind = slice` synthetic profile (generated for a slice's
    /// sub-element definitions, never published on its own)?
    pub fn is_slice_profile(&self) -> bool {
        self.extensions
            .get("__slice_profile")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_profile(&self) -> bool {
        self.derivation == Some(TypeDerivationRule::Constraint)
    }
}
