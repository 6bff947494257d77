//! Wire model for `ElementDefinition` (used inside `StructureDefinition`
//! snapshots and differentials).

use super::complex::BindingStrength;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_is_constraining: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementDefinitionBase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ElementDefinitionType>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<ElementDefinitionConstraint>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementDefinitionBinding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementDefinitionSlicing>,

    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionBase {
    pub path: String,
    pub min: u32,
    pub max: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionType {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionConstraint {
    pub key: String,
    pub severity: ConstraintSeverity,
    pub human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinitionBinding {
    pub strength: BindingStrength,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionSlicing {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<ElementDefinitionDiscriminator>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    pub rules: SlicingRules,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementDefinitionDiscriminator {
    #[serde(rename = "type")]
    pub discriminator_type: DiscriminatorType,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscriminatorType {
    Value,
    Exists,
    Pattern,
    Type,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    Closed,
    Open,
    OpenAtEnd,
    ReportOther,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Differential {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

impl ElementDefinition {
    pub fn key(&self) -> String {
        match &self.slice_name {
            Some(name) => format!("{}:{}", self.path, name),
            None => self.path.clone(),
        }
    }

    pub fn is_slice(&self) -> bool {
        self.slice_name.is_some()
    }

    pub fn parent_path(&self) -> Option<&str> {
        self.path.rfind('.').map(|pos| &self.path[..pos])
    }

    pub fn is_descendant_of(&self, parent_path: &str) -> bool {
        self.path.starts_with(parent_path)
            && self.path.len() > parent_path.len()
            && self.path.as_bytes().get(parent_path.len()) == Some(&b'.')
    }

    pub fn is_choice_type(&self) -> bool {
        self.path.ends_with("[x]")
    }

    /// The single extension key beginning with `prefix` (`"fixed"`,
    /// `"pattern"`, `"minValue"`, `"maxValue"`) — FHIR's `[x]`-suffixed
    /// type-carrying field names (`fixedString`, `patternCodeableConcept`,
    /// ...) land in `extensions` since they aren't named struct fields.
    fn suffixed_value(&self, prefix: &str) -> Option<&Value> {
        self.extensions.iter().find(|(k, _)| k.starts_with(prefix)).map(|(_, v)| v)
    }

    /// `fixed[x]`: the literal value this element is fixed to.
    pub fn fixed(&self) -> Option<&Value> {
        self.suffixed_value("fixed")
    }

    /// `pattern[x]`: the subtree every instance must match (§4.5).
    pub fn pattern(&self) -> Option<&Value> {
        self.suffixed_value("pattern")
    }

    pub fn min_value(&self) -> Option<&Value> {
        self.suffixed_value("minValue")
    }

    pub fn max_value(&self) -> Option<&Value> {
        self.suffixed_value("maxValue")
    }

    pub fn type_codes(&self) -> Vec<&str> {
        self.types
            .as_ref()
            .map(|types| types.iter().map(|t| t.code.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn is_required(&self) -> bool {
        self.min.unwrap_or(0) > 0
    }

    pub fn is_array(&self) -> bool {
        match self.max.as_deref() {
            Some("*") => true,
            Some(n) => n.parse::<u32>().map(|n| n > 1).unwrap_or(false),
            None => false,
        }
    }

    pub fn max_unbounded(&self) -> Option<u32> {
        match self.max.as_deref() {
            Some("*") | None => None,
            Some(n) => n.parse().ok(),
        }
    }
}

impl Snapshot {
    pub fn get(&self, path: &str) -> Option<&ElementDefinition> {
        self.element.iter().find(|e| e.path == path && !e.is_slice())
    }

    pub fn children_of(&self, parent_path: &str) -> Vec<&ElementDefinition> {
        let expected_depth = parent_path.matches('.').count() + 1;
        self.element
            .iter()
            .filter(|e| e.is_descendant_of(parent_path) && e.path.matches('.').count() == expected_depth)
            .collect()
    }

    pub fn slices_of(&self, path: &str) -> Vec<&ElementDefinition> {
        self.element.iter().filter(|e| e.path == path && e.is_slice()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(path: &str) -> ElementDefinition {
        ElementDefinition {
            id: None,
            path: path.to_string(),
            slice_name: None,
            slice_is_constraining: None,
            short: None,
            definition: None,
            comment: None,
            min: None,
            max: None,
            base: None,
            content_reference: None,
            types: None,
            max_length: None,
            constraint: None,
            is_modifier: None,
            must_support: None,
            binding: None,
            slicing: None,
            extensions: HashMap::new(),
        }
    }

    #[test]
    fn slice_key_includes_slice_name() {
        let mut e = minimal("Patient.name");
        e.slice_name = Some("official".into());
        assert_eq!(e.key(), "Patient.name:official");
        assert!(e.is_slice());
    }

    #[test]
    fn choice_type_detection() {
        let mut e = minimal("Observation.value[x]");
        assert!(e.is_choice_type());
        e.path = "Observation.value".into();
        assert!(!e.is_choice_type());
    }

    #[test]
    fn cardinality_helpers() {
        let mut e = minimal("Patient.name");
        e.min = Some(1);
        e.max = Some("*".into());
        assert!(e.is_required());
        assert!(e.is_array());
        assert_eq!(e.max_unbounded(), None);
    }
}
