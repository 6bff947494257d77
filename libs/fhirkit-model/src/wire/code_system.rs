//! Wire model for `CodeSystem` (terminology).

use super::complex::{ContactDetail, PublicationStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: PublicationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<Vec<ContactDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
    pub content: CodeSystemContentMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_resource_type() -> String {
    "CodeSystem".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeSystemContentMode {
    NotPresent,
    Example,
    Fragment,
    Complete,
    Supplement,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSystemConcept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
}

impl CodeSystem {
    pub fn contains_code(&self, code: &str) -> bool {
        fn search(concepts: &[CodeSystemConcept], code: &str) -> bool {
            concepts.iter().any(|c| {
                c.code == code || c.concept.as_deref().is_some_and(|nested| search(nested, code))
            })
        }
        self.concept.as_deref().is_some_and(|c| search(c, code))
    }

    /// `CodeSystem.supplements`: the canonical URL this resource adds
    /// definitions to when `content = supplement`. Not a named struct
    /// field since it's only meaningful on supplements; read out of
    /// `extensions` like the other rarely-used top-level fields.
    pub fn supplements(&self) -> Option<&str> {
        self.extensions.get("supplements").and_then(|v| v.as_str())
    }

    /// Fold another code system's top-level concepts into this one
    /// (spec §4.1 pass 1: supplement merging). New codes are appended;
    /// existing codes are left as this system declared them.
    pub fn merge_supplement(&mut self, supplement: &CodeSystem) {
        let existing: std::collections::HashSet<String> = self.concept.iter().flatten().map(|c| c.code.clone()).collect();
        let additions = supplement.concept.iter().flatten().filter(|c| !existing.contains(&c.code)).cloned();
        self.concept.get_or_insert_with(Vec::new).extend(additions);
    }
}
