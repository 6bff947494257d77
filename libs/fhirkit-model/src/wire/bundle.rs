//! Wire model for `Bundle` — used both to load collections of conformance
//! resources in one file and as a reference-resolution scope during
//! validation, resolving `contained`-like relative and `fullUrl` references.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub bundle_type: BundleType,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_resource_type() -> String {
    "Bundle".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Document,
    Message,
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    History,
    Searchset,
    Collection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
}

impl Bundle {
    /// Resolve an entry by its `fullUrl`, the form bundle-local references
    /// (`urn:uuid:...`, an absolute `fullUrl`) are matched against.
    pub fn resolve(&self, full_url: &str) -> Option<&Value> {
        self.entry
            .iter()
            .find(|e| e.full_url.as_deref() == Some(full_url))
            .and_then(|e| e.resource.as_ref())
    }

    /// Resolve an entry by `resourceType/id`, the relative-reference form.
    pub fn resolve_relative(&self, resource_type: &str, id: &str) -> Option<&Value> {
        self.entry.iter().find_map(|e| {
            let resource = e.resource.as_ref()?;
            let rt = resource.get("resourceType")?.as_str()?;
            let rid = resource.get("id")?.as_str()?;
            (rt == resource_type && rid == id).then_some(resource)
        })
    }
}
