//! Typed loaders that turn raw FHIR JSON or XML text into the wire
//! structs [`fhirkit_model`] feeds into a [`fhirkit_model::RepositoryBuilder`].

use crate::convert::xml_to_value;
use crate::error::{Error, Result};
use fhirkit_model::{Bundle, CodeSystem, RepositoryBuilder, StructureDefinition, ValueSet};
use serde_json::Value;
use tracing::{debug, instrument};

/// Which wire-format a byte string is in. Sniffed from the first
/// non-whitespace byte: `{` means JSON, `<` means XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Xml,
}

pub fn sniff_format(input: &str) -> SourceFormat {
    match input.trim_start().as_bytes().first() {
        Some(b'<') => SourceFormat::Xml,
        _ => SourceFormat::Json,
    }
}

fn to_value(input: &str, format: SourceFormat) -> Result<Value> {
    match format {
        SourceFormat::Xml => xml_to_value(input),
        SourceFormat::Json => serde_json::from_str(input).map_err(|source| Error::Deserialize {
            resource_type: "unknown".to_string(),
            source,
        }),
    }
}

fn deserialize_as<T: serde::de::DeserializeOwned>(value: Value, resource_type: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|source| Error::Deserialize {
        resource_type: resource_type.to_string(),
        source,
    })
}

pub fn load_structure_definition(input: &str, format: SourceFormat) -> Result<StructureDefinition> {
    deserialize_as(to_value(input, format)?, "StructureDefinition")
}

pub fn load_value_set(input: &str, format: SourceFormat) -> Result<ValueSet> {
    deserialize_as(to_value(input, format)?, "ValueSet")
}

pub fn load_code_system(input: &str, format: SourceFormat) -> Result<CodeSystem> {
    deserialize_as(to_value(input, format)?, "CodeSystem")
}

pub fn load_bundle(input: &str, format: SourceFormat) -> Result<Bundle> {
    deserialize_as(to_value(input, format)?, "Bundle")
}

/// Load one conformance resource into `builder`, dispatching on its
/// `resourceType`. Bundles are unpacked entry by entry; anything else that
/// isn't a `StructureDefinition`, `ValueSet`, or `CodeSystem` is ignored.
#[instrument(skip(input, builder))]
pub fn load_into(input: &str, format: SourceFormat, builder: &mut RepositoryBuilder) -> Result<()> {
    let value = to_value(input, format)?;
    load_value_into(value, builder)
}

fn load_value_into(value: Value, builder: &mut RepositoryBuilder) -> Result<()> {
    let resource_type = value
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Deserialize {
            resource_type: "unknown".to_string(),
            source: serde::de::Error::custom("missing resourceType"),
        })?
        .to_string();

    match resource_type.as_str() {
        "StructureDefinition" => {
            debug!(%resource_type, "loading structure definition");
            builder.add_structure_definition(deserialize_as(value, &resource_type)?);
        }
        "ValueSet" => {
            builder.add_value_set(deserialize_as(value, &resource_type)?);
        }
        "CodeSystem" => {
            builder.add_code_system(deserialize_as(value, &resource_type)?);
        }
        "Bundle" => {
            let bundle: Bundle = deserialize_as(value, &resource_type)?;
            for entry in bundle.entry {
                if let Some(resource) = entry.resource {
                    load_value_into(resource, builder)?;
                }
            }
        }
        other => {
            debug!(resource_type = other, "ignoring unsupported resource type during load");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_json_and_xml() {
        assert_eq!(sniff_format("  { \"a\": 1 }"), SourceFormat::Json);
        assert_eq!(sniff_format("<Patient/>"), SourceFormat::Xml);
    }

    #[test]
    fn loads_structure_definition_from_json() {
        let json = r#"{
            "resourceType": "StructureDefinition",
            "url": "http://example.org/sd/Test",
            "name": "Test",
            "status": "active",
            "kind": "resource",
            "abstract": false,
            "type": "Patient"
        }"#;
        let sd = load_structure_definition(json, SourceFormat::Json).unwrap();
        assert_eq!(sd.url, "http://example.org/sd/Test");
    }

    #[test]
    fn bundle_entries_dispatch_by_resource_type() {
        let json = r#"{
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [
                {"resource": {
                    "resourceType": "StructureDefinition",
                    "url": "http://example.org/sd/A",
                    "name": "A",
                    "status": "active",
                    "kind": "resource",
                    "abstract": false,
                    "type": "Patient"
                }},
                {"resource": {
                    "resourceType": "ValueSet",
                    "url": "http://example.org/vs/A",
                    "name": "A",
                    "status": "active"
                }}
            ]
        }"#;

        let mut builder = RepositoryBuilder::default();
        load_into(json, SourceFormat::Json, &mut builder).unwrap();
        let repo = builder.finalize().unwrap();
        assert!(repo.structure_definition("http://example.org/sd/A").is_some());
        assert!(repo.value_set("http://example.org/vs/A").is_some());
    }
}
