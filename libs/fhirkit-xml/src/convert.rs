//! FHIR XML to JSON conversion, following the official HL7 JSON/XML
//! mapping: the root element name becomes `resourceType`, primitive values
//! live in a `value` attribute, primitive metadata (`id`, `extension`)
//! rides along in a sibling `_field` property, and repeated elements
//! become JSON arrays with a parallel `_field` array for per-item
//! metadata.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Parse a FHIR XML document into the equivalent JSON `Value`, as if the
/// same resource had been sent as `application/fhir+json`.
pub fn xml_to_value(input: &str) -> Result<Value> {
    let doc = roxmltree::Document::parse(input)?;
    let root = doc.root_element();
    if !root.is_element() {
        return Err(Error::EmptyDocument);
    }

    let mut map = Map::new();
    map.insert("resourceType".to_string(), Value::String(root.tag_name().name().to_string()));
    if let Some(id) = root.attribute("id") {
        map.insert("id".to_string(), Value::String(id.to_string()));
    }

    for child in root.children().filter(|n| n.is_element()) {
        process_child(input, &mut map, &child);
    }

    Ok(Value::Object(map))
}

fn process_child(source: &str, target: &mut Map<String, Value>, node: &roxmltree::Node) {
    let name = node.tag_name().name().to_string();
    let (value, meta) = element_to_value(source, node);
    insert_property(target, &name, value, meta);
}

fn element_to_value(source: &str, node: &roxmltree::Node) -> (Value, Option<Value>) {
    if node.tag_name().namespace().is_some_and(|ns| ns == XHTML_NS) {
        return (Value::String(source[node.range()].to_string()), None);
    }

    if let Some(val) = node.attribute("value") {
        let mut meta_map = Map::new();
        if let Some(id) = node.attribute("id") {
            meta_map.insert("id".to_string(), Value::String(id.to_string()));
        }
        let extensions: Vec<Value> = node
            .children()
            .filter(|c| c.is_element() && c.tag_name().name() == "extension")
            .map(|c| element_to_value(source, &c).0)
            .collect();
        if !extensions.is_empty() {
            meta_map.insert("extension".to_string(), Value::Array(extensions));
        }
        let meta = (!meta_map.is_empty()).then(|| Value::Object(meta_map));
        return (parse_primitive(val), meta);
    }

    let mut obj = Map::new();
    if let Some(id) = node.attribute("id") {
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }
    for child in node.children().filter(|c| c.is_element()) {
        process_child(source, &mut obj, &child);
    }
    (Value::Object(obj), None)
}

/// Fold a newly parsed child into `map`, promoting a repeated field to an
/// array and keeping its `_field` metadata array index-aligned.
fn insert_property(map: &mut Map<String, Value>, name: &str, value: Value, meta: Option<Value>) {
    match map.entry(name.to_string()) {
        serde_json::map::Entry::Vacant(v) => {
            v.insert(value);
        }
        serde_json::map::Entry::Occupied(mut o) => match o.get_mut() {
            Value::Array(arr) => arr.push(value),
            existing => {
                let old = existing.take();
                *existing = Value::Array(vec![old, value]);
            }
        },
    }

    let Some(meta) = meta else { return };
    let meta_key = format!("_{name}");
    let value_count = match map.get(name) {
        Some(Value::Array(arr)) => arr.len(),
        Some(_) => 1,
        None => 0,
    };
    let value_is_array = matches!(map.get(name), Some(Value::Array(_)));

    match map.entry(meta_key) {
        serde_json::map::Entry::Vacant(v) => {
            if value_is_array {
                let mut arr = vec![Value::Null; value_count.saturating_sub(1)];
                arr.push(meta);
                v.insert(Value::Array(arr));
            } else {
                v.insert(meta);
            }
        }
        serde_json::map::Entry::Occupied(mut o) => match o.get_mut() {
            Value::Array(arr) => {
                arr.resize(value_count.saturating_sub(1), Value::Null);
                arr.push(meta);
            }
            existing => *existing = meta,
        },
    }
}

fn parse_primitive(input: &str) -> Value {
    match input {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => input.parse::<i64>().map(|i| Value::Number(i.into())).unwrap_or_else(|_| Value::String(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_simple_patient() {
        let xml = r#"
        <Patient xmlns="http://hl7.org/fhir">
            <id value="p1"/>
            <active value="true"/>
            <name>
                <family value="Everyman"/>
                <given value="Adam"/>
            </name>
        </Patient>
        "#;

        let value = xml_to_value(xml).unwrap();
        assert_eq!(value["resourceType"], "Patient");
        assert_eq!(value["id"], "p1");
        assert_eq!(value["active"], true);
        assert_eq!(value["name"]["family"], "Everyman");
    }

    #[test]
    fn repeated_elements_become_arrays() {
        let xml = r#"
        <Patient xmlns="http://hl7.org/fhir">
            <name><family value="A"/></name>
            <name><family value="B"/></name>
        </Patient>
        "#;
        let value = xml_to_value(xml).unwrap();
        assert!(value["name"].is_array());
        assert_eq!(value["name"][1]["family"], "B");
    }

    #[test]
    fn primitive_metadata_survives() {
        let xml = r#"
        <Patient xmlns="http://hl7.org/fhir">
            <birthDate value="1974-12-25" id="bd1"/>
        </Patient>
        "#;
        let value = xml_to_value(xml).unwrap();
        assert_eq!(value["birthDate"], "1974-12-25");
        assert_eq!(value["_birthDate"]["id"], "bd1");
    }
}
