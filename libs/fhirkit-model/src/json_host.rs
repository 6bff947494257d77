//! [`fhirkit_values::HostNode`] adapter over `serde_json::Value` — the
//! resource DOM every loader in this crate (and the XML loader, which
//! parses into JSON first) eventually produces.

use fhirkit_values::temporal::{DateTimeValue, DateValue, TimeValue};
use fhirkit_values::{Element, HostNode, PrimitiveValue};
use serde_json::Value;
use std::rc::Rc;
use tracing::trace;

/// Converts a raw JSON value (e.g. an `ElementDefinition.fixed[x]` or
/// `.pattern[x]` payload) into the `Element` it represents, so it can be
/// compared against a runtime element with [`fhirkit_values::Element::equals`]
/// or [`fhirkit_values::Element::matches_pattern`]. Scalars are classified by
/// sniffing (no type hint is available for a bare fixed/pattern value);
/// objects and arrays become `Structured` elements backed by a `JsonNode`.
pub fn json_to_element(value: Value) -> Element {
    let node = JsonNode::new(value);
    match node.primitive() {
        Some(PrimitiveValue::Boolean(b)) => Element::boolean(b),
        Some(PrimitiveValue::Integer(i)) => Element::integer(i),
        Some(PrimitiveValue::Decimal(d)) => Element::decimal(d),
        Some(PrimitiveValue::String(s)) => Element::string(s),
        Some(PrimitiveValue::Date(d)) => Element::date(d),
        Some(PrimitiveValue::Time(t)) => Element::time(t),
        Some(PrimitiveValue::DateTime(dt)) => Element::datetime(dt),
        Some(PrimitiveValue::Quantity(q)) => Element::quantity(q),
        None => Element::structured(node),
    }
}

/// A JSON-backed node. `hint` is a FHIR primitive type code (`"boolean"`,
/// `"dateTime"`, ...) supplied by a profile-aware caller; without one,
/// leaves are classified by sniffing the JSON shape and, for strings, by
/// trying each temporal parser in turn before giving up and reporting a
/// plain `String`.
#[derive(Debug, Clone)]
pub struct JsonNode {
    value: Value,
    hint: Option<String>,
}

impl JsonNode {
    pub fn new(value: Value) -> Rc<Self> {
        Rc::new(Self { value, hint: None })
    }

    pub fn with_hint(value: Value, hint: impl Into<String>) -> Rc<Self> {
        Rc::new(Self { value, hint: Some(hint.into()) })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl HostNode for JsonNode {
    fn primitive(&self) -> Option<PrimitiveValue> {
        if self.value.is_object() || self.value.is_array() || self.value.is_null() {
            return None;
        }
        if let Some(hint) = &self.hint {
            return primitive_from_hint(&self.value, hint);
        }
        sniff_primitive(&self.value)
    }

    fn child_names(&self) -> Vec<String> {
        match &self.value {
            Value::Object(map) => map.keys().filter(|k| !k.starts_with('_')).cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn children(&self, name: &str) -> Vec<Rc<dyn HostNode>> {
        let Value::Object(map) = &self.value else { return Vec::new() };
        let Some(child) = map.get(name) else { return Vec::new() };
        match child {
            Value::Array(items) => items
                .iter()
                .cloned()
                .map(|v| JsonNode::new(v) as Rc<dyn HostNode>)
                .collect(),
            Value::Null => Vec::new(),
            other => vec![JsonNode::new(other.clone()) as Rc<dyn HostNode>],
        }
    }

    fn resource_type(&self) -> Option<String> {
        self.value.get("resourceType")?.as_str().map(String::from)
    }

    fn is_container_resource(&self) -> bool {
        self.resource_type().as_deref() == Some("Bundle")
    }

    fn meta_profiles(&self) -> Vec<String> {
        self.value
            .get("meta")
            .and_then(|m| m.get("profile"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }
}

fn primitive_from_hint(value: &Value, hint: &str) -> Option<PrimitiveValue> {
    match hint {
        "boolean" => value.as_bool().map(PrimitiveValue::Boolean),
        "integer" | "positiveInt" | "unsignedInt" => value.as_i64().map(PrimitiveValue::Integer),
        "decimal" => {
            let text = match value {
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                _ => return None,
            };
            fhirkit_values::decimal::parse(&text).map(PrimitiveValue::Decimal)
        }
        "date" => value.as_str().and_then(DateValue::parse).map(PrimitiveValue::Date),
        "time" => value.as_str().and_then(TimeValue::parse).map(PrimitiveValue::Time),
        "dateTime" | "instant" => value
            .as_str()
            .and_then(DateTimeValue::parse)
            .map(PrimitiveValue::DateTime),
        _ => value.as_str().map(|s| PrimitiveValue::String(s.to_string())),
    }
}

fn sniff_primitive(value: &Value) -> Option<PrimitiveValue> {
    match value {
        Value::Bool(b) => Some(PrimitiveValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(PrimitiveValue::Integer(i))
            } else {
                fhirkit_values::decimal::parse(&n.to_string()).map(PrimitiveValue::Decimal)
            }
        }
        Value::String(s) => {
            if let Some(dt) = DateTimeValue::parse(s) {
                if s.contains('T') || s.len() == 4 || s.len() == 7 || s.len() == 10 {
                    trace!(%s, "sniffed string as DateTime/Date");
                    return Some(PrimitiveValue::DateTime(dt));
                }
            }
            if let Some(t) = TimeValue::parse(s) {
                if s.contains(':') && !s.contains('-') {
                    return Some(PrimitiveValue::Time(t));
                }
            }
            Some(PrimitiveValue::String(s.clone()))
        }
        _ => None,
    }
}
