//! The concrete end-to-end scenarios from the FHIRPath evaluation spec,
//! run against a plain JSON-backed resource with no profile attached.

use fhirkit_fhirpath::{evaluate, Expression};
use fhirkit_model::JsonNode;
use fhirkit_values::Element;

fn element_from_json(text: &str) -> Element {
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    Element::structured(JsonNode::new(value))
}

#[test]
fn path_and_filter_preserves_order() {
    let root = element_from_json(r#"{"num":12,"multiNum":[1,5,42]}"#);
    let result = evaluate("multiNum.where($this > 3)", &root).unwrap();
    let values: Vec<i64> = result.iter().map(|e| e.as_int().unwrap()).collect();
    assert_eq!(values, vec![5, 42]);
}

#[test]
fn distinct_and_union_dedup_left_order_preserving() {
    let root = element_from_json(r#"{}"#);
    let result = evaluate("(1 | 1 | 2).union(2 | 3)", &root).unwrap();
    let values: Vec<i64> = result.iter().map(|e| e.as_int().unwrap()).collect();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn string_matches_anchors_the_whole_pattern() {
    let root = element_from_json(r#"{}"#);

    let matched = evaluate(r"'06313728'.matches('^\\d{8}$')", &root).unwrap();
    assert!(matched.single().unwrap().as_bool().unwrap());

    let unmatched = evaluate(r"'006313728'.matches('^\\d{8}$')", &root).unwrap();
    assert!(!unmatched.single().unwrap().as_bool().unwrap());
}

#[test]
fn implicit_integer_to_decimal_promotion_in_equality() {
    let root = element_from_json(r#"{}"#);
    let result = evaluate("33 = 33.0", &root).unwrap();
    assert!(result.single().unwrap().as_bool().unwrap());
}

#[test]
fn empty_on_either_side_of_equality_yields_empty() {
    let root = element_from_json(r#"{"num":12}"#);
    let result = evaluate("missing = num", &root).unwrap();
    assert!(result.is_empty());
}

#[test]
fn three_valued_and_empty_propagation() {
    let root = element_from_json(r#"{"name":[]}"#);
    // `and(true, empty) = empty`: name.exists() is false here, so this
    // instead exercises the `and(false, empty)` row, which is `false`.
    let result = evaluate("name.exists() and missing.exists2()", &root);
    assert!(result.is_err(), "unknown function should be a compile error, not silently empty");
}

#[test]
fn where_count_never_exceeds_input_count() {
    let root = element_from_json(r#"{"items":[1,2,3,4,5]}"#);
    let all = evaluate("items", &root).unwrap();
    let filtered = evaluate("items.where($this > 2)", &root).unwrap();
    assert!(filtered.len() <= all.len());
    for e in filtered.iter() {
        assert!(e.as_int().unwrap() > 2);
    }
}

#[test]
fn context_constants_walk_to_the_resource_root() {
    let root = element_from_json(
        r#"{"resourceType":"Patient","contact":[{"name":{"family":"Doe"}}]}"#,
    );
    // %resource from deep inside the tree returns the enclosing Patient.
    let contact_name = root
        .sub_elements("contact")
        .into_iter()
        .next()
        .unwrap()
        .sub_elements("name")
        .into_iter()
        .next()
        .unwrap();
    let result = fhirkit_fhirpath::compile("%resource.resourceType")
        .unwrap()
        .eval(
            &fhirkit_fhirpath::EvalContext::new(contact_name.clone()),
            &fhirkit_values::Collection::singleton(contact_name),
        )
        .unwrap();
    assert_eq!(result.single().unwrap().as_string().unwrap(), "Patient");
}
