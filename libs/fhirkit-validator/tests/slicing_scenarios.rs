//! Validator-level rendition of the slicing-by-fixed-value end-to-end
//! scenario: a `Coding` list sliced on `system`, with two fixed-value
//! slices, checked under both `open` and `closed` slicing rules.

use std::sync::Arc;

use fhirkit_model::wire::{
    ElementDefinition, ElementDefinitionDiscriminator, ElementDefinitionSlicing, ElementDefinitionType, DiscriminatorType, PublicationStatus,
    Snapshot, SlicingRules, StructureDefinitionKind,
};
use fhirkit_model::{JsonNode, Repository, RepositoryBuilder, StructureDefinition};
use fhirkit_validator::{IssueCode, ValidatorOptions, Validator};
use fhirkit_values::Element;

fn bare(path: &str) -> ElementDefinition {
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
        extensions: Default::default(),
    }
}

fn fixed_string_element(id: &str, path: &str, value: &str) -> ElementDefinition {
    let mut e = bare(path);
    e.id = Some(id.to_string());
    e.types = Some(vec![ElementDefinitionType { code: "string".into(), profile: None, target_profile: None, aggregation: None }]);
    e.extensions.insert("fixedString".into(), serde_json::json!(value));
    e
}

fn element_from_json(text: &str) -> Element {
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    Element::structured(JsonNode::new(value))
}

/// A minimal `Observation`-shaped profile: `Observation.component` is an
/// array sliced on `system`, with two slices whose `system` is fixed to
/// `"A"` and `"B"` respectively.
fn observation_profile(rules: SlicingRules) -> StructureDefinition {
    let mut component = bare("Observation.component");
    component.min = Some(0);
    component.max = Some("*".to_string());
    component.types = Some(vec![ElementDefinitionType { code: "BackboneElement".into(), profile: None, target_profile: None, aggregation: None }]);
    component.slicing = Some(ElementDefinitionSlicing {
        discriminator: Some(vec![ElementDefinitionDiscriminator { discriminator_type: DiscriminatorType::Value, path: "system".into() }]),
        description: None,
        ordered: Some(false),
        rules,
    });

    let mut slice_a = bare("Observation.component");
    slice_a.id = Some("Observation.component:a".into());
    slice_a.slice_name = Some("a".into());
    slice_a.min = Some(0);
    slice_a.max = Some("1".to_string());
    let slice_a_system = fixed_string_element("Observation.component:a.system", "Observation.component.system", "A");

    let mut slice_b = bare("Observation.component");
    slice_b.id = Some("Observation.component:b".into());
    slice_b.slice_name = Some("b".into());
    slice_b.min = Some(0);
    slice_b.max = Some("1".to_string());
    let slice_b_system = fixed_string_element("Observation.component:b.system", "Observation.component.system", "B");

    StructureDefinition {
        resource_type: "StructureDefinition".into(),
        id: None,
        url: "http://example.org/SlicedObservation".into(),
        version: None,
        name: "SlicedObservation".into(),
        title: None,
        status: PublicationStatus::Active,
        experimental: None,
        date: None,
        publisher: None,
        contact: None,
        description: None,
        use_context: None,
        fhir_version: None,
        mapping: None,
        kind: StructureDefinitionKind::Resource,
        is_abstract: false,
        context: None,
        type_: "Observation".into(),
        base_definition: None,
        derivation: None,
        snapshot: Some(Snapshot {
            element: vec![bare("Observation"), component, slice_a, slice_a_system, slice_b, slice_b_system],
        }),
        differential: None,
        extensions: Default::default(),
    }
}

fn repository_for(rules: SlicingRules) -> Arc<Repository> {
    let mut builder = RepositoryBuilder::default();
    builder.add_structure_definition(observation_profile(rules));
    builder.finalize().unwrap()
}

const OBSERVATION_JSON: &str = r#"{
    "resourceType": "Observation",
    "component": [
        {"system": "A", "code": "1"},
        {"system": "B", "code": "2"},
        {"system": "C", "code": "3"}
    ]
}"#;

#[test]
fn open_slicing_allows_an_unmatched_member() {
    let repository = repository_for(SlicingRules::Open);
    let validator = Validator::new(repository, ValidatorOptions::for_profile("http://example.org/SlicedObservation")).unwrap();
    let observation = element_from_json(OBSERVATION_JSON);

    let results = validator.validate(&observation);

    assert!(
        !results.issues.iter().any(|i| i.code == IssueCode::Structure || i.code == IssueCode::Invalid),
        "open slicing must not error on an unmatched member: {:?}",
        results.issues
    );
}

#[test]
fn closed_slicing_reports_the_unmatched_member() {
    let repository = repository_for(SlicingRules::Closed);
    let validator = Validator::new(repository, ValidatorOptions::for_profile("http://example.org/SlicedObservation")).unwrap();
    let observation = element_from_json(OBSERVATION_JSON);

    let results = validator.validate(&observation);

    assert!(
        results.issues.iter().any(|i| i.path.contains("component")),
        "closed slicing must report the unmatched component: {:?}",
        results.issues
    );
}
