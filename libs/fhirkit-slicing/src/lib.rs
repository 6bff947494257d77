//! Compiles FHIR slicing discriminators into predicates and classifies
//! array members into slices (spec component F). Built on top of
//! `fhirkit-fhirpath` (for the choice-type-aware child walk and the
//! `conformsTo`-style checker seam) and consumed by `fhirkit-validator`,
//! never the other way around.

pub mod classify;
pub mod condition;
pub mod discriminator;
pub mod error;

pub use classify::{compile_slicing, ClassificationResult, CompiledSlice, CompiledSlicing, SliceAssignment, SliceIssue};
pub use condition::Condition;
pub use error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_fhirpath::EvalContext;
    use fhirkit_model::json_to_element;
    use fhirkit_model::{ElementDefinition, ElementDefinitionDiscriminator, ElementDefinitionSlicing, DiscriminatorType, Snapshot, SlicingRules};
    use fhirkit_model::JsonNode;
    use fhirkit_values::Element;
    use std::collections::HashMap;

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

    fn element_from_json(text: &str) -> Element {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        Element::structured(JsonNode::new(value))
    }

    #[test]
    fn classifies_by_fixed_value_under_open_rules() {
        let anchor = minimal("Observation.component");
        let mut slice_a = minimal("Observation.component");
        slice_a.id = Some("Observation.component:a".into());
        slice_a.slice_name = Some("a".into());
        let mut slice_a_system = minimal("Observation.component.system");
        slice_a_system.id = Some("Observation.component:a.system".into());
        slice_a_system.extensions.insert("fixedString".into(), serde_json::json!("A"));

        let mut slice_b = minimal("Observation.component");
        slice_b.id = Some("Observation.component:b".into());
        slice_b.slice_name = Some("b".into());
        let mut slice_b_system = minimal("Observation.component.system");
        slice_b_system.id = Some("Observation.component:b.system".into());
        slice_b_system.extensions.insert("fixedString".into(), serde_json::json!("B"));

        let snapshot = Snapshot { element: vec![anchor, slice_a, slice_a_system, slice_b, slice_b_system] };
        let slicing = ElementDefinitionSlicing {
            discriminator: Some(vec![ElementDefinitionDiscriminator { discriminator_type: DiscriminatorType::Value, path: "system".into() }]),
            description: None,
            ordered: Some(false),
            rules: SlicingRules::Open,
        };

        let compiled = compile_slicing(&snapshot, "Observation.component", &slicing, None).unwrap();

        let members = vec![
            element_from_json(r#"{"system":"A","code":"1"}"#),
            element_from_json(r#"{"system":"B","code":"2"}"#),
            element_from_json(r#"{"system":"C","code":"3"}"#),
        ];
        let ctx = EvalContext::new(members[0].clone());
        let result = compiled.classify(&ctx, &members).unwrap();

        assert_eq!(result.assignments[0], SliceAssignment::Slice(0));
        assert_eq!(result.assignments[1], SliceAssignment::Slice(1));
        assert_eq!(result.assignments[2], SliceAssignment::Unmatched);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn unmatched_member_is_an_error_under_closed_rules() {
        let anchor = minimal("Observation.component");
        let mut slice_a = minimal("Observation.component");
        slice_a.id = Some("Observation.component:a".into());
        slice_a.slice_name = Some("a".into());
        let mut slice_a_system = minimal("Observation.component.system");
        slice_a_system.id = Some("Observation.component:a.system".into());
        slice_a_system.extensions.insert("fixedString".into(), serde_json::json!("A"));

        let snapshot = Snapshot { element: vec![anchor, slice_a, slice_a_system] };
        let slicing = ElementDefinitionSlicing {
            discriminator: Some(vec![ElementDefinitionDiscriminator { discriminator_type: DiscriminatorType::Value, path: "system".into() }]),
            description: None,
            ordered: Some(false),
            rules: SlicingRules::Closed,
        };

        let compiled = compile_slicing(&snapshot, "Observation.component", &slicing, None).unwrap();
        let members = vec![element_from_json(r#"{"system":"A","code":"1"}"#), element_from_json(r#"{"system":"C","code":"3"}"#)];
        let ctx = EvalContext::new(members[0].clone());
        let result = compiled.classify(&ctx, &members).unwrap();

        assert_eq!(result.issues, vec![SliceIssue::UnmatchedClosed { member_index: 1 }]);
    }

    #[test]
    fn value_discriminator_requires_fixed_on_every_slice() {
        let anchor = minimal("Observation.component");
        let mut slice_a = minimal("Observation.component");
        slice_a.id = Some("Observation.component:a".into());
        slice_a.slice_name = Some("a".into());
        // no fixed value on `system` for this slice

        let snapshot = Snapshot { element: vec![anchor, slice_a] };
        let slicing = ElementDefinitionSlicing {
            discriminator: Some(vec![ElementDefinitionDiscriminator { discriminator_type: DiscriminatorType::Value, path: "system".into() }]),
            description: None,
            ordered: Some(false),
            rules: SlicingRules::Open,
        };

        let err = compile_slicing(&snapshot, "Observation.component", &slicing, None).unwrap_err();
        assert!(matches!(err, Error::NoCandidates { .. }));
        let _ = json_to_element(serde_json::json!("unused"));
    }
}
