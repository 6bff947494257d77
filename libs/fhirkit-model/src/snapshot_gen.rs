//! Snapshot generation: merging a profile's differential against its base
//! definition's snapshot to produce a full element list, the way
//! `StructureDefinition.snapshot` is computed when a profile only ships a
//! `differential` (spec's profile-inheritance requirement, §4/§6.1).
//!
//! This is a simplified merge relative to the full FHIR algorithm (it does
//! not walk into `contentReference` targets or re-derive `base.path` book-
//! keeping); it covers what the validator and FHIRPath navigation need:
//! constrained cardinality/type/binding/fixed/pattern/slicing overriding
//! the inherited element, and new slice and sub-element entries inserted
//! at the right position.

use crate::wire::{ElementDefinition, Snapshot};

pub fn generate_snapshot(base: &Snapshot, differential: &Snapshot) -> Snapshot {
    let mut elements: Vec<ElementDefinition> = base.element.clone();

    for diff_elem in &differential.element {
        if let Some(existing) = elements.iter().position(|e| e.key() == diff_elem.key()) {
            elements[existing] = merge_element(&elements[existing], diff_elem);
        } else {
            let insert_at = insertion_point(&elements, diff_elem);
            elements.insert(insert_at, diff_elem.clone());
        }
    }

    Snapshot { element: elements }
}

/// Differential fields override the base; anything the differential
/// leaves `None` is inherited.
fn merge_element(base: &ElementDefinition, diff: &ElementDefinition) -> ElementDefinition {
    ElementDefinition {
        id: diff.id.clone().or_else(|| base.id.clone()),
        path: diff.path.clone(),
        slice_name: diff.slice_name.clone().or_else(|| base.slice_name.clone()),
        slice_is_constraining: diff.slice_is_constraining.or(base.slice_is_constraining),
        short: diff.short.clone().or_else(|| base.short.clone()),
        definition: diff.definition.clone().or_else(|| base.definition.clone()),
        comment: diff.comment.clone().or_else(|| base.comment.clone()),
        min: diff.min.or(base.min),
        max: diff.max.clone().or_else(|| base.max.clone()),
        base: base.base.clone().or_else(|| {
            Some(crate::wire::ElementDefinitionBase {
                path: base.path.clone(),
                min: base.min.unwrap_or(0),
                max: base.max.clone().unwrap_or_else(|| "*".to_string()),
            })
        }),
        content_reference: diff.content_reference.clone().or_else(|| base.content_reference.clone()),
        types: diff.types.clone().or_else(|| base.types.clone()),
        max_length: diff.max_length.or(base.max_length),
        constraint: merge_constraints(&base.constraint, &diff.constraint),
        is_modifier: diff.is_modifier.or(base.is_modifier),
        must_support: diff.must_support.or(base.must_support),
        binding: diff.binding.clone().or_else(|| base.binding.clone()),
        slicing: diff.slicing.clone().or_else(|| base.slicing.clone()),
        extensions: {
            let mut merged = base.extensions.clone();
            merged.extend(diff.extensions.clone());
            merged
        },
    }
}

fn merge_constraints(
    base: &Option<Vec<crate::wire::ElementDefinitionConstraint>>,
    diff: &Option<Vec<crate::wire::ElementDefinitionConstraint>>,
) -> Option<Vec<crate::wire::ElementDefinitionConstraint>> {
    match (base, diff) {
        (Some(b), Some(d)) => {
            let mut merged = b.clone();
            for c in d {
                if !merged.iter().any(|m| m.key == c.key) {
                    merged.push(c.clone());
                }
            }
            Some(merged)
        }
        (Some(b), None) => Some(b.clone()),
        (None, Some(d)) => Some(d.clone()),
        (None, None) => None,
    }
}

/// A new differential-only element (typically a slice) is inserted right
/// after the last existing element that shares its parent path, so slices
/// stay adjacent to their slicing root in declaration order.
fn insertion_point(elements: &[ElementDefinition], new_elem: &ElementDefinition) -> usize {
    let Some(parent) = new_elem.parent_path() else { return elements.len() };
    elements
        .iter()
        .rposition(|e| e.path == parent || e.is_descendant_of(parent))
        .map(|i| i + 1)
        .unwrap_or(elements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ElementDefinitionBase;
    use std::collections::HashMap;

    fn elem(path: &str) -> ElementDefinition {
        ElementDefinition {
            id: None,
            path: path.to_string(),
            slice_name: None,
            slice_is_constraining: None,
            short: None,
            definition: None,
            comment: None,
            min: Some(0),
            max: Some("1".to_string()),
            base: Some(ElementDefinitionBase { path: path.to_string(), min: 0, max: "1".to_string() }),
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
    fn differential_tightens_cardinality() {
        let base = Snapshot { element: vec![elem("Patient"), elem("Patient.name")] };
        let mut tightened = elem("Patient.name");
        tightened.min = Some(1);
        let diff = Snapshot { element: vec![tightened] };

        let merged = generate_snapshot(&base, &diff);
        let name = merged.get("Patient.name").unwrap();
        assert_eq!(name.min, Some(1));
        assert_eq!(name.max.as_deref(), Some("1"));
    }

    #[test]
    fn new_slice_is_inserted_after_parent() {
        let base = Snapshot { element: vec![elem("Patient"), elem("Patient.identifier")] };
        let mut slice = elem("Patient.identifier");
        slice.slice_name = Some("mrn".to_string());
        let diff = Snapshot { element: vec![slice] };

        let merged = generate_snapshot(&base, &diff);
        assert_eq!(merged.element.len(), 3);
        assert_eq!(merged.element[2].key(), "Patient.identifier:mrn");
    }
}
