//! Discriminator compilation (spec §4.4 step 1): turns each
//! `ElementDefinitionDiscriminator` attached to a slicing into a
//! [`Condition`], by walking the slice's own element definitions along
//! the discriminator's dotted path and checking the constraints declared
//! there are specific and consistent enough to discriminate on.

use fhirkit_fhirpath::ConformsToChecker;
use fhirkit_model::json_to_element;
use fhirkit_model::{DiscriminatorType, ElementDefinition, ElementDefinitionDiscriminator, Snapshot};
use std::sync::Arc;

use crate::condition::{Condition, ExistsCondition, PatternCondition, ProfileCondition, TypeCondition, ValueCondition};
use crate::error::{Error, Result};

fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() || path == "$this" {
        return Vec::new();
    }
    path.split('.').map(str::to_string).collect()
}

/// The slice-scoped descendant element definitions at `path` (absolute,
/// anchor-path-prefixed). Scoped by `slice_root.id`'s prefix when present
/// — the convention real FHIR StructureDefinitions use to distinguish
/// `Observation.component:systolic.code` from `...:diastolic.code`, both
/// of which otherwise share the same `path`. Falls back to an unscoped
/// path match when no `id` is available to disambiguate.
fn slice_scoped_candidates<'a>(snapshot: &'a Snapshot, slice_root: &'a ElementDefinition, absolute_path: &str) -> Vec<&'a ElementDefinition> {
    match &slice_root.id {
        Some(slice_id) => snapshot
            .element
            .iter()
            .filter(|e| e.path == absolute_path && e.id.as_deref().map(|id| id.starts_with(slice_id.as_str())).unwrap_or(false))
            .collect(),
        None => snapshot.element.iter().filter(|e| e.path == absolute_path).collect(),
    }
}

pub(crate) fn compile_discriminator(
    snapshot: &Snapshot,
    anchor_path: &str,
    slice_root: &ElementDefinition,
    discriminator: &ElementDefinitionDiscriminator,
    conforms_to_checker: Option<&Arc<dyn ConformsToChecker>>,
) -> Result<Box<dyn Condition>> {
    let relative_path = split_path(&discriminator.path);
    let absolute_path = if discriminator.path.is_empty() || discriminator.path == "$this" {
        anchor_path.to_string()
    } else {
        format!("{anchor_path}.{}", discriminator.path)
    };

    let candidates = if absolute_path == slice_root.path {
        vec![slice_root]
    } else {
        slice_scoped_candidates(snapshot, slice_root, &absolute_path)
    };

    match discriminator.discriminator_type {
        DiscriminatorType::Value => {
            let Some(first) = candidates.first() else {
                return Err(Error::NoCandidates { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            };
            let Some(expected_raw) = first.fixed().cloned() else {
                return Err(Error::MissingFixedValue { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            };
            for c in &candidates[1..] {
                let Some(other) = c.fixed() else {
                    return Err(Error::MissingFixedValue { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
                };
                if *other != expected_raw {
                    return Err(Error::AmbiguousFixedValue { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
                }
            }
            Ok(Box::new(ValueCondition { path: relative_path, expected: json_to_element(expected_raw) }))
        }

        DiscriminatorType::Pattern => {
            let mut pattern_values: Vec<serde_json::Value> = candidates.iter().filter_map(|c| c.pattern().cloned()).collect();
            if pattern_values.is_empty() {
                return Err(Error::NoCandidates { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            }
            pattern_values.dedup();
            let patterns: Vec<_> = pattern_values.into_iter().map(json_to_element).collect();
            // Every collected pattern must be consistent with every other
            // one — each must match the others as a subtree pattern —
            // before the set can discriminate anything.
            for i in 0..patterns.len() {
                for j in 0..patterns.len() {
                    if i != j && !patterns[i].matches_pattern(&patterns[j]) {
                        return Err(Error::AmbiguousPattern { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
                    }
                }
            }
            Ok(Box::new(PatternCondition { path: relative_path, patterns }))
        }

        DiscriminatorType::Exists => {
            if candidates.is_empty() {
                return Err(Error::NoCandidates { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            }
            let must_exist_votes: Vec<bool> = candidates
                .iter()
                .filter_map(|c| {
                    if c.min.unwrap_or(0) >= 1 {
                        Some(true)
                    } else if c.max.as_deref() == Some("0") {
                        Some(false)
                    } else {
                        None
                    }
                })
                .collect();
            let Some(&must_exist) = must_exist_votes.first() else {
                return Err(Error::AmbiguousExists { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            };
            if must_exist_votes.iter().any(|v| *v != must_exist) {
                return Err(Error::AmbiguousExists { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            }
            Ok(Box::new(ExistsCondition { path: relative_path, must_exist }))
        }

        DiscriminatorType::Type => {
            let codes: std::collections::BTreeSet<&str> = candidates.iter().flat_map(|c| c.type_codes()).collect();
            if codes.is_empty() {
                return Err(Error::NoCandidates { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            }
            if codes.len() > 1 {
                return Err(Error::AmbiguousType { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            }
            let expected_type = (*codes.iter().next().unwrap()).to_string();
            Ok(Box::new(TypeCondition { path: relative_path, expected_type }))
        }

        DiscriminatorType::Profile => {
            let mut profile_urls: Vec<String> = candidates
                .iter()
                .flat_map(|c| c.types.iter().flatten())
                .flat_map(|t| t.profile.iter().flatten())
                .cloned()
                .collect();
            profile_urls.sort();
            profile_urls.dedup();
            if profile_urls.is_empty() {
                return Err(Error::NoCandidates { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            }
            let Some(checker) = conforms_to_checker else {
                return Err(Error::NoCandidates { path: anchor_path.to_string(), discriminator_path: discriminator.path.clone() });
            };
            Ok(Box::new(ProfileCondition { path: relative_path, profile_urls, checker: checker.clone() }))
        }
    }
}
