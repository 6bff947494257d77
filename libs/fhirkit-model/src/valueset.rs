//! ValueSet finalization (spec §4.1 post-load pass 2): combining
//! `compose.include`/`compose.exclude`/`expansion.contains` rules against
//! `CodeSystem`s into a concrete `set<Code>` the validator can query
//! against a binding without re-walking the compose rules on every
//! instance check.

use crate::wire::{CodeSystem, CodeSystemConcept, ValueSet, ValueSetFilter, ValueSetInclude};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// A `(system, code)` pair, normalized for the owning code system's
/// declared case sensitivity (`CodeSystem.caseSensitive = false` lowercases
/// both sides before comparison — FHIR's own default only waives case for
/// `code`-typed codes that opt in this way).
#[derive(Debug, Clone, Default)]
pub struct FinalizedValueSet {
    codes: HashSet<(Option<String>, String)>,
    /// Systems whose codes were folded to lowercase when stored (spec
    /// §3.2's `Code = (code, case_sensitive, code_system_url)` — kept
    /// alongside `codes` rather than per-entry so `contains_code` knows
    /// to fold the query the same way a stored entry was folded).
    case_insensitive_systems: HashSet<String>,
}

impl FinalizedValueSet {
    pub fn contains_code(&self, system: Option<&str>, code: &str) -> bool {
        let folded = system.is_some_and(|s| self.case_insensitive_systems.contains(s));
        let normalized_code = if folded { code.to_lowercase() } else { code.to_string() };
        let key = normalize(system, &normalized_code);
        self.codes.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

fn normalize(system: Option<&str>, code: &str) -> (Option<String>, String) {
    (system.map(str::to_string), code.to_string())
}

/// Finalize `vs` against the full set of loaded code systems (keyed by
/// `url`), per spec §4.1 pass 2. Referenced CodeSystems that aren't loaded
/// are skipped with a warning rather than failing the whole value set —
/// the repository's verification pass is where an unresolved reference at
/// `required` binding strength becomes a hard failure.
pub fn finalize_value_set(vs: &ValueSet, code_systems: &HashMap<String, CodeSystem>) -> FinalizedValueSet {
    let mut codes: HashSet<(Option<String>, String)> = HashSet::new();
    let mut case_insensitive_systems: HashSet<String> = HashSet::new();

    if let Some(compose) = &vs.compose {
        for include in &compose.include {
            if let Some(system) = &include.system {
                if !code_systems.get(system).and_then(|cs| cs.case_sensitive).unwrap_or(true) {
                    case_insensitive_systems.insert(system.clone());
                }
            }
            let included = resolve_include(include, code_systems, &vs.url);
            codes.extend(included);
        }
        if let Some(excludes) = &compose.exclude {
            for exclude in excludes {
                let excluded = resolve_include(exclude, code_systems, &vs.url);
                for key in excluded {
                    codes.remove(&key);
                }
            }
        }
    }

    if let Some(expansion) = &vs.expansion {
        if let Some(contains) = &expansion.contains {
            collect_expansion(contains, &mut codes);
        }
    }

    FinalizedValueSet { codes, case_insensitive_systems }
}

fn collect_expansion(contains: &[crate::wire::ValueSetExpansionContains], out: &mut HashSet<(Option<String>, String)>) {
    for c in contains {
        if let Some(code) = &c.code {
            out.insert((c.system.clone(), code.clone()));
        }
        if let Some(nested) = &c.contains {
            collect_expansion(nested, out);
        }
    }
}

fn resolve_include(include: &ValueSetInclude, code_systems: &HashMap<String, CodeSystem>, vs_url: &str) -> HashSet<(Option<String>, String)> {
    let mut out = HashSet::new();

    let system = match &include.system {
        Some(s) => s,
        None => {
            // A bare `valueSet` import with no `system` isn't resolved here
            // (would require recursing into another finalized value set);
            // an explicit concept list still works without a system.
            if let Some(concepts) = &include.concept {
                for c in concepts {
                    out.insert((None, c.code.clone()));
                }
            }
            return out;
        }
    };

    let Some(code_system) = code_systems.get(system) else {
        warn!(%vs_url, %system, "value set include references an unloaded code system");
        return out;
    };

    let case_sensitive = code_system.case_sensitive.unwrap_or(true);

    if let Some(concepts) = &include.concept {
        for c in concepts {
            out.insert(normalized_pair(system, &c.code, case_sensitive));
        }
    }

    if let Some(filters) = &include.filter {
        for filter in filters {
            apply_filter(code_system, filter, system, case_sensitive, &mut out);
        }
    }

    // No codes and no filters: include every concept in the system.
    if include.concept.is_none() && include.filter.is_none() {
        if let Some(concepts) = &code_system.concept {
            collect_all(concepts, system, case_sensitive, &mut out);
        }
    }

    out
}

fn normalized_pair(system: &str, code: &str, case_sensitive: bool) -> (Option<String>, String) {
    if case_sensitive {
        (Some(system.to_string()), code.to_string())
    } else {
        (Some(system.to_string()), code.to_lowercase())
    }
}

fn collect_all(concepts: &[CodeSystemConcept], system: &str, case_sensitive: bool, out: &mut HashSet<(Option<String>, String)>) {
    for c in concepts {
        out.insert(normalized_pair(system, &c.code, case_sensitive));
        if let Some(nested) = &c.concept {
            collect_all(nested, system, case_sensitive, out);
        }
    }
}

/// `is-a`/`is-not-a`/`=` filters over `concept`/`parent` properties (spec
/// §4.1 pass 2). Hierarchy is read off `CodeSystem.concept[].concept[]`
/// nesting — a child concept `is-a` every ancestor along its containment
/// path, which is how FHIR's built-in code systems express subsumption
/// without a separate `parent` property list.
fn apply_filter(code_system: &CodeSystem, filter: &ValueSetFilter, system: &str, case_sensitive: bool, out: &mut HashSet<(Option<String>, String)>) {
    let Some(concepts) = &code_system.concept else { return };
    match filter.op.as_str() {
        "is-a" => {
            if let Some(descendants) = find_with_descendants(concepts, &filter.value) {
                for code in descendants {
                    out.insert(normalized_pair(system, &code, case_sensitive));
                }
            } else {
                debug!(value = %filter.value, "is-a filter value not found in code system");
            }
        }
        "is-not-a" => {
            let excluded: HashSet<String> = find_with_descendants(concepts, &filter.value).unwrap_or_default().into_iter().collect();
            let mut all = HashSet::new();
            collect_all(concepts, system, case_sensitive, &mut all);
            for (sys, code) in all {
                if !excluded.contains(&code) {
                    out.insert((sys, code));
                }
            }
        }
        "=" => {
            out.insert(normalized_pair(system, &filter.value, case_sensitive));
        }
        other => {
            debug!(op = %other, "unsupported value set filter operator, ignored");
        }
    }
}

/// `code` plus every transitive descendant under it in the concept tree,
/// or `None` if `code` doesn't appear at all.
fn find_with_descendants(concepts: &[CodeSystemConcept], code: &str) -> Option<Vec<String>> {
    for c in concepts {
        if c.code == code {
            let mut out = vec![c.code.clone()];
            if let Some(nested) = &c.concept {
                collect_codes(nested, &mut out);
            }
            return Some(out);
        }
        if let Some(nested) = &c.concept {
            if let Some(found) = find_with_descendants(nested, code) {
                return Some(found);
            }
        }
    }
    None
}

fn collect_codes(concepts: &[CodeSystemConcept], out: &mut Vec<String>) {
    for c in concepts {
        out.push(c.code.clone());
        if let Some(nested) = &c.concept {
            collect_codes(nested, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CodeSystemContentMode, PublicationStatus, ValueSetCompose};

    fn code_system_with_hierarchy() -> CodeSystem {
        CodeSystem {
            resource_type: "CodeSystem".into(),
            id: None,
            url: "http://example.org/cs".into(),
            version: None,
            name: None,
            status: PublicationStatus::Active,
            publisher: None,
            contact: None,
            description: None,
            case_sensitive: Some(false),
            value_set: None,
            content: CodeSystemContentMode::Complete,
            count: None,
            concept: Some(vec![CodeSystemConcept {
                code: "x".into(),
                display: None,
                definition: None,
                concept: Some(vec![CodeSystemConcept { code: "y".into(), display: None, definition: None, concept: None }]),
            }]),
            extensions: Default::default(),
        }
    }

    fn value_set_with_is_a_filter() -> ValueSet {
        ValueSet {
            resource_type: "ValueSet".into(),
            id: None,
            url: "http://example.org/vs".into(),
            version: None,
            name: None,
            title: None,
            status: crate::wire::PublicationStatus::Active,
            experimental: None,
            publisher: None,
            contact: None,
            description: None,
            use_context: None,
            immutable: None,
            compose: Some(ValueSetCompose {
                inactive: None,
                include: vec![ValueSetInclude {
                    system: Some("http://example.org/cs".into()),
                    version: None,
                    concept: None,
                    filter: Some(vec![ValueSetFilter { property: "concept".into(), op: "is-a".into(), value: "x".into() }]),
                    value_set: None,
                }],
                exclude: None,
            }),
            expansion: None,
            extensions: Default::default(),
        }
    }

    #[test]
    fn is_a_filter_includes_descendants_case_insensitively() {
        let cs = code_system_with_hierarchy();
        let mut code_systems = HashMap::new();
        code_systems.insert(cs.url.clone(), cs);
        let vs = value_set_with_is_a_filter();

        let finalized = finalize_value_set(&vs, &code_systems);
        assert!(finalized.contains_code(Some("http://example.org/cs"), "y"));
        assert!(finalized.contains_code(Some("http://example.org/cs"), "Y"));
        assert!(!finalized.contains_code(Some("http://example.org/cs"), "q"));
    }

    #[test]
    fn explicit_concept_list_is_included_verbatim() {
        let mut vs = value_set_with_is_a_filter();
        vs.compose.as_mut().unwrap().include[0].filter = None;
        vs.compose.as_mut().unwrap().include[0].concept = Some(vec![crate::wire::ValueSetConcept { code: "y".into(), display: None }]);
        let cs = code_system_with_hierarchy();
        let mut code_systems = HashMap::new();
        code_systems.insert(cs.url.clone(), cs);

        let finalized = finalize_value_set(&vs, &code_systems);
        assert!(finalized.contains_code(Some("http://example.org/cs"), "y"));
        assert!(!finalized.contains_code(Some("http://example.org/cs"), "x"));
    }
}
