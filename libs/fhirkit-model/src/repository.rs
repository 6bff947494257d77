//! The structure repository: every `StructureDefinition`, `ValueSet`, and
//! `CodeSystem` the validator and FHIRPath engine have been loaded with,
//! keyed by canonical URL and linked (profile inheritance resolved via
//! `baseDefinition` chains into a generated snapshot) so navigation never
//! needs to re-resolve a reference at evaluation time. Slice-scoped
//! sub-elements are addressed by `id` prefix at slicing-compile time
//! (`fhirkit-slicing`) rather than split into separate synthesized
//! profiles.
//!
//! Immutable and `Arc`-shared once finalized: many validations can run
//! against the same repository concurrently.

use crate::error::{Error, Result};
use crate::snapshot_gen::generate_snapshot;
use crate::type_info::is_primitive_type;
use crate::valueset::{finalize_value_set, FinalizedValueSet};
use crate::wire::{
    CodeSystem, CodeSystemContentMode, StructureDefinition, StructureDefinitionContext, StructureDefinitionKind, TypeDerivationRule, ValueSet,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const CORE_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

pub struct Repository {
    structure_definitions: HashMap<String, Arc<StructureDefinition>>,
    value_sets: HashMap<String, Arc<ValueSet>>,
    code_systems: HashMap<String, Arc<CodeSystem>>,
    finalized_value_sets: HashMap<String, Arc<FinalizedValueSet>>,
}

impl Repository {
    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::default()
    }

    pub fn structure_definition(&self, url: &str) -> Option<Arc<StructureDefinition>> {
        self.structure_definitions.get(url).cloned()
    }

    /// Resolve a bare type code (e.g. `"HumanName"`, `"Patient"`) against
    /// the base FHIR core canonical URL convention, falling back to an
    /// exact-url lookup for locally registered logical models.
    pub fn structure_definition_for_type(&self, type_code: &str) -> Option<Arc<StructureDefinition>> {
        self.structure_definition(&format!("{CORE_BASE}{type_code}"))
            .or_else(|| self.structure_definition(type_code))
    }

    pub fn value_set(&self, url: &str) -> Option<Arc<ValueSet>> {
        self.value_sets.get(url).cloned()
    }

    pub fn code_system(&self, url: &str) -> Option<Arc<CodeSystem>> {
        self.code_systems.get(url).cloned()
    }

    /// The combined `set<Code>` a ValueSet's `compose`/`expansion` rules
    /// resolve to (spec §4.1 pass 2), computed once at `finalize()`.
    pub fn finalized_value_set(&self, url: &str) -> Option<Arc<FinalizedValueSet>> {
        self.finalized_value_sets.get(url).cloned()
    }

    pub fn structure_definitions(&self) -> impl Iterator<Item = &Arc<StructureDefinition>> {
        self.structure_definitions.values()
    }

    /// Profiles that declare `baseDefinition = base_url` (used by the
    /// validator to discover applicable profiles for an extension context
    /// or a polymorphic reference target).
    pub fn profiles_deriving_from(&self, base_url: &str) -> Vec<Arc<StructureDefinition>> {
        self.structure_definitions
            .values()
            .filter(|sd| sd.base_definition.as_deref() == Some(base_url))
            .cloned()
            .collect()
    }

    /// Extension definitions applicable at a given FHIRPath element path
    /// (matched against `context[].expression`, ignoring `type = "fhirpath"`
    /// vs `"element"` distinctions — both are compared as literal paths).
    pub fn extensions_for_context(&self, path: &str) -> Vec<Arc<StructureDefinition>> {
        self.structure_definitions
            .values()
            .filter(|sd| sd.type_ == "Extension" && applies_to_context(sd.context.as_deref(), path))
            .cloned()
            .collect()
    }
}

fn synthesize_code_system(url: &str) -> CodeSystem {
    CodeSystem {
        resource_type: "CodeSystem".to_string(),
        id: None,
        url: url.to_string(),
        version: None,
        name: None,
        status: crate::wire::PublicationStatus::Active,
        publisher: None,
        contact: None,
        description: None,
        case_sensitive: None,
        value_set: None,
        content: CodeSystemContentMode::Complete,
        count: None,
        concept: None,
        extensions: Default::default(),
    }
}

fn applies_to_context(contexts: Option<&[StructureDefinitionContext]>, path: &str) -> bool {
    match contexts {
        None => false,
        Some(ctxs) => ctxs.iter().any(|c| c.expression == path || c.expression == "Element"),
    }
}

#[derive(Default)]
pub struct RepositoryBuilder {
    structure_definitions: HashMap<String, StructureDefinition>,
    value_sets: HashMap<String, ValueSet>,
    code_systems: HashMap<String, CodeSystem>,
}

impl RepositoryBuilder {
    pub fn add_structure_definition(&mut self, sd: StructureDefinition) -> &mut Self {
        self.structure_definitions.insert(sd.url.clone(), sd);
        self
    }

    pub fn add_value_set(&mut self, vs: ValueSet) -> &mut Self {
        self.value_sets.insert(vs.url.clone(), vs);
        self
    }

    pub fn add_code_system(&mut self, cs: CodeSystem) -> &mut Self {
        self.code_systems.insert(cs.url.clone(), cs);
        self
    }

    /// Resolve every profile's snapshot (generating it from `baseDefinition`
    /// + `differential` when absent) and verify type/binding references
    /// resolve within the loaded set, per spec §4.1's four post-load passes.
    #[instrument(skip_all, fields(structure_definitions = self.structure_definitions.len()))]
    pub fn finalize(mut self) -> Result<Arc<Repository>> {
        let mut issues = Vec::new();
        self.merge_supplements();
        self.resolve_snapshots(&mut issues);
        self.propagate_inherited_slicing();
        self.verify_types(&mut issues);

        let finalized_value_sets = self
            .value_sets
            .values()
            .map(|vs| (vs.url.clone(), Arc::new(finalize_value_set(vs, &self.code_systems))))
            .collect();

        if !issues.is_empty() {
            warn!(issue_count = issues.len(), "repository finalized with outstanding issues");
        } else {
            info!(count = self.structure_definitions.len(), "repository finalized cleanly");
        }

        Ok(Arc::new(Repository {
            structure_definitions: self
                .structure_definitions
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            value_sets: self.value_sets.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            code_systems: self.code_systems.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            finalized_value_sets,
        }))
    }

    /// Pass 1: fold each `content = supplement` CodeSystem into the system
    /// it supplements, synthesizing the target if it wasn't separately
    /// loaded.
    fn merge_supplements(&mut self) {
        let supplement_urls: Vec<String> = self
            .code_systems
            .values()
            .filter(|cs| cs.content == CodeSystemContentMode::Supplement)
            .map(|cs| cs.url.clone())
            .collect();

        for url in supplement_urls {
            let Some(supplement) = self.code_systems.get(&url).cloned() else { continue };
            let Some(target_url) = supplement.supplements().map(str::to_string) else {
                warn!(%url, "supplement CodeSystem has no `supplements` target; skipped");
                continue;
            };
            self.code_systems.entry(target_url.clone()).or_insert_with(|| synthesize_code_system(&target_url));
            if let Some(target) = self.code_systems.get_mut(&target_url) {
                debug!(%url, %target_url, "merging code system supplement");
                target.merge_supplement(&supplement);
            }
        }
    }

    /// Pass 3: for each element whose own `slicing` is absent, inherit the
    /// nearest ancestor's `slicing` for the same path — searched along the
    /// profile's `baseDefinition` chain and, within that chain, along the
    /// dotted path's own prefixes (a profile may only restate slicing on a
    /// parent path, expecting descendants to inherit it positionally).
    fn propagate_inherited_slicing(&mut self) {
        let urls: Vec<String> = self.structure_definitions.keys().cloned().collect();
        for url in urls {
            let Some(snapshot_len) = self.structure_definitions.get(&url).and_then(|sd| sd.snapshot.as_ref()).map(|s| s.element.len()) else {
                continue;
            };
            let mut inherited = Vec::new();
            for index in 0..snapshot_len {
                let (has_slicing, path) = {
                    let sd = &self.structure_definitions[&url];
                    let element = &sd.snapshot.as_ref().unwrap().element[index];
                    (element.slicing.is_some(), element.path.clone())
                };
                if has_slicing {
                    continue;
                }
                if let Some(found) = self.find_inherited_slicing(&url, &path) {
                    inherited.push((index, found));
                }
            }
            if let Some(sd) = self.structure_definitions.get_mut(&url) {
                if let Some(snapshot) = sd.snapshot.as_mut() {
                    for (index, slicing) in inherited {
                        snapshot.element[index].slicing = Some(slicing);
                    }
                }
            }
        }
    }

    fn find_inherited_slicing(&self, url: &str, path: &str) -> Option<crate::wire::ElementDefinitionSlicing> {
        let mut current = self.structure_definitions.get(url)?.base_definition.clone();
        while let Some(base_url) = current {
            let base = self.structure_definitions.get(&base_url)?;
            if let Some(snapshot) = &base.snapshot {
                let mut search_path = path;
                loop {
                    if let Some(found) = snapshot.element.iter().find(|e| e.path == search_path) {
                        if let Some(slicing) = &found.slicing {
                            return Some(slicing.clone());
                        }
                    }
                    match search_path.rfind('.') {
                        Some(pos) => search_path = &search_path[..pos],
                        None => break,
                    }
                }
            }
            current = base.base_definition.clone();
        }
        None
    }

    fn resolve_snapshots(&mut self, issues: &mut Vec<String>) {
        let urls: Vec<String> = self.structure_definitions.keys().cloned().collect();
        for url in urls {
            self.resolve_snapshot_for(&url, &mut Vec::new(), issues);
        }
    }

    /// Recursively resolve `url`'s snapshot, following `baseDefinition`
    /// chains. `visiting` detects inheritance cycles.
    fn resolve_snapshot_for(&mut self, url: &str, visiting: &mut Vec<String>, issues: &mut Vec<String>) {
        if self.structure_definitions.get(url).map(|sd| sd.snapshot.is_some()).unwrap_or(true) {
            return;
        }
        if visiting.contains(&url.to_string()) {
            issues.push(format!("circular baseDefinition chain involving {url}"));
            return;
        }
        visiting.push(url.to_string());

        let base_url = self.structure_definitions.get(url).and_then(|sd| sd.base_definition.clone());
        let Some(base_url) = base_url else {
            issues.push(format!("{url} has no snapshot and no baseDefinition to derive one from"));
            visiting.pop();
            return;
        };

        if let Some(base) = self.structure_definitions.get(&base_url).cloned() {
            if base.snapshot.is_none() {
                self.resolve_snapshot_for(&base_url, visiting, issues);
            }
        } else {
            issues.push(format!("{url}: unresolved baseDefinition {base_url}"));
            visiting.pop();
            return;
        }

        let base_snapshot = self.structure_definitions.get(&base_url).and_then(|sd| sd.snapshot.clone());
        if let (Some(base_snapshot), Some(sd)) = (base_snapshot, self.structure_definitions.get_mut(url)) {
            let differential = sd.differential.clone().unwrap_or_default();
            debug!(%url, %base_url, "generating snapshot from differential");
            sd.snapshot = Some(generate_snapshot(&base_snapshot, &differential));
        }

        visiting.pop();
    }

    fn verify_types(&self, issues: &mut Vec<String>) {
        for sd in self.structure_definitions.values() {
            let Some(snapshot) = &sd.snapshot else { continue };
            for element in &snapshot.element {
                let Some(types) = &element.types else { continue };
                for t in types {
                    if is_primitive_type(&t.code) || t.code == "BackboneElement" || t.code == "Element" {
                        continue;
                    }
                    let known = self.structure_definitions.contains_key(&format!("{CORE_BASE}{}", t.code))
                        || self.structure_definitions.contains_key(&t.code);
                    if !known {
                        issues.push(format!(
                            "{}: element {} references unresolved type {}",
                            sd.url, element.path, t.code
                        ));
                    }
                }
                if let Some(binding) = &element.binding {
                    if let Some(vs_url) = &binding.value_set {
                        if !self.value_sets.contains_key(vs_url) {
                            issues.push(format!(
                                "{}: element {} binds unresolved value set {}",
                                sd.url, element.path, vs_url
                            ));
                        }
                    }
                }
            }
        }
    }
}

/// Is `sd` a profile (constraint-derivation) rather than a base type or
/// resource definition?
pub fn is_constraint_profile(sd: &StructureDefinition) -> bool {
    sd.derivation == Some(TypeDerivationRule::Constraint)
}

pub fn is_resource_kind(sd: &StructureDefinition) -> bool {
    sd.kind == StructureDefinitionKind::Resource
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Snapshot;

    fn sd(url: &str, base: Option<&str>, snapshot: Option<Snapshot>) -> StructureDefinition {
        serde_json::from_value(serde_json::json!({
            "resourceType": "StructureDefinition",
            "url": url,
            "name": "Test",
            "status": "active",
            "kind": "resource",
            "abstract": false,
            "type": "Patient",
            "baseDefinition": base,
            "derivation": base.map(|_| "constraint"),
        }))
        .map(|mut parsed: StructureDefinition| {
            parsed.snapshot = snapshot;
            parsed
        })
        .unwrap()
    }

    #[test]
    fn finalize_derives_snapshot_from_base() {
        let base_snapshot = Snapshot {
            element: vec![crate::wire::ElementDefinition {
                id: None,
                path: "Patient".to_string(),
                slice_name: None,
                slice_is_constraining: None,
                short: None,
                definition: None,
                comment: None,
                min: Some(0),
                max: Some("1".to_string()),
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
            }],
        };

        let mut builder = Repository::builder();
        builder.add_structure_definition(sd("http://example.org/base", None, Some(base_snapshot)));
        builder.add_structure_definition(sd("http://example.org/derived", Some("http://example.org/base"), None));

        let repo = builder.finalize().unwrap();
        let derived = repo.structure_definition("http://example.org/derived").unwrap();
        assert!(derived.snapshot.is_some());
        assert_eq!(derived.snapshot.as_ref().unwrap().element.len(), 1);
    }
}
