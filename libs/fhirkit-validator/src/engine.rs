//! The validator's recursive descent (spec §4.5): for every child name an
//! activated profile declares, check cardinality, fixed/pattern values,
//! length/numeric bounds, terminology bindings, invariants, slicing, and
//! references, then recurse into the child's own activated profiles.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{instrument, warn};

use fhirkit_fhirpath::{compile, ConformsToChecker, EvalContext, Expression, ReferenceResolverHook};
use fhirkit_model::type_info::is_primitive_type;
use fhirkit_model::{json_to_element, BindingStrength, ConstraintSeverity, ProfiledElementTypeInfo, Repository, StructureDefinition};
use fhirkit_slicing::{compile_slicing, SliceAssignment, SliceIssue};
use fhirkit_values::element::ElementType;
use fhirkit_values::{Collection, Element, Tri};

use crate::error::Result;
use crate::issue::{IssueCode, IssueSeverity, ValidationIssue, ValidationResults};
use crate::options::{ValidationPlan, ValidatorOptions};
use crate::reference::{Resolution, ReferenceResolver};

/// Implements `conformsTo(profile)` for the FHIRPath engine by spinning up
/// an independent, single-profile `Validator` and checking whether it
/// comes back clean. Building a fresh validator per call (rather than the
/// main `Validator` referring back to itself through an `Arc`) avoids a
/// self-referential construction order and matches spec §4.2's wording:
/// `conformsTo()` invokes the validator against the single input element,
/// not the enclosing validation run.
struct ConformsToHook {
    repository: Arc<Repository>,
}

impl ConformsToChecker for ConformsToHook {
    fn conforms_to(&self, element: &Element, profile_url: &str) -> bool {
        let options = ValidatorOptions::for_profile(profile_url);
        let Ok(validator) = Validator::new(self.repository.clone(), options) else {
            return false;
        };
        let results = validator.validate(element);
        results.highest_severity().map(|s| s < IssueSeverity::Error).unwrap_or(true)
    }
}

/// Checks a resource instance against a compiled [`ValidationPlan`].
///
/// Not `Send`/`Sync`: the invariant expression cache holds `Rc<dyn
/// Expression>`, matching the `Rc`-based `Element`/`HostNode` graph and
/// spec §5's single-threaded-per-evaluation model. Build one `Validator`
/// per evaluation rather than sharing it across threads.
pub struct Validator {
    repository: Arc<Repository>,
    plan: ValidationPlan,
    conforms_to_checker: Arc<dyn ConformsToChecker>,
    resolver_hook: Arc<dyn ReferenceResolverHook>,
    reference_resolver: ReferenceResolver,
    invariant_cache: RefCell<HashMap<String, Rc<dyn Expression>>>,
}

impl Validator {
    pub fn new(repository: Arc<Repository>, options: ValidatorOptions) -> Result<Self> {
        let plan = options.compile(&repository)?;
        Ok(Self {
            conforms_to_checker: Arc::new(ConformsToHook { repository: repository.clone() }),
            resolver_hook: Arc::new(ReferenceResolver),
            reference_resolver: ReferenceResolver,
            repository,
            plan,
            invariant_cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn plan(&self) -> &ValidationPlan {
        &self.plan
    }

    /// Validate `resource` against this validator's root profiles plus
    /// any profile it declares itself via `meta.profile`.
    #[instrument(skip_all, fields(resource_type = resource.resource_type().as_deref().unwrap_or("?")))]
    pub fn validate(&self, resource: &Element) -> ValidationResults {
        let mut results = ValidationResults::default();
        self.validate_resource(resource, true, &mut results);
        results
    }

    fn validate_resource(&self, resource: &Element, is_root: bool, results: &mut ValidationResults) {
        let activated = self.activated_profiles_for(resource, is_root);
        let path = resource.resource_type().unwrap_or_else(|| "(unknown)".to_string());
        if activated.is_empty() {
            results.push(ValidationIssue::new(
                IssueSeverity::Fatal,
                IssueCode::NotFound,
                "no profile is available to validate this resource against",
                path,
            ));
            return;
        }

        let roots: Vec<ProfiledElementTypeInfo> = activated
            .iter()
            .filter_map(|p| ProfiledElementTypeInfo::root(self.repository.clone(), p.clone()))
            .collect();
        for def in &roots {
            self.check_invariants(resource, def, &path, results);
        }
        self.walk(resource, &roots, &path, results);
    }

    /// The profiles to activate for `resource`: its own `meta.profile`
    /// list, plus (at the root only) the validation plan's configured
    /// root profiles, falling back to the resource's base type definition
    /// when neither names anything resolvable.
    fn activated_profiles_for(&self, resource: &Element, is_root: bool) -> Vec<Arc<StructureDefinition>> {
        let mut profiles: Vec<Arc<StructureDefinition>> = Vec::new();
        if is_root {
            profiles.extend(self.plan.root_profiles.iter().cloned());
        }
        for url in resource.profiles() {
            match self.repository.structure_definition(&url) {
                Some(p) => {
                    if !profiles.iter().any(|existing| existing.url == p.url) {
                        profiles.push(p);
                    }
                }
                None => warn!(%url, "meta.profile references an unknown profile; ignored"),
            }
        }
        if profiles.is_empty() {
            if let Some(resource_type) = resource.resource_type() {
                if let Some(base) = self.repository.structure_definition_for_type(&resource_type) {
                    profiles.push(base);
                }
            }
        }
        profiles
    }

    /// Pre-order walk over one element's children, per spec §4.5. `defs`
    /// are every currently-activated profile's `ProfiledElementTypeInfo`
    /// for this same instance position; a child name is checked against
    /// the strictest constraint any of them declares.
    fn walk(&self, element: &Element, defs: &[ProfiledElementTypeInfo], path: &str, results: &mut ValidationResults) {
        let mut seen_names: Vec<String> = Vec::new();
        for def in defs {
            for child in def.sub_definitions() {
                for name in child.expanded_names() {
                    if !seen_names.contains(&name) {
                        seen_names.push(name);
                    }
                }
            }
        }

        for name in seen_names {
            let child_defs: Vec<ProfiledElementTypeInfo> = defs.iter().filter_map(|d| d.sub_field(&name)).collect();
            if child_defs.is_empty() {
                continue;
            }
            let child_path = format!("{path}.{name}");
            let members = element.sub_elements(&name);
            self.check_cardinality(&members, &child_defs, &child_path, results);

            for member in &members {
                self.validate_member(member, &child_defs, &child_path, results);
            }

            if let Some(slicing_def) = child_defs.iter().find(|d| d.element().slicing.is_some()) {
                self.check_slicing(element, slicing_def, &members, &child_path, results);
            }
        }
    }

    fn validate_member(&self, member: &Element, defs: &[ProfiledElementTypeInfo], path: &str, results: &mut ValidationResults) {
        for def in defs {
            self.check_fixed_pattern(member, def, path, results);
            self.check_bounds(member, def, path, results);
            self.check_binding(member, def, path, results);
            self.check_reference(member, def, path, results);
            self.check_invariants(member, def, path, results);
        }

        if member.is_resource() {
            self.validate_resource(member, false, results);
            return;
        }

        let nested: Vec<ProfiledElementTypeInfo> = defs
            .iter()
            .filter_map(|d| if is_primitive_type(d.primary_type_code()) { None } else { Some(d.clone()) })
            .collect();
        if !nested.is_empty() {
            self.walk(member, &nested, path, results);
        }
    }

    fn check_cardinality(&self, observed: &[Element], defs: &[ProfiledElementTypeInfo], path: &str, results: &mut ValidationResults) {
        let min = defs.iter().map(|d| d.element().min.unwrap_or(0)).max().unwrap_or(0);
        let max = defs.iter().filter_map(|d| d.element().max_unbounded()).min();
        let count = observed.len() as u32;

        if count < min {
            let message = if min == 1 && count == 0 {
                "required element is missing".to_string()
            } else {
                format!("expected at least {min}, found {count}")
            };
            results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::Required, message, path));
        }
        if let Some(max) = max {
            if count > max {
                results.push(ValidationIssue::new(
                    IssueSeverity::Error,
                    IssueCode::Structure,
                    format!("expected at most {max}, found {count}"),
                    path,
                ));
            }
        }
    }

    fn check_fixed_pattern(&self, member: &Element, def: &ProfiledElementTypeInfo, path: &str, results: &mut ValidationResults) {
        if let Some(fixed) = def.element().fixed() {
            let expected = json_to_element(fixed.clone());
            if !matches!(member.equals(&expected), Tri::True) {
                results.push(
                    ValidationIssue::new(IssueSeverity::Error, IssueCode::Value, "value does not match the fixed value required here", path)
                        .with_profile(def.profile().url.clone()),
                );
            }
        }
        if let Some(pattern) = def.element().pattern() {
            let pattern_element = json_to_element(pattern.clone());
            if !member.matches_pattern(&pattern_element) {
                results.push(
                    ValidationIssue::new(IssueSeverity::Error, IssueCode::Value, "value does not match the required pattern", path)
                        .with_profile(def.profile().url.clone()),
                );
            }
        }
    }

    fn check_bounds(&self, member: &Element, def: &ProfiledElementTypeInfo, path: &str, results: &mut ValidationResults) {
        let element_def = def.element();
        if let Some(max_length) = element_def.max_length {
            if let Ok(s) = member.as_string() {
                if s.chars().count() as i32 > max_length {
                    results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::TooLong, format!("exceeds maxLength of {max_length}"), path));
                }
            }
        }
        if let Some(min_value) = element_def.min_value() {
            let bound = json_to_element(min_value.clone());
            if matches!(member.compare_to(&bound), Some(Ordering::Less)) {
                results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::Value, "value is below the allowed minimum", path));
            }
        }
        if let Some(max_value) = element_def.max_value() {
            let bound = json_to_element(max_value.clone());
            if matches!(member.compare_to(&bound), Some(Ordering::Greater)) {
                results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::Value, "value exceeds the allowed maximum", path));
            }
        }
    }

    fn check_binding(&self, member: &Element, def: &ProfiledElementTypeInfo, path: &str, results: &mut ValidationResults) {
        let Some(binding) = &def.element().binding else { return };
        let Some(value_set_url) = &binding.value_set else { return };
        let Some(finalized) = self.repository.finalized_value_set(value_set_url) else {
            return;
        };

        let observed = codes_in_element(member);
        if observed.is_empty() {
            return;
        }
        if observed.iter().all(|(system, code)| finalized.contains_code(system.as_deref(), code)) {
            return;
        }

        let strength = match binding.strength {
            BindingStrength::Required => "required",
            BindingStrength::Extensible => "extensible",
            BindingStrength::Preferred => "preferred",
            BindingStrength::Example => "example",
        };
        let issue = ValidationIssue::new(
            binding_severity(binding.strength),
            IssueCode::CodeInvalid,
            format!("code is not in the {strength} value set {value_set_url}"),
            path,
        )
        .with_profile(def.profile().url.clone());
        results.push(issue);
    }

    fn check_invariants(&self, element: &Element, def: &ProfiledElementTypeInfo, path: &str, results: &mut ValidationResults) {
        let Some(constraints) = &def.element().constraint else { return };
        for constraint in constraints {
            let Some(source) = &constraint.expression else { continue };
            let compiled = match self.compiled_invariant(source) {
                Ok(compiled) => compiled,
                Err(err) => {
                    results.push(
                        ValidationIssue::new(
                            IssueSeverity::Error,
                            IssueCode::Invariant,
                            format!("invariant {} could not be compiled: {err}", constraint.key),
                            path,
                        )
                        .with_kind(constraint.key.clone()),
                    );
                    continue;
                }
            };

            let ctx = self.eval_context(element.clone());
            let outcome = compiled.eval(&ctx, &Collection::singleton(element.clone()));
            let failed = match outcome.map(|c| c.as_tri_bool()) {
                Ok(Ok(Tri::False)) => true,
                Ok(Ok(Tri::True)) | Ok(Ok(Tri::Empty)) => false,
                Ok(Err(_)) | Err(_) => false,
            };
            if failed {
                let severity = match constraint.severity {
                    ConstraintSeverity::Error => IssueSeverity::Error,
                    ConstraintSeverity::Warning => IssueSeverity::Warning,
                };
                results.push(
                    ValidationIssue::new(severity, IssueCode::Invariant, constraint.human.clone(), path)
                        .with_kind(constraint.key.clone())
                        .with_profile(def.profile().url.clone()),
                );
            }
        }
    }

    fn compiled_invariant(&self, source: &str) -> fhirkit_fhirpath::Result<Rc<dyn Expression>> {
        if let Some(cached) = self.invariant_cache.borrow().get(source) {
            return Ok(cached.clone());
        }
        let compiled: Rc<dyn Expression> = Rc::from(compile(source)?);
        self.invariant_cache.borrow_mut().insert(source.to_string(), compiled.clone());
        Ok(compiled)
    }

    fn check_slicing(&self, parent: &Element, anchor: &ProfiledElementTypeInfo, members: &[Element], path: &str, results: &mut ValidationResults) {
        let slicing = anchor.element().slicing.as_ref().expect("caller only passes a slicing element");
        let snapshot = anchor.profile().snapshot.as_ref().expect("finalized profile has a snapshot");

        let compiled = match compile_slicing(snapshot, &anchor.element().path, slicing, Some(&self.conforms_to_checker)) {
            Ok(compiled) => compiled,
            Err(err) => {
                results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::Structure, format!("slicing could not be compiled: {err}"), path));
                return;
            }
        };

        let ctx = self.eval_context(parent.clone());
        let classification = match compiled.classify(&ctx, members) {
            Ok(result) => result,
            Err(err) => {
                results.push(ValidationIssue::new(IssueSeverity::Error, IssueCode::Structure, format!("slice classification failed: {err}"), path));
                return;
            }
        };

        for issue in &classification.issues {
            let message = match issue {
                SliceIssue::UnmatchedClosed { member_index } => format!("entry {member_index} matches no slice under closed slicing rules"),
                SliceIssue::OutOfOrder { member_index, slice_name } => format!("entry {member_index} matches slice '{slice_name}' out of declared order"),
                SliceIssue::UnmatchedBeforeEnd { member_index } => format!("entry {member_index} is unmatched before the last slice under openAtEnd rules"),
                SliceIssue::ReportOther { member_index } => format!("entry {member_index} matches no declared slice"),
            };
            let severity = match issue {
                SliceIssue::ReportOther { .. } => IssueSeverity::Warning,
                _ => IssueSeverity::Error,
            };
            results.push(ValidationIssue::new(severity, IssueCode::Structure, message, path));
        }

        let slice_roots = anchor.slice_roots();
        for (member, assignment) in members.iter().zip(classification.assignments.iter()) {
            let SliceAssignment::Slice(index) = assignment else { continue };
            let Some(slice_root) = slice_roots.get(*index) else { continue };
            let slice_path = format!("{path}:{}", slice_root.element().slice_name.clone().unwrap_or_default());
            self.validate_member(member, std::slice::from_ref(slice_root), &slice_path, results);
        }
    }

    fn check_reference(&self, member: &Element, def: &ProfiledElementTypeInfo, path: &str, results: &mut ValidationResults) {
        if def.primary_type_code() != "Reference" {
            return;
        }
        match self.reference_resolver.resolve(member) {
            Resolution::Malformed => {
                results.push(ValidationIssue::new(IssueSeverity::Warning, IssueCode::Invalid, "reference could not be parsed", path));
            }
            Resolution::Unresolvable => {
                results.push(ValidationIssue::new(IssueSeverity::Information, IssueCode::NotFound, "reference could not be resolved in this context", path));
            }
            Resolution::Resolved(target) => {
                let target_profiles = def
                    .element()
                    .types
                    .as_ref()
                    .and_then(|types| types.iter().find(|t| t.code == "Reference"))
                    .and_then(|t| t.target_profile.as_ref());
                let Some(target_profiles) = target_profiles else { return };
                let conforms = target_profiles.iter().any(|profile_url| self.conforms_to_checker.conforms_to(&target, profile_url));
                if !conforms {
                    results.push(ValidationIssue::new(
                        IssueSeverity::Error,
                        IssueCode::Invalid,
                        "referenced resource does not conform to any of the declared target profiles",
                        path,
                    ));
                }
            }
        }
    }

    fn eval_context(&self, context_root: Element) -> EvalContext {
        EvalContext::new(context_root)
            .with_repository(self.repository.clone())
            .with_conforms_to_checker(self.conforms_to_checker.clone())
            .with_resolver(self.resolver_hook.clone())
    }
}

fn binding_severity(strength: BindingStrength) -> IssueSeverity {
    match strength {
        BindingStrength::Required => IssueSeverity::Error,
        BindingStrength::Extensible => IssueSeverity::Warning,
        BindingStrength::Preferred | BindingStrength::Example => IssueSeverity::Information,
    }
}

/// The `(system, code)` pairs a coded element carries: a bare `code`
/// primitive, a `Coding`, or every `Coding` under a `CodeableConcept`.
fn codes_in_element(element: &Element) -> Vec<(Option<String>, String)> {
    if element.element_type() != ElementType::Structured {
        return element.as_string().ok().map(|code| vec![(None, code)]).unwrap_or_default();
    }
    if element.has_sub_element("coding") {
        return element.sub_elements("coding").iter().flat_map(codes_in_element).collect();
    }
    let system = element.sub_elements("system").into_iter().next().and_then(|e| e.as_string().ok());
    let code = element.sub_elements("code").into_iter().next().and_then(|e| e.as_string().ok());
    code.map(|code| vec![(system, code)]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_model::wire::{ElementDefinition, ElementDefinitionConstraint, ElementDefinitionType, PublicationStatus, StructureDefinitionKind};
    use fhirkit_model::{JsonNode, RepositoryBuilder};

    fn element_def(path: &str, min: u32, max: &str) -> ElementDefinition {
        ElementDefinition {
            id: None,
            path: path.to_string(),
            slice_name: None,
            slice_is_constraining: None,
            short: None,
            definition: None,
            comment: None,
            min: Some(min),
            max: Some(max.to_string()),
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

    fn patient_profile() -> fhirkit_model::StructureDefinition {
        let mut name = element_def("Patient.name", 1, "*");
        name.types = Some(vec![ElementDefinitionType { code: "HumanName".into(), profile: None, target_profile: None, aggregation: None }]);
        name.constraint = Some(vec![ElementDefinitionConstraint {
            key: "name-1".into(),
            severity: ConstraintSeverity::Error,
            human: "a name must carry a family name".into(),
            expression: Some("family.exists()".into()),
        }]);
        let mut family = element_def("Patient.name.family", 0, "1");
        family.types = Some(vec![ElementDefinitionType { code: "string".into(), profile: None, target_profile: None, aggregation: None }]);

        fhirkit_model::StructureDefinition {
            resource_type: "StructureDefinition".into(),
            id: None,
            url: "http://example.org/Patient".into(),
            version: None,
            name: "ExamplePatient".into(),
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
            type_: "Patient".into(),
            base_definition: None,
            derivation: None,
            snapshot: Some(fhirkit_model::wire::Snapshot { element: vec![element_def("Patient", 0, "1"), name, family] }),
            differential: None,
            extensions: Default::default(),
        }
    }

    fn element_from_json(text: &str) -> Element {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        Element::structured(JsonNode::new(value))
    }

    fn repository_with_patient() -> Arc<Repository> {
        let mut builder = RepositoryBuilder::default();
        builder.add_structure_definition(patient_profile());
        builder.finalize().unwrap()
    }

    #[test]
    fn missing_required_name_is_an_error() {
        let repository = repository_with_patient();
        let validator = Validator::new(repository, ValidatorOptions::for_profile("http://example.org/Patient")).unwrap();
        let patient = element_from_json(r#"{"resourceType":"Patient"}"#);

        let results = validator.validate(&patient);
        assert!(!results.is_valid());
        assert!(results.issues.iter().any(|i| i.code == IssueCode::Required));
    }

    #[test]
    fn satisfied_invariant_produces_no_issue() {
        let repository = repository_with_patient();
        let validator = Validator::new(repository, ValidatorOptions::for_profile("http://example.org/Patient")).unwrap();
        let patient = element_from_json(r#"{"resourceType":"Patient","name":[{"family":"Smith"}]}"#);

        let results = validator.validate(&patient);
        assert!(results.is_valid(), "{:?}", results.issues);
    }

    #[test]
    fn violated_invariant_is_reported() {
        let repository = repository_with_patient();
        let validator = Validator::new(repository, ValidatorOptions::for_profile("http://example.org/Patient")).unwrap();
        let patient = element_from_json(r#"{"resourceType":"Patient","name":[{"use":"official"}]}"#);

        let results = validator.validate(&patient);
        assert!(results.issues.iter().any(|i| i.code == IssueCode::Invariant && i.kind.as_deref() == Some("name-1")));
    }
}
