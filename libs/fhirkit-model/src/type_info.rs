//! `ProfiledElementTypeInfo`: the concrete `(StructureDefinition,
//! ElementDefinition)` pair an `Element` carries once the validator or
//! FHIRPath engine has resolved its profile-bound position.
//!
//! This is the other half of the trait seam `fhirkit-values` declares:
//! that crate defines `ElementTypeInfo` without knowing about profiles so
//! `Element` can hold type information without depending on this crate;
//! this crate implements it.

use crate::repository::Repository;
use crate::wire::{ElementDefinition, StructureDefinition};
use fhirkit_values::ElementTypeInfo as ElementTypeInfoTrait;
use std::fmt;
use std::sync::Arc;

/// Type codes FHIR treats as "primitive" (no further structural
/// navigation; `HostNode::primitive()` should report a leaf).
pub const PRIMITIVE_TYPE_CODES: &[&str] = &[
    "boolean", "integer", "string", "decimal", "uri", "url", "canonical", "base64Binary",
    "instant", "date", "dateTime", "time", "code", "oid", "id", "markdown", "unsignedInt",
    "positiveInt", "uuid", "xhtml",
];

pub fn is_primitive_type(code: &str) -> bool {
    PRIMITIVE_TYPE_CODES.contains(&code)
}

#[derive(Clone)]
pub struct ProfiledElementTypeInfo {
    repository: Arc<Repository>,
    profile: Arc<StructureDefinition>,
    element_index: usize,
}

impl fmt::Debug for ProfiledElementTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfiledElementTypeInfo")
            .field("profile", &self.profile.url)
            .field("path", &self.element().path)
            .finish()
    }
}

impl ProfiledElementTypeInfo {
    pub fn new(repository: Arc<Repository>, profile: Arc<StructureDefinition>, element_index: usize) -> Self {
        Self { repository, profile, element_index }
    }

    /// The root element (`kind=resource`/`complex-type`'s first snapshot
    /// entry, whose path equals the profile's own `type`).
    pub fn root(repository: Arc<Repository>, profile: Arc<StructureDefinition>) -> Option<Self> {
        let index = profile.snapshot.as_ref()?.element.iter().position(|e| !e.path.contains('.'))?;
        Some(Self::new(repository, profile, index))
    }

    pub fn profile(&self) -> &Arc<StructureDefinition> {
        &self.profile
    }

    pub fn element(&self) -> &ElementDefinition {
        &self.profile.snapshot.as_ref().expect("finalized profile has a snapshot").element[self.element_index]
    }

    /// Direct children of this element's path (one path segment deeper),
    /// including every slice, in snapshot order.
    pub fn sub_definitions(&self) -> Vec<ProfiledElementTypeInfo> {
        let snapshot = self.profile.snapshot.as_ref().expect("finalized profile has a snapshot");
        let path = &self.element().path;
        let expected_depth = path.matches('.').count() + 1;
        snapshot
            .element
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_descendant_of(path) && e.path.matches('.').count() == expected_depth)
            .map(|(i, _)| ProfiledElementTypeInfo::new(self.repository.clone(), self.profile.clone(), i))
            .collect()
    }

    /// Resolve a single named child, expanding a choice-type (`value[x]`)
    /// base name against its declared types and following
    /// `contentReference` indirection when the matched element points
    /// elsewhere in the same snapshot.
    pub fn sub_field(&self, name: &str) -> Option<ProfiledElementTypeInfo> {
        let direct = self.sub_definitions().into_iter().find(|c| {
            c.element().path.rsplit('.').next() == Some(name) && !c.element().is_choice_type()
        });
        let matched = direct.or_else(|| {
            self.sub_definitions().into_iter().find(|c| {
                let last = c.element().path.rsplit('.').next().unwrap_or("");
                c.element().is_choice_type() && last.trim_end_matches("[x]") == choice_base(name)
            })
        })?;
        matched.follow_content_reference()
    }

    /// If bound to an element with `contentReference`, return the
    /// `ProfiledElementTypeInfo` for the referenced element instead
    /// (its subtree is what actually describes this node's children).
    pub fn follow_content_reference(self) -> Option<ProfiledElementTypeInfo> {
        let Some(reference) = &self.element().content_reference else { return Some(self) };
        let target_path = reference.trim_start_matches('#');
        let snapshot = self.profile.snapshot.as_ref()?;
        let index = snapshot.element.iter().position(|e| e.path == target_path)?;
        Some(ProfiledElementTypeInfo::new(self.repository.clone(), self.profile.clone(), index))
    }

    /// Slice root elements declared at this element's own path, in the
    /// same declaration order `fhirkit_slicing::compile_slicing` walks
    /// them via `Snapshot::slices_of` — so a `CompiledSlicing`'s slice
    /// index lines up positionally with this list.
    pub fn slice_roots(&self) -> Vec<ProfiledElementTypeInfo> {
        let snapshot = self.profile.snapshot.as_ref().expect("finalized profile has a snapshot");
        let path = self.element().path.clone();
        snapshot
            .element
            .iter()
            .enumerate()
            .filter(|(_, e)| e.path == path && e.is_slice())
            .map(|(i, _)| ProfiledElementTypeInfo::new(self.repository.clone(), self.profile.clone(), i))
            .collect()
    }

    /// For a choice-type or polymorphic element, the `ProfiledElementTypeInfo`
    /// narrowed to a single declared type (used by `ofType()`/`is`/`as` and
    /// by the repository when it synthesizes per-branch concrete names).
    pub fn type_cast(&self, type_code: &str) -> Option<ProfiledElementTypeInfo> {
        let types = self.element().types.as_ref()?;
        types.iter().find(|t| t.code == type_code)?;
        Some(self.clone())
    }

    /// All instance field names this element's position could legally
    /// appear under: the declared path segment itself for a normal
    /// element, or every `{base}{Type}` combination for a choice type.
    pub fn expanded_names(&self) -> Vec<String> {
        let last = self.element().path.rsplit('.').next().unwrap_or("");
        if !self.element().is_choice_type() {
            return vec![last.trim_end_matches("[x]").to_string()];
        }
        let base = choice_base(last);
        self.element()
            .types
            .as_ref()
            .map(|types| types.iter().map(|t| format!("{base}{}", capitalize(&t.code))).collect())
            .unwrap_or_default()
    }

    /// The primary type code governing this element ("BackboneElement"
    /// when structural and untyped, e.g. the resource root).
    pub fn primary_type_code(&self) -> &str {
        self.element()
            .types
            .as_ref()
            .and_then(|t| t.first())
            .map(|t| t.code.as_str())
            .unwrap_or("BackboneElement")
    }

    /// The `StructureDefinition` for this element's declared type, when
    /// it is a complex type or resource with its own profile registered.
    pub fn type_profile(&self) -> Option<Arc<StructureDefinition>> {
        let code = self.primary_type_code();
        if is_primitive_type(code) {
            return None;
        }
        self.repository.structure_definition_for_type(code)
    }
}

impl ElementTypeInfoTrait for ProfiledElementTypeInfo {
    fn profile_url(&self) -> &str {
        &self.profile.url
    }

    fn element_path(&self) -> &str {
        &self.element().path
    }

    fn type_id(&self) -> &str {
        self.primary_type_code()
    }
}

fn choice_base(name: &str) -> &str {
    name.trim_end_matches("[x]")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_basic() {
        assert_eq!(capitalize("string"), "String");
        assert_eq!(capitalize("dateTime"), "DateTime");
    }

    #[test]
    fn choice_base_strips_suffix() {
        assert_eq!(choice_base("value[x]"), "value");
    }
}
