//! Compiled discriminator predicates (spec §4.4 step 1-2): a `Condition`
//! tests whether one runtime array member belongs to a slice. Each
//! discriminator type compiles to its own condition kind; a slice's full
//! test is the conjunction of every discriminator's condition.

use fhirkit_fhirpath::{choice_aware_children, is_derived_from, ConformsToChecker, EvalContext};
use fhirkit_values::Element;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

pub trait Condition: fmt::Debug {
    /// `element` is the slice's array-owning parent element (e.g. the
    /// `Observation` a sliced `component` belongs to is not what's passed
    /// here — this is the array *member* itself, e.g. one `component`).
    fn matches(&self, ctx: &EvalContext, element: &Element) -> Result<bool>;
}

/// Walks a dotted relative path (e.g. `"code.coding"`) from `element`,
/// applying choice-type-aware child lookup at each step. FHIRPath
/// indexing semantics don't apply here — a discriminator path is a plain
/// navigation path, not a full expression.
pub(crate) fn walk_path(element: &Element, path: &[String]) -> Vec<Element> {
    let mut current = vec![element.clone()];
    for segment in path {
        let mut next = Vec::new();
        for e in &current {
            next.extend(choice_aware_children(e, segment));
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

#[derive(Debug)]
pub struct ValueCondition {
    pub path: Vec<String>,
    pub expected: Element,
}
impl Condition for ValueCondition {
    fn matches(&self, _ctx: &EvalContext, element: &Element) -> Result<bool> {
        let found = walk_path(element, &self.path);
        Ok(!found.is_empty() && found.iter().all(|e| matches!(e.equals(&self.expected), fhirkit_values::Tri::True)))
    }
}

/// Spec §4.4 step 1: every slice that declares a `pattern` on the
/// discriminator path contributes one; a runtime member must match *all*
/// of them, not just the first one found.
#[derive(Debug)]
pub struct PatternCondition {
    pub path: Vec<String>,
    pub patterns: Vec<Element>,
}
impl Condition for PatternCondition {
    fn matches(&self, _ctx: &EvalContext, element: &Element) -> Result<bool> {
        let found = walk_path(element, &self.path);
        Ok(!found.is_empty() && found.iter().all(|e| self.patterns.iter().all(|p| e.matches_pattern(p))))
    }
}

#[derive(Debug)]
pub struct ExistsCondition {
    pub path: Vec<String>,
    pub must_exist: bool,
}
impl Condition for ExistsCondition {
    fn matches(&self, _ctx: &EvalContext, element: &Element) -> Result<bool> {
        let found = walk_path(element, &self.path);
        Ok(!found.is_empty() == self.must_exist)
    }
}

#[derive(Debug)]
pub struct TypeCondition {
    pub path: Vec<String>,
    pub expected_type: String,
}
impl Condition for TypeCondition {
    fn matches(&self, ctx: &EvalContext, element: &Element) -> Result<bool> {
        let found = walk_path(element, &self.path);
        match found.as_slice() {
            [single] => Ok(is_derived_from(ctx, single, &self.expected_type)),
            _ => Ok(false),
        }
    }
}

pub struct ProfileCondition {
    pub path: Vec<String>,
    pub profile_urls: Vec<String>,
    pub checker: Arc<dyn ConformsToChecker>,
}
impl fmt::Debug for ProfileCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileCondition").field("path", &self.path).field("profile_urls", &self.profile_urls).finish()
    }
}
impl Condition for ProfileCondition {
    fn matches(&self, _ctx: &EvalContext, element: &Element) -> Result<bool> {
        let found = walk_path(element, &self.path);
        match found.as_slice() {
            [single] => Ok(self.profile_urls.iter().all(|url| self.checker.conforms_to(single, url))),
            _ => Ok(false),
        }
    }
}
