//! Evaluation context threaded through every [`crate::expr::Expression::eval`]
//! call: the repository (for `is`/`as`/`ofType` type resolution), the
//! `%context` element the expression was invoked against, and the optional
//! host hooks (`conformsTo()`, `resolve()`) that cross into the validator
//! crate without this crate depending on it.

use fhirkit_model::Repository;
use fhirkit_values::Element;
use std::sync::Arc;

/// Seam for `conformsTo(profile)` (spec §4.2 FHIR supplements): implemented
/// by `fhirkit-validator::Validator` so this crate never depends upward on
/// it. Without a registered checker, `conformsTo` is unsupported.
pub trait ConformsToChecker {
    fn conforms_to(&self, element: &Element, profile_url: &str) -> bool;
}

/// Seam for `resolve()` (spec §4.6): implemented by
/// `fhirkit-validator::reference::ReferenceResolver`.
pub trait ReferenceResolverHook {
    fn resolve(&self, element: &Element) -> Option<Element>;
}

/// Everything an expression tree needs beyond the input collection it is
/// handed: the repository for type lookups, the element `%context` was
/// bound to when evaluation started, and optional host hooks.
#[derive(Clone)]
pub struct EvalContext {
    repository: Option<Arc<Repository>>,
    context_root: Element,
    conforms_to: Option<Arc<dyn ConformsToChecker>>,
    resolver: Option<Arc<dyn ReferenceResolverHook>>,
}

impl EvalContext {
    /// Start a fresh evaluation rooted at `context_root` (the element the
    /// whole FHIRPath expression is invoked against — `%context` and, at
    /// the top level, `$this` both begin here).
    pub fn new(context_root: Element) -> Self {
        Self { repository: None, context_root, conforms_to: None, resolver: None }
    }

    pub fn with_repository(mut self, repository: Arc<Repository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_conforms_to_checker(mut self, checker: Arc<dyn ConformsToChecker>) -> Self {
        self.conforms_to = Some(checker);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ReferenceResolverHook>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn repository(&self) -> Option<&Arc<Repository>> {
        self.repository.as_ref()
    }

    pub fn context_root(&self) -> &Element {
        &self.context_root
    }

    pub fn conforms_to_checker(&self) -> Option<&Arc<dyn ConformsToChecker>> {
        self.conforms_to.as_ref()
    }

    pub fn resolver(&self) -> Option<&Arc<dyn ReferenceResolverHook>> {
        self.resolver.as_ref()
    }

    /// `%resource`: walk from `%context` upward to the nearest resource
    /// (inclusive of `%context` itself).
    pub fn resource(&self) -> Option<Element> {
        nearest_resource(self.context_root.clone())
    }

    /// `%rootResource`: like `%resource`, but continues past nested
    /// resources (e.g. `contained`) to the outermost container resource.
    pub fn root_resource(&self) -> Option<Element> {
        let mut current = nearest_resource(self.context_root.clone())?;
        loop {
            let Some(parent) = current.parent() else { break };
            match nearest_resource(parent) {
                Some(ancestor) => current = ancestor,
                None => break,
            }
        }
        Some(current)
    }
}

fn nearest_resource(mut e: Element) -> Option<Element> {
    loop {
        if e.is_resource() {
            return Some(e);
        }
        e = e.parent()?;
    }
}
