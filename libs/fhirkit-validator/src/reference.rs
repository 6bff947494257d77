//! Reference resolution (spec §4.6): parses a `Reference.reference` (or a
//! bare URL-valued string), computes the target's identity in the
//! containing resource's bundle context, and resolves it against the
//! enclosing `Bundle`'s other entries, the resource's own `contained`
//! list, or the resource itself.
//!
//! Resolution never needs [`fhirkit_model::Bundle`]'s wire shape — the
//! runtime instance tree is navigated the same way FHIRPath navigates
//! everything else, through [`Element`]'s parent chain, so a contained or
//! bundled resource is found without re-parsing anything.

use fhirkit_fhirpath::ReferenceResolverHook;
use fhirkit_values::Element;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub scheme: Option<String>,
    pub path_or_id: String,
    pub contained_id: Option<String>,
}

/// Parse a `Reference.reference` string per spec §4.6 step 1. `None`
/// means the scheme wasn't recognised; the caller logs a warning since
/// the surrounding validator step (not this function) owns the
/// diagnostic vocabulary.
pub fn parse_reference(raw: &str) -> Option<ParsedReference> {
    if raw.is_empty() {
        return None;
    }
    if let Some(contained_id) = raw.strip_prefix('#') {
        return Some(ParsedReference { scheme: None, path_or_id: raw.to_string(), contained_id: Some(contained_id.to_string()) });
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(ParsedReference { scheme: Some("http".to_string()), path_or_id: raw.to_string(), contained_id: None });
    }
    if raw.starts_with("urn:uuid:") || raw.starts_with("urn:oid:") {
        let scheme = raw.splitn(3, ':').take(2).collect::<Vec<_>>().join(":");
        return Some(ParsedReference { scheme: Some(scheme), path_or_id: raw.to_string(), contained_id: None });
    }
    if raw.contains(':') {
        debug!(reference = %raw, "unrecognized reference scheme");
        return None;
    }
    Some(ParsedReference { scheme: None, path_or_id: raw.to_string(), contained_id: None })
}

fn split_resource_type_id(path_or_id: &str) -> Option<(&str, &str)> {
    let mut parts = path_or_id.splitn(3, '/');
    let resource_type = parts.next()?;
    let id = parts.next()?;
    if resource_type.is_empty() || id.is_empty() {
        return None;
    }
    Some((resource_type, id))
}

fn containing_resource(element: &Element) -> Option<Element> {
    let mut current = element.clone();
    loop {
        if current.is_resource() {
            return Some(current);
        }
        current = current.parent()?;
    }
}

fn single_string(element: &Element, name: &str) -> Option<String> {
    element.sub_elements(name).first().and_then(Element::display_string)
}

/// The `BundleEntry` this resource was loaded as, if any — its parent in
/// the `Element` tree, since `sub_elements("resource")` on an entry
/// returns exactly this element. `None` when the resource wasn't reached
/// through a `Bundle.entry.resource` navigation.
fn bundle_entry(resource: &Element) -> Option<Element> {
    let entry = resource.parent()?;
    (!entry.is_resource()).then_some(entry)
}

fn enclosing_bundle(resource: &Element) -> Option<Element> {
    let entry = bundle_entry(resource)?;
    let bundle = entry.parent()?;
    bundle.is_container_resource().then_some(bundle)
}

/// Strip `resourceType/id` off the end of a `fullUrl`, yielding the
/// RESTful base a relative reference is completed against, per spec
/// §4.6 step 2.
fn restful_base(full_url: &str, resource_type: &str, id: &str) -> Option<String> {
    let suffix = format!("{resource_type}/{id}");
    full_url.strip_suffix(suffix.as_str()).map(str::to_string)
}

fn find_contained(resource: &Element, contained_id: &str) -> Option<Element> {
    resource
        .sub_elements("contained")
        .into_iter()
        .find(|c| single_string(c, "id").as_deref() == Some(contained_id))
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(Element),
    Malformed,
    Unresolvable,
}

impl Resolution {
    pub fn into_element(self) -> Option<Element> {
        match self {
            Resolution::Resolved(e) => Some(e),
            _ => None,
        }
    }
}

/// Implements both `%resolve` (via [`ReferenceResolverHook`]) and the
/// validator's own reference-checking step.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// `element` is the `Reference`-typed node itself (structured, with a
    /// `reference` child) or a bare reference string.
    pub fn resolve(&self, element: &Element) -> Resolution {
        let raw = match element.element_type() {
            fhirkit_values::element::ElementType::Structured => single_string(element, "reference"),
            _ => element.display_string(),
        };
        let Some(raw) = raw else { return Resolution::Unresolvable };

        let Some(parsed) = parse_reference(&raw) else { return Resolution::Malformed };

        let Some(resource) = containing_resource(element) else { return Resolution::Unresolvable };

        if let Some(contained_id) = &parsed.contained_id {
            return find_contained(&resource, contained_id).map(Resolution::Resolved).unwrap_or(Resolution::Unresolvable);
        }

        let Some((target_type, target_id)) = split_resource_type_id(&parsed.path_or_id) else {
            return Resolution::Unresolvable;
        };

        let own_id = single_string(&resource, "id");
        if resource.resource_type().as_deref() == Some(target_type) && own_id.as_deref() == Some(target_id) {
            return Resolution::Resolved(resource);
        }

        let Some(full_url) = bundle_entry(&resource).as_ref().and_then(|e| single_string(e, "fullUrl")) else {
            debug!(reference = %raw, "containing resource has no bundle fullUrl; reference returned unresolved");
            return Resolution::Unresolvable;
        };
        let Some(base) = restful_base(&full_url, resource.resource_type().as_deref().unwrap_or(""), own_id.as_deref().unwrap_or("")) else {
            debug!(%full_url, "fullUrl does not end in ResourceType/id; cannot derive a RESTful base");
            return Resolution::Unresolvable;
        };
        let target_identity = format!("{base}{target_type}/{target_id}");

        let Some(bundle) = enclosing_bundle(&resource) else { return Resolution::Unresolvable };
        for entry in bundle.sub_elements("entry") {
            if single_string(&entry, "fullUrl").as_deref() == Some(target_identity.as_str()) {
                if let Some(target) = entry.sub_elements("resource").into_iter().next() {
                    return Resolution::Resolved(target);
                }
            }
        }
        Resolution::Unresolvable
    }
}

impl ReferenceResolverHook for ReferenceResolver {
    fn resolve(&self, element: &Element) -> Option<Element> {
        ReferenceResolver::resolve(self, element).into_element()
    }
}
