//! `Element`: the polymorphic FHIRPath value.
//!
//! `Element` wraps either a primitive FHIRPath value (produced by literals
//! or by engine functions) or a `Structured` value backed by a host-provided
//! [`HostNode`] — the seam a concrete resource DOM (JSON, XML, ...) adapts
//! to. The core never depends on a concrete resource representation; only
//! `HostNode` crosses that boundary.
//!
//! Ownership: a child `Element` holds a strong `Rc` to its own data and a
//! *weak* back-reference to its parent, so the graph a resource tree forms
//! can never keep itself alive through a cycle — the root holds everything
//! top-down.

use crate::decimal::Decimal;
use crate::error::{Error, Result};
use crate::quantity::Quantity;
use crate::temporal::{DateTimePrecision, DateTimeValue, DatePrecision, DateValue, TimeValue};
use crate::tri::Tri;
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

/// The FHIRPath type tag of an `Element`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Integer,
    Decimal,
    String,
    Boolean,
    Date,
    DateTime,
    Time,
    Quantity,
    Structured,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::Integer => "Integer",
            ElementType::Decimal => "Decimal",
            ElementType::String => "String",
            ElementType::Boolean => "Boolean",
            ElementType::Date => "Date",
            ElementType::DateTime => "DateTime",
            ElementType::Time => "Time",
            ElementType::Quantity => "Quantity",
            ElementType::Structured => "Structured",
        };
        write!(f, "{s}")
    }
}

/// A primitive value as reported by a [`HostNode`] for a leaf of the
/// resource DOM (e.g. `Patient.active`, `Patient.name.family`).
#[derive(Debug, Clone)]
pub enum PrimitiveValue {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    String(String),
    Date(DateValue),
    Time(TimeValue),
    DateTime(DateTimeValue),
    Quantity(Quantity),
}

/// The adapter seam a host resource DOM (JSON, XML, in-memory object graph,
/// ...) implements so the engine can navigate it without depending on any
/// concrete format.
pub trait HostNode: fmt::Debug {
    /// `Some` if this node is itself a primitive leaf.
    fn primitive(&self) -> Option<PrimitiveValue>;

    /// Distinct child field names, in declaration order.
    fn child_names(&self) -> Vec<String>;

    /// All child nodes under the given field name (0, 1, or many for
    /// repeating elements).
    fn children(&self, name: &str) -> Vec<Rc<dyn HostNode>>;

    /// `resourceType` if this node is itself a FHIR resource.
    fn resource_type(&self) -> Option<String> {
        None
    }

    fn is_resource(&self) -> bool {
        self.resource_type().is_some()
    }

    /// A resource that can itself hold other complete resources (e.g. a
    /// `Bundle`), as opposed to one embedded via `contained`.
    fn is_container_resource(&self) -> bool {
        false
    }

    /// `meta.profile` values declared on this node, if it is a resource.
    fn meta_profiles(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A handle to the profile/element-definition pair bound to an `Element`.
/// Defined here (rather than in `fhirkit-model`, which depends on this
/// crate) purely as a trait seam, so `Element` can carry type information
/// without this crate depending upward on the repository.
/// `fhirkit-model::ProfiledElementTypeInfo` is the concrete implementation.
pub trait ElementTypeInfo: fmt::Debug {
    fn profile_url(&self) -> &str;
    fn element_path(&self) -> &str;
    fn type_id(&self) -> &str;
}

pub type TypeInfoHandle = Rc<dyn ElementTypeInfo>;

#[derive(Debug, Clone)]
enum ElementKind {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    String(Rc<str>),
    Date(DateValue),
    Time(TimeValue),
    DateTime(DateTimeValue),
    Quantity(Quantity),
    Structured(Rc<dyn HostNode>),
}

struct ElementInner {
    kind: ElementKind,
    type_info: Option<TypeInfoHandle>,
    parent: Option<Weak<ElementInner>>,
}

impl fmt::Debug for ElementInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element").field("kind", &self.kind).finish()
    }
}

/// The FHIRPath value. Cheap to clone (reference-counted).
#[derive(Clone)]
pub struct Element(Rc<ElementInner>);

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl Element {
    fn new(kind: ElementKind, type_info: Option<TypeInfoHandle>, parent: Option<&Element>) -> Self {
        Element(Rc::new(ElementInner {
            kind,
            type_info,
            parent: parent.map(|p| Rc::downgrade(&p.0)),
        }))
    }

    pub fn boolean(b: bool) -> Self {
        Self::new(ElementKind::Boolean(b), None, None)
    }

    pub fn integer(i: i64) -> Self {
        Self::new(ElementKind::Integer(i), None, None)
    }

    pub fn decimal(d: Decimal) -> Self {
        Self::new(ElementKind::Decimal(crate::decimal::normalize(d)), None, None)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::new(ElementKind::String(Rc::from(s.into())), None, None)
    }

    pub fn date(d: DateValue) -> Self {
        Self::new(ElementKind::Date(d), None, None)
    }

    pub fn time(t: TimeValue) -> Self {
        Self::new(ElementKind::Time(t), None, None)
    }

    pub fn datetime(dt: DateTimeValue) -> Self {
        Self::new(ElementKind::DateTime(dt), None, None)
    }

    pub fn quantity(q: Quantity) -> Self {
        Self::new(ElementKind::Quantity(q), None, None)
    }

    /// Wrap a host-provided resource root (no parent, no bound type info;
    /// binding happens when a validator pairs it with a profile).
    pub fn structured(node: Rc<dyn HostNode>) -> Self {
        Self::new(ElementKind::Structured(node), None, None)
    }

    /// Return a copy of this element with type information attached
    /// (used by the validator/slicing engine when it resolves an
    /// `ElementDefinition` for a navigated child).
    pub fn with_type_info(&self, info: TypeInfoHandle) -> Self {
        Element(Rc::new(ElementInner {
            kind: self.0.kind.clone(),
            type_info: Some(info),
            parent: self.0.parent.clone(),
        }))
    }

    pub fn type_info(&self) -> Option<&TypeInfoHandle> {
        self.0.type_info.as_ref()
    }

    pub fn parent(&self) -> Option<Element> {
        self.0.parent.as_ref().and_then(Weak::upgrade).map(Element)
    }

    pub fn element_type(&self) -> ElementType {
        match &self.0.kind {
            ElementKind::Boolean(_) => ElementType::Boolean,
            ElementKind::Integer(_) => ElementType::Integer,
            ElementKind::Decimal(_) => ElementType::Decimal,
            ElementKind::String(_) => ElementType::String,
            ElementKind::Date(_) => ElementType::Date,
            ElementKind::Time(_) => ElementType::Time,
            ElementKind::DateTime(_) => ElementType::DateTime,
            ElementKind::Quantity(_) => ElementType::Quantity,
            ElementKind::Structured(_) => ElementType::Structured,
        }
    }

    fn host(&self) -> Option<&Rc<dyn HostNode>> {
        match &self.0.kind {
            ElementKind::Structured(n) => Some(n),
            _ => None,
        }
    }

    // ---- explicit conversions ----

    pub fn as_bool(&self) -> Result<bool> {
        match &self.0.kind {
            ElementKind::Boolean(b) => Ok(*b),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "Boolean" }),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match &self.0.kind {
            ElementKind::Integer(i) => Ok(*i),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "Integer" }),
        }
    }

    pub fn as_decimal(&self) -> Result<Decimal> {
        match &self.0.kind {
            ElementKind::Decimal(d) => Ok(*d),
            ElementKind::Integer(i) => Ok(crate::decimal::from_i64(*i)),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "Decimal" }),
        }
    }

    pub fn as_string(&self) -> Result<String> {
        match &self.0.kind {
            ElementKind::String(s) => Ok(s.to_string()),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "String" }),
        }
    }

    pub fn as_date(&self) -> Result<DateValue> {
        match &self.0.kind {
            ElementKind::Date(d) => Ok(*d),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "Date" }),
        }
    }

    pub fn as_time(&self) -> Result<TimeValue> {
        match &self.0.kind {
            ElementKind::Time(t) => Ok(*t),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "Time" }),
        }
    }

    pub fn as_datetime(&self) -> Result<DateTimeValue> {
        match &self.0.kind {
            ElementKind::DateTime(dt) => Ok(*dt),
            ElementKind::Date(d) => Ok(date_to_datetime(*d)),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "DateTime" }),
        }
    }

    pub fn as_quantity(&self) -> Result<Quantity> {
        match &self.0.kind {
            ElementKind::Quantity(q) => Ok(q.clone()),
            ElementKind::Decimal(d) => Ok(Quantity::new(*d, None)),
            ElementKind::Integer(i) => Ok(Quantity::new(crate::decimal::from_i64(*i), None)),
            _ => Err(Error::Conversion { from: self.element_type_str(), to: "Quantity" }),
        }
    }

    /// Broad, display-oriented string coercion used by `toString()`
    ///; unlike `as_string`, this succeeds for every primitive.
    pub fn display_string(&self) -> Option<String> {
        match &self.0.kind {
            ElementKind::String(s) => Some(s.to_string()),
            ElementKind::Integer(i) => Some(i.to_string()),
            ElementKind::Decimal(d) => Some(d.to_string()),
            ElementKind::Boolean(b) => Some(b.to_string()),
            ElementKind::Date(d) => Some(d.to_string()),
            ElementKind::Time(t) => Some(t.to_string()),
            ElementKind::DateTime(dt) => Some(dt.to_string()),
            ElementKind::Quantity(q) => Some(q.to_string()),
            ElementKind::Structured(_) => None,
        }
    }

    fn element_type_str(&self) -> &'static str {
        match self.element_type() {
            ElementType::Integer => "Integer",
            ElementType::Decimal => "Decimal",
            ElementType::String => "String",
            ElementType::Boolean => "Boolean",
            ElementType::Date => "Date",
            ElementType::DateTime => "DateTime",
            ElementType::Time => "Time",
            ElementType::Quantity => "Quantity",
            ElementType::Structured => "Structured",
        }
    }

    // ---- resource metadata ----

    pub fn is_resource(&self) -> bool {
        self.host().map(|h| h.is_resource()).unwrap_or(false)
    }

    pub fn is_container_resource(&self) -> bool {
        self.host().map(|h| h.is_container_resource()).unwrap_or(false)
    }

    pub fn resource_type(&self) -> Option<String> {
        self.host().and_then(|h| h.resource_type())
    }

    pub fn profiles(&self) -> Vec<String> {
        self.host().map(|h| h.meta_profiles()).unwrap_or_default()
    }

    /// Has a primitive value (is a leaf), per `hasValue()`.
    pub fn has_value(&self) -> bool {
        !matches!(self.0.kind, ElementKind::Structured(_))
    }

    // ---- navigation ----

    pub fn sub_element_names(&self) -> Vec<String> {
        self.host().map(|h| h.child_names()).unwrap_or_default()
    }

    pub fn has_sub_element(&self, name: &str) -> bool {
        self.host()
            .map(|h| !h.children(name).is_empty())
            .unwrap_or(false)
    }

    pub fn sub_elements(&self, name: &str) -> Vec<Element> {
        let Some(host) = self.host() else { return Vec::new() };
        host.children(name)
            .into_iter()
            .map(|child| self.wrap_host_child(child))
            .collect()
    }

    /// All named children, across every field (used by `children()`).
    pub fn all_children(&self) -> Vec<Element> {
        let Some(host) = self.host() else { return Vec::new() };
        let names = host.child_names();
        names
            .into_iter()
            .flat_map(|name| self.sub_elements(&name))
            .collect()
    }

    fn wrap_host_child(&self, node: Rc<dyn HostNode>) -> Element {
        let kind = match node.primitive() {
            Some(PrimitiveValue::Boolean(b)) => ElementKind::Boolean(b),
            Some(PrimitiveValue::Integer(i)) => ElementKind::Integer(i),
            Some(PrimitiveValue::Decimal(d)) => ElementKind::Decimal(crate::decimal::normalize(d)),
            Some(PrimitiveValue::String(s)) => ElementKind::String(Rc::from(s)),
            Some(PrimitiveValue::Date(d)) => ElementKind::Date(d),
            Some(PrimitiveValue::Time(t)) => ElementKind::Time(t),
            Some(PrimitiveValue::DateTime(dt)) => ElementKind::DateTime(dt),
            Some(PrimitiveValue::Quantity(q)) => ElementKind::Quantity(q),
            None => ElementKind::Structured(node),
        };
        Element::new(kind, None, Some(self))
    }

    // ---- ordering & equality ----

    /// Partial order with implicit promotion (Integer ≤ Decimal ≤ Quantity;
    /// Date ≤ DateTime). `None` means undefined.
    pub fn compare_to(&self, other: &Element) -> Option<Ordering> {
        use ElementKind::*;
        match (&self.0.kind, &other.0.kind) {
            (Integer(a), Integer(b)) => Some(a.cmp(b)),
            (Decimal(a), Decimal(b)) => Some(a.cmp(b)),
            (Integer(a), Decimal(b)) => Some(crate::decimal::from_i64(*a).cmp(b)),
            (Decimal(a), Integer(b)) => Some(a.cmp(&crate::decimal::from_i64(*b))),
            (Quantity(a), Quantity(b)) => a.partial_cmp_same_unit(b),
            (Quantity(a), Integer(_)) | (Quantity(a), Decimal(_)) if a.unit.is_none() => {
                let b = other.as_decimal().ok()?;
                Some(a.value.cmp(&b))
            }
            (Integer(_), Quantity(b)) | (Decimal(_), Quantity(b)) if b.unit.is_none() => {
                let a = self.as_decimal().ok()?;
                Some(a.cmp(&b.value))
            }
            (String(a), String(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => a.partial_cmp_precise(b),
            (Time(a), Time(b)) => a.partial_cmp_precise(b),
            (DateTime(a), DateTime(b)) => a.partial_cmp_precise(b),
            (Date(a), DateTime(b)) => date_to_datetime(*a).partial_cmp_precise(b),
            (DateTime(a), Date(b)) => a.partial_cmp_precise(&date_to_datetime(*b)),
            _ => None,
        }
    }

    /// FHIRPath structural equality, tri-valued.
    pub fn equals(&self, other: &Element) -> Tri {
        use ElementKind::*;
        match (&self.0.kind, &other.0.kind) {
            (Boolean(a), Boolean(b)) => Tri::from_bool(a == b),
            (String(a), String(b)) => Tri::from_bool(a == b),
            (Structured(_), Structured(_)) => self.structural_equals(other),
            // Quantities with different units aren't comparable (no unit
            // conversion in scope), but FHIRPath `=` still has an answer:
            // they're simply unequal, not an undefined/empty result.
            (Quantity(a), Quantity(b)) if a.unit != b.unit => Tri::False,
            _ => match self.compare_to(other) {
                Some(Ordering::Equal) => Tri::True,
                Some(_) => Tri::False,
                None if self.element_type() == other.element_type() => Tri::Empty,
                None => Tri::False,
            },
        }
    }

    fn structural_equals(&self, other: &Element) -> Tri {
        let mut a_names = self.sub_element_names();
        let mut b_names = other.sub_element_names();
        a_names.sort();
        b_names.sort();
        if a_names != b_names {
            return Tri::False;
        }
        let mut result = Tri::True;
        for name in a_names {
            let a_children = self.sub_elements(&name);
            let b_children = other.sub_elements(&name);
            if a_children.len() != b_children.len() {
                return Tri::False;
            }
            for (a, b) in a_children.iter().zip(b_children.iter()) {
                result = result.and(a.equals(b));
                if result == Tri::False {
                    return Tri::False;
                }
            }
        }
        result
    }

    /// Subtree pattern match used by the validator's `pattern` checks
    ///: every child named in `pattern` must be present on
    /// `self` with a matching value, recursively; extra children on
    /// `self` are allowed.
    pub fn matches_pattern(&self, pattern: &Element) -> bool {
        if pattern.element_type() != ElementType::Structured {
            return matches!(self.equals(pattern), Tri::True);
        }
        for name in pattern.sub_element_names() {
            let pattern_children = pattern.sub_elements(&name);
            let self_children = self.sub_elements(&name);
            if pattern_children.len() > self_children.len() {
                return false;
            }
            for (p, s) in pattern_children.iter().zip(self_children.iter()) {
                if !s.matches_pattern(p) {
                    return false;
                }
            }
        }
        true
    }
}

fn date_to_datetime(d: DateValue) -> DateTimeValue {
    use chrono::TimeZone;
    let naive = d.value.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    let value = chrono::FixedOffset::east_opt(0)
        .expect("zero offset is always valid")
        .from_utc_datetime(&naive);
    let precision = match d.precision {
        DatePrecision::Year => DateTimePrecision::Year,
        DatePrecision::Month => DateTimePrecision::Month,
        DatePrecision::Day => DateTimePrecision::Day,
    };
    DateTimeValue { value, precision, tz_offset: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_promotion_equality() {
        let a = Element::integer(33);
        let b = Element::decimal(crate::decimal::parse("33.0").unwrap());
        assert_eq!(a.equals(&b), Tri::True);
    }

    #[test]
    fn quantity_different_units_not_equal() {
        let a = Element::quantity(Quantity::new(crate::decimal::from_i64(5), Some("mg".into())));
        let b = Element::quantity(Quantity::new(crate::decimal::from_i64(5), Some("kg".into())));
        assert_eq!(a.equals(&b), Tri::False);
    }
}
