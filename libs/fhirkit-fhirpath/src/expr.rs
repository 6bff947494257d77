//! The compiled expression tree (spec §4.2, component D): every node is a
//! `dyn Expression` with a single `eval` method, built only by
//! [`crate::compiler`]. No operator gets its own public type outside this
//! module — the compiler's visitor is the sole place that constructs them,
//! per spec §9's "polymorphic expression tree" design note.

use crate::context::EvalContext;
use crate::error::{Error, Result};
use fhirkit_values::element::ElementType;
use fhirkit_values::{Collection, Element, Tri};
use regex::Regex;
use std::fmt;

pub trait Expression: fmt::Debug {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection>;
}

pub type Expr = Box<dyn Expression>;

fn single_bool(c: &Collection) -> Result<bool> {
    match c.as_tri_bool().map_err(Error::from)? {
        Tri::True => Ok(true),
        Tri::False => Ok(false),
        Tri::Empty => Ok(false),
    }
}

// ---------------------------------------------------------------- literals

#[derive(Debug)]
pub struct NullLiteral;
impl Expression for NullLiteral {
    fn eval(&self, _ctx: &EvalContext, _input: &Collection) -> Result<Collection> {
        Ok(Collection::empty())
    }
}

#[derive(Debug)]
pub struct ConstLiteral(pub Element);
impl Expression for ConstLiteral {
    fn eval(&self, _ctx: &EvalContext, _input: &Collection) -> Result<Collection> {
        Ok(Collection::singleton(self.0.clone()))
    }
}

// ----------------------------------------------------------------- context

#[derive(Debug)]
pub struct ThisNode;
impl Expression for ThisNode {
    fn eval(&self, _ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        Ok(input.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ExternalConstantKind {
    Context,
    Resource,
    RootResource,
    Ucum,
}

#[derive(Debug)]
pub struct ExternalConstantNode(pub ExternalConstantKind);
impl Expression for ExternalConstantNode {
    fn eval(&self, ctx: &EvalContext, _input: &Collection) -> Result<Collection> {
        Ok(match self.0 {
            ExternalConstantKind::Context => Collection::singleton(ctx.context_root().clone()),
            ExternalConstantKind::Resource => ctx.resource().map(Collection::singleton).unwrap_or_else(Collection::empty),
            ExternalConstantKind::RootResource => {
                ctx.root_resource().map(Collection::singleton).unwrap_or_else(Collection::empty)
            }
            ExternalConstantKind::Ucum => Collection::singleton(Element::string("http://unitsofmeasure.org")),
        })
    }
}

// ------------------------------------------------------------ navigation

/// Selects named children of each input element, expanding choice-type
/// field names the way `Observation.value` matches a stored `valueQuantity`
/// (spec §4.2 "Path selection"). When the element is itself a resource
/// whose `resourceType` matches `name`, it is yielded as-is.
#[derive(Debug)]
pub struct MemberInvocationNode(pub String);
impl Expression for MemberInvocationNode {
    fn eval(&self, _ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let mut out = Vec::new();
        for e in input.iter() {
            if e.resource_type().as_deref() == Some(self.0.as_str()) {
                out.push(e.clone());
                continue;
            }
            out.extend(choice_aware_children(e, &self.0));
        }
        Ok(Collection::from_vec(out))
    }
}

/// Exact children under `name`, falling back to a choice-type-name scan
/// (`value` -> `valueQuantity`, `valueString`, ...) when no exact match
/// exists, since the value model doesn't always carry bound profile type
/// information to resolve `value[x]` expansion formally.
pub fn choice_aware_children(e: &Element, name: &str) -> Vec<Element> {
    let direct = e.sub_elements(name);
    if !direct.is_empty() {
        return direct;
    }
    let mut out = Vec::new();
    for candidate in e.sub_element_names() {
        if candidate.len() > name.len() && candidate.starts_with(name) {
            let next_char_upper = candidate[name.len()..].chars().next().map(|c| c.is_uppercase()).unwrap_or(false);
            if next_char_upper {
                out.extend(e.sub_elements(&candidate));
            }
        }
    }
    out
}

#[derive(Debug)]
pub struct InvocationNode {
    pub target: Expr,
    pub invocation: Expr,
}
impl Expression for InvocationNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let intermediate = self.target.eval(ctx, input)?;
        self.invocation.eval(ctx, &intermediate)
    }
}

#[derive(Debug)]
pub struct IndexerNode {
    pub target: Expr,
    pub index: Expr,
}
impl Expression for IndexerNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let index_coll = self.index.eval(ctx, input)?;
        let Some(idx) = index_coll.single_or_empty().map_err(Error::from)? else { return Ok(Collection::empty()) };
        let idx = idx.as_int().map_err(Error::from)?;
        if idx < 0 {
            return Ok(Collection::empty());
        }
        match items.as_slice().get(idx as usize) {
            Some(e) => Ok(Collection::singleton(e.clone())),
            None => Ok(Collection::empty()),
        }
    }
}

#[derive(Debug)]
pub struct ChildrenNode;
impl Expression for ChildrenNode {
    fn eval(&self, _ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let mut out = Vec::new();
        for e in input.iter() {
            out.extend(e.all_children());
        }
        Ok(Collection::from_vec(out))
    }
}

/// Pre-order transitive descendants, excluding the inputs. Uses an
/// explicit work stack rather than recursion so deeply nested resources
/// don't grow the call stack unboundedly (spec §5 recursion bounds).
#[derive(Debug)]
pub struct DescendantsNode;
impl Expression for DescendantsNode {
    fn eval(&self, _ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let mut out = Vec::new();
        for root in input.iter() {
            let mut stack: Vec<Element> = root.all_children().into_iter().rev().collect();
            while let Some(e) = stack.pop() {
                let children: Vec<Element> = e.all_children();
                out.push(e);
                for c in children.into_iter().rev() {
                    stack.push(c);
                }
            }
        }
        Ok(Collection::from_vec(out))
    }
}

// -------------------------------------------------------------- existence

#[derive(Debug)]
pub struct EmptyNode(pub Expr);
impl Expression for EmptyNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let c = self.0.eval(ctx, input)?;
        Ok(Collection::singleton(Element::boolean(c.is_empty())))
    }
}

/// `exists([crit])`, implemented as `where(crit).exists()` per spec.
#[derive(Debug)]
pub struct ExistsNode {
    pub target: Expr,
    pub criteria: Option<Expr>,
}
impl Expression for ExistsNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let filtered = match &self.criteria {
            Some(crit) => filter_where(ctx, crit, &items)?,
            None => items,
        };
        Ok(Collection::singleton(Element::boolean(!filtered.is_empty())))
    }
}

/// `all(crit)`: vacuously true on empty input.
#[derive(Debug)]
pub struct AllNode {
    pub target: Expr,
    pub criteria: Expr,
}
impl Expression for AllNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        for item in items.iter() {
            let result = self.criteria.eval(ctx, &Collection::singleton(item.clone()))?;
            if !single_bool(&result)? {
                return Ok(Collection::singleton(Element::boolean(false)));
            }
        }
        Ok(Collection::singleton(Element::boolean(true)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BoolAggKind {
    AllTrue,
    AnyTrue,
    AllFalse,
    AnyFalse,
}
#[derive(Debug)]
pub struct BoolAggNode {
    pub target: Expr,
    pub kind: BoolAggKind,
}
impl Expression for BoolAggNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let mut bools = Vec::with_capacity(items.len());
        for item in items.iter() {
            bools.push(item.as_bool().map_err(Error::from)?);
        }
        let result = match self.kind {
            BoolAggKind::AllTrue => bools.iter().all(|b| *b),
            BoolAggKind::AnyTrue => bools.iter().any(|b| *b),
            BoolAggKind::AllFalse => bools.iter().all(|b| !*b),
            BoolAggKind::AnyFalse => bools.iter().any(|b| !*b),
        };
        Ok(Collection::singleton(Element::boolean(result)))
    }
}

#[derive(Debug)]
pub struct CountNode(pub Expr);
impl Expression for CountNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        Ok(Collection::singleton(Element::integer(items.len() as i64)))
    }
}

#[derive(Debug)]
pub struct DistinctNode(pub Expr);
impl Expression for DistinctNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        Ok(distinct(items))
    }
}

fn distinct(items: Collection) -> Collection {
    let mut out: Vec<Element> = Vec::new();
    for item in items.into_vec() {
        if !out.iter().any(|e| matches!(e.equals(&item), Tri::True)) {
            out.push(item);
        }
    }
    Collection::from_vec(out)
}

#[derive(Debug)]
pub struct IsDistinctNode(pub Expr);
impl Expression for IsDistinctNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        let len = items.len();
        let deduped = distinct(items);
        Ok(Collection::singleton(Element::boolean(deduped.len() == len)))
    }
}

// -------------------------------------------------------------- filtering

#[derive(Debug)]
pub struct WhereNode {
    pub target: Expr,
    pub criteria: Expr,
}
impl Expression for WhereNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        filter_where(ctx, &self.criteria, &items)
    }
}

fn filter_where(ctx: &EvalContext, criteria: &Expr, items: &Collection) -> Result<Collection> {
    let mut out = Vec::new();
    for item in items.iter() {
        let result = criteria.eval(ctx, &Collection::singleton(item.clone()))?;
        if single_bool(&result)? {
            out.push(item.clone());
        }
    }
    Ok(Collection::from_vec(out))
}

#[derive(Debug)]
pub struct SelectNode {
    pub target: Expr,
    pub projection: Expr,
}
impl Expression for SelectNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let mut out = Collection::empty();
        for item in items.iter() {
            out.append(self.projection.eval(ctx, &Collection::singleton(item.clone()))?);
        }
        Ok(out)
    }
}

#[derive(Debug)]
pub struct OfTypeNode {
    pub target: Expr,
    pub type_name: String,
}
impl Expression for OfTypeNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let out = items.into_vec().into_iter().filter(|e| is_derived_from(ctx, e, &self.type_name)).collect();
        Ok(Collection::from_vec(out))
    }
}

// -------------------------------------------------------------- subsetting

#[derive(Debug)]
pub struct FirstNode(pub Expr);
impl Expression for FirstNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        Ok(items.as_slice().first().cloned().map(Collection::singleton).unwrap_or_else(Collection::empty))
    }
}

#[derive(Debug)]
pub struct TailNode(pub Expr);
impl Expression for TailNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        let rest = items.as_slice().iter().skip(1).cloned().collect();
        Ok(Collection::from_vec(rest))
    }
}

#[derive(Debug)]
pub struct IntersectNode {
    pub target: Expr,
    pub other: Expr,
}
impl Expression for IntersectNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.target.eval(ctx, input)?;
        let b = self.other.eval(ctx, input)?;
        let mut out = Vec::new();
        for item in a.iter() {
            if b.contains_equivalent(item) && !out.iter().any(|e: &Element| matches!(e.equals(item), Tri::True)) {
                out.push(item.clone());
            }
        }
        Ok(Collection::from_vec(out))
    }
}

// -------------------------------------------------------------- combining

#[derive(Debug)]
pub struct UnionNode {
    pub left: Expr,
    pub right: Expr,
}
impl Expression for UnionNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?;
        let b = self.right.eval(ctx, input)?;
        let mut out = Vec::new();
        for item in a.into_vec().into_iter().chain(b.into_vec()) {
            if !out.iter().any(|e: &Element| matches!(e.equals(&item), Tri::True)) {
                out.push(item);
            }
        }
        Ok(Collection::from_vec(out))
    }
}

#[derive(Debug)]
pub struct CombineNode {
    pub target: Expr,
    pub other: Expr,
}
impl Expression for CombineNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let mut a = self.target.eval(ctx, input)?;
        let b = self.other.eval(ctx, input)?;
        a.append(b);
        Ok(a)
    }
}

// -------------------------------------------------- equality & comparison

#[derive(Debug, Clone, Copy)]
pub enum EqKind {
    Eq,
    Ne,
}
#[derive(Debug)]
pub struct EqualityNode {
    pub left: Expr,
    pub right: Expr,
    pub kind: EqKind,
}
impl Expression for EqualityNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?;
        let b = self.right.eval(ctx, input)?;
        let tri = a.equals(&b);
        let tri = if matches!(self.kind, EqKind::Ne) { tri.not() } else { tri };
        Ok(tri_to_collection(tri))
    }
}

fn tri_to_collection(tri: Tri) -> Collection {
    match tri {
        Tri::True => Collection::singleton(Element::boolean(true)),
        Tri::False => Collection::singleton(Element::boolean(false)),
        Tri::Empty => Collection::empty(),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum InequalityKind {
    Lt,
    Le,
    Gt,
    Ge,
}
#[derive(Debug)]
pub struct InequalityNode {
    pub left: Expr,
    pub right: Expr,
    pub kind: InequalityKind,
}
impl Expression for InequalityNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?;
        let b = self.right.eval(ctx, input)?;
        let (Some(a), Some(b)) = (a.single_or_empty().map_err(Error::from)?, b.single_or_empty().map_err(Error::from)?) else {
            return Ok(Collection::empty());
        };
        if category(a) != category(b) {
            return Err(Error::Type(format!("cannot compare {} to {}", a.element_type(), b.element_type())));
        }
        let Some(ordering) = a.compare_to(b) else { return Ok(Collection::empty()) };
        let result = match self.kind {
            InequalityKind::Lt => ordering.is_lt(),
            InequalityKind::Le => ordering.is_le(),
            InequalityKind::Gt => ordering.is_gt(),
            InequalityKind::Ge => ordering.is_ge(),
        };
        Ok(Collection::singleton(Element::boolean(result)))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Category {
    Numeric,
    Stringy,
    Temporal,
    Other,
}
fn category(e: &Element) -> Category {
    match e.element_type() {
        ElementType::Integer | ElementType::Decimal | ElementType::Quantity => Category::Numeric,
        ElementType::String => Category::Stringy,
        ElementType::Date | ElementType::Time | ElementType::DateTime => Category::Temporal,
        ElementType::Boolean | ElementType::Structured => Category::Other,
    }
}

// ----------------------------------------------------------- bool logic

#[derive(Debug)]
pub struct AndNode {
    pub left: Expr,
    pub right: Expr,
}
impl Expression for AndNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        let b = self.right.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        Ok(tri_to_collection(a.and(b)))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OrKind {
    Or,
    Xor,
}
#[derive(Debug)]
pub struct OrNode {
    pub left: Expr,
    pub right: Expr,
    pub kind: OrKind,
}
impl Expression for OrNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        let b = self.right.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        let tri = match self.kind {
            OrKind::Or => a.or(b),
            OrKind::Xor => a.xor(b),
        };
        Ok(tri_to_collection(tri))
    }
}

#[derive(Debug)]
pub struct ImpliesNode {
    pub left: Expr,
    pub right: Expr,
}
impl Expression for ImpliesNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        let b = self.right.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        Ok(tri_to_collection(a.implies(b)))
    }
}

#[derive(Debug)]
pub struct NotNode(pub Expr);
impl Expression for NotNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let tri = self.0.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        Ok(tri_to_collection(tri.not()))
    }
}

// ---------------------------------------------------------------- types

#[derive(Debug)]
pub struct IsNode {
    pub target: Expr,
    pub type_name: String,
}
impl Expression for IsNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let Some(item) = items.single_or_empty().map_err(Error::from)? else { return Ok(Collection::empty()) };
        Ok(Collection::singleton(Element::boolean(is_derived_from(ctx, item, &self.type_name))))
    }
}

#[derive(Debug)]
pub struct AsNode {
    pub target: Expr,
    pub type_name: String,
}
impl Expression for AsNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let Some(item) = items.single_or_empty().map_err(Error::from)? else { return Ok(Collection::empty()) };
        if is_derived_from(ctx, item, &self.type_name) {
            Ok(Collection::singleton(item.clone()))
        } else {
            Ok(Collection::empty())
        }
    }
}

/// Resolves `type_name` against the element's own primitive/FHIR type,
/// its declared `resourceType`, and — for profile-bound structured
/// elements — the repository's `baseDefinition` inheritance chain.
pub fn is_derived_from(ctx: &EvalContext, element: &Element, type_name: &str) -> bool {
    let type_name = type_name.rsplit('.').next().unwrap_or(type_name);
    match element.element_type() {
        ElementType::Boolean => return type_name == "Boolean",
        ElementType::Integer => return type_name == "Integer",
        ElementType::Decimal => return type_name == "Decimal",
        ElementType::String => return type_name == "String",
        ElementType::Date => return type_name == "Date",
        ElementType::Time => return type_name == "Time",
        ElementType::DateTime => return type_name == "DateTime",
        ElementType::Quantity => return type_name == "Quantity",
        ElementType::Structured => {}
    }
    if element.resource_type().as_deref() == Some(type_name) {
        return true;
    }
    let (Some(info), Some(repo)) = (element.type_info(), ctx.repository()) else { return false };
    let mut current_type = info.type_id().to_string();
    loop {
        if current_type == type_name {
            return true;
        }
        let Some(sd) = repo.structure_definition_for_type(&current_type) else { return false };
        match &sd.base_definition {
            Some(base) => current_type = base.rsplit('/').next().unwrap_or(base).to_string(),
            None => return false,
        }
    }
}

// ------------------------------------------------------------ membership

#[derive(Debug)]
pub struct InNode {
    pub item: Expr,
    pub collection: Expr,
}
impl Expression for InNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let item_coll = self.item.eval(ctx, input)?;
        let collection = self.collection.eval(ctx, input)?;
        if item_coll.is_empty() {
            return Ok(Collection::empty());
        }
        let item = item_coll.single().map_err(Error::from)?;
        Ok(Collection::singleton(Element::boolean(collection.contains_equivalent(item))))
    }
}

#[derive(Debug)]
pub struct ContainsOpNode {
    pub collection: Expr,
    pub item: Expr,
}
impl Expression for ContainsOpNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let collection = self.collection.eval(ctx, input)?;
        let item_coll = self.item.eval(ctx, input)?;
        if item_coll.is_empty() {
            return Ok(Collection::empty());
        }
        let item = item_coll.single().map_err(Error::from)?;
        Ok(Collection::singleton(Element::boolean(collection.contains_equivalent(item))))
    }
}

// ----------------------------------------------------------- conversions

#[derive(Debug)]
pub struct IifNode {
    pub condition: Expr,
    pub then_branch: Expr,
    pub else_branch: Option<Expr>,
}
impl Expression for IifNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let tri = self.condition.eval(ctx, input)?.as_tri_bool().map_err(Error::from)?;
        match tri {
            Tri::True => self.then_branch.eval(ctx, input),
            _ => match &self.else_branch {
                Some(e) => e.eval(ctx, input),
                None => Ok(Collection::empty()),
            },
        }
    }
}

#[derive(Debug)]
pub struct ToIntegerNode(pub Expr);
impl Expression for ToIntegerNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        let Some(item) = items.single_or_empty().map_err(Error::from)? else { return Ok(Collection::empty()) };
        let value = match item.element_type() {
            ElementType::Integer => item.as_int().map_err(Error::from)?,
            ElementType::String => match item.as_string().map_err(Error::from)?.trim().parse() {
                Ok(i) => i,
                Err(_) => return Ok(Collection::empty()),
            },
            ElementType::Boolean => i64::from(item.as_bool().map_err(Error::from)?),
            _ => return Ok(Collection::empty()),
        };
        Ok(Collection::singleton(Element::integer(value)))
    }
}

#[derive(Debug)]
pub struct ToStringNode(pub Expr);
impl Expression for ToStringNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        let Some(item) = items.single_or_empty().map_err(Error::from)? else { return Ok(Collection::empty()) };
        match item.display_string() {
            Some(s) => Ok(Collection::singleton(Element::string(s))),
            None => Ok(Collection::empty()),
        }
    }
}

// ------------------------------------------------------- string functions

#[derive(Debug)]
pub struct IndexOfNode {
    pub target: Expr,
    pub substring: Expr,
}
impl Expression for IndexOfNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let s = single_string_or_empty(ctx, &self.target, input)?;
        let sub = single_string_or_empty(ctx, &self.substring, input)?;
        let (Some(s), Some(sub)) = (s, sub) else { return Ok(Collection::empty()) };
        let idx = s.find(&sub).map(|b| s[..b].chars().count() as i64).unwrap_or(-1);
        Ok(Collection::singleton(Element::integer(idx)))
    }
}

#[derive(Debug)]
pub struct SubstringNode {
    pub target: Expr,
    pub start: Expr,
    pub length: Option<Expr>,
}
impl Expression for SubstringNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let Some(s) = single_string_or_empty(ctx, &self.target, input)? else { return Ok(Collection::empty()) };
        let chars: Vec<char> = s.chars().collect();
        let Some(start) = single_int_or_empty(ctx, &self.start, input)? else { return Ok(Collection::empty()) };
        if start < 0 || start as usize >= chars.len() {
            return Ok(Collection::empty());
        }
        let start = start as usize;
        let end = match &self.length {
            Some(len_expr) => match single_int_or_empty(ctx, len_expr, input)? {
                Some(len) if len >= 0 => (start + len as usize).min(chars.len()),
                _ => chars.len(),
            },
            None => chars.len(),
        };
        let result: String = chars[start..end].iter().collect();
        Ok(Collection::singleton(Element::string(result)))
    }
}

fn single_string_or_empty(ctx: &EvalContext, expr: &Expr, input: &Collection) -> Result<Option<String>> {
    let items = expr.eval(ctx, input)?;
    match items.single_or_empty().map_err(Error::from)? {
        Some(e) => Ok(Some(e.as_string().map_err(Error::from)?)),
        None => Ok(None),
    }
}

fn single_int_or_empty(ctx: &EvalContext, expr: &Expr, input: &Collection) -> Result<Option<i64>> {
    let items = expr.eval(ctx, input)?;
    match items.single_or_empty().map_err(Error::from)? {
        Some(e) => Ok(Some(e.as_int().map_err(Error::from)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy)]
pub enum StringPredicateKind {
    StartsWith,
    Contains,
}
#[derive(Debug)]
pub struct StringPredicateNode {
    pub target: Expr,
    pub arg: Expr,
    pub kind: StringPredicateKind,
}
impl Expression for StringPredicateNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let (Some(s), Some(arg)) =
            (single_string_or_empty(ctx, &self.target, input)?, single_string_or_empty(ctx, &self.arg, input)?)
        else {
            return Ok(Collection::empty());
        };
        let result = match self.kind {
            StringPredicateKind::StartsWith => s.starts_with(&arg),
            StringPredicateKind::Contains => s.contains(&arg),
        };
        Ok(Collection::singleton(Element::boolean(result)))
    }
}

#[derive(Debug)]
pub struct MatchesNode {
    pub target: Expr,
    pub pattern: Expr,
}
impl Expression for MatchesNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let (Some(s), Some(pattern)) =
            (single_string_or_empty(ctx, &self.target, input)?, single_string_or_empty(ctx, &self.pattern, input)?)
        else {
            return Ok(Collection::empty());
        };
        let re = Regex::new(&pattern).map_err(|e| Error::Type(format!("invalid regex '{pattern}': {e}")))?;
        Ok(Collection::singleton(Element::boolean(re.is_match(&s))))
    }
}

#[derive(Debug)]
pub struct ReplaceMatchesNode {
    pub target: Expr,
    pub pattern: Expr,
    pub replacement: Expr,
}
impl Expression for ReplaceMatchesNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let Some(s) = single_string_or_empty(ctx, &self.target, input)? else { return Ok(Collection::empty()) };
        let Some(pattern) = single_string_or_empty(ctx, &self.pattern, input)? else { return Ok(Collection::empty()) };
        let Some(replacement) = single_string_or_empty(ctx, &self.replacement, input)? else {
            return Ok(Collection::empty());
        };
        let re = Regex::new(&pattern).map_err(|e| Error::Type(format!("invalid regex '{pattern}': {e}")))?;
        let result = re.replace_all(&s, replacement.replace("$", "$$").replace("\\$$", "$").as_str()).to_string();
        Ok(Collection::singleton(Element::string(result)))
    }
}

#[derive(Debug)]
pub struct LengthNode(pub Expr);
impl Expression for LengthNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let Some(s) = single_string_or_empty(ctx, &self.0, input)? else { return Ok(Collection::empty()) };
        Ok(Collection::singleton(Element::integer(s.chars().count() as i64)))
    }
}

#[derive(Debug)]
pub struct ConcatNode {
    pub left: Expr,
    pub right: Expr,
}
impl Expression for ConcatNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let left = single_string_or_empty(ctx, &self.left, input)?.unwrap_or_default();
        let right = single_string_or_empty(ctx, &self.right, input)?.unwrap_or_default();
        Ok(Collection::singleton(Element::string(format!("{left}{right}"))))
    }
}

// ---------------------------------------------------------------- math

#[derive(Debug)]
pub struct PlusNode {
    pub left: Expr,
    pub right: Expr,
}
impl Expression for PlusNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?;
        let b = self.right.eval(ctx, input)?;
        let (Some(a), Some(b)) = (a.single_or_empty().map_err(Error::from)?, b.single_or_empty().map_err(Error::from)?) else {
            return Ok(Collection::empty());
        };
        match (a.element_type(), b.element_type()) {
            (ElementType::Integer, ElementType::Integer) => {
                Ok(Collection::singleton(Element::integer(a.as_int().map_err(Error::from)? + b.as_int().map_err(Error::from)?)))
            }
            (ElementType::String, ElementType::String) => {
                Ok(Collection::singleton(Element::string(format!("{}{}", a.as_string().map_err(Error::from)?, b.as_string().map_err(Error::from)?))))
            }
            _ => Err(Error::Unsupported { feature: "`+` on non-Integer/non-String operands".into() }),
        }
    }
}

#[derive(Debug)]
pub struct ModNode {
    pub left: Expr,
    pub right: Expr,
}
impl Expression for ModNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let a = self.left.eval(ctx, input)?;
        let b = self.right.eval(ctx, input)?;
        let (Some(a), Some(b)) = (a.single_or_empty().map_err(Error::from)?, b.single_or_empty().map_err(Error::from)?) else {
            return Ok(Collection::empty());
        };
        if a.element_type() == ElementType::Integer && b.element_type() == ElementType::Integer {
            let divisor = b.as_int().map_err(Error::from)?;
            if divisor == 0 {
                return Ok(Collection::empty());
            }
            return Ok(Collection::singleton(Element::integer(a.as_int().map_err(Error::from)? % divisor)));
        }
        let divisor = b.as_decimal().map_err(Error::from)?;
        if divisor.is_zero() {
            return Ok(Collection::empty());
        }
        let dividend = a.as_decimal().map_err(Error::from)?;
        Ok(Collection::singleton(Element::decimal(dividend % divisor)))
    }
}

/// Arithmetic/operators declared by the FHIRPath grammar but explicitly
/// out of scope (spec §9 Open Questions: `*`, `/`, `-`, `div`, `~`/`!~`,
/// `last()`, `skip()`, `take()`, `subsetOf`/`supersetOf`, date arithmetic,
/// `toDate`/`toTime`/`toDateTime`). Compiles, but fails at evaluation with
/// a typed "unsupported" error rather than silently misbehaving.
#[derive(Debug)]
pub struct UnsupportedNode(pub &'static str);
impl Expression for UnsupportedNode {
    fn eval(&self, _ctx: &EvalContext, _input: &Collection) -> Result<Collection> {
        Err(Error::Unsupported { feature: self.0.to_string() })
    }
}

// -------------------------------------------------------- FHIR supplements

#[derive(Debug)]
pub struct ExtensionNode {
    pub target: Expr,
    pub url: Expr,
}
impl Expression for ExtensionNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let Some(url) = single_string_or_empty(ctx, &self.url, input)? else { return Ok(Collection::empty()) };
        let mut out = Vec::new();
        for item in items.iter() {
            for ext in choice_aware_children(item, "extension") {
                if choice_aware_children(&ext, "url").iter().any(|u| u.as_string().map(|s| s == url).unwrap_or(false)) {
                    out.push(ext);
                }
            }
        }
        Ok(Collection::from_vec(out))
    }
}

#[derive(Debug)]
pub struct HasValueNode(pub Expr);
impl Expression for HasValueNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        let result = items.single_or_empty().map_err(Error::from)?.map(|e| e.has_value()).unwrap_or(false);
        Ok(Collection::singleton(Element::boolean(result)))
    }
}

#[derive(Debug)]
pub struct GetValueNode(pub Expr);
impl Expression for GetValueNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        match items.single_or_empty().map_err(Error::from)? {
            Some(e) if e.has_value() => Ok(Collection::singleton(e.clone())),
            _ => Ok(Collection::empty()),
        }
    }
}

#[derive(Debug)]
pub struct ConformsToNode {
    pub target: Expr,
    pub profile_url: Expr,
}
impl Expression for ConformsToNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.target.eval(ctx, input)?;
        let Some(item) = items.single_or_empty().map_err(Error::from)? else { return Ok(Collection::empty()) };
        let Some(url) = single_string_or_empty(ctx, &self.profile_url, input)? else { return Ok(Collection::empty()) };
        let Some(checker) = ctx.conforms_to_checker() else {
            return Err(Error::Unsupported { feature: "conformsTo() without a registered validator".into() });
        };
        Ok(Collection::singleton(Element::boolean(checker.conforms_to(item, &url))))
    }
}

#[derive(Debug)]
pub struct HtmlChecksNode;
impl Expression for HtmlChecksNode {
    fn eval(&self, _ctx: &EvalContext, _input: &Collection) -> Result<Collection> {
        Ok(Collection::singleton(Element::boolean(true)))
    }
}

#[derive(Debug)]
pub struct ResolveNode(pub Expr);
impl Expression for ResolveNode {
    fn eval(&self, ctx: &EvalContext, input: &Collection) -> Result<Collection> {
        let items = self.0.eval(ctx, input)?;
        let Some(resolver) = ctx.resolver() else { return Ok(Collection::empty()) };
        let mut out = Vec::new();
        for item in items.iter() {
            if let Some(resolved) = resolver.resolve(item) {
                out.push(resolved);
            }
        }
        Ok(Collection::from_vec(out))
    }
}
