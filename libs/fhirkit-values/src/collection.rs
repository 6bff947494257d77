//! `Collection`: the ordered, possibly-empty sequence every FHIRPath
//! expression evaluates to.

use crate::element::Element;
use crate::error::{Error, Result};
use crate::tri::Tri;
use std::fmt;

/// An ordered sequence of `Element`s. Every FHIRPath expression produces
/// one; a bare value is just a one-item collection, and `{}` is an empty
/// one — there is no separate "null".
#[derive(Debug, Clone, Default)]
pub struct Collection(Vec<Element>);

impl Collection {
    pub fn empty() -> Self {
        Collection(Vec::new())
    }

    pub fn singleton(item: Element) -> Self {
        Collection(vec![item])
    }

    pub fn from_vec(items: Vec<Element>) -> Self {
        Collection(items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Element> {
        self.0
    }

    pub fn as_slice(&self) -> &[Element] {
        &self.0
    }

    pub fn push(&mut self, item: Element) {
        self.0.push(item);
    }

    pub fn append(&mut self, mut other: Collection) {
        self.0.append(&mut other.0);
    }

    /// The singleton evaluation rule: exactly one item, or an error.
    /// Every operator that requires a single operand (arithmetic,
    /// comparison, boolean conjunction of a non-collection-aware function)
    /// goes through this.
    pub fn single(&self) -> Result<&Element> {
        match self.0.len() {
            1 => Ok(&self.0[0]),
            n => Err(Error::NotSingleton(n)),
        }
    }

    /// Like `single`, but an empty collection is allowed and yields `None`
    /// rather than an error — most FHIRPath operators propagate empty
    /// input as empty output instead of erroring.
    pub fn single_or_empty(&self) -> Result<Option<&Element>> {
        match self.0.len() {
            0 => Ok(None),
            1 => Ok(Some(&self.0[0])),
            n => Err(Error::TooManyItems(n)),
        }
    }

    /// Interpret this collection as a FHIRPath boolean: `{}` is empty,
    /// a single `Boolean` is itself, anything else is an error (used by
    /// `where()`, invariant evaluation, and the boolean operators).
    pub fn as_tri_bool(&self) -> Result<Tri> {
        match self.single_or_empty()? {
            None => Ok(Tri::Empty),
            Some(e) => Ok(Tri::from_bool(e.as_bool()?)),
        }
    }

    /// FHIRPath's implicit boolean conversion for things like `where()`:
    /// non-boolean singletons are truthy if present.
    pub fn is_truthy(&self) -> bool {
        match self.0.len() {
            0 => false,
            1 => self.0[0].as_bool().unwrap_or(true),
            _ => true,
        }
    }

    /// Tri-valued collection equality: `{}` on either side yields `Empty`;
    /// different lengths are `False`; otherwise pairwise `equals`, with any
    /// pairwise `Empty` propagating.
    pub fn equals(&self, other: &Collection) -> Tri {
        if self.is_empty() || other.is_empty() {
            return Tri::Empty;
        }
        if self.len() != other.len() {
            return Tri::False;
        }
        let mut result = Tri::True;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            result = result.and(a.equals(b));
            if result == Tri::False {
                return Tri::False;
            }
        }
        result
    }

    /// Structural equivalence (`~`): like `equals` but order- and
    /// case-insensitive-string aware, and never returns `Empty` — two
    /// empty collections are equivalent.
    pub fn equivalent(&self, other: &Collection) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.0.iter().zip(other.0.iter()).all(|(a, b)| {
            if a.element_type() == crate::element::ElementType::String
                && b.element_type() == crate::element::ElementType::String
            {
                let (Ok(x), Ok(y)) = (a.as_string(), b.as_string()) else { return false };
                x.trim().to_lowercase() == y.trim().to_lowercase()
            } else {
                matches!(a.equals(b), Tri::True)
            }
        })
    }

    pub fn contains_equivalent(&self, item: &Element) -> bool {
        self.0.iter().any(|e| matches!(e.equals(item), Tri::True))
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match e.display_string() {
                Some(s) => write!(f, "{s}")?,
                None => write!(f, "<{}>", e.element_type())?,
            }
        }
        write!(f, "]")
    }
}

impl FromIterator<Element> for Collection {
    fn from_iter<T: IntoIterator<Item = Element>>(iter: T) -> Self {
        Collection(iter.into_iter().collect())
    }
}

impl IntoIterator for Collection {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Element>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_equality_is_empty() {
        let a = Collection::empty();
        let b = Collection::singleton(Element::integer(1));
        assert_eq!(a.equals(&b), Tri::Empty);
    }

    #[test]
    fn differing_length_is_false() {
        let a = Collection::from_vec(vec![Element::integer(1), Element::integer(2)]);
        let b = Collection::singleton(Element::integer(1));
        assert_eq!(a.equals(&b), Tri::False);
    }

    #[test]
    fn string_equivalence_ignores_case_and_whitespace() {
        let a = Collection::singleton(Element::string(" Foo "));
        let b = Collection::singleton(Element::string("foo"));
        assert!(a.equivalent(&b));
    }
}
