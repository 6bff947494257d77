//! `Quantity`: a decimal value with a unit string.
//!
//! Unit conversion is out of scope here: two quantities only compare or
//! equal when their units match literally.

use crate::decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: Decimal,
    pub unit: Option<String>,
}

impl Quantity {
    pub fn new(value: Decimal, unit: Option<String>) -> Self {
        Self { value, unit }
    }

    /// `None` when units differ (comparison is undefined).
    pub fn partial_cmp_same_unit(&self, other: &Self) -> Option<Ordering> {
        if self.unit != other.unit {
            return None;
        }
        Some(self.value.cmp(&other.value))
    }

    /// Parse a quantity literal of the form `value 'unit'` or `value unit`
    /// (the bare calendar-duration keywords, e.g. `4 days`, are accepted
    /// verbatim as the unit text).
    pub fn parse(value: Decimal, unit: Option<&str>) -> Self {
        Self {
            value,
            unit: unit.map(|u| u.trim_matches('\'').to_string()),
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(u) => write!(f, "{} '{}'", self.value, u),
            None => write!(f, "{}", self.value),
        }
    }
}
