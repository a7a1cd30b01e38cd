//! Predicate matching for candidate records
//!
//! Comparisons never cross type brackets: numbers compare with numbers,
//! strings with strings, and so on, using the same ordering as index keys.
//! Arrays match a condition when any element does.

use std::mem::discriminant;

use serde_json::Value;

use crate::index::{point_from_json, KeyValue};
use crate::planner::{FilterOp, Predicate, Query, SortOrder};
use crate::storage::lookup_path;

/// Which part of a disjunction a match is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Any clause
    Full,
    /// Clause `i`, and none of the clauses before it
    Clause(usize),
}

/// Evaluates a query's clauses against documents
#[derive(Debug, Clone)]
pub struct Matcher {
    clauses: Vec<Vec<Predicate>>,
    order: Option<SortOrder>,
}

impl Matcher {
    pub fn new(query: &Query, order: Option<&SortOrder>) -> Self {
        Self {
            clauses: query.clauses(),
            order: order.cloned(),
        }
    }

    /// Checks a document within a scope
    pub fn matches(&self, document: &Value, scope: MatchScope) -> bool {
        match scope {
            MatchScope::Full => self.clauses.iter().any(|c| Self::matches_all(document, c)),
            MatchScope::Clause(i) => match self.clauses.get(i) {
                Some(clause) => {
                    Self::matches_all(document, clause)
                        && !self.clauses[..i].iter().any(|c| Self::matches_all(document, c))
                }
                None => false,
            },
        }
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    /// Output order the matcher was built with
    pub fn order(&self) -> Option<&SortOrder> {
        self.order.as_ref()
    }

    /// Checks if a document matches all predicates
    pub fn matches_all(document: &Value, predicates: &[Predicate]) -> bool {
        predicates
            .iter()
            .all(|pred| Self::matches_predicate(document, pred))
    }

    /// Checks if a document matches a single predicate
    pub fn matches_predicate(document: &Value, predicate: &Predicate) -> bool {
        let field_value = lookup_path(document, &predicate.field);

        match &predicate.op {
            FilterOp::Eq(expected) => Self::eq_match(field_value, expected),
            FilterOp::Ne(expected) => !Self::eq_match(field_value, expected),
            FilterOp::In(values) => values.iter().any(|v| Self::eq_match(field_value, v)),
            FilterOp::Gt(bound) => Self::any_element(field_value, |v| Self::compare(v, bound, |o| o.is_gt())),
            FilterOp::Gte(bound) => Self::any_element(field_value, |v| Self::compare(v, bound, |o| o.is_ge())),
            FilterOp::Lt(bound) => Self::any_element(field_value, |v| Self::compare(v, bound, |o| o.is_lt())),
            FilterOp::Lte(bound) => Self::any_element(field_value, |v| Self::compare(v, bound, |o| o.is_le())),
            FilterOp::Regex(pattern) => {
                Self::any_element(field_value, |v| v.as_str().map_or(false, |s| pattern.is_match(s)))
            }
            FilterOp::Near(_) => field_value.and_then(point_from_json).is_some(),
        }
    }

    /// Missing fields equal only null; arrays equal an operand when any
    /// element does or when the whole array does.
    fn eq_match(actual: Option<&Value>, expected: &Value) -> bool {
        match actual {
            None => expected.is_null(),
            Some(Value::Array(items)) => {
                items.iter().any(|item| Self::values_equal(item, expected))
                    || Self::values_equal(actual.unwrap_or(&Value::Null), expected)
            }
            Some(value) => Self::values_equal(value, expected),
        }
    }

    fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
            _ => a == b,
        }
    }

    fn any_element(actual: Option<&Value>, test: impl Fn(&Value) -> bool) -> bool {
        match actual {
            None => false,
            Some(Value::Array(items)) => items.iter().any(test),
            Some(value) => test(value),
        }
    }

    /// Ordered comparison inside one type bracket
    fn compare(actual: &Value, bound: &Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
        let a = KeyValue::from_json(actual);
        let b = KeyValue::from_json(bound);
        discriminant(&a) == discriminant(&b) && accept(a.cmp(&b))
    }
}
