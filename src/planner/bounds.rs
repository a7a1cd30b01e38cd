//! Field range analysis
//!
//! Every predicate constrains its field to a set of index keys. A
//! `FieldRange` is that set: a sorted union of disjoint intervals over
//! `KeyValue`. Comparisons never cross type brackets, so `{$gt: 5}` becomes
//! `(5, +inf]` inside the Number bracket rather than everything above 5.
//!
//! A `FieldRangeSet` holds the ranges of one conjunction. Intersecting the
//! ranges of several predicates on the same field is only sound when the
//! field holds one value per document; for multikey fields the set keeps the
//! range of the first predicate instead.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use serde_json::Value;

use super::ast::{FilterOp, Predicate};
use crate::index::KeyValue;

/// Interval of index keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub lower: Bound<KeyValue>,
    pub upper: Bound<KeyValue>,
}

fn cmp_lower(a: &Bound<KeyValue>, b: &Bound<KeyValue>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Less,
        (_, Bound::Unbounded) => Ordering::Greater,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => x.cmp(y),
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Less),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Greater),
    }
}

fn cmp_upper(a: &Bound<KeyValue>, b: &Bound<KeyValue>) -> Ordering {
    match (a, b) {
        (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
        (Bound::Unbounded, _) => Ordering::Greater,
        (_, Bound::Unbounded) => Ordering::Less,
        (Bound::Included(x), Bound::Included(y)) | (Bound::Excluded(x), Bound::Excluded(y)) => x.cmp(y),
        (Bound::Included(x), Bound::Excluded(y)) => x.cmp(y).then(Ordering::Greater),
        (Bound::Excluded(x), Bound::Included(y)) => x.cmp(y).then(Ordering::Less),
    }
}

/// Whether an interval ending at `upper` touches or overlaps one starting at `lower`
fn reaches(upper: &Bound<KeyValue>, lower: &Bound<KeyValue>) -> bool {
    match (upper, lower) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
        (Bound::Excluded(u), Bound::Excluded(l)) => l < u,
        (Bound::Included(u), Bound::Included(l))
        | (Bound::Included(u), Bound::Excluded(l))
        | (Bound::Excluded(u), Bound::Included(l)) => l <= u,
    }
}

fn flip(bound: &Bound<KeyValue>) -> Bound<KeyValue> {
    match bound {
        Bound::Included(v) => Bound::Excluded(v.clone()),
        Bound::Excluded(v) => Bound::Included(v.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl Interval {
    pub fn new(lower: Bound<KeyValue>, upper: Bound<KeyValue>) -> Self {
        Self { lower, upper }
    }

    /// Single key
    pub fn point(value: KeyValue) -> Self {
        Self::new(Bound::Included(value.clone()), Bound::Included(value))
    }

    /// Every possible key
    pub fn universal() -> Self {
        Self::new(Bound::Included(KeyValue::MinKey), Bound::Included(KeyValue::MaxKey))
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        }
    }

    pub fn is_point(&self) -> bool {
        matches!((&self.lower, &self.upper), (Bound::Included(l), Bound::Included(u)) if l == u)
    }

    pub fn contains(&self, value: &KeyValue) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => value >= l,
            Bound::Excluded(l) => value > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => value <= u,
            Bound::Excluded(u) => value < u,
            Bound::Unbounded => true,
        };
        above && below
    }

    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let lower = if cmp_lower(&self.lower, &other.lower) == Ordering::Less {
            other.lower.clone()
        } else {
            self.lower.clone()
        };
        let upper = if cmp_upper(&self.upper, &other.upper) == Ordering::Greater {
            other.upper.clone()
        } else {
            self.upper.clone()
        };
        let result = Interval::new(lower, upper);
        (!result.is_empty()).then_some(result)
    }
}

/// Sorted union of disjoint, non-empty intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRange {
    intervals: Vec<Interval>,
}

impl FieldRange {
    fn normalized(mut intervals: Vec<Interval>) -> Self {
        intervals.retain(|i| !i.is_empty());
        intervals.sort_by(|a, b| cmp_lower(&a.lower, &b.lower));
        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for next in intervals {
            match merged.last_mut() {
                Some(current) if reaches(&current.upper, &next.lower) => {
                    if cmp_upper(&next.upper, &current.upper) == Ordering::Greater {
                        current.upper = next.upper;
                    }
                }
                _ => merged.push(next),
            }
        }
        Self { intervals: merged }
    }

    /// The range containing every key
    pub fn universal() -> Self {
        Self {
            intervals: vec![Interval::universal()],
        }
    }

    /// The range containing no key
    pub fn empty() -> Self {
        Self { intervals: Vec::new() }
    }

    pub fn point(value: KeyValue) -> Self {
        Self {
            intervals: vec![Interval::point(value)],
        }
    }

    /// Range of keys a filter operation can match
    pub fn from_op(op: &FilterOp) -> Self {
        let scalar = |v: &Value| !matches!(v, Value::Array(_));
        match op {
            FilterOp::Eq(v) if scalar(v) => Self::point(KeyValue::from_json(v)),
            FilterOp::Gt(v) if scalar(v) => {
                let k = KeyValue::from_json(v);
                let end = k.bracket_end();
                Self::normalized(vec![Interval::new(Bound::Excluded(k), end)])
            }
            FilterOp::Gte(v) if scalar(v) => {
                let k = KeyValue::from_json(v);
                let end = k.bracket_end();
                Self::normalized(vec![Interval::new(Bound::Included(k), end)])
            }
            FilterOp::Lt(v) if scalar(v) => {
                let k = KeyValue::from_json(v);
                let start = k.bracket_start();
                Self::normalized(vec![Interval::new(start, Bound::Excluded(k))])
            }
            FilterOp::Lte(v) if scalar(v) => {
                let k = KeyValue::from_json(v);
                let start = k.bracket_start();
                Self::normalized(vec![Interval::new(start, Bound::Included(k))])
            }
            FilterOp::In(values) if values.iter().all(scalar) => Self::normalized(
                values
                    .iter()
                    .map(|v| Interval::point(KeyValue::from_json(v)))
                    .collect(),
            ),
            FilterOp::Ne(v) if scalar(v) => Self::universal().subtract(&Self::point(KeyValue::from_json(v))),
            FilterOp::Regex(_) => Self::normalized(vec![Interval::new(
                KeyValue::string("").bracket_start(),
                KeyValue::string("").bracket_end(),
            )]),
            _ => Self::universal(),
        }
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn is_universal(&self) -> bool {
        self.intervals == [Interval::universal()]
    }

    /// A single key
    pub fn is_point(&self) -> bool {
        matches!(self.intervals.as_slice(), [only] if only.is_point())
    }

    pub fn contains(&self, value: &KeyValue) -> bool {
        self.intervals.iter().any(|i| i.contains(value))
    }

    /// Keys present in both ranges
    pub fn intersect(&self, other: &FieldRange) -> FieldRange {
        let mut out = Vec::new();
        for a in &self.intervals {
            for b in &other.intervals {
                if let Some(i) = a.intersect(b) {
                    out.push(i);
                }
            }
        }
        Self::normalized(out)
    }

    /// Keys present in either range
    pub fn union(&self, other: &FieldRange) -> FieldRange {
        let mut all = self.intervals.clone();
        all.extend(other.intervals.iter().cloned());
        Self::normalized(all)
    }

    /// Keys not present in this range
    pub fn complement(&self) -> FieldRange {
        let mut gaps = Vec::new();
        let mut lower = Bound::Included(KeyValue::MinKey);
        for interval in &self.intervals {
            gaps.push(Interval::new(lower, flip(&interval.lower)));
            lower = flip(&interval.upper);
        }
        gaps.push(Interval::new(lower, Bound::Included(KeyValue::MaxKey)));
        Self::normalized(gaps)
    }

    /// Keys of this range that are not in `other`
    pub fn subtract(&self, other: &FieldRange) -> FieldRange {
        self.intersect(&other.complement())
    }

    /// Whether every key of `other` is also in this range
    pub fn contains_range(&self, other: &FieldRange) -> bool {
        other.subtract(self).is_empty()
    }

    /// Lowest bound (for forward scans)
    pub fn start(&self) -> Bound<KeyValue> {
        self.intervals
            .first()
            .map(|i| i.lower.clone())
            .unwrap_or(Bound::Included(KeyValue::MaxKey))
    }

    /// Highest bound (for backward scans)
    pub fn end(&self) -> Bound<KeyValue> {
        self.intervals
            .last()
            .map(|i| i.upper.clone())
            .unwrap_or(Bound::Included(KeyValue::MinKey))
    }

    /// Explain rendering, e.g. `[[1, 1], (5, MaxKey]]`
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .intervals
            .iter()
            .map(|i| {
                let (open, lo) = match &i.lower {
                    Bound::Included(v) => ("[", v.to_string()),
                    Bound::Excluded(v) => ("(", v.to_string()),
                    Bound::Unbounded => ("(", "-inf".to_string()),
                };
                let (close, hi) = match &i.upper {
                    Bound::Included(v) => ("]", v.to_string()),
                    Bound::Excluded(v) => (")", v.to_string()),
                    Bound::Unbounded => (")", "+inf".to_string()),
                };
                format!("{}{}, {}{}", open, lo, hi, close)
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Per-field ranges of one conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRangeSet {
    /// Intersection of every predicate on the field
    single: BTreeMap<String, FieldRange>,
    /// Range of the first predicate on the field
    multi: BTreeMap<String, FieldRange>,
    /// Every predicate is exactly described by its range
    exact: bool,
    /// Some predicate can match nothing on its own
    impossible: bool,
    /// Field carrying a `$near` predicate
    near: Option<String>,
    /// Proven to add nothing beyond earlier clauses
    eliminated: bool,
}

impl FieldRangeSet {
    pub fn from_predicates(predicates: &[Predicate]) -> Self {
        let mut set = Self {
            single: BTreeMap::new(),
            multi: BTreeMap::new(),
            exact: true,
            impossible: false,
            near: None,
            eliminated: false,
        };
        for pred in predicates {
            let range = FieldRange::from_op(&pred.op);
            if range.is_empty() {
                set.impossible = true;
            }
            if !pred.op.is_exact() {
                set.exact = false;
            }
            if matches!(pred.op, FilterOp::Near(_)) && set.near.is_none() {
                set.near = Some(pred.field.clone());
            }
            set.multi
                .entry(pred.field.clone())
                .or_insert_with(|| range.clone());
            let entry = set
                .single
                .entry(pred.field.clone())
                .or_insert_with(FieldRange::universal);
            *entry = entry.intersect(&range);
        }
        set
    }

    /// Intersected range of a field; universal when unconstrained
    pub fn range(&self, field: &str) -> FieldRange {
        self.single.get(field).cloned().unwrap_or_else(FieldRange::universal)
    }

    /// Range safe for a field that may hold arrays
    pub fn multikey_range(&self, field: &str) -> FieldRange {
        self.multi.get(field).cloned().unwrap_or_else(FieldRange::universal)
    }

    /// Constrained fields in sorted order
    pub fn fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.single.keys().map(String::as_str)
    }

    /// Number of fields whose range excludes something
    pub fn nontrivial_count(&self) -> usize {
        self.single.values().filter(|r| !r.is_universal()).count()
    }

    pub fn has_nontrivial(&self) -> bool {
        self.nontrivial_count() > 0
    }

    pub fn is_exact(&self) -> bool {
        self.exact
    }

    /// Field of a `$near` predicate, if any
    pub fn near_field(&self) -> Option<&str> {
        self.near.as_deref()
    }

    /// Whether earlier clauses already delivered everything this one matches
    pub fn is_eliminated(&self) -> bool {
        self.eliminated
    }

    /// Whether any document can satisfy the conjunction.
    ///
    /// `single_valued` reports which fields are known to hold a single
    /// value; only those get the intersected range checked.
    pub fn match_possible(&self, single_valued: impl Fn(&str) -> bool) -> bool {
        if self.impossible || self.eliminated {
            return false;
        }
        self.single
            .iter()
            .all(|(field, range)| !single_valued(field) || !range.is_empty())
    }

    /// Remove what an earlier clause already covered.
    ///
    /// Applies only when the earlier clause is exactly described by its
    /// ranges on single-valued fields. If every field of this clause lies
    /// inside the earlier ranges the clause is eliminated; if exactly one
    /// field sticks out, that field's range loses the earlier range.
    pub fn subtract(&mut self, earlier: &FieldRangeSet, single_valued: impl Fn(&str) -> bool) {
        if !earlier.exact || earlier.impossible || earlier.eliminated {
            return;
        }
        let mut outside: Option<&str> = None;
        for (field, covered) in &earlier.single {
            if !single_valued(field) {
                return;
            }
            let Some(mine) = self.single.get(field) else {
                return;
            };
            if !covered.contains_range(mine) {
                if outside.is_some() {
                    return;
                }
                outside = Some(field);
            }
        }
        match outside {
            None => self.eliminated = true,
            Some(field) => {
                let narrowed = self.range(field).subtract(&earlier.range(field));
                self.multi.insert(field.to_string(), narrowed.clone());
                self.single.insert(field.to_string(), narrowed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn num(v: f64) -> KeyValue {
        KeyValue::number(v)
    }

    #[test]
    fn test_gt_stays_in_number_bracket() {
        let range = FieldRange::from_op(&FilterOp::Gt(json!(5)));
        assert!(range.contains(&num(6.0)));
        assert!(!range.contains(&num(5.0)));
        assert!(!range.contains(&KeyValue::string("x")));
        assert!(!range.contains(&KeyValue::MaxKey));
    }

    #[test]
    fn test_lt_on_strings() {
        let range = FieldRange::from_op(&FilterOp::Lt(json!("m")));
        assert!(range.contains(&KeyValue::string("a")));
        assert!(!range.contains(&KeyValue::string("z")));
        assert!(!range.contains(&num(1.0)));
    }

    #[test]
    fn test_intersection_and_emptiness() {
        let gt = FieldRange::from_op(&FilterOp::Gt(json!(10)));
        let lt = FieldRange::from_op(&FilterOp::Lt(json!(5)));
        assert!(gt.intersect(&lt).is_empty());

        let gte = FieldRange::from_op(&FilterOp::Gte(json!(5)));
        let lte = FieldRange::from_op(&FilterOp::Lte(json!(5)));
        assert!(gte.intersect(&lte).is_point());
    }

    #[test]
    fn test_in_and_union() {
        let range = FieldRange::from_op(&FilterOp::In(vec![json!(3), json!(1), json!(3)]));
        assert_eq!(range.intervals().len(), 2);
        assert!(range.contains(&num(1.0)));
        assert!(!range.contains(&num(2.0)));

        let merged = FieldRange::from_op(&FilterOp::Lte(json!(2)))
            .union(&FieldRange::from_op(&FilterOp::Gt(json!(2))));
        assert_eq!(merged.intervals().len(), 1);
    }

    #[test]
    fn test_subtract_and_containment() {
        let wide = FieldRange::from_op(&FilterOp::Gte(json!(0)));
        let narrow = FieldRange::from_op(&FilterOp::In(vec![json!(1), json!(2)]));
        assert!(wide.contains_range(&narrow));
        assert!(!narrow.contains_range(&wide));

        let rest = wide.subtract(&narrow);
        assert!(rest.contains(&num(0.0)));
        assert!(!rest.contains(&num(1.0)));
        assert!(rest.contains(&num(1.5)));
    }

    #[test]
    fn test_ne_excludes_point() {
        let range = FieldRange::from_op(&FilterOp::Ne(json!(4)));
        assert!(!range.contains(&num(4.0)));
        assert!(range.contains(&KeyValue::Null));
        assert!(range.contains(&num(4.5)));
    }

    #[test]
    fn test_complement_round() {
        let range = FieldRange::from_op(&FilterOp::Gt(json!(1)));
        assert_eq!(range.complement().complement(), range);
        assert!(FieldRange::empty().complement().is_universal());
    }

    #[test]
    fn test_set_single_and_multikey_ranges() {
        let preds = vec![Predicate::gt("a", json!(1)), Predicate::lt("a", json!(10))];
        let set = FieldRangeSet::from_predicates(&preds);
        assert!(!set.range("a").contains(&num(10.0)));
        assert!(set.multikey_range("a").contains(&num(10.0)));
        assert!(set.range("b").is_universal());
        assert_eq!(set.nontrivial_count(), 1);
    }

    #[test]
    fn test_match_possible_respects_multikey() {
        let preds = vec![Predicate::gt("a", json!(10)), Predicate::lt("a", json!(5))];
        let set = FieldRangeSet::from_predicates(&preds);
        assert!(!set.match_possible(|_| true));
        assert!(set.match_possible(|_| false));

        let none = FieldRangeSet::from_predicates(&[Predicate::is_in("a", vec![])]);
        assert!(!none.match_possible(|_| false));
    }

    #[test]
    fn test_subtract_eliminates_covered_clause() {
        let earlier = FieldRangeSet::from_predicates(&[Predicate::gt("a", json!(0))]);
        let mut later = FieldRangeSet::from_predicates(&[Predicate::eq("a", json!(5))]);
        later.subtract(&earlier, |_| true);
        assert!(later.is_eliminated());
        assert!(!later.match_possible(|_| true));
    }

    #[test]
    fn test_subtract_narrows_single_field() {
        let earlier = FieldRangeSet::from_predicates(&[Predicate::gt("a", json!(5))]);
        let mut later = FieldRangeSet::from_predicates(&[Predicate::gte("a", json!(0))]);
        later.subtract(&earlier, |_| true);
        assert!(!later.is_eliminated());
        assert!(later.range("a").contains(&num(5.0)));
        assert!(!later.range("a").contains(&num(6.0)));
    }

    #[test]
    fn test_subtract_skipped_when_inexact_or_multikey() {
        let inexact = FieldRangeSet::from_predicates(&[Predicate::ne("a", json!(5))]);
        let mut later = FieldRangeSet::from_predicates(&[Predicate::eq("a", json!(1))]);
        later.subtract(&inexact, |_| true);
        assert!(!later.is_eliminated());

        let earlier = FieldRangeSet::from_predicates(&[Predicate::gt("a", json!(0))]);
        later.subtract(&earlier, |_| false);
        assert!(!later.is_eliminated());
    }

    #[test]
    fn test_subtract_needs_shared_fields() {
        let earlier = FieldRangeSet::from_predicates(&[
            Predicate::eq("a", json!(1)),
            Predicate::eq("b", json!(1)),
        ]);
        let mut later = FieldRangeSet::from_predicates(&[Predicate::eq("a", json!(1))]);
        later.subtract(&earlier, |_| true);
        assert_eq!(later, FieldRangeSet::from_predicates(&[Predicate::eq("a", json!(1))]));
    }

    #[test]
    fn test_subtract_leaves_two_differing_fields() {
        let earlier = FieldRangeSet::from_predicates(&[
            Predicate::eq("a", json!(1)),
            Predicate::eq("b", json!(1)),
        ]);
        let mut later = FieldRangeSet::from_predicates(&[
            Predicate::gte("a", json!(0)),
            Predicate::gte("b", json!(0)),
        ]);
        let before = later.clone();
        later.subtract(&earlier, |_| true);
        assert_eq!(later, before);
    }
}
