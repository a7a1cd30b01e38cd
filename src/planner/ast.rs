//! Query AST structures
//!
//! Defines the parsed query and order representations used by the planner
//! and the matcher. Queries arrive as JSON documents:
//!
//! ```text
//! { "a": 4, "b": { "$gt": 1, "$lt": 9 }, "$or": [ { "c": 1 }, { "d": 2 } ] }
//! ```
//!
//! Top-level conditions are combined with AND. A top-level `$or` is
//! distributed: the common conditions are appended to every clause.

use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};

use super::errors::{PlannerError, PlannerResult};
use crate::index::{point_from_json, Point};

/// A compiled `$regex` operand.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern; `options` accepts the `i`, `m`, `s` and `x` flags
    pub fn new(source: &str, options: &str) -> PlannerResult<Self> {
        let mut flags = String::new();
        for flag in options.chars() {
            match flag {
                'i' | 'm' | 's' | 'x' => flags.push(flag),
                other => {
                    return Err(PlannerError::query_invalid(format!(
                        "Unsupported $options flag '{}'",
                        other
                    )))
                }
            }
        }
        let full = if flags.is_empty() {
            source.to_string()
        } else {
            format!("(?{}){}", flags, source)
        };
        let regex = Regex::new(&full)
            .map_err(|e| PlannerError::query_invalid(format!("Bad $regex '{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
    }
}

/// Filter operation types
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Equality: field = value (element-wise for arrays)
    Eq(Value),
    /// Inequality: no element equals value
    Ne(Value),
    /// Greater than: field > value
    Gt(Value),
    /// Greater than or equal: field >= value
    Gte(Value),
    /// Less than: field < value
    Lt(Value),
    /// Less than or equal: field <= value
    Lte(Value),
    /// Membership: field equals one of the values
    In(Vec<Value>),
    /// String pattern match
    Regex(Pattern),
    /// Proximity to a point; needs a 2d index
    Near(Point),
}

impl FilterOp {
    /// Returns true if this is an equality operation
    pub fn is_equality(&self) -> bool {
        matches!(self, FilterOp::Eq(_))
    }

    /// Returns true if this is a range operation
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOp::Gte(_) | FilterOp::Gt(_) | FilterOp::Lte(_) | FilterOp::Lt(_)
        )
    }

    /// Returns the operation name for shapes and explain output
    pub fn op_name(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "eq",
            FilterOp::Ne(_) => "ne",
            FilterOp::Gt(_) => "gt",
            FilterOp::Gte(_) => "gte",
            FilterOp::Lt(_) => "lt",
            FilterOp::Lte(_) => "lte",
            FilterOp::In(_) => "in",
            FilterOp::Regex(_) => "regex",
            FilterOp::Near(_) => "near",
        }
    }

    /// Whether the operation's key range describes exactly the documents it
    /// matches on a single-valued field.
    pub fn is_exact(&self) -> bool {
        let scalar = |v: &Value| !matches!(v, Value::Array(_) | Value::Object(_));
        match self {
            FilterOp::Eq(v) | FilterOp::Gt(v) | FilterOp::Gte(v) | FilterOp::Lt(v) | FilterOp::Lte(v) => {
                scalar(v)
            }
            FilterOp::In(values) => values.iter().all(scalar),
            FilterOp::Ne(_) | FilterOp::Regex(_) | FilterOp::Near(_) => false,
        }
    }

    /// Operand rendered as JSON
    pub fn operand(&self) -> Value {
        match self {
            FilterOp::Eq(v)
            | FilterOp::Ne(v)
            | FilterOp::Gt(v)
            | FilterOp::Gte(v)
            | FilterOp::Lt(v)
            | FilterOp::Lte(v) => v.clone(),
            FilterOp::In(values) => Value::Array(values.clone()),
            FilterOp::Regex(p) => Value::String(p.source().to_string()),
            FilterOp::Near((x, y)) => serde_json::json!([x, y]),
        }
    }
}

/// A single predicate (field + operation)
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Dotted field path
    pub field: String,
    /// Filter operation
    pub op: FilterOp,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: FilterOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    /// Create an equality predicate
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Eq(value))
    }

    pub fn ne(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Ne(value))
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Gt(value))
    }

    pub fn gte(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Gte(value))
    }

    pub fn lt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Lt(value))
    }

    pub fn lte(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Lte(value))
    }

    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOp::In(values))
    }

    pub fn near(field: impl Into<String>, point: Point) -> Self {
        Self::new(field, FilterOp::Near(point))
    }

    /// Returns true if this is an equality predicate
    pub fn is_equality(&self) -> bool {
        self.op.is_equality()
    }

    /// Returns true if this is a range predicate
    pub fn is_range(&self) -> bool {
        self.op.is_range()
    }

    /// Returns true if this is a primary key predicate
    pub fn is_primary_key(&self) -> bool {
        self.field == "_id" && self.is_equality()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.op_name(), self.op.operand())
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    fn parse(field: &str, value: &Value) -> PlannerResult<Self> {
        match value.as_f64() {
            Some(v) if v == 1.0 => Ok(SortDirection::Asc),
            Some(v) if v == -1.0 => Ok(SortDirection::Desc),
            _ => Err(PlannerError::invalid_field(field, "order direction must be 1 or -1")),
        }
    }
}

/// Sort specification on one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field to sort by
    pub field: String,
    /// Sort direction
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Requested result order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortOrder {
    /// `{"$natural": ±1}`: storage order, forces a natural plan
    Natural(SortDirection),
    /// `{field: ±1}`: only order-satisfying index plans qualify
    Field(SortSpec),
}

impl SortOrder {
    /// Parse an order document. An empty document means no order.
    pub fn parse(doc: &Value) -> PlannerResult<Option<Self>> {
        let map = doc
            .as_object()
            .ok_or_else(|| PlannerError::query_invalid("Order must be a JSON object"))?;
        let mut entries = map.iter();
        let Some((field, value)) = entries.next() else {
            return Ok(None);
        };
        if entries.next().is_some() {
            return Err(PlannerError::query_invalid("Order supports a single field"));
        }
        let direction = SortDirection::parse(field, value)?;
        if field == "$natural" {
            Ok(Some(SortOrder::Natural(direction)))
        } else if field.starts_with('$') {
            Err(PlannerError::query_invalid(format!("Unknown order key '{}'", field)))
        } else {
            Ok(Some(SortOrder::Field(SortSpec {
                field: field.clone(),
                direction,
            })))
        }
    }

    /// The field order, if this is one
    pub fn field(&self) -> Option<&SortSpec> {
        match self {
            SortOrder::Field(spec) => Some(spec),
            SortOrder::Natural(_) => None,
        }
    }

    pub fn is_natural(&self) -> bool {
        matches!(self, SortOrder::Natural(_))
    }

    /// Key used in query shapes
    pub fn shape_key(&self) -> String {
        match self {
            SortOrder::Natural(d) => format!("$natural:{}", d.as_str()),
            SortOrder::Field(spec) => format!("{}:{}", spec.field, spec.direction.as_str()),
        }
    }
}

/// Parsed query: common conjuncts plus optional `$or` clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Conditions every result satisfies (AND)
    predicates: Vec<Predicate>,
    /// Alternatives of a top-level `$or`, without the common conjuncts
    or_clauses: Vec<Vec<Predicate>>,
}

impl Query {
    /// Creates an empty query matching every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds an equality filter
    pub fn filter_eq(self, field: impl Into<String>, value: Value) -> Self {
        self.with_predicate(Predicate::eq(field, value))
    }

    /// Sets the `$or` alternatives
    pub fn with_or(mut self, clauses: Vec<Vec<Predicate>>) -> Self {
        self.or_clauses = clauses;
        self
    }

    /// Parse a query document
    pub fn parse(doc: &Value) -> PlannerResult<Self> {
        let map = doc
            .as_object()
            .ok_or_else(|| PlannerError::query_invalid("Query must be a JSON object"))?;

        let mut query = Query::new();
        for (key, value) in map {
            if key == "$or" {
                query.or_clauses = Self::parse_or(value)?;
            } else {
                Self::parse_condition(key, value, &mut query.predicates)?;
            }
        }
        Ok(query)
    }

    fn parse_or(value: &Value) -> PlannerResult<Vec<Vec<Predicate>>> {
        let items = value
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| PlannerError::query_invalid("$or needs a non-empty array"))?;

        items
            .iter()
            .map(|item| {
                let clause = item
                    .as_object()
                    .ok_or_else(|| PlannerError::query_invalid("$or clauses must be objects"))?;
                let mut predicates = Vec::new();
                for (key, value) in clause {
                    if key == "$or" {
                        return Err(PlannerError::query_invalid("Nested $or is not supported"));
                    }
                    Self::parse_condition(key, value, &mut predicates)?;
                }
                Ok(predicates)
            })
            .collect()
    }

    fn parse_condition(field: &str, value: &Value, out: &mut Vec<Predicate>) -> PlannerResult<()> {
        if field.starts_with('$') {
            return Err(PlannerError::query_invalid(format!("Unknown operator '{}'", field)));
        }
        match value {
            Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
                Self::parse_operators(field, ops, out)
            }
            other => {
                out.push(Predicate::eq(field, other.clone()));
                Ok(())
            }
        }
    }

    fn parse_operators(field: &str, ops: &Map<String, Value>, out: &mut Vec<Predicate>) -> PlannerResult<()> {
        for (op, operand) in ops {
            let filter = match op.as_str() {
                "$eq" => FilterOp::Eq(operand.clone()),
                "$ne" => FilterOp::Ne(operand.clone()),
                "$gt" => FilterOp::Gt(operand.clone()),
                "$gte" => FilterOp::Gte(operand.clone()),
                "$lt" => FilterOp::Lt(operand.clone()),
                "$lte" => FilterOp::Lte(operand.clone()),
                "$in" => match operand {
                    Value::Array(values) => FilterOp::In(values.clone()),
                    _ => return Err(PlannerError::invalid_field(field, "$in needs an array")),
                },
                "$regex" => {
                    let source = operand
                        .as_str()
                        .ok_or_else(|| PlannerError::invalid_field(field, "$regex needs a string"))?;
                    let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                    FilterOp::Regex(Pattern::new(source, options)?)
                }
                "$options" if ops.contains_key("$regex") => continue,
                "$near" => {
                    let point = point_from_json(operand)
                        .ok_or_else(|| PlannerError::invalid_field(field, "$near needs a point"))?;
                    FilterOp::Near(point)
                }
                other => {
                    return Err(PlannerError::invalid_field(
                        field,
                        format!("unknown operator '{}'", other),
                    ))
                }
            };
            out.push(Predicate::new(field, filter));
        }
        Ok(())
    }

    /// Common conjuncts
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// `$or` alternatives without the common conjuncts
    pub fn or_clauses(&self) -> &[Vec<Predicate>] {
        &self.or_clauses
    }

    /// Whether the query has a top-level `$or`
    pub fn is_or(&self) -> bool {
        !self.or_clauses.is_empty()
    }

    /// Complete clauses: each `$or` alternative with the common conjuncts
    /// appended, or the conjuncts alone.
    pub fn clauses(&self) -> Vec<Vec<Predicate>> {
        if self.or_clauses.is_empty() {
            return vec![self.predicates.clone()];
        }
        self.or_clauses
            .iter()
            .map(|clause| {
                let mut full = clause.clone();
                full.extend(self.predicates.iter().cloned());
                full
            })
            .collect()
    }

    /// All predicates of every clause, for single-pass planning
    pub fn all_predicates(&self) -> Vec<Predicate> {
        let mut all = self.predicates.clone();
        for clause in &self.or_clauses {
            all.extend(clause.iter().cloned());
        }
        all
    }

    /// Returns true if query has a primary key equality filter
    pub fn has_pk_filter(&self) -> bool {
        self.predicates.iter().any(|p| p.is_primary_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_conjunction() {
        let query = Query::parse(&json!({"a": 4, "b": {"$gt": 1, "$lte": 9}})).unwrap();
        assert_eq!(
            query.predicates(),
            &[
                Predicate::eq("a", json!(4)),
                Predicate::gt("b", json!(1)),
                Predicate::lte("b", json!(9)),
            ]
        );
        assert!(!query.is_or());
        assert_eq!(query.clauses().len(), 1);
    }

    #[test]
    fn test_parse_or_distributes_conjuncts() {
        let query = Query::parse(&json!({"$or": [{"a": 1}, {"b": 2}], "c": 3})).unwrap();
        assert!(query.is_or());
        let clauses = query.clauses();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0], vec![Predicate::eq("a", json!(1)), Predicate::eq("c", json!(3))]);
        assert_eq!(clauses[1], vec![Predicate::eq("b", json!(2)), Predicate::eq("c", json!(3))]);
    }

    #[test]
    fn test_parse_embedded_object_is_equality() {
        let query = Query::parse(&json!({"a": {"x": 1}})).unwrap();
        assert_eq!(query.predicates(), &[Predicate::eq("a", json!({"x": 1}))]);
    }

    #[test]
    fn test_parse_regex_with_options() {
        let query = Query::parse(&json!({"name": {"$regex": "^ab", "$options": "i"}})).unwrap();
        assert_eq!(query.predicates().len(), 1);
        match &query.predicates()[0].op {
            FilterOp::Regex(p) => {
                assert!(p.is_match("ABC"));
                assert_eq!(p.source(), "^ab");
            }
            other => panic!("unexpected op {:?}", other),
        }
    }

    #[test]
    fn test_parse_near() {
        let query = Query::parse(&json!({"loc": {"$near": [50, 50]}})).unwrap();
        assert_eq!(query.predicates(), &[Predicate::near("loc", (50.0, 50.0))]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Query::parse(&json!([1])).is_err());
        assert!(Query::parse(&json!({"$or": []})).is_err());
        assert!(Query::parse(&json!({"$or": [{"$or": [{"a": 1}]}]})).is_err());
        assert!(Query::parse(&json!({"a": {"$in": 5}})).is_err());
        assert!(Query::parse(&json!({"a": {"$foo": 5}})).is_err());
        assert!(Query::parse(&json!({"$where": "x"})).is_err());
        assert!(Query::parse(&json!({"a": {"$regex": "("}})).is_err());
    }

    #[test]
    fn test_exactness() {
        assert!(FilterOp::Eq(json!(1)).is_exact());
        assert!(FilterOp::In(vec![json!(1), json!("x")]).is_exact());
        assert!(!FilterOp::Eq(json!([1, 2])).is_exact());
        assert!(!FilterOp::Ne(json!(1)).is_exact());
        assert!(!FilterOp::Near((0.0, 0.0)).is_exact());
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse(&json!({})).unwrap(), None);
        assert_eq!(
            SortOrder::parse(&json!({"$natural": -1})).unwrap(),
            Some(SortOrder::Natural(SortDirection::Desc))
        );
        assert_eq!(
            SortOrder::parse(&json!({"a": 1})).unwrap(),
            Some(SortOrder::Field(SortSpec::asc("a")))
        );
        assert!(SortOrder::parse(&json!({"a": 1, "b": 1})).is_err());
        assert!(SortOrder::parse(&json!({"a": 2})).is_err());
    }

    #[test]
    fn test_primary_key_predicate() {
        assert!(Predicate::eq("_id", json!("abc")).is_primary_key());
        assert!(!Predicate::gte("_id", json!("a")).is_primary_key());
        assert!(Query::new().filter_eq("_id", json!(1)).has_pk_filter());
    }
}
