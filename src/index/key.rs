//! Index key values
//!
//! Keys order first by type bracket, then by value inside the bracket:
//! MinKey < Null < Number < String < Object < Bool < MaxKey.
//! Integers and floats share the Number bracket and compare numerically.

use std::fmt;
use std::ops::Bound;

use serde_json::Value;

/// A single indexed value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    /// Sorts before every other value
    MinKey,
    /// JSON null, also used for missing fields
    Null,
    /// Number stored as order-preserving f64 bits
    Number(u64),
    /// String value
    String(String),
    /// Canonical JSON text of an embedded object or nested array
    Object(String),
    /// Boolean value (false < true)
    Bool(bool),
    /// Sorts after every other value
    MaxKey,
}

impl KeyValue {
    /// Create a numeric key.
    ///
    /// Negative zero is folded into zero so equal numbers share one key.
    pub fn number(v: f64) -> Self {
        let v = if v == 0.0 { 0.0 } else { v };
        let bits = v.to_bits();
        let ordered = if (bits >> 63) == 1 {
            !bits
        } else {
            bits ^ (1 << 63)
        };
        KeyValue::Number(ordered)
    }

    /// Create a string key
    pub fn string(v: impl Into<String>) -> Self {
        KeyValue::String(v.into())
    }

    /// Decode a numeric key back into an f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KeyValue::Number(ordered) => {
                let bits = if (ordered >> 63) == 1 {
                    ordered ^ (1 << 63)
                } else {
                    !ordered
                };
                Some(f64::from_bits(bits))
            }
            _ => None,
        }
    }

    /// Convert a scalar JSON value into a key.
    ///
    /// Arrays are not expanded here; multikey expansion is the index's job.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(KeyValue::number).unwrap_or(KeyValue::Null),
            Value::String(s) => KeyValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => KeyValue::Object(value.to_string()),
        }
    }

    /// Convert back into JSON for display and explain output
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::MinKey => serde_json::json!({"$minKey": 1}),
            KeyValue::Null => Value::Null,
            KeyValue::Number(_) => {
                let v = self.as_f64().unwrap_or(f64::NAN);
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    Value::from(v as i64)
                } else {
                    serde_json::Number::from_f64(v)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::Object(text) => serde_json::from_str(text).unwrap_or(Value::Null),
            KeyValue::Bool(b) => Value::Bool(*b),
            KeyValue::MaxKey => serde_json::json!({"$maxKey": 1}),
        }
    }

    /// Lowest possible key sharing this key's type bracket
    pub fn bracket_start(&self) -> Bound<KeyValue> {
        match self {
            KeyValue::MinKey => Bound::Included(KeyValue::MinKey),
            KeyValue::Null => Bound::Included(KeyValue::Null),
            KeyValue::Number(_) => Bound::Included(KeyValue::number(f64::NEG_INFINITY)),
            KeyValue::String(_) => Bound::Included(KeyValue::String(String::new())),
            KeyValue::Object(_) => Bound::Included(KeyValue::Object(String::new())),
            KeyValue::Bool(_) => Bound::Included(KeyValue::Bool(false)),
            KeyValue::MaxKey => Bound::Included(KeyValue::MaxKey),
        }
    }

    /// Highest possible key sharing this key's type bracket
    pub fn bracket_end(&self) -> Bound<KeyValue> {
        match self {
            KeyValue::MinKey => Bound::Included(KeyValue::MinKey),
            KeyValue::Null => Bound::Included(KeyValue::Null),
            KeyValue::Number(_) => Bound::Included(KeyValue::number(f64::INFINITY)),
            KeyValue::String(_) => Bound::Excluded(KeyValue::Object(String::new())),
            KeyValue::Object(_) => Bound::Excluded(KeyValue::Bool(false)),
            KeyValue::Bool(_) => Bound::Included(KeyValue::Bool(true)),
            KeyValue::MaxKey => Bound::Included(KeyValue::MaxKey),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::MinKey => write!(f, "MinKey"),
            KeyValue::MaxKey => write!(f, "MaxKey"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Compound index key, compared lexicographically field by field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(Vec<KeyValue>);

impl IndexKey {
    /// Create a key from its field values
    pub fn new(values: Vec<KeyValue>) -> Self {
        IndexKey(values)
    }

    /// Single-field key
    pub fn single(value: KeyValue) -> Self {
        IndexKey(vec![value])
    }

    /// Value of the leading key field
    pub fn first(&self) -> &KeyValue {
        self.0.first().unwrap_or(&KeyValue::MinKey)
    }

    /// All field values
    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// JSON rendering: a scalar for single-field keys, an array otherwise
    pub fn to_json(&self) -> Value {
        match self.0.as_slice() {
            [single] => single.to_json(),
            many => Value::Array(many.iter().map(KeyValue::to_json).collect()),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_order_numerically() {
        let mut keys = vec![
            KeyValue::number(10.0),
            KeyValue::number(-3.5),
            KeyValue::number(0.0),
            KeyValue::number(2.25),
            KeyValue::number(-100.0),
        ];
        keys.sort();
        let decoded: Vec<f64> = keys.iter().filter_map(KeyValue::as_f64).collect();
        assert_eq!(decoded, vec![-100.0, -3.5, 0.0, 2.25, 10.0]);
    }

    #[test]
    fn test_int_and_float_share_key() {
        assert_eq!(
            KeyValue::from_json(&json!(7)),
            KeyValue::from_json(&json!(7.0))
        );
        assert_eq!(KeyValue::number(-0.0), KeyValue::number(0.0));
    }

    #[test]
    fn test_type_brackets() {
        let null = KeyValue::Null;
        let num = KeyValue::number(1e300);
        let string = KeyValue::string("");
        let object = KeyValue::from_json(&json!({"x": 1}));
        let boolean = KeyValue::Bool(false);

        assert!(KeyValue::MinKey < null);
        assert!(null < num);
        assert!(num < string);
        assert!(string < object);
        assert!(object < boolean);
        assert!(boolean < KeyValue::MaxKey);
    }

    #[test]
    fn test_string_bracket_excludes_numbers() {
        let s = KeyValue::string("10");
        match s.bracket_end() {
            Bound::Excluded(end) => assert!(KeyValue::string("zzzz") < end),
            other => panic!("unexpected bound {:?}", other),
        }
        match s.bracket_start() {
            Bound::Included(start) => assert!(KeyValue::number(5.0) < start),
            other => panic!("unexpected bound {:?}", other),
        }
    }

    #[test]
    fn test_key_to_json() {
        assert_eq!(KeyValue::number(12.0).to_json(), json!(12));
        assert_eq!(KeyValue::number(1.5).to_json(), json!(1.5));
        assert_eq!(
            IndexKey::new(vec![KeyValue::number(1.0), KeyValue::string("a")]).to_json(),
            json!([1, "a"])
        );
    }
}
