//! Stored record types
//!
//! A record lives in a numbered slot. The slot number is its `RecordId`.
//! Capped collections recycle slots, so a `RecordId` alone does not identify
//! content: the insertion sequence number (`seq`) does.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a record slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(u64);

impl RecordId {
    /// Lowest possible id, used as a seek sentinel
    pub const MIN: RecordId = RecordId(0);
    /// Highest possible id, used as a seek sentinel
    pub const MAX: RecordId = RecordId(u64::MAX);

    /// Create a record id from a slot number
    pub fn new(slot: u64) -> Self {
        RecordId(slot)
    }

    /// Slot number
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rid:{}", self.0)
    }
}

/// A live document together with its placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Slot holding the document
    pub id: RecordId,
    /// Insertion sequence number, defines natural order
    pub seq: u64,
    /// Document body
    pub document: Value,
}

impl Record {
    /// The document's `_id` value
    pub fn doc_id(&self) -> Option<&Value> {
        self.document.get("_id")
    }
}

/// Resolve a dotted field path inside a document.
///
/// Only object nesting is followed; arrays are returned whole so callers can
/// apply element-wise semantics themselves.
pub fn lookup_path<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = document;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_ordering() {
        assert!(RecordId::MIN < RecordId::new(1));
        assert!(RecordId::new(1) < RecordId::new(2));
        assert!(RecordId::new(2) < RecordId::MAX);
    }

    #[test]
    fn test_lookup_path() {
        let doc = json!({"a": {"b": {"c": 5}}, "x": [1, 2]});
        assert_eq!(lookup_path(&doc, "a.b.c"), Some(&json!(5)));
        assert_eq!(lookup_path(&doc, "x"), Some(&json!([1, 2])));
        assert_eq!(lookup_path(&doc, "a.missing"), None);
        assert_eq!(lookup_path(&doc, "x.0"), None);
    }

    #[test]
    fn test_doc_id() {
        let record = Record {
            id: RecordId::new(3),
            seq: 9,
            document: json!({"_id": 4, "a": 1}),
        };
        assert_eq!(record.doc_id(), Some(&json!(4)));
    }
}
