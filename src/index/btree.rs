//! BTreeSet-based index structure
//!
//! Entries are `(IndexKey, RecordId)` pairs kept in a `BTreeSet`, so equal keys
//! are ordered by record id and every entry has a unique position a scan can
//! resume from.
//!
//! A document whose indexed field holds an array contributes one entry per
//! distinct element and marks the index multikey for the rest of its life.

use std::collections::BTreeSet;
use std::ops::Bound;

use serde_json::Value;

use super::key::{IndexKey, KeyValue};
use crate::storage::{lookup_path, RecordId};

/// A position inside an index
pub type IndexEntry = (IndexKey, RecordId);

/// Scan direction over an index or the natural record order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Reverse the direction
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    /// `1` for forward, `-1` for backward
    pub fn as_i32(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

/// An ordered multi-field index.
#[derive(Debug, Default, Clone)]
pub struct IndexTree {
    entries: BTreeSet<IndexEntry>,
    multikey: bool,
}

impl IndexTree {
    /// Creates a new empty index tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the keys a document contributes for the given key fields.
    ///
    /// Returns the keys and whether any field was array-valued.
    pub fn keys_for(fields: &[String], document: &Value) -> (Vec<IndexKey>, bool) {
        let mut multikey = false;
        let mut combos: Vec<Vec<KeyValue>> = vec![Vec::new()];

        for field in fields {
            let values: Vec<KeyValue> = match lookup_path(document, field) {
                Some(Value::Array(items)) if !items.is_empty() => {
                    multikey = true;
                    let mut distinct: Vec<KeyValue> =
                        items.iter().map(KeyValue::from_json).collect();
                    distinct.sort();
                    distinct.dedup();
                    distinct
                }
                Some(Value::Array(_)) | None => vec![KeyValue::Null],
                Some(value) => vec![KeyValue::from_json(value)],
            };

            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut next = prefix.clone();
                        next.push(v.clone());
                        next
                    })
                })
                .collect();
        }

        (combos.into_iter().map(IndexKey::new).collect(), multikey)
    }

    /// Index a document stored at `id`.
    pub fn insert_document(&mut self, fields: &[String], id: RecordId, document: &Value) {
        let (keys, multikey) = Self::keys_for(fields, document);
        if multikey {
            self.multikey = true;
        }
        for key in keys {
            self.entries.insert((key, id));
        }
    }

    /// Remove every entry a document contributed.
    pub fn remove_document(&mut self, fields: &[String], id: RecordId, document: &Value) {
        let (keys, _) = Self::keys_for(fields, document);
        for key in keys {
            self.entries.remove(&(key, id));
        }
    }

    /// Whether any indexed document had an array in a key field
    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    /// Whether an exact entry is present
    pub fn contains(&self, entry: &IndexEntry) -> bool {
        self.entries.contains(entry)
    }

    /// Number of entries (not documents)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries strictly after `after` in the given direction.
    ///
    /// With `after == None` the scan starts at the first entry in `direction`.
    pub fn entries_after<'a>(
        &'a self,
        after: Option<&IndexEntry>,
        direction: Direction,
    ) -> Box<dyn Iterator<Item = &'a IndexEntry> + 'a> {
        match (after, direction) {
            (None, Direction::Forward) => Box::new(self.entries.iter()),
            (None, Direction::Backward) => Box::new(self.entries.iter().rev()),
            (Some(pos), Direction::Forward) => Box::new(
                self.entries
                    .range((Bound::Excluded(pos.clone()), Bound::Unbounded)),
            ),
            (Some(pos), Direction::Backward) => Box::new(
                self.entries
                    .range((Bound::Unbounded, Bound::Excluded(pos.clone())))
                    .rev(),
            ),
        }
    }

    /// Entries whose leading key value is at or beyond `start` in `direction`.
    pub fn entries_from<'a>(
        &'a self,
        start: &Bound<KeyValue>,
        direction: Direction,
    ) -> Box<dyn Iterator<Item = &'a IndexEntry> + 'a> {
        // Compound keys extend past a single-value prefix, so the sentinels
        // bracket every key sharing the leading value.
        let low = |v: &KeyValue| (IndexKey::single(v.clone()), RecordId::MIN);
        let high = |v: &KeyValue| {
            (
                IndexKey::new(vec![v.clone(), KeyValue::MaxKey, KeyValue::MaxKey]),
                RecordId::MAX,
            )
        };
        match direction {
            Direction::Forward => {
                let lower = match start {
                    Bound::Included(v) => Bound::Included(low(v)),
                    Bound::Excluded(v) => Bound::Excluded(high(v)),
                    Bound::Unbounded => Bound::Unbounded,
                };
                Box::new(self.entries.range((lower, Bound::Unbounded)))
            }
            Direction::Backward => {
                let upper = match start {
                    Bound::Included(v) => Bound::Included(high(v)),
                    Bound::Excluded(v) => Bound::Excluded(low(v)),
                    Bound::Unbounded => Bound::Unbounded,
                };
                Box::new(self.entries.range((Bound::Unbounded, upper)).rev())
            }
        }
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.entries.clear();
        self.multikey = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn first_values<'a>(iter: impl Iterator<Item = &'a IndexEntry>) -> Vec<f64> {
        iter.filter_map(|(k, _)| k.first().as_f64()).collect()
    }

    #[test]
    fn test_scalar_document_single_entry() {
        let mut tree = IndexTree::new();
        tree.insert_document(&fields(&["a"]), RecordId::new(0), &json!({"a": 5}));
        assert_eq!(tree.len(), 1);
        assert!(!tree.is_multikey());
    }

    #[test]
    fn test_array_document_is_multikey() {
        let mut tree = IndexTree::new();
        tree.insert_document(&fields(&["a"]), RecordId::new(0), &json!({"a": [1, 10, 1]}));
        assert_eq!(tree.len(), 2);
        assert!(tree.is_multikey());
    }

    #[test]
    fn test_missing_field_indexes_null() {
        let mut tree = IndexTree::new();
        tree.insert_document(&fields(&["a"]), RecordId::new(0), &json!({"b": 1}));
        let entry = (IndexKey::single(KeyValue::Null), RecordId::new(0));
        assert!(tree.contains(&entry));
    }

    #[test]
    fn test_remove_document() {
        let mut tree = IndexTree::new();
        let doc = json!({"a": [1, 2]});
        tree.insert_document(&fields(&["a"]), RecordId::new(4), &doc);
        tree.remove_document(&fields(&["a"]), RecordId::new(4), &doc);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_compound_keys() {
        let (keys, multikey) =
            IndexTree::keys_for(&fields(&["_id", "a"]), &json!({"_id": 1, "a": [2, 3]}));
        assert!(multikey);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].to_json(), json!([1, 2]));
        assert_eq!(keys[1].to_json(), json!([1, 3]));
    }

    #[test]
    fn test_entries_after_both_directions() {
        let mut tree = IndexTree::new();
        for i in 0..5 {
            tree.insert_document(&fields(&["a"]), RecordId::new(i), &json!({"a": i}));
        }
        let pos = (IndexKey::single(KeyValue::number(2.0)), RecordId::new(2));

        assert_eq!(
            first_values(tree.entries_after(Some(&pos), Direction::Forward)),
            vec![3.0, 4.0]
        );
        assert_eq!(
            first_values(tree.entries_after(Some(&pos), Direction::Backward)),
            vec![1.0, 0.0]
        );
    }

    #[test]
    fn test_entries_from_bounds() {
        let mut tree = IndexTree::new();
        for i in 0..5 {
            tree.insert_document(&fields(&["a", "b"]), RecordId::new(i), &json!({"a": i, "b": i}));
        }
        let two = KeyValue::number(2.0);

        assert_eq!(
            first_values(tree.entries_from(&Bound::Included(two.clone()), Direction::Forward)),
            vec![2.0, 3.0, 4.0]
        );
        assert_eq!(
            first_values(tree.entries_from(&Bound::Excluded(two.clone()), Direction::Forward)),
            vec![3.0, 4.0]
        );
        assert_eq!(
            first_values(tree.entries_from(&Bound::Included(two.clone()), Direction::Backward)),
            vec![2.0, 1.0, 0.0]
        );
        assert_eq!(
            first_values(tree.entries_from(&Bound::Excluded(two), Direction::Backward)),
            vec![1.0, 0.0]
        );
    }
}
