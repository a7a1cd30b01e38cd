//! A single collection: records, natural order and attached indexes
//!
//! Natural order is insertion order (`seq`). Normal collections hand out
//! fresh slots forever. Capped collections hold at most `capped` records and
//! overwrite the oldest one when full, reusing its slot.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::{StorageError, StorageResult};
use super::record::{Record, RecordId};
use crate::index::{Direction, Index, IndexSpec, KeyValue};

fn default_auto_index_id() -> bool {
    true
}

/// Creation options for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Maximum number of records; `None` means unbounded
    #[serde(default)]
    pub capped: Option<usize>,

    /// Whether to build the `_id` index at creation
    #[serde(default = "default_auto_index_id")]
    pub auto_index_id: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self::normal()
    }
}

impl CollectionOptions {
    /// Unbounded collection with an `_id` index
    pub fn normal() -> Self {
        Self {
            capped: None,
            auto_index_id: true,
        }
    }

    /// Capped collection without an `_id` index
    pub fn capped(max_records: usize) -> Self {
        Self {
            capped: Some(max_records.max(1)),
            auto_index_id: false,
        }
    }
}

#[derive(Debug)]
pub struct Collection {
    namespace: String,
    ident: u64,
    options: CollectionOptions,
    records: HashMap<RecordId, Record>,
    natural: BTreeMap<u64, RecordId>,
    indexes: Vec<Index>,
    next_seq: u64,
    next_slot: u64,
}

impl Collection {
    /// Create an empty collection.
    ///
    /// `id_index_ident` is used for the `_id` index when the options ask for one.
    pub fn new(
        namespace: impl Into<String>,
        ident: u64,
        options: CollectionOptions,
        id_index_ident: u64,
    ) -> Self {
        let mut indexes = Vec::new();
        if options.auto_index_id {
            indexes.push(Index::new(IndexSpec::id(), id_index_ident));
        }
        Self {
            namespace: namespace.into(),
            ident,
            options,
            records: HashMap::new(),
            natural: BTreeMap::new(),
            indexes,
            next_seq: 0,
            next_slot: 0,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Incarnation number; a dropped and recreated namespace gets a new one
    pub fn ident(&self) -> u64 {
        self.ident
    }

    pub fn options(&self) -> &CollectionOptions {
        &self.options
    }

    pub fn is_capped(&self) -> bool {
        self.options.capped.is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record currently stored in a slot
    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Record with the given insertion sequence number, if still present
    pub fn record_by_seq(&self, seq: u64) -> Option<&Record> {
        self.natural.get(&seq).and_then(|id| self.records.get(id))
    }

    /// Next record in natural order strictly after `after` (a `seq`).
    pub fn next_in_natural_order(&self, after: Option<u64>, direction: Direction) -> Option<&Record> {
        let id = match (after, direction) {
            (None, Direction::Forward) => self.natural.values().next(),
            (None, Direction::Backward) => self.natural.values().next_back(),
            (Some(seq), Direction::Forward) => self
                .natural
                .range((Bound::Excluded(seq), Bound::Unbounded))
                .next()
                .map(|(_, id)| id),
            (Some(seq), Direction::Backward) => {
                self.natural.range(..seq).next_back().map(|(_, id)| id)
            }
        }?;
        self.records.get(id)
    }

    /// All records in natural order
    pub fn iter_natural(&self) -> impl Iterator<Item = &Record> + '_ {
        self.natural.values().filter_map(move |id| self.records.get(id))
    }

    /// Indexes in creation order (`_id_` first when present)
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name() == name)
    }

    /// Whether `field` is known to hold a single value in every record.
    ///
    /// True for `_id` and for fields led by a non-multikey B-tree index.
    pub fn is_single_valued(&self, field: &str) -> bool {
        field == "_id"
            || self.indexes.iter().any(|i| {
                i.btree().is_some() && i.spec().first_field() == field && !i.is_multikey()
            })
    }

    /// Insert a document, assigning an `_id` when missing.
    pub fn insert(&mut self, document: Value) -> StorageResult<RecordId> {
        let mut document = match document {
            Value::Object(map) => map,
            other => {
                return Err(StorageError::InvalidDocument(format!(
                    "expected object, got {}",
                    other
                )))
            }
        };
        let id_value = document
            .entry("_id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
            .clone();
        if id_value.is_array() {
            return Err(StorageError::InvalidDocument("_id cannot be an array".into()));
        }
        self.check_unique_id(&id_value)?;

        let slot = match self.options.capped {
            Some(max) if self.records.len() >= max => self.evict_oldest(),
            _ => None,
        };
        let id = match slot {
            Some(id) => id,
            None => {
                let id = RecordId::new(self.next_slot);
                self.next_slot += 1;
                id
            }
        };
        let seq = self.next_seq;
        self.next_seq += 1;

        let document = Value::Object(document);
        for index in &mut self.indexes {
            index.insert_document(id, &document);
        }
        self.natural.insert(seq, id);
        self.records.insert(id, Record { id, seq, document });
        Ok(id)
    }

    /// Reject an `_id` another record already holds. Without an `_id_`
    /// index the records are scanned; a full capped collection skips the
    /// record the insert is about to overwrite.
    fn check_unique_id(&self, id_value: &Value) -> StorageResult<()> {
        let key = KeyValue::from_json(id_value);
        let taken = match self.index(IndexSpec::ID_INDEX_NAME).and_then(Index::btree) {
            Some(tree) => tree
                .entries_from(&Bound::Included(key.clone()), Direction::Forward)
                .next()
                .map_or(false, |(k, _)| *k.first() == key),
            None => {
                let overwritten = match self.options.capped {
                    Some(max) if self.records.len() >= max => {
                        self.natural.values().next().copied()
                    }
                    _ => None,
                };
                self.records.values().any(|record| {
                    Some(record.id) != overwritten
                        && record
                            .document
                            .get("_id")
                            .map_or(false, |v| KeyValue::from_json(v) == key)
                })
            }
        };
        if taken {
            return Err(StorageError::DuplicateKey {
                namespace: self.namespace.clone(),
                id: id_value.to_string(),
            });
        }
        Ok(())
    }

    /// Drop the oldest record of a full capped collection, returning its slot.
    fn evict_oldest(&mut self) -> Option<RecordId> {
        let (&seq, &id) = self.natural.iter().next()?;
        self.natural.remove(&seq);
        let record = self.records.remove(&id)?;
        for index in &mut self.indexes {
            index.remove_document(id, &record.document);
        }
        Some(id)
    }

    /// Remove a record by slot.
    pub fn remove_record(&mut self, id: RecordId) -> StorageResult<Option<Record>> {
        if self.is_capped() {
            return Err(StorageError::CappedRemove(self.namespace.clone()));
        }
        let Some(record) = self.records.remove(&id) else {
            return Ok(None);
        };
        self.natural.remove(&record.seq);
        for index in &mut self.indexes {
            index.remove_document(id, &record.document);
        }
        Ok(Some(record))
    }

    /// Merge `set` into the document in slot `id`. The record stays in place.
    pub fn update_record(&mut self, id: RecordId, set: &Map<String, Value>) -> StorageResult<bool> {
        if set.contains_key("_id") {
            return Err(StorageError::InvalidDocument("_id is immutable".into()));
        }
        let Some(record) = self.records.get_mut(&id) else {
            return Ok(false);
        };
        let old = record.document.clone();
        if let Value::Object(fields) = &mut record.document {
            for (k, v) in set {
                fields.insert(k.clone(), v.clone());
            }
        }
        let new = record.document.clone();
        for index in &mut self.indexes {
            index.remove_document(id, &old);
            index.insert_document(id, &new);
        }
        Ok(true)
    }

    /// Build an index. Returns false if one with the same name exists.
    pub fn ensure_index(&mut self, spec: IndexSpec, ident: u64) -> bool {
        if self.index(spec.name()).is_some() {
            return false;
        }
        let mut index = Index::new(spec, ident);
        for record in self.records.values() {
            index.insert_document(record.id, &record.document);
        }
        self.indexes.push(index);
        true
    }

    /// Drop a secondary index by name
    pub fn drop_index(&mut self, name: &str) -> StorageResult<()> {
        if name == IndexSpec::ID_INDEX_NAME {
            return Err(StorageError::IdIndexDrop(self.namespace.clone()));
        }
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name() != name);
        if self.indexes.len() == before {
            return Err(StorageError::IndexNotFound(name.to_string()));
        }
        Ok(())
    }
}
