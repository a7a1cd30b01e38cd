//! Runtime cursors for candidate plans
//!
//! A `QueryPlan` only describes an access path. `ScanCursor` is the running
//! form: a closed set of scan variants behind the `PlanCursor` capability
//! trait, so the plan set drives every variant through one interface.
//!
//! Cursors keep their position as plain data (an index entry or a natural
//! order sequence number) and re-seek the collection on every step. That
//! makes a suspended cursor trivially restartable: recovery only has to check
//! whether the saved position still names the same content.

use std::ops::Bound;

use crate::index::{Direction, IndexEntry, IndexKey, KeyValue};
use crate::planner::{AccessPath, FieldRange, QueryPlan};
use crate::storage::{Collection, RecordId};

/// Outcome of re-validating a cursor after a yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Saved position is intact
    Resumed,
    /// Saved record is gone; moved to the next record in scan order
    Repositioned,
    /// Saved position now names different content
    Invalid,
}

/// Capabilities every plan variant provides.
pub trait PlanCursor {
    /// Whether the cursor is positioned on a record
    fn ok(&self) -> bool;

    /// Step to the next record. Returns `ok()` afterwards.
    fn advance(&mut self, collection: &Collection) -> bool;

    fn current_record_id(&self) -> Option<RecordId>;

    /// Index key at the current position (index scans only)
    fn current_key(&self) -> Option<&IndexKey>;

    /// Whether one record may appear more than once in this scan
    fn is_multikey(&self) -> bool;

    /// Returns false if the cursor cannot survive a suspension.
    fn prepare_to_yield(&mut self) -> bool;

    fn recover_from_yield(&mut self, collection: &Collection) -> Recovery;

    /// Entries examined so far
    fn examined(&self) -> u64;
}

// ==================
// Index scan
// ==================

#[derive(Debug, Clone, PartialEq)]
struct IndexPosition {
    entry: IndexEntry,
    seq: u64,
}

/// Ordered scan of a B-tree index restricted to a range on the first field.
#[derive(Debug, Clone)]
pub struct IndexScan {
    index: String,
    direction: Direction,
    bounds: FieldRange,
    position: Option<IndexPosition>,
    multikey: bool,
    examined: u64,
}

impl IndexScan {
    pub fn open(collection: &Collection, index: &str, direction: Direction, bounds: FieldRange) -> Self {
        let mut scan = Self {
            index: index.to_string(),
            direction,
            bounds,
            position: None,
            multikey: false,
            examined: 0,
        };
        scan.seek(collection, None);
        scan
    }

    /// Whether a leading key value lies beyond the far end of the range
    fn past_end(&self, value: &KeyValue) -> bool {
        match self.direction {
            Direction::Forward => match self.bounds.end() {
                Bound::Included(v) => *value > v,
                Bound::Excluded(v) => *value >= v,
                Bound::Unbounded => false,
            },
            Direction::Backward => match self.bounds.start() {
                Bound::Included(v) => *value < v,
                Bound::Excluded(v) => *value <= v,
                Bound::Unbounded => false,
            },
        }
    }

    /// Position on the first in-range entry after `after` (or from the start).
    fn seek(&mut self, collection: &Collection, after: Option<IndexEntry>) {
        self.position = None;
        let Some(tree) = collection.index(&self.index).and_then(|i| i.btree()) else {
            return;
        };
        self.multikey = tree.is_multikey();

        let entries = match &after {
            Some(entry) => tree.entries_after(Some(entry), self.direction),
            None => {
                let start = match self.direction {
                    Direction::Forward => self.bounds.start(),
                    Direction::Backward => self.bounds.end(),
                };
                tree.entries_from(&start, self.direction)
            }
        };
        for entry in entries {
            let leading = entry.0.first();
            if self.past_end(leading) {
                return;
            }
            if !self.bounds.contains(leading) {
                continue;
            }
            if let Some(record) = collection.record(entry.1) {
                self.position = Some(IndexPosition {
                    entry: entry.clone(),
                    seq: record.seq,
                });
                self.examined += 1;
                return;
            }
        }
    }
}

impl PlanCursor for IndexScan {
    fn ok(&self) -> bool {
        self.position.is_some()
    }

    fn advance(&mut self, collection: &Collection) -> bool {
        if let Some(pos) = self.position.take() {
            self.seek(collection, Some(pos.entry));
        }
        self.ok()
    }

    fn current_record_id(&self) -> Option<RecordId> {
        self.position.as_ref().map(|p| p.entry.1)
    }

    fn current_key(&self) -> Option<&IndexKey> {
        self.position.as_ref().map(|p| &p.entry.0)
    }

    fn is_multikey(&self) -> bool {
        self.multikey
    }

    fn prepare_to_yield(&mut self) -> bool {
        true
    }

    fn recover_from_yield(&mut self, collection: &Collection) -> Recovery {
        let Some(tree) = collection.index(&self.index).and_then(|i| i.btree()) else {
            return Recovery::Invalid;
        };
        self.multikey = tree.is_multikey();
        let Some(pos) = self.position.clone() else {
            return Recovery::Resumed;
        };

        if tree.contains(&pos.entry) {
            return match collection.record(pos.entry.1) {
                Some(record) if record.seq == pos.seq => Recovery::Resumed,
                _ => Recovery::Invalid,
            };
        }
        self.seek(collection, Some(pos.entry));
        Recovery::Repositioned
    }

    fn examined(&self) -> u64 {
        self.examined
    }
}

// ==================
// Natural scan
// ==================

/// Every record in insertion order.
#[derive(Debug, Clone)]
pub struct NaturalScan {
    direction: Direction,
    position: Option<(u64, RecordId)>,
    examined: u64,
}

impl NaturalScan {
    pub fn open(collection: &Collection, direction: Direction) -> Self {
        let mut scan = Self {
            direction,
            position: None,
            examined: 0,
        };
        scan.seek(collection, None);
        scan
    }

    fn seek(&mut self, collection: &Collection, after: Option<u64>) {
        self.position = collection
            .next_in_natural_order(after, self.direction)
            .map(|r| (r.seq, r.id));
        if self.position.is_some() {
            self.examined += 1;
        }
    }
}

impl PlanCursor for NaturalScan {
    fn ok(&self) -> bool {
        self.position.is_some()
    }

    fn advance(&mut self, collection: &Collection) -> bool {
        if let Some((seq, _)) = self.position.take() {
            self.seek(collection, Some(seq));
        }
        self.ok()
    }

    fn current_record_id(&self) -> Option<RecordId> {
        self.position.map(|(_, id)| id)
    }

    fn current_key(&self) -> Option<&IndexKey> {
        None
    }

    fn is_multikey(&self) -> bool {
        false
    }

    fn prepare_to_yield(&mut self) -> bool {
        true
    }

    /// A missing record is skipped on normal collections. On capped ones it
    /// was overwritten, and the scan has lost its place.
    fn recover_from_yield(&mut self, collection: &Collection) -> Recovery {
        let Some((seq, _)) = self.position else {
            return Recovery::Resumed;
        };
        if collection.record_by_seq(seq).is_some() {
            return Recovery::Resumed;
        }
        if collection.is_capped() {
            return Recovery::Invalid;
        }
        self.seek(collection, Some(seq));
        Recovery::Repositioned
    }

    fn examined(&self) -> u64 {
        self.examined
    }
}

// ==================
// Geo scan
// ==================

/// Records of a 2d index ordered by distance. Cannot yield.
#[derive(Debug, Clone)]
pub struct GeoScan {
    hits: Vec<RecordId>,
    pos: usize,
}

impl GeoScan {
    pub fn open(collection: &Collection, index: &str, origin: (f64, f64)) -> Self {
        let hits = collection
            .index(index)
            .and_then(|i| i.geo())
            .map(|geo| geo.nearest(origin).into_iter().map(|(_, id)| id).collect())
            .unwrap_or_default();
        Self { hits, pos: 0 }
    }
}

impl PlanCursor for GeoScan {
    fn ok(&self) -> bool {
        self.pos < self.hits.len()
    }

    fn advance(&mut self, _collection: &Collection) -> bool {
        if self.ok() {
            self.pos += 1;
        }
        self.ok()
    }

    fn current_record_id(&self) -> Option<RecordId> {
        self.hits.get(self.pos).copied()
    }

    fn current_key(&self) -> Option<&IndexKey> {
        None
    }

    fn is_multikey(&self) -> bool {
        false
    }

    fn prepare_to_yield(&mut self) -> bool {
        false
    }

    fn recover_from_yield(&mut self, collection: &Collection) -> Recovery {
        match self.current_record_id() {
            Some(id) if collection.record(id).is_none() => Recovery::Invalid,
            _ => Recovery::Resumed,
        }
    }

    fn examined(&self) -> u64 {
        (self.pos + 1).min(self.hits.len()) as u64
    }
}

// ==================
// Variant dispatch
// ==================

/// Running cursor for one plan
#[derive(Debug, Clone)]
pub enum ScanCursor {
    Index(IndexScan),
    Natural(NaturalScan),
    Geo(GeoScan),
}

impl ScanCursor {
    /// Open a cursor for `plan`, positioned on its first record
    pub fn open(plan: &QueryPlan, collection: &Collection) -> Self {
        match plan.access() {
            AccessPath::Index {
                index,
                direction,
                bounds,
                ..
            } => ScanCursor::Index(IndexScan::open(collection, index, *direction, bounds.clone())),
            AccessPath::Natural { direction } => {
                ScanCursor::Natural(NaturalScan::open(collection, *direction))
            }
            AccessPath::Geo { index, origin, .. } => {
                ScanCursor::Geo(GeoScan::open(collection, index, *origin))
            }
        }
    }

    fn inner(&self) -> &dyn PlanCursor {
        match self {
            ScanCursor::Index(c) => c,
            ScanCursor::Natural(c) => c,
            ScanCursor::Geo(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn PlanCursor {
        match self {
            ScanCursor::Index(c) => c,
            ScanCursor::Natural(c) => c,
            ScanCursor::Geo(c) => c,
        }
    }
}

impl PlanCursor for ScanCursor {
    fn ok(&self) -> bool {
        self.inner().ok()
    }

    fn advance(&mut self, collection: &Collection) -> bool {
        self.inner_mut().advance(collection)
    }

    fn current_record_id(&self) -> Option<RecordId> {
        self.inner().current_record_id()
    }

    fn current_key(&self) -> Option<&IndexKey> {
        self.inner().current_key()
    }

    fn is_multikey(&self) -> bool {
        self.inner().is_multikey()
    }

    fn prepare_to_yield(&mut self) -> bool {
        self.inner_mut().prepare_to_yield()
    }

    fn recover_from_yield(&mut self, collection: &Collection) -> Recovery {
        self.inner_mut().recover_from_yield(collection)
    }

    fn examined(&self) -> u64 {
        self.inner().examined()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSpec;
    use crate::planner::{FilterOp, Predicate};
    use crate::storage::CollectionOptions;
    use serde_json::{json, Map, Value};

    fn collection(docs: &[Value]) -> Collection {
        let mut c = Collection::new("test.c", 1, CollectionOptions::normal(), 2);
        c.ensure_index(IndexSpec::btree(&["a"]), 3);
        for doc in docs {
            c.insert(doc.clone()).unwrap();
        }
        c
    }

    fn drain(cursor: &mut impl PlanCursor, c: &Collection) -> Vec<Value> {
        let mut out = Vec::new();
        while cursor.ok() {
            let id = cursor.current_record_id().unwrap();
            out.push(c.record(id).unwrap().document["_id"].clone());
            cursor.advance(c);
        }
        out
    }

    fn range(op: FilterOp) -> FieldRange {
        FieldRange::from_op(&Predicate::new("a", op).op)
    }

    #[test]
    fn test_index_scan_respects_bounds() {
        let c = collection(&[
            json!({"_id": 1, "a": 5}),
            json!({"_id": 2, "a": 1}),
            json!({"_id": 3, "a": "x"}),
            json!({"_id": 4, "a": 3}),
        ]);
        let mut scan = IndexScan::open(&c, "a_1", Direction::Forward, range(FilterOp::Gt(json!(2))));
        assert_eq!(scan.examined(), 1);
        assert_eq!(drain(&mut scan, &c), vec![json!(4), json!(1)]);
        assert_eq!(scan.examined(), 2);

        let mut back = IndexScan::open(&c, "a_1", Direction::Backward, range(FilterOp::Gt(json!(2))));
        assert_eq!(drain(&mut back, &c), vec![json!(1), json!(4)]);
    }

    #[test]
    fn test_index_scan_skips_gaps_between_intervals() {
        let c = collection(&[
            json!({"_id": 1, "a": 1}),
            json!({"_id": 2, "a": 2}),
            json!({"_id": 3, "a": 3}),
        ]);
        let mut scan = IndexScan::open(&c, "a_1", Direction::Forward, range(FilterOp::In(vec![json!(1), json!(3)])));
        assert_eq!(drain(&mut scan, &c), vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_multikey_index_scan_repeats_records() {
        let c = collection(&[json!({"_id": 1, "a": [1, 2]})]);
        let mut scan = IndexScan::open(&c, "a_1", Direction::Forward, FieldRange::universal());
        assert!(scan.is_multikey());
        assert_eq!(drain(&mut scan, &c), vec![json!(1), json!(1)]);
    }

    #[test]
    fn test_index_scan_recovery() {
        let mut c = collection(&[
            json!({"_id": 1, "a": 1}),
            json!({"_id": 2, "a": 2}),
            json!({"_id": 3, "a": 3}),
        ]);
        let mut scan = IndexScan::open(&c, "a_1", Direction::Forward, FieldRange::universal());
        assert!(scan.prepare_to_yield());
        assert_eq!(scan.recover_from_yield(&c), Recovery::Resumed);

        let first = scan.current_record_id().unwrap();
        c.remove_record(first).unwrap();
        assert_eq!(scan.recover_from_yield(&c), Recovery::Repositioned);
        assert_eq!(c.record(scan.current_record_id().unwrap()).unwrap().document["_id"], 2);
        assert_eq!(scan.examined(), 2);

        let mut set = Map::new();
        set.insert("a".into(), json!(0));
        c.update_record(scan.current_record_id().unwrap(), &set).unwrap();
        assert_eq!(scan.recover_from_yield(&c), Recovery::Repositioned);
        assert_eq!(c.record(scan.current_record_id().unwrap()).unwrap().document["_id"], 3);
    }

    #[test]
    fn test_index_scan_invalid_after_index_drop() {
        let mut c = collection(&[json!({"_id": 1, "a": 1})]);
        let mut scan = IndexScan::open(&c, "a_1", Direction::Forward, FieldRange::universal());
        c.drop_index("a_1").unwrap();
        assert_eq!(scan.recover_from_yield(&c), Recovery::Invalid);
    }

    #[test]
    fn test_natural_scan_directions() {
        let c = collection(&[json!({"_id": 1}), json!({"_id": 2})]);
        let mut forward = NaturalScan::open(&c, Direction::Forward);
        assert_eq!(drain(&mut forward, &c), vec![json!(1), json!(2)]);
        let mut backward = NaturalScan::open(&c, Direction::Backward);
        assert_eq!(drain(&mut backward, &c), vec![json!(2), json!(1)]);
        assert_eq!(backward.examined(), 2);
    }

    #[test]
    fn test_natural_scan_recovery_on_capped_overwrite() {
        let mut c = Collection::new("test.capped", 1, CollectionOptions::capped(2), 2);
        c.insert(json!({"_id": 1})).unwrap();
        c.insert(json!({"_id": 2})).unwrap();
        let mut scan = NaturalScan::open(&c, Direction::Forward);
        assert!(scan.prepare_to_yield());
        c.insert(json!({"_id": 3})).unwrap();
        assert_eq!(scan.recover_from_yield(&c), Recovery::Invalid);
    }

    #[test]
    fn test_natural_scan_skips_deleted_record() {
        let mut c = collection(&[json!({"_id": 1}), json!({"_id": 2})]);
        let mut scan = NaturalScan::open(&c, Direction::Forward);
        c.remove_record(scan.current_record_id().unwrap()).unwrap();
        assert_eq!(scan.recover_from_yield(&c), Recovery::Repositioned);
        assert_eq!(drain(&mut scan, &c), vec![json!(2)]);
    }

    #[test]
    fn test_geo_scan_orders_by_distance_and_cannot_yield() {
        let mut c = Collection::new("test.geo", 1, CollectionOptions::normal(), 2);
        c.ensure_index(IndexSpec::geo("loc"), 3);
        c.insert(json!({"_id": "far", "loc": [10, 10]})).unwrap();
        c.insert(json!({"_id": "near", "loc": [1, 1]})).unwrap();

        let mut scan = GeoScan::open(&c, "loc_2d", (0.0, 0.0));
        assert!(!scan.prepare_to_yield());
        assert_eq!(scan.examined(), 1);
        assert_eq!(drain(&mut scan, &c), vec![json!("near"), json!("far")]);
        assert_eq!(scan.examined(), 2);
    }

    #[test]
    fn test_scan_cursor_dispatch() {
        let c = collection(&[json!({"_id": 1, "a": 1})]);
        let mut cursor = ScanCursor::open(&QueryPlan::natural(Direction::Forward), &c);
        assert!(matches!(cursor, ScanCursor::Natural(_)));
        assert!(cursor.ok());
        assert!(cursor.current_key().is_none());
        assert!(!cursor.advance(&c));
        assert_eq!(cursor.examined(), 1);
    }
}
