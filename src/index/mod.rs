//! Index subsystem for aeroquery
//!
//! Indexes are derived state maintained by the owning collection on every
//! write. Each index carries an `ident` that changes whenever the index is
//! rebuilt or recreated, which lets suspended cursors detect drops.
//!
//! # Structures
//!
//! - `IndexTree`: ordered `(IndexKey, RecordId)` entries, multikey aware
//! - `GeoIndex`: one planar point per record, proximity ordered

mod btree;
mod geo;
mod key;
mod spec;

pub use btree::{Direction, IndexEntry, IndexTree};
pub use geo::{distance, point_from_json, GeoIndex, Point};
pub use key::{IndexKey, KeyValue};
pub use spec::{IndexKind, IndexSpec};

use serde_json::Value;

use crate::storage::RecordId;

/// Physical index data
#[derive(Debug, Clone)]
pub enum IndexData {
    Btree(IndexTree),
    Geo(GeoIndex),
}

/// A live index attached to a collection.
#[derive(Debug, Clone)]
pub struct Index {
    spec: IndexSpec,
    ident: u64,
    data: IndexData,
}

impl Index {
    /// Create an empty index for `spec`
    pub fn new(spec: IndexSpec, ident: u64) -> Self {
        let data = match spec.kind() {
            IndexKind::Btree => IndexData::Btree(IndexTree::new()),
            IndexKind::Geo2d => IndexData::Geo(GeoIndex::new()),
        };
        Self { spec, ident, data }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Incarnation number, unique within a database
    pub fn ident(&self) -> u64 {
        self.ident
    }

    /// B-tree data, if this is a B-tree index
    pub fn btree(&self) -> Option<&IndexTree> {
        match &self.data {
            IndexData::Btree(tree) => Some(tree),
            IndexData::Geo(_) => None,
        }
    }

    /// Geo data, if this is a geospatial index
    pub fn geo(&self) -> Option<&GeoIndex> {
        match &self.data {
            IndexData::Geo(geo) => Some(geo),
            IndexData::Btree(_) => None,
        }
    }

    /// Whether any key field has held an array
    pub fn is_multikey(&self) -> bool {
        match &self.data {
            IndexData::Btree(tree) => tree.is_multikey(),
            IndexData::Geo(_) => false,
        }
    }

    pub fn insert_document(&mut self, id: RecordId, document: &Value) {
        match &mut self.data {
            IndexData::Btree(tree) => tree.insert_document(self.spec.fields(), id, document),
            IndexData::Geo(geo) => geo.insert_document(self.spec.first_field(), id, document),
        }
    }

    pub fn remove_document(&mut self, id: RecordId, document: &Value) {
        match &mut self.data {
            IndexData::Btree(tree) => tree.remove_document(self.spec.fields(), id, document),
            IndexData::Geo(geo) => geo.remove_document(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_index_dispatch() {
        let mut btree = Index::new(IndexSpec::btree(&["a"]), 1);
        btree.insert_document(RecordId::new(0), &json!({"a": [1, 2]}));
        assert!(btree.is_multikey());
        assert_eq!(btree.btree().map(IndexTree::len), Some(2));
        assert!(btree.geo().is_none());

        let mut geo = Index::new(IndexSpec::geo("loc"), 2);
        geo.insert_document(RecordId::new(0), &json!({"loc": [1, 2]}));
        assert!(!geo.is_multikey());
        assert_eq!(geo.geo().map(GeoIndex::len), Some(1));
        assert_eq!(geo.ident(), 2);
    }
}
