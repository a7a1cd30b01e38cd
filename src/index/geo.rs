//! Planar geospatial index
//!
//! Stores one point per record. Proximity queries compute distances on demand
//! and return records nearest first; ties are broken by record id so results
//! are deterministic.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::storage::{lookup_path, RecordId};

/// A 2-D point
pub type Point = (f64, f64);

/// Extract a point from a field value.
///
/// Accepts `[x, y]` arrays or objects, taking the first two numeric values
/// in document order (e.g. `{"lon": 30, "lat": 31}` is `(30, 31)`).
pub fn point_from_json(value: &Value) -> Option<Point> {
    let values: Box<dyn Iterator<Item = &Value>> = match value {
        Value::Array(items) => Box::new(items.iter()),
        Value::Object(map) => Box::new(map.values()),
        _ => return None,
    };
    let mut coords = values.filter_map(Value::as_f64);
    let x = coords.next()?;
    let y = coords.next()?;
    Some((x, y))
}

/// Euclidean distance between two points
pub fn distance(a: Point, b: Point) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

#[derive(Debug, Default, Clone)]
pub struct GeoIndex {
    points: BTreeMap<RecordId, Point>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the point held in `field`, if any
    pub fn insert_document(&mut self, field: &str, id: RecordId, document: &Value) {
        if let Some(point) = lookup_path(document, field).and_then(point_from_json) {
            self.points.insert(id, point);
        }
    }

    pub fn remove_document(&mut self, id: RecordId) {
        self.points.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// All indexed records ordered by distance from `origin`
    pub fn nearest(&self, origin: Point) -> Vec<(f64, RecordId)> {
        let mut hits: Vec<(f64, RecordId)> = self
            .points
            .iter()
            .map(|(id, p)| (distance(origin, *p), *id))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}
