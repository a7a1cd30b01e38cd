//! Plan cache
//!
//! Remembers which plan won the race for a query shape in a namespace, and
//! how many records it examined while winning. Entries are evicted
//! first-in-first-out once the configured bound is reached.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::ast::{Predicate, SortOrder};
use crate::config::PlanCacheConfig;

/// Normalized query structure: fields and operators, not values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryShape(String);

impl QueryShape {
    /// Shape of a conjunction plus its order, e.g. `a:eq,b:gt|b:asc`
    pub fn new(predicates: &[Predicate], order: Option<&SortOrder>) -> Self {
        let mut parts: Vec<String> = predicates
            .iter()
            .map(|p| format!("{}:{}", p.field, p.op.op_name()))
            .collect();
        parts.sort();
        parts.dedup();
        let order = order.map(SortOrder::shape_key).unwrap_or_default();
        QueryShape(format!("{}|{}", parts.join(","), order))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A plan that previously won for a shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPlan {
    /// Plan name: index name or `$natural`
    pub plan_name: String,
    /// Records the plan examined when it won
    pub examined: u64,
}

type CacheKey = (String, QueryShape);

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<CacheKey, RecordedPlan>,
    order: VecDeque<CacheKey>,
}

/// Shared, bounded plan cache.
#[derive(Debug, Default)]
pub struct PlanCache {
    config: PlanCacheConfig,
    inner: RwLock<CacheInner>,
}

impl PlanCache {
    pub fn new(config: PlanCacheConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // Cached plans are advisory; a poisoned lock still holds usable data.
    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Recorded plan for a shape, if any
    pub fn lookup(&self, namespace: &str, shape: &QueryShape) -> Option<RecordedPlan> {
        if !self.config.enabled {
            return None;
        }
        self.read()
            .entries
            .get(&(namespace.to_string(), shape.clone()))
            .cloned()
    }

    /// Record the winner for a shape, replacing any previous entry
    pub fn record(&self, namespace: &str, shape: &QueryShape, plan: RecordedPlan) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }
        let key = (namespace.to_string(), shape.clone());
        let mut inner = self.write();
        if inner.entries.insert(key.clone(), plan).is_none() {
            inner.order.push_back(key);
        }
        while inner.entries.len() > self.config.max_entries {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Remove the entry for a shape. Returns whether one existed.
    pub fn evict(&self, namespace: &str, shape: &QueryShape) -> bool {
        let key = (namespace.to_string(), shape.clone());
        let mut inner = self.write();
        let existed = inner.entries.remove(&key).is_some();
        if existed {
            inner.order.retain(|k| k != &key);
        }
        existed
    }

    /// Remove every entry of a namespace. Returns how many were removed.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let mut inner = self.write();
        let before = inner.entries.len();
        inner.entries.retain(|(ns, _), _| ns != namespace);
        inner.order.retain(|(ns, _)| ns != namespace);
        before - inner.entries.len()
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ast::SortSpec;
    use serde_json::json;

    fn shape(field: &str) -> QueryShape {
        QueryShape::new(&[Predicate::eq(field, json!(1))], None)
    }

    fn plan(name: &str) -> RecordedPlan {
        RecordedPlan {
            plan_name: name.to_string(),
            examined: 3,
        }
    }

    #[test]
    fn test_shape_ignores_values_and_order_of_predicates() {
        let a = QueryShape::new(&[Predicate::eq("a", json!(1)), Predicate::gt("b", json!(2))], None);
        let b = QueryShape::new(&[Predicate::gt("b", json!(9)), Predicate::eq("a", json!("x"))], None);
        assert_eq!(a, b);

        let sorted = QueryShape::new(
            &[Predicate::eq("a", json!(1))],
            Some(&SortOrder::Field(SortSpec::asc("b"))),
        );
        assert_eq!(sorted.as_str(), "a:eq|b:asc");
    }

    #[test]
    fn test_record_and_lookup() {
        let cache = PlanCache::new(PlanCacheConfig::default());
        cache.record("test.c", &shape("a"), plan("a_1"));
        assert_eq!(cache.lookup("test.c", &shape("a")), Some(plan("a_1")));
        assert_eq!(cache.lookup("test.other", &shape("a")), None);
        assert_eq!(cache.lookup("test.c", &shape("b")), None);
    }

    #[test]
    fn test_fifo_bound() {
        let cache = PlanCache::new(PlanCacheConfig {
            enabled: true,
            max_entries: 2,
        });
        cache.record("test.c", &shape("a"), plan("a_1"));
        cache.record("test.c", &shape("b"), plan("b_1"));
        cache.record("test.c", &shape("a"), plan("$natural"));
        cache.record("test.c", &shape("c"), plan("c_1"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup("test.c", &shape("a")), None);
        assert!(cache.lookup("test.c", &shape("b")).is_some());
    }

    #[test]
    fn test_evict_and_invalidate() {
        let cache = PlanCache::new(PlanCacheConfig::default());
        cache.record("test.c", &shape("a"), plan("a_1"));
        cache.record("test.c", &shape("b"), plan("b_1"));
        cache.record("test.d", &shape("a"), plan("a_1"));

        assert!(cache.evict("test.c", &shape("a")));
        assert!(!cache.evict("test.c", &shape("a")));
        assert_eq!(cache.invalidate_namespace("test.c"), 1);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_records_nothing() {
        let cache = PlanCache::new(PlanCacheConfig::disabled());
        cache.record("test.c", &shape("a"), plan("a_1"));
        assert!(cache.is_empty());
        assert_eq!(cache.lookup("test.c", &shape("a")), None);
    }
}
