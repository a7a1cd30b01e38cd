//! Cursor construction
//!
//! A `CursorFactory` carries the services every cursor shares: the
//! database, the plan cache, the metrics registry and the configuration.
//! Construction is bracketed by a `CURSOR_OPEN` observation scope.

use std::sync::Arc;

use serde_json::Value;

use super::cursor::{CursorParts, QueryOptimizerCursor};
use super::errors::{CursorError, CursorResult};
use super::matcher::Matcher;
use super::or_sequencer::OrSequencer;
use super::plan_set::StepContext;
use crate::config::CursorConfig;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, ObservationScope};
use crate::planner::{PlanCache, Query, SortOrder};
use crate::storage::{Database, StorageError};

/// Opens query optimizer cursors against one database.
pub struct CursorFactory {
    db: Arc<Database>,
    cache: Arc<PlanCache>,
    metrics: Arc<MetricsRegistry>,
    config: CursorConfig,
}

impl CursorFactory {
    /// Factory with a fresh plan cache and metrics registry
    pub fn new(db: Arc<Database>, config: CursorConfig) -> Self {
        let cache = Arc::new(PlanCache::new(config.plan_cache.clone()));
        Self {
            db,
            cache,
            metrics: Arc::new(MetricsRegistry::new()),
            config,
        }
    }

    /// Share a plan cache with other factories
    pub fn with_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn cache(&self) -> &Arc<PlanCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn config(&self) -> &CursorConfig {
        &self.config
    }

    /// Open a cursor positioned on the first qualifying record.
    ///
    /// `Ok(None)` means no plan can produce the requested order.
    pub fn open(
        &self,
        namespace: &str,
        query: &Value,
        order: Option<&Value>,
    ) -> CursorResult<Option<QueryOptimizerCursor>> {
        self.open_with(namespace, query, order, true)
    }

    /// Open a cursor positioned on the first candidate record.
    ///
    /// The caller matches and dedups itself, through `matcher()` and
    /// `check_and_mark_dup()`.
    pub fn open_unfiltered(
        &self,
        namespace: &str,
        query: &Value,
        order: Option<&Value>,
    ) -> CursorResult<Option<QueryOptimizerCursor>> {
        self.open_with(namespace, query, order, false)
    }

    fn open_with(
        &self,
        namespace: &str,
        query: &Value,
        order: Option<&Value>,
        integrated: bool,
    ) -> CursorResult<Option<QueryOptimizerCursor>> {
        let mode = if integrated { "filtered" } else { "unfiltered" };
        let scope = ObservationScope::with_fields("CURSOR_OPEN", &[("mode", mode), ("ns", namespace)]);

        match self.build(namespace, query, order, integrated) {
            Ok(Some(cursor)) => {
                self.metrics.increment_cursors_opened();
                let ok = cursor.ok().to_string();
                let clauses = cursor.explain().clauses.len().to_string();
                log_event_with_fields(
                    Event::CursorOpened,
                    &[("clauses", &clauses), ("mode", mode), ("ns", namespace), ("ok", &ok)],
                );
                scope.complete_with_fields(&[("result", "cursor")]);
                Ok(Some(cursor))
            }
            Ok(None) => {
                scope.complete_with_fields(&[("result", "no_plan")]);
                Ok(None)
            }
            Err(err) => {
                if err.is_fatal() {
                    scope.fail_fatal(&err.to_string());
                } else {
                    scope.fail(&err.to_string());
                }
                Err(err)
            }
        }
    }

    fn build(
        &self,
        namespace: &str,
        query: &Value,
        order: Option<&Value>,
        integrated: bool,
    ) -> CursorResult<Option<QueryOptimizerCursor>> {
        let query = Query::parse(query)?;
        let order = match order {
            Some(doc) => SortOrder::parse(doc)?,
            None => None,
        };
        let matcher = Matcher::new(&query, order.as_ref());

        // An $or with a field order runs as one clause over the common
        // conditions; the matcher still checks every alternative.
        let field_order = matches!(order, Some(SortOrder::Field(_)));
        let disjunctive = query.is_or() && !field_order;
        let clauses = if disjunctive {
            query.clauses()
        } else {
            vec![query.predicates().to_vec()]
        };

        let handle = self.db.collection(namespace)?;
        let sequencer = match &handle {
            Some(handle) => {
                let collection = handle
                    .read()
                    .map_err(|_| CursorError::from(StorageError::LockPoisoned))?;
                let ctx = StepContext {
                    collection: &collection,
                    matcher: &matcher,
                    cache: &self.cache,
                    metrics: &self.metrics,
                    config: &self.config,
                };
                match OrSequencer::open(&ctx, clauses, disjunctive, order)? {
                    Some(sequencer) => Some(sequencer),
                    None => return Ok(None),
                }
            }
            // Nothing to scan, but an order still needs an index to exist.
            None if field_order => return Ok(None),
            None => None,
        };

        let cursor = QueryOptimizerCursor::start(CursorParts {
            db: Arc::clone(&self.db),
            namespace: namespace.to_string(),
            handle,
            matcher,
            sequencer,
            integrated,
            cache: Arc::clone(&self.cache),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
        })?;
        Ok(Some(cursor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::CursorErrorCode;
    use crate::index::IndexSpec;
    use serde_json::json;

    fn factory() -> CursorFactory {
        CursorFactory::new(Arc::new(Database::new()), CursorConfig::default())
    }

    #[test]
    fn test_missing_collection_gives_empty_cursor() {
        let f = factory();
        let cursor = f.open("test.none", &json!({}), None).unwrap().unwrap();
        assert!(!cursor.ok());
        assert_eq!(
            cursor.current().unwrap_err().code(),
            CursorErrorCode::AeroCursorInvalidState
        );
        assert!(f.open("test.none", &json!({}), Some(&json!({"a": 1}))).unwrap().is_none());
    }

    #[test]
    fn test_unindexed_order_has_no_plan() {
        let f = factory();
        f.database().insert("test.c", json!({"a": 1})).unwrap();
        assert!(f.open("test.c", &json!({}), Some(&json!({"a": 1}))).unwrap().is_none());

        f.database().ensure_index("test.c", IndexSpec::btree(&["a"])).unwrap();
        assert!(f.open("test.c", &json!({}), Some(&json!({"a": 1}))).unwrap().is_some());
    }

    #[test]
    fn test_invalid_query_is_rejected() {
        let f = factory();
        let err = f.open("test.c", &json!({"a": {"$bogus": 1}}), None).unwrap_err();
        assert_eq!(err.code(), CursorErrorCode::AeroCursorPlanningFailed);
    }

    #[test]
    fn test_open_counts_cursors() {
        let f = factory();
        f.database().insert("test.c", json!({"_id": 1})).unwrap();
        let cursor = f.open("test.c", &json!({}), None).unwrap().unwrap();
        assert!(cursor.ok());
        assert_eq!(f.metrics().cursors_opened(), 1);
    }
}
