//! Clause-by-clause execution of a query
//!
//! A plain query is a single clause. A top-level `$or` runs its clauses in
//! order, each with its own plan set, built only when the previous clause is
//! exhausted. Before a clause is planned, the ranges of every earlier clause
//! are subtracted from its own; a clause left with nothing to match is
//! skipped.
//!
//! When a clause is won by a collection scan, that scan has already seen
//! every record matching any clause, so the remaining clauses are dropped.

use super::errors::CursorResult;
use super::explain::ClauseExplain;
use super::matcher::MatchScope;
use super::plan_set::{PlanSet, StepContext};
use crate::index::IndexKey;
use crate::observability::{log_event_with_fields, Event};
use crate::planner::{
    CacheOutcome, ExplainPlan, FieldRangeSet, Predicate, QueryPlan, QueryPlanner, SortOrder,
};
use crate::storage::RecordId;

/// The clause being executed
#[derive(Debug)]
struct ClauseRun {
    index: usize,
    set: PlanSet,
    plan: ExplainPlan,
}

impl ClauseRun {
    fn explain(&self) -> ClauseExplain {
        ClauseExplain {
            clause: self.index,
            eliminated: false,
            plan: Some(self.plan.clone()),
            winner: self.set.winner().map(|p| p.name().to_string()),
            takeover: self.set.is_takeover(),
            completed: self.set.is_completed(),
            nscanned: self.set.nscanned(),
        }
    }
}

/// Result of trying to start the next clause
enum ClauseStart {
    Started,
    /// No candidate can produce the requested order
    Unsatisfiable,
    /// Every clause has been visited
    Finished,
}

/// Runs the clauses of one query one after another.
#[derive(Debug)]
pub struct OrSequencer {
    namespace: String,
    clauses: Vec<Vec<Predicate>>,
    /// Clauses of a top-level `$or`, matched with clause scopes
    disjunctive: bool,
    order: Option<SortOrder>,
    next_clause: usize,
    current: Option<ClauseRun>,
    /// Unmodified ranges of every visited clause
    earlier_ranges: Vec<FieldRangeSet>,
    /// Winner match count of the last finished clause
    carried_matches: u64,
    /// Entries examined by finished clauses
    finished_nscanned: u64,
    history: Vec<ClauseExplain>,
    aborted: bool,
}

impl OrSequencer {
    /// Plan the first clause that can match anything.
    ///
    /// Returns `Ok(None)` when the requested order cannot be produced.
    pub fn open(
        ctx: &StepContext<'_>,
        clauses: Vec<Vec<Predicate>>,
        disjunctive: bool,
        order: Option<SortOrder>,
    ) -> CursorResult<Option<Self>> {
        let mut sequencer = Self {
            namespace: ctx.collection.namespace().to_string(),
            clauses,
            disjunctive,
            order,
            next_clause: 0,
            current: None,
            earlier_ranges: Vec::new(),
            carried_matches: 0,
            finished_nscanned: 0,
            history: Vec::new(),
            aborted: false,
        };
        match sequencer.start_next_clause(ctx)? {
            ClauseStart::Unsatisfiable => Ok(None),
            ClauseStart::Started | ClauseStart::Finished => Ok(Some(sequencer)),
        }
    }

    fn scope(&self, clause: usize) -> MatchScope {
        if self.disjunctive {
            MatchScope::Clause(clause)
        } else {
            MatchScope::Full
        }
    }

    fn start_next_clause(&mut self, ctx: &StepContext<'_>) -> CursorResult<ClauseStart> {
        let single_valued = |field: &str| ctx.collection.is_single_valued(field);

        while self.next_clause < self.clauses.len() {
            let index = self.next_clause;
            self.next_clause += 1;

            let predicates = &self.clauses[index];
            let original = FieldRangeSet::from_predicates(predicates);
            let mut ranges = original.clone();
            for earlier in &self.earlier_ranges {
                ranges.subtract(earlier, single_valued);
            }
            self.earlier_ranges.push(original);

            if !ranges.match_possible(single_valued) {
                let clause = index.to_string();
                log_event_with_fields(
                    Event::OrClauseEliminated,
                    &[("clause", &clause), ("ns", &self.namespace)],
                );
                self.history.push(ClauseExplain::eliminated(index));
                continue;
            }

            let planner = QueryPlanner::new(ctx.collection, ctx.cache);
            let Some(selection) = planner.plan(predicates, &ranges, self.order.as_ref())? else {
                if self.history.is_empty() {
                    return Ok(ClauseStart::Unsatisfiable);
                }
                self.history.push(ClauseExplain::eliminated(index));
                continue;
            };
            match selection.cache {
                CacheOutcome::Hit => ctx.metrics.increment_plan_cache_hits(),
                CacheOutcome::Miss | CacheOutcome::Stale => ctx.metrics.increment_plan_cache_misses(),
                CacheOutcome::Bypassed => {}
            }

            let plan = ExplainPlan::from_selection(&selection);
            let clause = index.to_string();
            let plans = selection.plans.len().to_string();
            log_event_with_fields(
                Event::OrClauseStarted,
                &[
                    ("clause", &clause),
                    ("ns", &self.namespace),
                    ("plans", &plans),
                    ("shape", selection.shape.as_str()),
                ],
            );
            let set = PlanSet::new(selection, ctx.collection, self.scope(index), self.carried_matches);
            self.current = Some(ClauseRun { index, set, plan });
            return Ok(ClauseStart::Started);
        }
        Ok(ClauseStart::Finished)
    }

    fn finish_clause(&mut self) {
        let Some(run) = self.current.take() else {
            return;
        };
        self.finished_nscanned += run.set.nscanned();
        self.carried_matches = run.set.winner_matches();
        let full_scan = run.set.winner().map_or(false, QueryPlan::is_natural);
        self.history.push(run.explain());

        if self.disjunctive && full_scan && self.next_clause < self.clauses.len() {
            self.aborted = true;
            let clause = run.index.to_string();
            let remaining = (self.clauses.len() - self.next_clause).to_string();
            log_event_with_fields(
                Event::OrFullScanAbort,
                &[
                    ("clause", &clause),
                    ("ns", &self.namespace),
                    ("remaining", &remaining),
                ],
            );
        }
    }

    /// Move to the next candidate record, crossing clause boundaries.
    pub fn step(&mut self, ctx: &StepContext<'_>) -> CursorResult<bool> {
        loop {
            let Some(run) = self.current.as_mut() else {
                return Ok(false);
            };
            if run.set.step(ctx) {
                return Ok(true);
            }
            self.finish_clause();
            if self.aborted {
                return Ok(false);
            }
            match self.start_next_clause(ctx)? {
                ClauseStart::Started => {}
                ClauseStart::Unsatisfiable | ClauseStart::Finished => return Ok(false),
            }
        }
    }

    pub fn ok(&self) -> bool {
        self.current.as_ref().map_or(false, |run| run.set.ok())
    }

    pub fn current_record_id(&self) -> Option<RecordId> {
        self.current.as_ref().and_then(|run| run.set.current_record_id())
    }

    pub fn current_key(&self) -> Option<&IndexKey> {
        self.current.as_ref().and_then(|run| run.set.current_key())
    }

    pub fn is_multikey(&self) -> bool {
        self.current.as_ref().map_or(false, |run| run.set.is_multikey())
    }

    pub fn current_scope(&self) -> MatchScope {
        match &self.current {
            Some(run) => run.set.current_scope(),
            None => MatchScope::Full,
        }
    }

    /// Index of the clause being executed
    pub fn current_clause(&self) -> Option<usize> {
        self.current.as_ref().map(|run| run.index)
    }

    pub fn is_disjunctive(&self) -> bool {
        self.disjunctive
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn clause_count(&self) -> usize {
        self.clauses.len()
    }

    pub fn nscanned(&self) -> u64 {
        self.finished_nscanned + self.current.as_ref().map_or(0, |run| run.set.nscanned())
    }

    /// Visited clauses, the running one last
    pub fn explain(&self) -> Vec<ClauseExplain> {
        let mut clauses = self.history.clone();
        if let Some(run) = &self.current {
            clauses.push(run.explain());
        }
        clauses
    }

    pub fn prepare_to_yield(&mut self) -> bool {
        self.current.as_mut().map_or(true, |run| run.set.prepare_to_yield())
    }

    /// Re-validate the running clause. Later clauses are planned against
    /// whatever the collection looks like when they are reached.
    pub fn recover_from_yield(&mut self, ctx: &StepContext<'_>) -> CursorResult<()> {
        match self.current.as_mut() {
            Some(run) => run.set.recover_from_yield(ctx),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CursorConfig, PlanCacheConfig};
    use crate::cursor::matcher::Matcher;
    use crate::index::IndexSpec;
    use crate::observability::MetricsRegistry;
    use crate::planner::{PlanCache, Query};
    use crate::storage::{Collection, CollectionOptions};
    use serde_json::{json, Value};

    struct Fixture {
        collection: Collection,
        cache: PlanCache,
        metrics: MetricsRegistry,
        config: CursorConfig,
    }

    impl Fixture {
        fn new(indexes: &[&str], docs: &[Value]) -> Self {
            let mut collection = Collection::new("test.c", 1, CollectionOptions::normal(), 2);
            for (i, field) in indexes.iter().enumerate() {
                collection.ensure_index(IndexSpec::btree(&[*field]), 10 + i as u64);
            }
            for doc in docs {
                collection.insert(doc.clone()).unwrap();
            }
            Self {
                collection,
                cache: PlanCache::new(PlanCacheConfig::default()),
                metrics: MetricsRegistry::new(),
                config: CursorConfig::default(),
            }
        }

        /// Raw candidate `_id`s and the finished sequencer
        fn run(&self, query: Value) -> (Vec<Value>, OrSequencer) {
            let query = Query::parse(&query).unwrap();
            let matcher = Matcher::new(&query, None);
            let ctx = StepContext {
                collection: &self.collection,
                matcher: &matcher,
                cache: &self.cache,
                metrics: &self.metrics,
                config: &self.config,
            };
            let mut sequencer = OrSequencer::open(&ctx, query.clauses(), query.is_or(), None)
                .unwrap()
                .unwrap();
            let mut out = Vec::new();
            while sequencer.step(&ctx).unwrap() {
                let id = sequencer.current_record_id().unwrap();
                out.push(self.collection.record(id).unwrap().document["_id"].clone());
            }
            (out, sequencer)
        }
    }

    #[test]
    fn test_clauses_run_in_order() {
        let f = Fixture::new(&["a", "b"], &[json!({"_id": 1, "a": 1}), json!({"_id": 2, "b": 2})]);
        let (ids, sequencer) = f.run(json!({"$or": [{"a": 1}, {"b": 2}]}));
        assert_eq!(ids, vec![json!(1), json!(2)]);
        let clauses = sequencer.explain();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].winner.as_deref(), Some("a_1"));
        assert_eq!(clauses[1].winner.as_deref(), Some("b_1"));
        assert!(!sequencer.is_aborted());
    }

    #[test]
    fn test_covered_clause_is_eliminated() {
        let docs: Vec<Value> = (0..10).map(|i| json!({"_id": i, "a": i})).collect();
        let f = Fixture::new(&["a"], &docs);
        let (ids, sequencer) = f.run(json!({"$or": [{"a": {"$gte": 0}}, {"a": {"$gte": 5}}]}));
        assert_eq!(ids.len(), 10);
        let clauses = sequencer.explain();
        assert!(clauses[1].eliminated);
    }

    #[test]
    fn test_collection_scan_aborts_remaining_clauses() {
        let f = Fixture::new(&["a"], &[json!({"_id": 0, "a": 1, "b": 1})]);
        let (_, sequencer) = f.run(json!({"$or": [{"b": 1}, {"a": 1}]}));
        assert!(sequencer.is_aborted());
        assert_eq!(sequencer.explain().len(), 1);
        assert_eq!(sequencer.explain()[0].winner.as_deref(), Some("$natural"));
    }

    #[test]
    fn test_nscanned_accumulates_across_clauses() {
        let f = Fixture::new(
            &["a", "b"],
            &[json!({"_id": 1, "a": 1}), json!({"_id": 2, "b": 2}), json!({"_id": 3, "b": 2})],
        );
        let (_, sequencer) = f.run(json!({"$or": [{"a": 1}, {"b": 2}]}));
        // a_1 sees one entry, b_1 two.
        assert_eq!(sequencer.nscanned(), 3);
    }

    #[test]
    fn test_single_clause_query() {
        let f = Fixture::new(&[], &[json!({"_id": 1}), json!({"_id": 2})]);
        let (ids, sequencer) = f.run(json!({}));
        assert_eq!(ids, vec![json!(1), json!(2)]);
        assert!(!sequencer.is_disjunctive());
        assert_eq!(sequencer.clause_count(), 1);
    }
}
