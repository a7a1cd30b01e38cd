//! Query optimizer cursor
//!
//! The façade callers iterate. It owns the clause sequencer, the dedup set,
//! the lifecycle state and the kill flag, and takes a short read lock on the
//! collection for every call that touches storage.
//!
//! # Invariants
//!
//! - Current-record accessors fail with INVALID_STATE unless `ok()`
//! - An integrated cursor never surfaces the same record twice
//! - A kill is reported once as an error, then as plain exhaustion
//! - Fatal conditions are raised on the call that detects them

use std::sync::{Arc, RwLockReadGuard};

use serde_json::Value;

use super::dedup::DedupSet;
use super::errors::{CursorError, CursorResult};
use super::explain::CursorExplain;
use super::interrupt::InterruptHandle;
use super::matcher::{MatchScope, Matcher};
use super::or_sequencer::OrSequencer;
use super::plan_set::StepContext;
use super::yield_state::{CatalogChange, CursorState, YieldSnapshot};
use crate::config::CursorConfig;
use crate::index::IndexKey;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::planner::PlanCache;
use crate::storage::{Collection, CollectionHandle, Database, RecordId, StorageError};

fn read(handle: &CollectionHandle) -> CursorResult<RwLockReadGuard<'_, Collection>> {
    handle
        .read()
        .map_err(|_| CursorError::from(StorageError::LockPoisoned))
}

/// Advance the sequencer until a record to surface is current.
fn next_candidate(
    sequencer: &mut OrSequencer,
    ctx: &StepContext<'_>,
    dedup: &mut DedupSet,
    filter: bool,
) -> CursorResult<bool> {
    loop {
        if !sequencer.step(ctx)? {
            return Ok(false);
        }
        if !filter || qualifies(sequencer, ctx, dedup) {
            return Ok(true);
        }
    }
}

/// The current record matches its clause and was not surfaced before.
/// Marks it surfaced when it qualifies.
fn qualifies(sequencer: &OrSequencer, ctx: &StepContext<'_>, dedup: &mut DedupSet) -> bool {
    let Some(id) = sequencer.current_record_id() else {
        return false;
    };
    let Some(record) = ctx.collection.record(id) else {
        return false;
    };
    ctx.matcher.matches(&record.document, sequencer.current_scope()) && !dedup.check_and_mark(id)
}

/// Multi-plan cursor over one namespace.
pub struct QueryOptimizerCursor {
    db: Arc<Database>,
    namespace: String,
    /// Absent when the collection did not exist or was dropped
    handle: Option<CollectionHandle>,
    matcher: Matcher,
    sequencer: Option<OrSequencer>,
    dedup: DedupSet,
    state: CursorState,
    snapshot: Option<YieldSnapshot>,
    interrupt: InterruptHandle,
    /// Filter and dedup inside `advance()`
    integrated: bool,
    cache: Arc<PlanCache>,
    metrics: Arc<MetricsRegistry>,
    config: CursorConfig,
    returned: u64,
}

pub(crate) struct CursorParts {
    pub db: Arc<Database>,
    pub namespace: String,
    pub handle: Option<CollectionHandle>,
    pub matcher: Matcher,
    pub sequencer: Option<OrSequencer>,
    pub integrated: bool,
    pub cache: Arc<PlanCache>,
    pub metrics: Arc<MetricsRegistry>,
    pub config: CursorConfig,
}

impl QueryOptimizerCursor {
    /// Build a cursor and move it onto its first record.
    pub(crate) fn start(parts: CursorParts) -> CursorResult<Self> {
        let state = if parts.sequencer.is_some() {
            CursorState::Active
        } else {
            CursorState::Exhausted
        };
        let mut cursor = Self {
            db: parts.db,
            namespace: parts.namespace,
            handle: parts.handle,
            matcher: parts.matcher,
            sequencer: parts.sequencer,
            dedup: DedupSet::new(),
            state,
            snapshot: None,
            interrupt: InterruptHandle::new(),
            integrated: parts.integrated,
            cache: parts.cache,
            metrics: parts.metrics,
            config: parts.config,
            returned: 0,
        };
        if cursor.state == CursorState::Active {
            cursor.position(cursor.integrated)?;
        }
        Ok(cursor)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Whether a current record exists
    pub fn ok(&self) -> bool {
        self.state == CursorState::Active && self.sequencer.as_ref().map_or(false, OrSequencer::ok)
    }

    /// Move to the next record.
    ///
    /// Cursors from `open` skip non-matching and already surfaced records;
    /// cursors from `open_unfiltered` behave like `step()`.
    pub fn advance(&mut self) -> CursorResult<bool> {
        if !self.ready_to_move()? {
            return Ok(false);
        }
        self.position(self.integrated)
    }

    /// Move to the next candidate record without filtering.
    pub fn step(&mut self) -> CursorResult<bool> {
        if !self.ready_to_move()? {
            return Ok(false);
        }
        self.position(false)
    }

    fn ready_to_move(&mut self) -> CursorResult<bool> {
        match self.state {
            CursorState::Active => {}
            CursorState::Yielded => {
                return Err(CursorError::invalid_state("cursor is yielded"));
            }
            CursorState::Exhausted | CursorState::Failed | CursorState::Killed => return Ok(false),
        }
        self.check_for_interrupt()?;
        Ok(true)
    }

    fn position(&mut self, filter: bool) -> CursorResult<bool> {
        let Some(handle) = self.handle.clone() else {
            self.exhaust();
            return Ok(false);
        };
        let outcome = {
            let collection = read(&handle)?;
            match self.sequencer.as_mut() {
                Some(sequencer) => {
                    let ctx = StepContext {
                        collection: &collection,
                        matcher: &self.matcher,
                        cache: &self.cache,
                        metrics: &self.metrics,
                        config: &self.config,
                    };
                    next_candidate(sequencer, &ctx, &mut self.dedup, filter)
                }
                None => Ok(false),
            }
        };
        match outcome {
            Ok(true) => {
                self.returned += 1;
                Ok(true)
            }
            Ok(false) => {
                self.exhaust();
                Ok(false)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn exhaust(&mut self) {
        if self.state == CursorState::Exhausted {
            return;
        }
        self.state = CursorState::Exhausted;
        let nscanned = self.nscanned().to_string();
        let returned = self.returned.to_string();
        log_event_with_fields(
            Event::CursorExhausted,
            &[
                ("ns", &self.namespace),
                ("nscanned", &nscanned),
                ("returned", &returned),
            ],
        );
    }

    fn fail(&mut self, err: CursorError) -> CursorError {
        self.state = CursorState::Failed;
        self.metrics.increment_cursors_failed();
        log_event_with_fields(
            Event::CursorFailed,
            &[("code", err.code().code()), ("ns", &self.namespace), ("reason", err.message())],
        );
        err
    }

    fn require_ok(&self) -> CursorResult<()> {
        if self.ok() {
            Ok(())
        } else {
            Err(CursorError::invalid_state(format!(
                "no current record ({})",
                self.state
            )))
        }
    }

    pub fn current_record_id(&self) -> CursorResult<RecordId> {
        self.require_ok()?;
        self.sequencer
            .as_ref()
            .and_then(OrSequencer::current_record_id)
            .ok_or_else(|| CursorError::invalid_state("no current record"))
    }

    /// Copy of the current document
    pub fn current(&self) -> CursorResult<Value> {
        let id = self.current_record_id()?;
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| CursorError::invalid_state("no collection"))?;
        let collection = read(handle)?;
        collection
            .record(id)
            .map(|r| r.document.clone())
            .ok_or_else(|| CursorError::invalid_state(format!("record {} is gone", id)))
    }

    /// Index key of the current entry; `None` for collection scans
    pub fn current_key(&self) -> CursorResult<Option<IndexKey>> {
        self.require_ok()?;
        Ok(self
            .sequencer
            .as_ref()
            .and_then(OrSequencer::current_key)
            .cloned())
    }

    /// Whether the current plan scans a multikey index
    pub fn is_multikey(&self) -> bool {
        self.ok() && self.sequencer.as_ref().map_or(false, OrSequencer::is_multikey)
    }

    /// Predicate evaluator for manual matching
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Scope the current record has to match in
    pub fn current_scope(&self) -> MatchScope {
        self.sequencer
            .as_ref()
            .map_or(MatchScope::Full, OrSequencer::current_scope)
    }

    /// Whether the current record satisfies the predicate in its scope
    pub fn matches_current(&self) -> CursorResult<bool> {
        let document = self.current()?;
        Ok(self.matcher.matches(&document, self.current_scope()))
    }

    /// Report whether `id` was surfaced before, then mark it surfaced.
    pub fn check_and_mark_dup(&mut self, id: RecordId) -> bool {
        self.dedup.check_and_mark(id)
    }

    /// Entries examined by every plan so far
    pub fn nscanned(&self) -> u64 {
        self.sequencer.as_ref().map_or(0, OrSequencer::nscanned)
    }

    /// Handle another thread can use to kill this cursor
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Fail once if a kill was requested.
    pub fn check_for_interrupt(&mut self) -> CursorResult<()> {
        if self.state == CursorState::Killed || !self.interrupt.is_killed() {
            return Ok(());
        }
        self.state = CursorState::Killed;
        self.metrics.increment_cursors_killed();
        log_event_with_fields(Event::CursorKilled, &[("ns", &self.namespace)]);
        Err(CursorError::interrupted())
    }

    /// Snapshot every plan before the caller releases its lock.
    ///
    /// Returns false when some plan cannot survive a suspension; the cursor
    /// stays active and the caller must not yield.
    pub fn prepare_to_yield(&mut self) -> CursorResult<bool> {
        match self.state {
            CursorState::Active => {}
            CursorState::Yielded => {
                return Err(CursorError::invalid_state("cursor is already yielded"));
            }
            CursorState::Exhausted | CursorState::Failed | CursorState::Killed => return Ok(true),
        }
        let Some(handle) = self.handle.clone() else {
            return Ok(true);
        };
        let collection = read(&handle)?;
        if !self.sequencer.as_mut().map_or(true, OrSequencer::prepare_to_yield) {
            return Ok(false);
        }
        self.snapshot = Some(YieldSnapshot::capture(&collection));
        self.state = CursorState::Yielded;
        self.metrics.increment_yields();
        log_event_with_fields(Event::YieldPrepared, &[("ns", &self.namespace)]);
        Ok(true)
    }

    /// Re-validate every plan after the caller re-acquired its lock.
    pub fn recover_from_yield(&mut self) -> CursorResult<()> {
        match self.state {
            CursorState::Yielded => {}
            CursorState::Active => {
                return Err(CursorError::invalid_state("cursor is not yielded"));
            }
            CursorState::Exhausted | CursorState::Failed | CursorState::Killed => return Ok(()),
        }
        self.state = CursorState::Active;
        let Some(snapshot) = self.snapshot.take() else {
            return Ok(());
        };

        let handle = self.db.collection(&self.namespace)?;
        let change = match &handle {
            Some(h) => snapshot.compare(Some(&*read(h)?)),
            None => CatalogChange::CollectionDropped,
        };
        match change {
            CatalogChange::Unchanged => {}
            CatalogChange::CollectionDropped => {
                self.cache.invalidate_namespace(&self.namespace);
                self.handle = None;
                if self.sequencer.as_ref().map_or(false, OrSequencer::is_disjunctive) {
                    let err = CursorError::yield_invalidated(format!(
                        "collection '{}' was dropped while an $or cursor was yielded",
                        self.namespace
                    ));
                    return Err(self.fail(err));
                }
                self.exhaust();
                return Ok(());
            }
            CatalogChange::IndexDropped => {
                self.cache.invalidate_namespace(&self.namespace);
                self.exhaust();
                return Ok(());
            }
        }
        let Some(handle) = handle else {
            return Ok(());
        };
        self.handle = Some(handle.clone());

        let prior = self.sequencer.as_ref().and_then(OrSequencer::current_record_id);
        let recovered = {
            let collection = read(&handle)?;
            match self.sequencer.as_mut() {
                Some(sequencer) => {
                    let ctx = StepContext {
                        collection: &collection,
                        matcher: &self.matcher,
                        cache: &self.cache,
                        metrics: &self.metrics,
                        config: &self.config,
                    };
                    match sequencer.recover_from_yield(&ctx) {
                        Ok(()) => {
                            // A record that replaced the current one is filtered like any other.
                            let moved = sequencer.current_record_id() != prior;
                            Ok(sequencer.ok()
                                && (!self.integrated
                                    || !moved
                                    || qualifies(sequencer, &ctx, &mut self.dedup)))
                        }
                        Err(err) => Err(err),
                    }
                }
                None => Ok(false),
            }
        };
        let positioned = match recovered {
            Ok(positioned) => positioned,
            Err(err) => return Err(self.fail(err)),
        };
        log_event_with_fields(Event::YieldRecovered, &[("ns", &self.namespace)]);
        if !positioned {
            self.position(self.integrated)?;
        }
        Ok(())
    }

    /// Plans, clauses and counters so far
    pub fn explain(&self) -> CursorExplain {
        CursorExplain {
            namespace: self.namespace.clone(),
            disjunctive: self.sequencer.as_ref().map_or(false, OrSequencer::is_disjunctive),
            clauses: self.sequencer.as_ref().map(OrSequencer::explain).unwrap_or_default(),
            full_scan_abort: self.sequencer.as_ref().map_or(false, OrSequencer::is_aborted),
            nscanned: self.nscanned(),
            returned: self.returned,
        }
    }
}

impl std::fmt::Debug for QueryOptimizerCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptimizerCursor")
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .field("integrated", &self.integrated)
            .field("returned", &self.returned)
            .finish()
    }
}
