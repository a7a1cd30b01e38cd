//! Plan set: interleaved execution of competing plans
//!
//! Every candidate plan for one conjunction runs side by side. Each step
//! picks the plan that has examined the fewest entries, lets it count its
//! current record as a match, and moves it on. The first plan to collect
//! `takeover_threshold` matches wins: the others are discarded and the set
//! delegates to the winner alone. The first plan to run out completes the
//! whole set, since every candidate covers the full result.
//!
//! # Invariants
//!
//! - After takeover no other plan is ever advanced again
//! - `nscanned()` never decreases; discarded plans keep their counts
//! - A plan's `matches` only moves while competition is open

use std::collections::HashSet;

use super::errors::{CursorError, CursorResult};
use super::matcher::{MatchScope, Matcher};
use super::plan_cursor::{PlanCursor, Recovery, ScanCursor};
use crate::config::CursorConfig;
use crate::index::IndexKey;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::planner::{PlanCache, PlanSelection, QueryPlan, QueryShape, RecordedPlan};
use crate::storage::{Collection, RecordId};

/// Services a plan set needs while stepping
pub struct StepContext<'a> {
    pub collection: &'a Collection,
    pub matcher: &'a Matcher,
    pub cache: &'a PlanCache,
    pub metrics: &'a MetricsRegistry,
    pub config: &'a CursorConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpStatus {
    /// Positioned on a record to surface
    Ready,
    /// Reached the takeover threshold
    Takeover,
    /// Ran out of records
    Complete,
}

/// One running plan with its match bookkeeping.
#[derive(Debug)]
struct PlanOp {
    plan: QueryPlan,
    cursor: ScanCursor,
    /// Scope surfaced records are matched in
    scope: MatchScope,
    /// Scope matches are counted in toward takeover
    count_scope: MatchScope,
    matches: u64,
    /// The current record was surfaced; step past it next time
    must_advance: bool,
    /// The current record has been checked for a match
    counted: bool,
    /// Records already counted by a multikey scan
    seen: HashSet<RecordId>,
}

impl PlanOp {
    fn open(plan: QueryPlan, collection: &Collection, clause_scope: MatchScope, base_matches: u64) -> Self {
        let cursor = ScanCursor::open(&plan, collection);
        // A collection scan sees every record, so it surfaces against the whole
        // predicate. It still counts only this clause's matches, like its rivals.
        let scope = if plan.is_natural() {
            MatchScope::Full
        } else {
            clause_scope
        };
        Self {
            plan,
            cursor,
            scope,
            count_scope: clause_scope,
            matches: base_matches,
            must_advance: false,
            counted: false,
            seen: HashSet::new(),
        }
    }

    fn priority(&self) -> u64 {
        self.cursor.examined() + u64::from(self.must_advance)
    }

    fn counts_as_match(&mut self, ctx: &StepContext<'_>, id: RecordId) -> bool {
        let Some(record) = ctx.collection.record(id) else {
            return false;
        };
        if !ctx.matcher.matches(&record.document, self.count_scope) {
            return false;
        }
        !self.cursor.is_multikey() || self.seen.insert(id)
    }

    fn next(&mut self, ctx: &StepContext<'_>) -> OpStatus {
        if !self.counted {
            self.counted = true;
            if let Some(id) = self.cursor.current_record_id() {
                if self.counts_as_match(ctx, id) {
                    self.matches += 1;
                }
            }
        }
        if self.must_advance {
            self.cursor.advance(ctx.collection);
            self.must_advance = false;
            self.counted = false;
        }
        if self.matches >= ctx.config.takeover_threshold {
            return OpStatus::Takeover;
        }
        if !self.cursor.ok() {
            return OpStatus::Complete;
        }
        self.must_advance = true;
        OpStatus::Ready
    }
}

/// Competing plans for one conjunction.
#[derive(Debug)]
pub struct PlanSet {
    namespace: String,
    shape: QueryShape,
    ops: Vec<PlanOp>,
    /// Op whose record is current
    current: Option<usize>,
    /// Index into `ops` of the winner once decided
    winner: Option<usize>,
    takeover: bool,
    completed: bool,
    alternatives: Vec<QueryPlan>,
    recorded: Option<RecordedPlan>,
    may_record: bool,
    scope: MatchScope,
    base_matches: u64,
    /// Examined counts of discarded plans
    retired: u64,
}

impl PlanSet {
    /// Open every plan of a selection on its first record.
    ///
    /// `base_matches` carries the match count of earlier `$or` clauses.
    pub fn new(selection: PlanSelection, collection: &Collection, scope: MatchScope, base_matches: u64) -> Self {
        let ops = selection
            .plans
            .into_iter()
            .map(|plan| PlanOp::open(plan, collection, scope, base_matches))
            .collect();
        Self {
            namespace: collection.namespace().to_string(),
            shape: selection.shape,
            ops,
            current: None,
            winner: None,
            takeover: false,
            completed: false,
            alternatives: selection.alternatives,
            recorded: selection.recorded,
            may_record: selection.may_record,
            scope,
            base_matches,
            retired: 0,
        }
    }

    /// Whether a current record exists
    pub fn ok(&self) -> bool {
        !self.completed && self.current_op().map_or(false, |op| op.cursor.ok())
    }

    fn current_op(&self) -> Option<&PlanOp> {
        self.current.and_then(|i| self.ops.get(i))
    }

    pub fn current_record_id(&self) -> Option<RecordId> {
        if !self.ok() {
            return None;
        }
        self.current_op().and_then(|op| op.cursor.current_record_id())
    }

    pub fn current_key(&self) -> Option<&IndexKey> {
        if !self.ok() {
            return None;
        }
        self.current_op().and_then(|op| op.cursor.current_key())
    }

    pub fn is_multikey(&self) -> bool {
        self.current_op().map_or(false, |op| op.cursor.is_multikey())
    }

    /// Scope the current record must match in
    pub fn current_scope(&self) -> MatchScope {
        self.current_op().map_or(self.scope, |op| op.scope)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_takeover(&self) -> bool {
        self.takeover
    }

    /// Winning plan, once takeover or completion decided one
    pub fn winner(&self) -> Option<&QueryPlan> {
        self.winner.and_then(|i| self.ops.get(i)).map(|op| &op.plan)
    }

    /// Match count carried into the next clause
    pub fn winner_matches(&self) -> u64 {
        self.winner
            .and_then(|i| self.ops.get(i))
            .map_or(self.base_matches, |op| op.matches)
    }

    /// Plans still running
    pub fn plans(&self) -> Vec<&QueryPlan> {
        self.ops.iter().map(|op| &op.plan).collect()
    }

    /// Entries examined by every plan this set ever ran
    pub fn nscanned(&self) -> u64 {
        self.retired + self.ops.iter().map(|op| op.cursor.examined()).sum::<u64>()
    }

    /// Move to the next candidate record. Returns `ok()`.
    pub fn step(&mut self, ctx: &StepContext<'_>) -> bool {
        if self.completed {
            return false;
        }
        if self.takeover {
            return self.step_winner(ctx);
        }
        if self.underperforming(ctx) {
            self.replan(ctx);
        }

        let Some(index) = self
            .ops
            .iter()
            .enumerate()
            .min_by_key(|(i, op)| (op.priority(), *i))
            .map(|(i, _)| i)
        else {
            self.complete(None);
            return false;
        };

        match self.ops[index].next(ctx) {
            OpStatus::Ready => {
                self.current = Some(index);
                true
            }
            OpStatus::Complete => {
                self.record_winner(ctx, index);
                self.complete(Some(index));
                false
            }
            OpStatus::Takeover => {
                self.take_over(ctx, index);
                self.current = Some(0);
                if self.ops[0].cursor.ok() {
                    self.ops[0].must_advance = true;
                    true
                } else {
                    self.complete(Some(0));
                    false
                }
            }
        }
    }

    fn step_winner(&mut self, ctx: &StepContext<'_>) -> bool {
        let op = &mut self.ops[0];
        if op.must_advance {
            op.cursor.advance(ctx.collection);
        }
        op.must_advance = true;
        if op.cursor.ok() {
            self.current = Some(0);
            true
        } else {
            self.complete(Some(0));
            false
        }
    }

    fn complete(&mut self, winner: Option<usize>) {
        self.completed = true;
        self.current = None;
        if self.winner.is_none() {
            self.winner = winner;
        }
    }

    fn take_over(&mut self, ctx: &StepContext<'_>, index: usize) {
        let winner = self.ops.swap_remove(index);
        self.retired += self.ops.iter().map(|op| op.cursor.examined()).sum::<u64>();
        self.ops = vec![winner];
        self.takeover = true;
        self.winner = Some(0);

        let plan = self.ops[0].plan.name().to_string();
        let matches = self.ops[0].matches.to_string();
        log_event_with_fields(
            Event::PlanTakeover,
            &[
                ("matches", &matches),
                ("ns", &self.namespace),
                ("plan", &plan),
                ("shape", self.shape.as_str()),
            ],
        );
        ctx.metrics.increment_takeovers();
        self.record_winner(ctx, 0);
    }

    fn record_winner(&mut self, ctx: &StepContext<'_>, index: usize) {
        if !self.may_record || !ctx.cache.is_enabled() {
            return;
        }
        self.may_record = false;
        let op = &self.ops[index];
        let recorded = RecordedPlan {
            plan_name: op.plan.name().to_string(),
            examined: op.cursor.examined(),
        };
        let examined = recorded.examined.to_string();
        log_event_with_fields(
            Event::PlanRecorded,
            &[
                ("examined", &examined),
                ("ns", &self.namespace),
                ("plan", &recorded.plan_name),
                ("shape", self.shape.as_str()),
            ],
        );
        ctx.cache.record(&self.namespace, &self.shape, recorded);
        ctx.metrics.increment_plans_recorded();
    }

    /// A recorded plan running alone has examined far more than expected.
    fn underperforming(&self, ctx: &StepContext<'_>) -> bool {
        let Some(recorded) = &self.recorded else {
            return false;
        };
        if self.alternatives.is_empty() || self.ops.len() != 1 {
            return false;
        }
        let allowed = ctx.config.replan_factor.saturating_mul(recorded.examined.max(1));
        self.ops[0].cursor.examined() > allowed
    }

    /// Reopen competition. The recorded plan keeps its position and its
    /// examined count, so the held-back candidates run until they catch up.
    fn replan(&mut self, ctx: &StepContext<'_>) {
        let Some(recorded) = self.recorded.take() else {
            return;
        };
        ctx.cache.evict(&self.namespace, &self.shape);

        for plan in std::mem::take(&mut self.alternatives) {
            self.ops
                .push(PlanOp::open(plan, ctx.collection, self.scope, self.base_matches));
        }
        self.may_record = true;

        let examined = self.ops[0].cursor.examined().to_string();
        log_event_with_fields(
            Event::PlanReplanned,
            &[
                ("examined", &examined),
                ("ns", &self.namespace),
                ("plan", &recorded.plan_name),
                ("shape", self.shape.as_str()),
            ],
        );
        ctx.metrics.increment_replans();
    }

    /// Whether every running plan can survive a suspension
    pub fn prepare_to_yield(&mut self) -> bool {
        self.completed || self.ops.iter_mut().all(|op| op.cursor.prepare_to_yield())
    }

    /// Re-validate every plan after a suspension.
    ///
    /// Untrustworthy plans are dropped. Fails when none survive or when the
    /// takeover winner is lost.
    pub fn recover_from_yield(&mut self, ctx: &StepContext<'_>) -> CursorResult<()> {
        if self.completed {
            return Ok(());
        }

        let current = self.current;
        let mut kept = Vec::with_capacity(self.ops.len());
        let mut new_current = None;
        for (i, mut op) in std::mem::take(&mut self.ops).into_iter().enumerate() {
            match op.cursor.recover_from_yield(ctx.collection) {
                Recovery::Resumed => {}
                Recovery::Repositioned => {
                    op.counted = false;
                    // The current plan's new record is surfaced right away.
                    op.must_advance = Some(i) == current;
                }
                Recovery::Invalid => {
                    log_event_with_fields(
                        Event::YieldPlanDropped,
                        &[("ns", &self.namespace), ("plan", op.plan.name())],
                    );
                    ctx.metrics.increment_yield_plan_drops();
                    self.retired += op.cursor.examined();
                    continue;
                }
            }
            if Some(i) == current {
                new_current = Some(kept.len());
            }
            kept.push(op);
        }

        let lost_winner = self.takeover && kept.is_empty();
        self.ops = kept;
        self.current = new_current;
        if lost_winner {
            return Err(CursorError::yield_invalidated(format!(
                "winning plan for '{}' lost its position",
                self.namespace
            )));
        }
        if self.ops.is_empty() {
            return Err(CursorError::yield_invalidated(format!(
                "no plan for '{}' survived the yield",
                self.namespace
            )));
        }
        if self.takeover {
            self.winner = Some(0);
        }
        if let Some(exhausted) = self.ops.iter().position(|op| !op.cursor.ok()) {
            self.complete(Some(exhausted));
        }
        Ok(())
    }
}
