//! Candidate plan selection
//!
//! Turns a conjunction, its field ranges and an optional order into the list
//! of access paths a plan set will race. Selection rules, in order:
//!
//! 1. `$near` allows only the geo plan on a `2d` index of that field
//! 2. A `$natural` order allows only the natural plan
//! 3. No order and no constrained field: only the natural plan
//! 4. `_id` equality with an `_id_` index: only that index
//! 5. Each B-tree index in catalog order, unless it cannot produce the
//!    requested order or (without an order) its first field is
//!    unconstrained. An optimal index is used alone.
//! 6. The natural plan last, when no order is requested
//!
//! No candidate at all means the requested order cannot be produced.

use std::fmt;

use super::ast::{FilterOp, Predicate, SortDirection, SortOrder, SortSpec};
use super::bounds::{FieldRange, FieldRangeSet};
use super::cache::{PlanCache, QueryShape, RecordedPlan};
use super::errors::{PlannerError, PlannerResult};
use crate::index::{Direction, Index, IndexKind, IndexSpec, Point};
use crate::observability::{log_event_with_fields, Event};
use crate::storage::Collection;

/// Name of the natural-order plan
pub const NATURAL_PLAN: &str = "$natural";

impl From<SortDirection> for Direction {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => Direction::Forward,
            SortDirection::Desc => Direction::Backward,
        }
    }
}

/// How a plan reaches records
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    /// Ordered scan of a B-tree index, bounded on its first field
    Index {
        index: String,
        ident: u64,
        direction: Direction,
        bounds: FieldRange,
    },
    /// Every record in insertion order
    Natural { direction: Direction },
    /// Records of a 2d index by distance from `origin`
    Geo { index: String, ident: u64, origin: Point },
}

/// Immutable description of one candidate plan (no runtime state)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    access: AccessPath,
    optimal: bool,
}

impl QueryPlan {
    pub fn natural(direction: Direction) -> Self {
        Self {
            access: AccessPath::Natural { direction },
            optimal: false,
        }
    }

    pub fn index(index: &Index, direction: Direction, bounds: FieldRange, optimal: bool) -> Self {
        Self {
            access: AccessPath::Index {
                index: index.name().to_string(),
                ident: index.ident(),
                direction,
                bounds,
            },
            optimal,
        }
    }

    pub fn geo(index: &Index, origin: Point) -> Self {
        Self {
            access: AccessPath::Geo {
                index: index.name().to_string(),
                ident: index.ident(),
                origin,
            },
            optimal: true,
        }
    }

    /// Index name, or `$natural`
    pub fn name(&self) -> &str {
        match &self.access {
            AccessPath::Index { index, .. } | AccessPath::Geo { index, .. } => index,
            AccessPath::Natural { .. } => NATURAL_PLAN,
        }
    }

    pub fn access(&self) -> &AccessPath {
        &self.access
    }

    pub fn is_natural(&self) -> bool {
        matches!(self.access, AccessPath::Natural { .. })
    }

    /// Whether the plan was chosen alone because it fits the query exactly
    pub fn is_optimal(&self) -> bool {
        self.optimal
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.access {
            AccessPath::Index {
                index,
                direction,
                bounds,
                ..
            } => {
                write!(f, "BtreeCursor {}", index)?;
                if *direction == Direction::Backward {
                    write!(f, " reverse")?;
                }
                write!(f, " {}", bounds.describe())
            }
            AccessPath::Natural { direction } => match direction {
                Direction::Forward => write!(f, "BasicCursor"),
                Direction::Backward => write!(f, "ReverseCursor"),
            },
            AccessPath::Geo { index, .. } => write!(f, "GeoSearchCursor {}", index),
        }
    }
}

/// How the plan cache contributed to a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// A recorded plan matched a candidate and runs alone
    Hit,
    /// Nothing recorded for the shape
    Miss,
    /// The recorded plan is no longer a candidate and was evicted
    Stale,
    /// A single candidate; the cache is not consulted
    Bypassed,
}

/// Plans chosen for one conjunction
#[derive(Debug, Clone)]
pub struct PlanSelection {
    /// Plan-cache key
    pub shape: QueryShape,
    /// Plans to start racing
    pub plans: Vec<QueryPlan>,
    /// Candidates held back behind a recorded plan
    pub alternatives: Vec<QueryPlan>,
    /// The recorded plan in use, if any
    pub recorded: Option<RecordedPlan>,
    /// Whether the winner of this selection may be recorded
    pub may_record: bool,
    pub cache: CacheOutcome,
}

/// Walk the key fields: leading point ranges may precede the order field.
fn scan_direction(spec: &IndexSpec, ranges: &FieldRangeSet, sort: Option<&SortSpec>) -> Option<Direction> {
    let Some(sort) = sort else {
        return Some(Direction::Forward);
    };
    for field in spec.fields() {
        if *field == sort.field {
            return Some(sort.direction.into());
        }
        if !ranges.range(field).is_point() {
            return None;
        }
    }
    None
}

/// Every constrained field is a key field, all but the last as a point.
fn is_optimal(spec: &IndexSpec, ranges: &FieldRangeSet) -> bool {
    let mut covered = 0;
    let mut awaiting = true;
    for field in spec.fields() {
        let range = ranges.range(field);
        if awaiting {
            if !range.is_universal() {
                covered += 1;
            }
            if !range.is_point() {
                awaiting = false;
            }
        } else if !range.is_universal() {
            return false;
        }
    }
    covered == ranges.nontrivial_count()
}

/// Chooses candidate plans against one collection.
pub struct QueryPlanner<'a> {
    collection: &'a Collection,
    cache: &'a PlanCache,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(collection: &'a Collection, cache: &'a PlanCache) -> Self {
        Self { collection, cache }
    }

    /// Candidate plans ignoring the plan cache.
    ///
    /// `Ok(None)` means no candidate can produce the requested order.
    pub fn candidates(
        &self,
        predicates: &[Predicate],
        ranges: &FieldRangeSet,
        order: Option<&SortOrder>,
    ) -> PlannerResult<Option<Vec<QueryPlan>>> {
        let sort = order.and_then(SortOrder::field);

        if let Some((field, origin)) = near_predicate(predicates) {
            if sort.is_some() {
                return Ok(None);
            }
            let index = self
                .collection
                .indexes()
                .iter()
                .find(|i| i.spec().kind() == IndexKind::Geo2d && i.spec().first_field() == field)
                .ok_or_else(|| PlannerError::special_index_missing(field))?;
            return Ok(Some(vec![QueryPlan::geo(index, origin)]));
        }

        if let Some(SortOrder::Natural(direction)) = order {
            return Ok(Some(vec![QueryPlan::natural((*direction).into())]));
        }

        if sort.is_none() && !ranges.has_nontrivial() {
            return Ok(Some(vec![QueryPlan::natural(Direction::Forward)]));
        }

        if ranges.range("_id").is_point() {
            if let Some(id_index) = self.collection.index(IndexSpec::ID_INDEX_NAME) {
                let bounds = ranges.range("_id");
                return Ok(Some(vec![QueryPlan::index(id_index, Direction::Forward, bounds, true)]));
            }
        }

        let mut plans = Vec::new();
        for index in self.collection.indexes() {
            let spec = index.spec();
            if spec.kind() != IndexKind::Btree {
                continue;
            }
            let Some(direction) = scan_direction(spec, ranges, sort) else {
                continue;
            };
            let first = spec.first_field();
            if sort.is_none() && ranges.range(first).is_universal() {
                continue;
            }
            let bounds = if index.is_multikey() {
                ranges.multikey_range(first)
            } else {
                ranges.range(first)
            };
            if is_optimal(spec, ranges) {
                return Ok(Some(vec![QueryPlan::index(index, direction, bounds, true)]));
            }
            plans.push(QueryPlan::index(index, direction, bounds, false));
        }

        if sort.is_none() {
            plans.push(QueryPlan::natural(Direction::Forward));
        }
        Ok((!plans.is_empty()).then_some(plans))
    }

    /// Candidate plans with the recorded plan for the shape applied.
    pub fn plan(
        &self,
        predicates: &[Predicate],
        ranges: &FieldRangeSet,
        order: Option<&SortOrder>,
    ) -> PlannerResult<Option<PlanSelection>> {
        let shape = QueryShape::new(predicates, order);
        let Some(mut candidates) = self.candidates(predicates, ranges, order)? else {
            return Ok(None);
        };

        let namespace = self.collection.namespace();
        let mut selection = PlanSelection {
            shape,
            plans: Vec::new(),
            alternatives: Vec::new(),
            recorded: None,
            may_record: candidates.len() > 1,
            cache: CacheOutcome::Bypassed,
        };

        if candidates.len() > 1 {
            selection.cache = match self.cache.lookup(namespace, &selection.shape) {
                Some(recorded) => match candidates.iter().position(|p| p.name() == recorded.plan_name) {
                    Some(pos) => {
                        let chosen = candidates.remove(pos);
                        selection.alternatives = std::mem::replace(&mut candidates, vec![chosen]);
                        selection.recorded = Some(recorded);
                        selection.may_record = false;
                        CacheOutcome::Hit
                    }
                    None => {
                        self.cache.evict(namespace, &selection.shape);
                        log_event_with_fields(
                            Event::PlanCacheEvicted,
                            &[
                                ("ns", namespace),
                                ("plan", &recorded.plan_name),
                                ("shape", selection.shape.as_str()),
                            ],
                        );
                        CacheOutcome::Stale
                    }
                },
                None => CacheOutcome::Miss,
            };
        }

        selection.plans = candidates;
        Ok(Some(selection))
    }
}

fn near_predicate(predicates: &[Predicate]) -> Option<(&str, Point)> {
    predicates.iter().find_map(|p| match p.op {
        FilterOp::Near(origin) => Some((p.field.as_str(), origin)),
        _ => None,
    })
}
