//! Query planner subsystem for aeroquery
//!
//! Parses predicate and order documents, derives per-field key ranges, and
//! chooses the candidate plans a cursor races against each other.
//!
//! # Design Principles
//!
//! - Deterministic: same collection state and query give the same candidates
//! - Plans are immutable descriptions; runtime state lives in the cursor
//! - The plan cache is an injected service, never global state
//!
//! # Candidate Priority
//!
//! 1. Special (`$near`) and `$natural` orders pin a single plan
//! 2. `_id` equality uses the `_id_` index
//! 3. Optimal index alone, else every helpful index in catalog order
//! 4. Natural scan last when no order is requested

mod ast;
mod bounds;
mod cache;
mod errors;
mod explain;
mod planner;

pub use ast::{FilterOp, Pattern, Predicate, Query, SortDirection, SortOrder, SortSpec};
pub use bounds::{FieldRange, FieldRangeSet, Interval};
pub use cache::{PlanCache, QueryShape, RecordedPlan};
pub use errors::{PlannerError, PlannerErrorCode, PlannerResult};
pub use explain::ExplainPlan;
pub use planner::{AccessPath, CacheOutcome, PlanSelection, QueryPlan, QueryPlanner, NATURAL_PLAN};
