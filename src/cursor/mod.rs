//! Query optimizer cursor subsystem for aeroquery
//!
//! Races candidate plans for a query, one `$or` clause at a time, and hands
//! callers a single stream of de-duplicated records that survives yields.
//!
//! # Layers
//!
//! - `plan_cursor`: one access path (index, collection scan, geo)
//! - `plan_set`: interleaved plans of one clause, takeover at the threshold
//! - `or_sequencer`: clauses in order, range elimination, full-scan abort
//! - `cursor`: filtering, dedup, yield, kill
//!
//! # Usage
//!
//! ```ignore
//! let factory = CursorFactory::new(db, CursorConfig::default());
//! if let Some(mut cursor) = factory.open("app.users", &json!({"age": {"$gt": 21}}), None)? {
//!     while cursor.ok() {
//!         println!("{}", cursor.current()?);
//!         cursor.advance()?;
//!     }
//! }
//! ```

mod cursor;
mod dedup;
mod errors;
mod explain;
mod factory;
mod interrupt;
mod matcher;
mod or_sequencer;
mod plan_cursor;
mod plan_set;
mod yield_state;

pub use cursor::QueryOptimizerCursor;
pub use dedup::DedupSet;
pub use errors::{CursorError, CursorErrorCode, CursorResult, Severity};
pub use explain::{ClauseExplain, CursorExplain};
pub use factory::CursorFactory;
pub use interrupt::InterruptHandle;
pub use matcher::{MatchScope, Matcher};
pub use plan_cursor::{PlanCursor, Recovery, ScanCursor};
pub use yield_state::{CatalogChange, CursorState, YieldSnapshot};
