//! Cursor lifecycle states and yield snapshots
//!
//! ```text
//! Active --prepare_to_yield--> Yielded --recover_from_yield--> Active
//!                                                          \-> Exhausted
//!                                                          \-> Failed
//! Active --no more records--> Exhausted
//! Active --kill observed--> Killed
//! ```

use std::fmt;

use crate::storage::Collection;

/// Lifecycle state of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Iterating; may have a current record
    Active,
    /// Suspended between `prepare_to_yield` and `recover_from_yield`
    Yielded,
    /// No further records
    Exhausted,
    /// Unrecoverable error surfaced
    Failed,
    /// Kill request surfaced
    Killed,
}

impl CursorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorState::Active => "ACTIVE",
            CursorState::Yielded => "YIELDED",
            CursorState::Exhausted => "EXHAUSTED",
            CursorState::Failed => "FAILED",
            CursorState::Killed => "KILLED",
        }
    }

    /// Whether the cursor can never produce another record
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CursorState::Exhausted | CursorState::Failed | CursorState::Killed
        )
    }
}

impl fmt::Display for CursorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Catalog idents captured when a cursor yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YieldSnapshot {
    collection: u64,
    indexes: Vec<u64>,
}

/// Catalog changes seen on recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogChange {
    Unchanged,
    CollectionDropped,
    IndexDropped,
}

impl YieldSnapshot {
    pub fn capture(collection: &Collection) -> Self {
        Self {
            collection: collection.ident(),
            indexes: collection.indexes().iter().map(|i| i.ident()).collect(),
        }
    }

    /// Compare against the collection now registered under the namespace.
    ///
    /// A recreated collection counts as dropped. New indexes are fine; a
    /// missing one is not.
    pub fn compare(&self, current: Option<&Collection>) -> CatalogChange {
        let Some(collection) = current else {
            return CatalogChange::CollectionDropped;
        };
        if collection.ident() != self.collection {
            return CatalogChange::CollectionDropped;
        }
        let present: Vec<u64> = collection.indexes().iter().map(|i| i.ident()).collect();
        if self.indexes.iter().all(|ident| present.contains(ident)) {
            CatalogChange::Unchanged
        } else {
            CatalogChange::IndexDropped
        }
    }
}
