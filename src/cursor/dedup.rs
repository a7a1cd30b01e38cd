//! Record identities already surfaced by a cursor

use std::collections::HashSet;

use crate::storage::RecordId;

/// Tracks identity, not predicate truth.
#[derive(Debug, Default, Clone)]
pub struct DedupSet {
    seen: HashSet<RecordId>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `id` was seen before, then marks it seen.
    pub fn check_and_mark(&mut self, id: RecordId) -> bool {
        !self.seen.insert(id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.seen.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
