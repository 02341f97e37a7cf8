//! Transaction handles.

use std::collections::HashMap;

use super::{CollectionId, Key};

/// A staged-write transaction handle.
///
/// Writes made under a transaction accumulate here and overlay the committed
/// state on reads from the same transaction; `Engine::transaction_commit`
/// applies the whole set atomically. Handles are pooled by the session
/// manager and recycled: `transaction_init` on a reused handle discards any
/// staged writes left behind by an evicted session.
#[derive(Debug, Default)]
pub struct Transaction {
    pub(super) staged: HashMap<(CollectionId, Key), Option<Vec<u8>>>,
    pub(super) staged_paths: HashMap<(CollectionId, Vec<u8>), Option<Vec<u8>>>,
}

impl Transaction {
    pub(super) fn reset(&mut self) {
        self.staged.clear();
        self.staged_paths.clear();
    }

    /// Number of staged key and path writes.
    pub fn staged_len(&self) -> usize {
        self.staged.len() + self.staged_paths.len()
    }
}
