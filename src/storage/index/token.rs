use std::collections::BTreeSet;
use std::ops::Bound;

use crate::storage::writer::EntityUpdate;

/// Ordered `(token, entity)` postings of a token lookup index.
#[derive(Default, Debug)]
pub struct TokenIndex {
    entries: BTreeSet<(u32, u64)>,
}

impl TokenIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entity` under every token.
    pub fn add(&mut self, entity: u64, tokens: &[u32]) {
        for &token in tokens {
            self.entries.insert((token, entity));
        }
    }

    /// Removes `entity` from every token.
    pub fn remove(&mut self, entity: u64, tokens: &[u32]) {
        for &token in tokens {
            self.entries.remove(&(token, entity));
        }
    }

    /// Replaces the `before` tokens of an entity with its `after` tokens.
    pub fn apply(&mut self, update: &EntityUpdate) {
        self.remove(update.id, &update.before);
        self.add(update.id, &update.after);
    }

    /// Whether `entity` is indexed under `token`.
    pub fn contains(&self, token: u32, entity: u64) -> bool {
        self.entries.contains(&(token, entity))
    }

    /// Appends up to `max` entities of `token` strictly after `after`.
    ///
    /// Returns `true` when more entities of the token remain.
    pub fn entities_after(
        &self,
        token: u32,
        after: Option<u64>,
        max: usize,
        out: &mut Vec<u64>,
    ) -> bool {
        let lower = match after {
            Some(entity) => Bound::Excluded((token, entity)),
            None => Bound::Included((token, 0)),
        };
        let upper = Bound::Included((token, u64::MAX));
        let mut range = self.entries.range((lower, upper));
        for &(_, entity) in range.by_ref().take(max) {
            out.push(entity);
        }
        range.next().is_some()
    }

    /// Number of postings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no postings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every posting.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
