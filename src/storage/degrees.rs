//! Degree counting primitives shared by the group cursor and chain walks.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::types::TypeId;

/// Direction of a relationship relative to one of its endpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum RelationshipDirection {
    /// The node is the source.
    Outgoing,
    /// The node is the destination.
    Incoming,
    /// The node is both source and destination.
    Loop,
}

impl RelationshipDirection {
    /// Every direction, in group-record order.
    pub const ALL: [RelationshipDirection; 3] = [
        RelationshipDirection::Outgoing,
        RelationshipDirection::Incoming,
        RelationshipDirection::Loop,
    ];

    /// Short name used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipDirection::Outgoing => "outgoing",
            RelationshipDirection::Incoming => "incoming",
            RelationshipDirection::Loop => "loop",
        }
    }
}

/// Direction requested by a degree query.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum Direction {
    /// Outgoing relationships and loops.
    Outgoing,
    /// Incoming relationships and loops.
    Incoming,
    /// Every relationship.
    #[default]
    Both,
}

/// Type and direction filter applied while counting degrees.
#[derive(Clone, Debug, Default)]
pub struct RelationshipSelection {
    types: Option<SmallVec<[TypeId; 4]>>,
    direction: Direction,
}

impl RelationshipSelection {
    /// Selects every type in `direction`.
    pub fn all(direction: Direction) -> Self {
        Self {
            types: None,
            direction,
        }
    }

    /// Selects only `types` in `direction`.
    pub fn of_types(types: &[TypeId], direction: Direction) -> Self {
        let mut selected: SmallVec<[TypeId; 4]> = types.iter().copied().collect();
        selected.sort_unstable();
        selected.dedup();
        Self {
            types: Some(selected),
            direction,
        }
    }

    /// Requested direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether relationships of `ty` are counted.
    pub fn test_type(&self, ty: TypeId) -> bool {
        match &self.types {
            None => true,
            Some(types) => types.binary_search(&ty).is_ok(),
        }
    }

    /// Whether relationships in `direction` are counted. Loops match any direction.
    pub fn test_direction(&self, direction: RelationshipDirection) -> bool {
        match (self.direction, direction) {
            (_, RelationshipDirection::Loop) | (Direction::Both, _) => true,
            (Direction::Outgoing, RelationshipDirection::Outgoing) => true,
            (Direction::Incoming, RelationshipDirection::Incoming) => true,
            _ => false,
        }
    }
}

/// Receives degree contributions. Returning `false` stops the count early.
pub trait DegreeMutator {
    /// Adds counts for one type. Any of the three may be zero.
    fn add(&mut self, ty: TypeId, outgoing: u32, incoming: u32, loops: u32) -> bool;
}

/// Per-type counts collected by [`EagerDegrees`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DegreeCounts {
    /// Outgoing, excluding loops.
    pub outgoing: u32,
    /// Incoming, excluding loops.
    pub incoming: u32,
    /// Loops.
    pub loops: u32,
}

impl DegreeCounts {
    /// Relationships of this type in any direction.
    pub fn total(&self) -> u32 {
        self.outgoing
            .saturating_add(self.incoming)
            .saturating_add(self.loops)
    }
}

/// Collects complete per-type degrees.
#[derive(Clone, Debug, Default)]
pub struct EagerDegrees {
    per_type: BTreeMap<TypeId, DegreeCounts>,
}

impl EagerDegrees {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Types that received at least one contribution, ascending.
    pub fn types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.per_type.keys().copied()
    }

    /// Raw counts for `ty`.
    pub fn counts(&self, ty: TypeId) -> DegreeCounts {
        self.per_type.get(&ty).copied().unwrap_or_default()
    }

    /// Outgoing degree of `ty`, loops included.
    pub fn outgoing(&self, ty: TypeId) -> u32 {
        let c = self.counts(ty);
        c.outgoing.saturating_add(c.loops)
    }

    /// Incoming degree of `ty`, loops included.
    pub fn incoming(&self, ty: TypeId) -> u32 {
        let c = self.counts(ty);
        c.incoming.saturating_add(c.loops)
    }

    /// Total degree of `ty`; loops are counted once.
    pub fn total(&self, ty: TypeId) -> u32 {
        self.counts(ty).total()
    }

    /// Total degree over every type.
    pub fn total_all(&self) -> u64 {
        self.per_type.values().map(|c| u64::from(c.total())).sum()
    }
}

impl DegreeMutator for EagerDegrees {
    fn add(&mut self, ty: TypeId, outgoing: u32, incoming: u32, loops: u32) -> bool {
        let entry = self.per_type.entry(ty).or_default();
        entry.outgoing = entry.outgoing.saturating_add(outgoing);
        entry.incoming = entry.incoming.saturating_add(incoming);
        entry.loops = entry.loops.saturating_add(loops);
        true
    }
}

/// Counts until a limit is reached, then asks the producer to stop.
///
/// Answers "does this node have at least `limit` relationships" without
/// visiting every group.
#[derive(Clone, Copy, Debug)]
pub struct BoundedDegrees {
    limit: u32,
    total: u32,
}

impl BoundedDegrees {
    /// Creates a collector that stops once `limit` relationships were counted.
    pub fn new(limit: u32) -> Self {
        Self { limit, total: 0 }
    }

    /// Relationships counted so far, possibly above the limit.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Whether the limit was reached.
    pub fn reached(&self) -> bool {
        self.total >= self.limit
    }
}

impl DegreeMutator for BoundedDegrees {
    fn add(&mut self, _ty: TypeId, outgoing: u32, incoming: u32, loops: u32) -> bool {
        self.total = self
            .total
            .saturating_add(outgoing)
            .saturating_add(incoming)
            .saturating_add(loops);
        !self.reached()
    }
}

/// Aggregate counts for group directions whose chains are too long to walk.
pub trait GroupDegreesStore: Send + Sync {
    /// Stored count for `(group, direction)`, or zero when absent.
    fn degree(&self, group: u64, direction: RelationshipDirection) -> u64;
}

/// In-memory aggregate-degree store.
#[derive(Default)]
pub struct InMemoryGroupDegrees {
    counts: RwLock<FxHashMap<(u64, RelationshipDirection), u64>>,
}

impl InMemoryGroupDegrees {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the count for `(group, direction)`.
    pub fn set(&self, group: u64, direction: RelationshipDirection, count: u64) {
        self.counts.write().insert((group, direction), count);
    }

    /// Adds `delta` to the count and returns the new value.
    pub fn increment(&self, group: u64, direction: RelationshipDirection, delta: u64) -> u64 {
        let mut counts = self.counts.write();
        let slot = counts.entry((group, direction)).or_insert(0);
        *slot = slot.saturating_add(delta);
        *slot
    }

    /// Number of tracked `(group, direction)` entries.
    pub fn len(&self) -> usize {
        self.counts.read().len()
    }

    /// Whether no counts are tracked.
    pub fn is_empty(&self) -> bool {
        self.counts.read().is_empty()
    }
}

impl GroupDegreesStore for InMemoryGroupDegrees {
    fn degree(&self, group: u64, direction: RelationshipDirection) -> u64 {
        self.counts
            .read()
            .get(&(group, direction))
            .copied()
            .unwrap_or(0)
    }
}
