//! Cursor over the relationship groups of a dense node.
//!
//! A dense node keeps one group record per relationship type, each holding the
//! heads of its outgoing, incoming and loop chains. Degrees are answered per
//! group without walking chains: the head relationship's previous slot carries
//! the chain length, and very long chains keep their count in the
//! aggregate-degree store instead.

use tracing::trace;

use crate::types::{safe_cast_u64_to_u32, NodeId, Result, SombraError, TypeId};

use super::degrees::{DegreeMutator, GroupDegreesStore, RelationshipDirection, RelationshipSelection};
use super::record::{ChainLink, RecordLoad, RelationshipGroupRecord, RelationshipRecord, NO_ID};
use super::options::StoreViewOptions;
use super::store::{PageCursor, RecordCursorType, RecordStorage};

/// Iterates the in-use groups of one node and counts their degrees.
pub struct RelationshipGroupCursor<'s> {
    storage: &'s RecordStorage,
    load: RecordLoad,
    node: NodeId,
    next: u64,
    group: RelationshipGroupRecord,
    edge: RelationshipRecord,
    group_page: Option<PageCursor>,
    edge_page: Option<PageCursor>,
}

impl<'s> RelationshipGroupCursor<'s> {
    /// Creates an unbound cursor that force-loads records.
    pub fn new(storage: &'s RecordStorage) -> Self {
        Self::with_load(storage, RecordLoad::Always)
    }

    /// Creates an unbound cursor using the configured load mode.
    pub fn from_options(storage: &'s RecordStorage, options: &StoreViewOptions) -> Self {
        Self::with_load(storage, options.record_load)
    }

    /// Creates an unbound cursor reading with `load`.
    pub fn with_load(storage: &'s RecordStorage, load: RecordLoad) -> Self {
        Self {
            storage,
            load,
            node: NodeId(NO_ID),
            next: NO_ID,
            group: RelationshipGroupRecord::default(),
            edge: RelationshipRecord::default(),
            group_page: None,
            edge_page: None,
        }
    }

    /// Binds the cursor to the group chain starting at `reference`.
    ///
    /// A sparse node with no reference yields no groups. A sparse node with a
    /// reference, or a dense node without one, is rejected.
    pub fn init(&mut self, node: NodeId, reference: u64, dense: bool) -> Result<()> {
        if reference != NO_ID && !dense {
            return Err(SombraError::Unsupported(
                "grouped traversal of a node that is not dense",
            ));
        }
        if reference == NO_ID && dense {
            return Err(SombraError::Invalid("dense node without a group reference"));
        }
        self.node = node;
        self.next = reference;
        self.group = RelationshipGroupRecord::default();
        if self.group_page.is_none() {
            self.group_page = Some(self.storage.cursors.read_cursor(RecordCursorType::Group));
        }
        Ok(())
    }

    /// Advances to the next in-use group; returns `false` at the end of the chain.
    ///
    /// Groups flagged not in use are read and skipped.
    pub fn next(&mut self) -> Result<bool> {
        loop {
            if self.next == NO_ID {
                self.group = RelationshipGroupRecord::default();
                return Ok(false);
            }
            let page = self
                .group_page
                .get_or_insert_with(|| self.storage.cursors.read_cursor(RecordCursorType::Group));
            let id = self.next;
            self.storage.groups.read(id, &mut self.group, self.load, page)?;
            self.next = self.group.next;
            if self.group.in_use {
                return Ok(true);
            }
            trace!(group = id, node = self.node.0, "group_cursor.skip_unused");
        }
    }

    /// Node the cursor is bound to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Id of the current group.
    pub fn group_id(&self) -> u64 {
        self.group.id
    }

    /// Relationship type of the current group.
    pub fn group_type(&self) -> TypeId {
        self.group.ty
    }

    /// Current group record.
    pub fn group(&self) -> &RelationshipGroupRecord {
        &self.group
    }

    /// Head of the current group's chain in `direction`, or [`NO_ID`].
    pub fn first(&self, direction: RelationshipDirection) -> u64 {
        self.group.first(direction)
    }

    /// Feeds the current group's counts into `mutator`.
    ///
    /// Returns `false` when the mutator asked to stop.
    pub fn degree(
        &mut self,
        mutator: &mut dyn DegreeMutator,
        selection: &RelationshipSelection,
    ) -> Result<bool> {
        if !selection.test_type(self.group.ty) {
            return Ok(true);
        }
        for direction in RelationshipDirection::ALL {
            if !self.count(direction, mutator, selection)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn count(
        &mut self,
        direction: RelationshipDirection,
        mutator: &mut dyn DegreeMutator,
        selection: &RelationshipSelection,
    ) -> Result<bool> {
        let head = self.group.first(direction);
        if head == NO_ID || !selection.test_direction(direction) {
            return Ok(true);
        }

        // A head pointer proves at least one relationship.
        if !self.add(direction, mutator, 1) {
            return Ok(false);
        }

        let count = if self.group.has_external_degrees(direction) {
            safe_cast_u64_to_u32(self.storage.group_degrees.degree(self.group.id, direction))?
        } else {
            let page = self.edge_page.get_or_insert_with(|| {
                self.storage
                    .cursors
                    .read_cursor(RecordCursorType::Relationship)
            });
            self.storage
                .relationships
                .read(head, &mut self.edge, self.load, page)?;
            match self.edge.prev_for(self.node) {
                ChainLink::Count(len) => safe_cast_u64_to_u32(len)?,
                // Head was displaced by a concurrent insert; the pointer still proves one.
                ChainLink::Prev(_) => 1,
            }
        };
        Ok(self.add(direction, mutator, count.saturating_sub(1)))
    }

    fn add(&self, direction: RelationshipDirection, mutator: &mut dyn DegreeMutator, count: u32) -> bool {
        let ty = self.group.ty;
        match direction {
            RelationshipDirection::Outgoing => mutator.add(ty, count, 0, 0),
            RelationshipDirection::Incoming => mutator.add(ty, 0, count, 0),
            RelationshipDirection::Loop => mutator.add(ty, 0, 0, count),
        }
    }

    /// Record cursors hold page handles and cannot be duplicated.
    pub fn copy(&self) -> Result<RelationshipGroupRecord> {
        Err(SombraError::Unsupported("record cursors are not copyable"))
    }

    /// Releases page handles and unbinds the cursor. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.group_page = None;
        self.edge_page = None;
        self.next = NO_ID;
        self.node = NodeId(NO_ID);
        self.group = RelationshipGroupRecord::default();
    }
}
