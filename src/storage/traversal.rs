use tracing::trace;

use crate::types::{NodeId, Result, SombraError};

use super::degrees::{DegreeMutator, RelationshipDirection, RelationshipSelection};
use super::group_cursor::RelationshipGroupCursor;
use super::options::StoreViewOptions;
use super::record::{NodeRecord, RecordLoad, RelationshipRecord, NO_ID};
use super::store::{PageCursor, RecordCursorType, RecordStorage};

/// Read-side entry point for per-node queries.
pub struct StorageReader<'s> {
    storage: &'s RecordStorage,
    node: NodeRecord,
    edge: RelationshipRecord,
    node_page: Option<PageCursor>,
    edge_page: Option<PageCursor>,
    groups: RelationshipGroupCursor<'s>,
}

impl<'s> StorageReader<'s> {
    /// Creates a reader whose group cursor force-loads records.
    pub fn new(storage: &'s RecordStorage) -> Self {
        Self::with_load(storage, RecordLoad::Always)
    }

    /// Creates a reader whose group cursor uses the configured load mode.
    pub fn from_options(storage: &'s RecordStorage, options: &StoreViewOptions) -> Self {
        Self::with_load(storage, options.record_load)
    }

    /// Creates a reader whose group cursor reads with `load`.
    pub fn with_load(storage: &'s RecordStorage, load: RecordLoad) -> Self {
        Self {
            storage,
            node: NodeRecord::default(),
            edge: RelationshipRecord::default(),
            node_page: None,
            edge_page: None,
            groups: RelationshipGroupCursor::with_load(storage, load),
        }
    }

    /// Reads the in-use node record `node`.
    pub fn node(&mut self, node: NodeId) -> Result<&NodeRecord> {
        let page = self
            .node_page
            .get_or_insert_with(|| self.storage.cursors.read_cursor(RecordCursorType::Node));
        self.storage
            .nodes
            .read(node.0, &mut self.node, RecordLoad::Normal, page)?;
        Ok(&self.node)
    }

    /// Feeds the degrees of `node` matching `selection` into `mutator`.
    ///
    /// Dense nodes are answered per group; sparse nodes walk their single chain.
    pub fn degrees(
        &mut self,
        node: NodeId,
        selection: &RelationshipSelection,
        mutator: &mut dyn DegreeMutator,
    ) -> Result<()> {
        let (dense, next) = {
            let record = self.node(node)?;
            (record.dense, record.next)
        };
        if dense {
            self.groups.init(node, next, true)?;
            while self.groups.next()? {
                if !self.groups.degree(mutator, selection)? {
                    break;
                }
            }
            return Ok(());
        }
        self.walk_chain(node, next, selection, mutator)
    }

    fn walk_chain(
        &mut self,
        node: NodeId,
        head: u64,
        selection: &RelationshipSelection,
        mutator: &mut dyn DegreeMutator,
    ) -> Result<()> {
        let page = self.edge_page.get_or_insert_with(|| {
            self.storage
                .cursors
                .read_cursor(RecordCursorType::Relationship)
        });
        let limit = self.storage.relationships.high_id();
        let mut steps = 0u64;
        let mut current = head;
        while current != NO_ID {
            steps += 1;
            if steps > limit {
                return Err(SombraError::Corruption("relationship chain does not terminate"));
            }
            self.storage
                .relationships
                .read(current, &mut self.edge, RecordLoad::Always, page)?;
            let Some(direction) = self.edge.direction_for(node) else {
                return Err(SombraError::Corruption(
                    "relationship chain visits a foreign relationship",
                ));
            };
            let next = self.edge.next_for(node);
            if self.edge.in_use
                && selection.test_type(self.edge.ty)
                && selection.test_direction(direction)
            {
                let keep_going = match direction {
                    RelationshipDirection::Outgoing => mutator.add(self.edge.ty, 1, 0, 0),
                    RelationshipDirection::Incoming => mutator.add(self.edge.ty, 0, 1, 0),
                    RelationshipDirection::Loop => mutator.add(self.edge.ty, 0, 0, 1),
                };
                if !keep_going {
                    break;
                }
            } else if !self.edge.in_use {
                trace!(node = node.0, rel = current, "chain_walk.skip_unused");
            }
            current = next;
        }
        Ok(())
    }

    /// Releases every page cursor held by the reader.
    pub fn close(&mut self) {
        self.node_page = None;
        self.edge_page = None;
        self.groups.close();
    }
}
