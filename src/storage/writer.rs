//! Live mutations of the record stores.
//!
//! Every change runs under exclusive entity locks and is reported to the
//! registered [`UpdateListener`]s before those locks are released, so a scan
//! reading the same entity under a shared lock either sees the change or sees
//! its update queued.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::debug;

use crate::primitives::concurrency::{EntityLock, LockService, ResourceType};
use crate::types::{EdgeId, LabelId, NodeId, Result, SombraError, TypeId};

use super::degrees::RelationshipDirection;
use super::options::StoreViewOptions;
use super::record::{
    ChainLink, NodeRecord, RecordLoad, RelationshipGroupRecord, RelationshipRecord, NO_ID,
};
use super::store::{PageCursor, RecordCursorType, RecordStorage};
use super::types::{EdgeSpec, EntityType, NodeSpec, TokenSet};

/// Token change of one entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityUpdate {
    /// Entity kind.
    pub entity: EntityType,
    /// Entity id.
    pub id: u64,
    /// Tokens before the change; empty for a created entity.
    pub before: TokenSet,
    /// Tokens after the change; empty for a deleted entity.
    pub after: TokenSet,
}

/// Receives entity updates while the writer still holds the entity lock.
pub trait UpdateListener: Send + Sync {
    /// Handles one committed change.
    fn on_update(&self, update: &EntityUpdate) -> Result<()>;
}

/// Applies live changes to a [`RecordStorage`].
pub struct StoreWriter {
    storage: Arc<RecordStorage>,
    locks: Arc<dyn LockService>,
    listeners: Vec<Arc<dyn UpdateListener>>,
    external_degrees_threshold: u64,
}

struct Pages {
    nodes: PageCursor,
    relationships: PageCursor,
    groups: PageCursor,
}

/// Pending insertion of a new relationship at the head of one node's chain.
struct HeadInsert {
    node: NodeId,
    old_head: u64,
    target: ChainTarget,
}

enum ChainTarget {
    Sparse(NodeRecord),
    Group {
        group: RelationshipGroupRecord,
        direction: RelationshipDirection,
        counted_externally: bool,
        new_len: u64,
        link: Option<GroupLink>,
    },
}

/// Where a freshly created group is linked into the group chain.
enum GroupLink {
    AfterGroup(RelationshipGroupRecord),
    AtNode(NodeRecord),
}

impl StoreWriter {
    /// Creates a writer over `storage` using `locks`.
    pub fn new(
        storage: Arc<RecordStorage>,
        locks: Arc<dyn LockService>,
        options: &StoreViewOptions,
    ) -> Self {
        Self {
            storage,
            locks,
            listeners: Vec::new(),
            external_degrees_threshold: options.external_degrees_threshold,
        }
    }

    /// Registers a listener for every subsequent change.
    pub fn with_listener(mut self, listener: Arc<dyn UpdateListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Stores this writer mutates.
    pub fn storage(&self) -> &Arc<RecordStorage> {
        &self.storage
    }

    fn pages(&self) -> Pages {
        let cursors = &self.storage.cursors;
        Pages {
            nodes: cursors.read_cursor(RecordCursorType::Node),
            relationships: cursors.read_cursor(RecordCursorType::Relationship),
            groups: cursors.read_cursor(RecordCursorType::Group),
        }
    }

    fn lock_node(&self, node: NodeId) -> EntityLock<'_> {
        self.locks.acquire_exclusive(ResourceType::Node, node.0)
    }

    fn notify(&self, entity: EntityType, id: u64, before: TokenSet, after: TokenSet) -> Result<()> {
        let update = EntityUpdate {
            entity,
            id,
            before,
            after,
        };
        for listener in &self.listeners {
            listener.on_update(&update)?;
        }
        Ok(())
    }

    /// Creates a sparse node.
    pub fn create_node(&self, spec: NodeSpec) -> Result<NodeId> {
        let id = self.storage.nodes.allocate();
        let node = NodeId(id);
        let _lock = self.lock_node(node);
        let labels = sorted_labels(&spec.labels);
        self.storage.nodes.write(&NodeRecord {
            id,
            in_use: true,
            dense: false,
            next: NO_ID,
            labels: labels.iter().copied().collect(),
        })?;
        self.storage.properties.set(EntityType::Node, id, spec.props);
        self.notify(EntityType::Node, id, TokenSet::new(), label_tokens(&labels))?;
        debug!(node = id, labels = labels.len(), "writer.create_node");
        Ok(node)
    }

    /// Replaces the labels of `node`.
    pub fn set_labels(&self, node: NodeId, labels: &[LabelId]) -> Result<()> {
        let _lock = self.lock_node(node);
        let pages = self.pages();
        let mut record = NodeRecord::default();
        self.storage
            .nodes
            .read(node.0, &mut record, RecordLoad::Normal, &pages.nodes)?;
        let before = label_tokens(&record.labels);
        let labels = sorted_labels(labels);
        record.labels = labels.iter().copied().collect();
        self.storage.nodes.write(&record)?;
        self.notify(EntityType::Node, node.0, before, label_tokens(&labels))
    }

    /// Deletes a node that has no relationships.
    ///
    /// The record keeps its payload on disk with the in-use flag cleared.
    pub fn delete_node(&self, node: NodeId) -> Result<()> {
        let _lock = self.lock_node(node);
        let pages = self.pages();
        let mut record = NodeRecord::default();
        self.storage
            .nodes
            .read(node.0, &mut record, RecordLoad::Normal, &pages.nodes)?;
        if record.next != NO_ID {
            return Err(SombraError::Invalid("node still has relationships"));
        }
        let before = label_tokens(&record.labels);
        record.in_use = false;
        self.storage.nodes.write(&record)?;
        self.storage.properties.remove(EntityType::Node, node.0);
        self.notify(EntityType::Node, node.0, before, TokenSet::new())?;
        debug!(node = node.0, "writer.delete_node");
        Ok(())
    }

    /// Creates a relationship and links it at the head of its endpoints' chains.
    pub fn create_relationship(&self, spec: EdgeSpec) -> Result<EdgeId> {
        let (low, high) = if spec.src <= spec.dst {
            (spec.src, spec.dst)
        } else {
            (spec.dst, spec.src)
        };
        let _low = self.lock_node(low);
        let _high = (high != low).then(|| self.lock_node(high));
        let pages = self.pages();

        let id = self.storage.relationships.allocate();
        let _rel = self.locks.acquire_exclusive(ResourceType::Relationship, id);
        let mut rel = RelationshipRecord {
            id,
            in_use: true,
            src: spec.src,
            dst: spec.dst,
            ty: spec.ty,
            ..RelationshipRecord::default()
        };

        let mut endpoints: SmallVec<[NodeId; 2]> = SmallVec::new();
        endpoints.push(spec.src);
        if spec.dst != spec.src {
            endpoints.push(spec.dst);
        }
        let mut inserts: SmallVec<[HeadInsert; 2]> = SmallVec::new();
        for node in endpoints {
            inserts.push(self.plan_insert(node, &mut rel, &pages)?);
        }

        // The new record must exist before anything points at it.
        self.storage.relationships.write(&rel)?;
        for insert in inserts {
            self.apply_insert(insert, id, &pages)?;
        }
        self.storage
            .properties
            .set(EntityType::Relationship, id, spec.props);

        let mut after = TokenSet::new();
        after.push(spec.ty.0);
        self.notify(EntityType::Relationship, id, TokenSet::new(), after)?;
        debug!(
            rel = id,
            src = spec.src.0,
            dst = spec.dst.0,
            ty = spec.ty.0,
            "writer.create_relationship"
        );
        Ok(EdgeId(id))
    }

    fn plan_insert(
        &self,
        node: NodeId,
        rel: &mut RelationshipRecord,
        pages: &Pages,
    ) -> Result<HeadInsert> {
        let mut record = NodeRecord::default();
        self.storage
            .nodes
            .read(node.0, &mut record, RecordLoad::Normal, &pages.nodes)?;
        let Some(direction) = rel.direction_for(node) else {
            return Err(SombraError::Invalid("node is not an endpoint"));
        };

        if !record.dense {
            let old_head = record.next;
            let old_len = self.chain_len(node, old_head, pages)?;
            rel.set_prev_for(node, ChainLink::Count(old_len + 1));
            rel.set_next_for(node, old_head);
            record.next = rel.id;
            return Ok(HeadInsert {
                node,
                old_head,
                target: ChainTarget::Sparse(record),
            });
        }

        let (group, link) = self.find_or_create_group(&record, rel.ty, pages)?;
        let old_head = group.first(direction);
        let new_len = self.chain_len(node, old_head, pages)? + 1;
        rel.set_prev_for(node, ChainLink::Count(new_len));
        rel.set_next_for(node, old_head);
        let counted_externally = group.has_external_degrees(direction);
        Ok(HeadInsert {
            node,
            old_head,
            target: ChainTarget::Group {
                group,
                direction,
                counted_externally,
                new_len,
                link,
            },
        })
    }

    fn chain_len(&self, node: NodeId, head: u64, pages: &Pages) -> Result<u64> {
        if head == NO_ID {
            return Ok(0);
        }
        let mut record = RelationshipRecord::default();
        self.storage
            .relationships
            .read(head, &mut record, RecordLoad::Normal, &pages.relationships)?;
        match record.prev_for(node) {
            ChainLink::Count(len) => Ok(len),
            ChainLink::Prev(_) => Err(SombraError::Corruption(
                "chain head does not carry a count",
            )),
        }
    }

    fn find_or_create_group(
        &self,
        node: &NodeRecord,
        ty: TypeId,
        pages: &Pages,
    ) -> Result<(RelationshipGroupRecord, Option<GroupLink>)> {
        let mut predecessor: Option<RelationshipGroupRecord> = None;
        let mut current = node.next;
        let mut group = RelationshipGroupRecord::default();
        while current != NO_ID {
            self.storage
                .groups
                .read(current, &mut group, RecordLoad::Always, &pages.groups)?;
            let next = group.next;
            if group.in_use {
                if group.ty == ty {
                    return Ok((group, None));
                }
                if group.ty > ty {
                    break;
                }
                predecessor = Some(group.clone());
            }
            current = next;
        }

        let id = self.storage.groups.allocate();
        let mut created = RelationshipGroupRecord {
            id,
            in_use: true,
            ty,
            owning_node: NodeId(node.id),
            ..RelationshipGroupRecord::default()
        };
        let link = match predecessor {
            Some(mut pred) => {
                created.next = pred.next;
                pred.next = id;
                GroupLink::AfterGroup(pred)
            }
            None => {
                created.next = node.next;
                let mut owner = node.clone();
                owner.next = id;
                GroupLink::AtNode(owner)
            }
        };
        Ok((created, Some(link)))
    }

    fn apply_insert(&self, insert: HeadInsert, rel: u64, pages: &Pages) -> Result<()> {
        match insert.target {
            ChainTarget::Sparse(record) => self.storage.nodes.write(&record)?,
            ChainTarget::Group {
                mut group,
                direction,
                counted_externally,
                new_len,
                link,
            } => {
                group.set_first(direction, rel);
                if counted_externally {
                    self.storage.group_degrees.increment(group.id, direction, 1);
                } else if new_len >= self.external_degrees_threshold {
                    group.set_external_degrees(direction, true);
                    self.storage.group_degrees.set(group.id, direction, new_len);
                }
                self.storage.groups.write(&group)?;
                match link {
                    Some(GroupLink::AfterGroup(pred)) => self.storage.groups.write(&pred)?,
                    Some(GroupLink::AtNode(owner)) => self.storage.nodes.write(&owner)?,
                    None => {}
                }
            }
        }

        if insert.old_head != NO_ID {
            let mut old = RelationshipRecord::default();
            self.storage.relationships.read(
                insert.old_head,
                &mut old,
                RecordLoad::Normal,
                &pages.relationships,
            )?;
            old.set_prev_for(insert.node, ChainLink::Prev(EdgeId(rel)));
            self.storage.relationships.write(&old)?;
        }
        Ok(())
    }
}

fn sorted_labels(labels: &[LabelId]) -> Vec<LabelId> {
    let mut sorted = labels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}

fn label_tokens(labels: &[LabelId]) -> TokenSet {
    labels.iter().map(|label| label.0).collect()
}
