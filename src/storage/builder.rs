use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::types::{EdgeId, NodeId, Result, SombraError, TypeId};

use super::degrees::RelationshipDirection;
use super::options::StoreViewOptions;
use super::record::{ChainLink, NodeRecord, RelationshipGroupRecord, RelationshipRecord, NO_ID};
use super::store::RecordStorage;
use super::types::{EdgeSpec, EntityType, NodeSpec};

/// Bulk loader that lays out relationship chains in one pass.
///
/// Sparse nodes get a single chain ordered by relationship id. Nodes with at
/// least `dense_node_threshold` relationships get one group per type, in
/// ascending type order, each with its own outgoing, incoming and loop chain.
pub struct StoreBuilder {
    options: StoreViewOptions,
    nodes: Vec<NodeSpec>,
    relationships: Vec<EdgeSpec>,
}

impl StoreBuilder {
    /// Creates an empty builder.
    pub fn new(options: StoreViewOptions) -> Self {
        Self {
            options,
            nodes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Queues a node; ids are assigned in insertion order.
    pub fn add_node(&mut self, spec: NodeSpec) -> NodeId {
        self.nodes.push(spec);
        NodeId(self.nodes.len() as u64 - 1)
    }

    /// Queues a relationship; ids are assigned in insertion order.
    pub fn add_relationship(&mut self, spec: EdgeSpec) -> EdgeId {
        self.relationships.push(spec);
        EdgeId(self.relationships.len() as u64 - 1)
    }

    /// Number of queued nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Writes every queued entity into fresh stores.
    pub fn build(self) -> Result<RecordStorage> {
        let storage = RecordStorage::new();
        self.build_into(&storage)?;
        Ok(storage)
    }

    fn build_into(self, storage: &RecordStorage) -> Result<()> {
        let StoreBuilder {
            options,
            nodes,
            relationships,
        } = self;
        let node_count = nodes.len() as u64;
        let mut incident: Vec<Vec<u64>> = vec![Vec::new(); nodes.len()];
        let mut rels = Vec::with_capacity(relationships.len());
        for spec in &relationships {
            if spec.src.0 >= node_count || spec.dst.0 >= node_count {
                return Err(SombraError::Invalid(
                    "relationship endpoint is not a queued node",
                ));
            }
            let id = storage.relationships.allocate();
            incident[spec.src.0 as usize].push(id);
            if spec.dst != spec.src {
                incident[spec.dst.0 as usize].push(id);
            }
            rels.push(RelationshipRecord {
                id,
                in_use: true,
                src: spec.src,
                dst: spec.dst,
                ty: spec.ty,
                ..RelationshipRecord::default()
            });
        }

        let mut dense_nodes = 0usize;
        let mut external_chains = 0usize;
        for (index, spec) in nodes.into_iter().enumerate() {
            let id = storage.nodes.allocate();
            let node = NodeId(id);
            let chain = &incident[index];
            let dense = chain.len() >= options.dense_node_threshold;
            let next = if dense {
                dense_nodes += 1;
                let (head, external) =
                    layout_groups(&options, storage, node, chain, &mut rels)?;
                external_chains += external;
                head
            } else {
                link_chain(node, chain, &mut rels)
            };
            let mut labels = spec.labels;
            labels.sort_unstable();
            labels.dedup();
            storage.nodes.write(&NodeRecord {
                id,
                in_use: true,
                dense,
                next,
                labels: labels.into_iter().collect(),
            })?;
            storage.properties.set(EntityType::Node, id, spec.props);
        }

        for (rel, spec) in rels.iter().zip(relationships) {
            storage.relationships.write(rel)?;
            storage
                .properties
                .set(EntityType::Relationship, rel.id, spec.props);
        }

        info!(
            nodes = node_count,
            relationships = rels.len(),
            dense_nodes,
            external_chains,
            "store.build.complete"
        );
        Ok(())
    }
}

fn layout_groups(
    options: &StoreViewOptions,
    storage: &RecordStorage,
    node: NodeId,
    chain: &[u64],
    rels: &mut [RelationshipRecord],
) -> Result<(u64, usize)> {
    let mut by_type: BTreeMap<TypeId, [Vec<u64>; 3]> = BTreeMap::new();
    for &rel in chain {
        let record = &rels[rel as usize];
        let Some(direction) = record.direction_for(node) else {
            return Err(SombraError::Corruption("relationship not incident to node"));
        };
        by_type.entry(record.ty).or_default()[direction_slot(direction)].push(rel);
    }

    let mut groups = Vec::with_capacity(by_type.len());
    let mut external = 0usize;
    for (ty, chains) in by_type {
        let id = storage.groups.allocate();
        let mut group = RelationshipGroupRecord {
            id,
            in_use: true,
            ty,
            owning_node: node,
            ..RelationshipGroupRecord::default()
        };
        for direction in RelationshipDirection::ALL {
            let members = &chains[direction_slot(direction)];
            group.set_first(direction, link_chain(node, members, rels));
            let len = members.len() as u64;
            if len >= options.external_degrees_threshold {
                group.set_external_degrees(direction, true);
                storage.group_degrees.set(id, direction, len);
                external += 1;
            }
        }
        groups.push(group);
    }
    for index in 1..groups.len() {
        groups[index - 1].next = groups[index].id;
    }
    for group in &groups {
        storage.groups.write(group)?;
    }
    debug!(
        node = node.0,
        groups = groups.len(),
        relationships = chain.len(),
        "store.build.dense_node"
    );
    Ok((groups.first().map_or(NO_ID, |g| g.id), external))
}

fn direction_slot(direction: RelationshipDirection) -> usize {
    match direction {
        RelationshipDirection::Outgoing => 0,
        RelationshipDirection::Incoming => 1,
        RelationshipDirection::Loop => 2,
    }
}

/// Links `members` into one chain for `node`; returns the head or [`NO_ID`].
fn link_chain(node: NodeId, members: &[u64], rels: &mut [RelationshipRecord]) -> u64 {
    let mut ordered = members.to_vec();
    ordered.sort_unstable();
    for (pos, &rel) in ordered.iter().enumerate() {
        let prev = if pos == 0 {
            ChainLink::Count(ordered.len() as u64)
        } else {
            ChainLink::Prev(EdgeId(ordered[pos - 1]))
        };
        let next = ordered.get(pos + 1).copied().unwrap_or(NO_ID);
        let record = &mut rels[rel as usize];
        record.set_prev_for(node, prev);
        record.set_next_for(node, next);
    }
    ordered.first().copied().unwrap_or(NO_ID)
}
