use std::fmt;

use smallvec::SmallVec;

use crate::primitives::concurrency::ResourceType;
use crate::types::{LabelId, NodeId, PropId, TypeId};

/// Kind of entity a scan or index covers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntityType {
    /// Nodes, classified by label.
    Node,
    /// Relationships, classified by relationship type.
    Relationship,
}

impl EntityType {
    /// Lock resource guarding records of this entity type.
    pub fn resource(self) -> ResourceType {
        match self {
            EntityType::Node => ResourceType::Node,
            EntityType::Relationship => ResourceType::Relationship,
        }
    }

    /// Short name used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Node => "node",
            EntityType::Relationship => "relationship",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token ids attached to one entity; labels for nodes, the type for relationships.
pub type TokenSet = SmallVec<[u32; 4]>;

/// Property value with owned data.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValueOwned {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// Owned string.
    Str(String),
    /// Owned byte vector.
    Bytes(Vec<u8>),
}

impl fmt::Display for PropValueOwned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValueOwned::Null => write!(f, "null"),
            PropValueOwned::Bool(v) => write!(f, "{v}"),
            PropValueOwned::Int(v) => write!(f, "{v}"),
            PropValueOwned::Float(v) => write!(f, "{v}"),
            PropValueOwned::Str(v) => write!(f, "{v}"),
            PropValueOwned::Bytes(v) => write!(f, "bytes(len={})", v.len()),
        }
    }
}

/// Specification for creating a node.
#[derive(Clone, Debug, Default)]
pub struct NodeSpec {
    /// Labels to assign to the node.
    pub labels: Vec<LabelId>,
    /// Properties to set on the node.
    pub props: Vec<(PropId, PropValueOwned)>,
}

impl NodeSpec {
    /// Creates a node spec carrying only labels.
    pub fn with_labels(labels: &[LabelId]) -> Self {
        Self {
            labels: labels.to_vec(),
            props: Vec::new(),
        }
    }
}

/// Specification for creating a relationship.
#[derive(Clone, Debug)]
pub struct EdgeSpec {
    /// Source node ID.
    pub src: NodeId,
    /// Destination node ID.
    pub dst: NodeId,
    /// Relationship type ID.
    pub ty: TypeId,
    /// Relationship properties.
    pub props: Vec<(PropId, PropValueOwned)>,
}

impl EdgeSpec {
    /// Creates a relationship spec without properties.
    pub fn new(src: NodeId, ty: TypeId, dst: NodeId) -> Self {
        Self {
            src,
            dst,
            ty,
            props: Vec::new(),
        }
    }
}
