//! Fixed-size record formats for the node, relationship and group stores.
//!
//! Every record starts with a flag byte whose lowest bit is the in-use flag.
//! Integers are big-endian. Absent references are encoded as [`NO_ID`].

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{EdgeId, LabelId, NodeId, Result, SombraError, TypeId};

use super::degrees::RelationshipDirection;
use super::store::RecordCursorType;

/// Sentinel for an absent record reference.
pub const NO_ID: u64 = u64::MAX;

/// Maximum number of labels stored inline in a node record.
pub const MAX_INLINE_LABELS: usize = 7;

const FLAG_IN_USE: u8 = 0x01;
/// Set by the store on every write so never-written slots can be told apart.
pub(crate) const FLAG_WRITTEN: u8 = 0x80;

/// How a record read treats records whose in-use flag is cleared.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordLoad {
    /// Fail with [`SombraError::NotFound`] when the record is not in use.
    Normal,
    /// Return the record flagged not-in-use with a cleared payload.
    Check,
    /// Decode the payload even when the record is not in use.
    #[default]
    Always,
}

/// Byte layout of one record kind.
pub trait RecordFormat: Default + Clone + Send + Sync {
    /// Encoded size in bytes.
    const SIZE: usize;
    /// Store name used in errors and log events.
    const NAME: &'static str;
    /// Cursor kind that may read this store.
    const CURSOR: RecordCursorType;

    /// Record id.
    fn id(&self) -> u64;
    /// Sets the record id.
    fn set_id(&mut self, id: u64);
    /// Whether the record is in use.
    fn in_use(&self) -> bool;
    /// Resets the payload and clears the in-use flag, keeping the id.
    fn clear(&mut self);
    /// Encodes into `dst`, which is exactly [`RecordFormat::SIZE`] bytes.
    fn encode(&self, dst: &mut [u8]) -> Result<()>;
    /// Decodes the payload from `src`, including the in-use flag.
    fn decode(&mut self, src: &[u8]) -> Result<()>;
}

/// Reads the in-use flag of an encoded record without decoding it.
pub fn encoded_in_use(src: &[u8]) -> bool {
    src.first().is_some_and(|flags| flags & FLAG_IN_USE != 0)
}

pub(crate) fn encoded_written(src: &[u8]) -> bool {
    src.first().is_some_and(|flags| flags & FLAG_WRITTEN != 0)
}

/// Previous-relationship slot of a chain element for one endpoint.
///
/// The head of a chain has no predecessor, so its slot holds the chain length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainLink {
    /// Points at the previous relationship in the chain.
    Prev(EdgeId),
    /// Head of the chain; carries the total chain length.
    Count(u64),
}

impl Default for ChainLink {
    fn default() -> Self {
        ChainLink::Count(0)
    }
}

impl ChainLink {
    fn from_raw(raw: u64, first_in_chain: bool) -> Self {
        if first_in_chain {
            ChainLink::Count(raw)
        } else {
            ChainLink::Prev(EdgeId(raw))
        }
    }

    fn to_raw(self) -> (u64, bool) {
        match self {
            ChainLink::Prev(edge) => (edge.0, false),
            ChainLink::Count(count) => (count, true),
        }
    }

    /// Whether this slot marks the head of its chain.
    pub fn is_head(self) -> bool {
        matches!(self, ChainLink::Count(_))
    }
}

/// Node record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeRecord {
    /// Node id.
    pub id: u64,
    /// In-use flag.
    pub in_use: bool,
    /// Whether relationships are stored as per-type groups.
    pub dense: bool,
    /// First relationship, or first group when dense.
    pub next: u64,
    /// Labels, sorted ascending.
    pub labels: SmallVec<[LabelId; MAX_INLINE_LABELS]>,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            id: NO_ID,
            in_use: false,
            dense: false,
            next: NO_ID,
            labels: SmallVec::new(),
        }
    }
}

const NODE_FLAG_DENSE: u8 = 0x02;

impl RecordFormat for NodeRecord {
    const SIZE: usize = 1 + 8 + 1 + 4 * MAX_INLINE_LABELS;
    const NAME: &'static str = "node";
    const CURSOR: RecordCursorType = RecordCursorType::Node;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn clear(&mut self) {
        let id = self.id;
        *self = Self::default();
        self.id = id;
    }

    fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if self.labels.len() > MAX_INLINE_LABELS {
            return Err(SombraError::Invalid(
                "node has more labels than a record can hold inline",
            ));
        }
        dst.fill(0);
        let mut flags = 0u8;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.dense {
            flags |= NODE_FLAG_DENSE;
        }
        dst[0] = flags;
        dst[1..9].copy_from_slice(&self.next.to_be_bytes());
        dst[9] = self.labels.len() as u8;
        for (slot, label) in self.labels.iter().enumerate() {
            let offset = 10 + slot * 4;
            dst[offset..offset + 4].copy_from_slice(&label.0.to_be_bytes());
        }
        Ok(())
    }

    fn decode(&mut self, src: &[u8]) -> Result<()> {
        if src.len() < Self::SIZE {
            return Err(SombraError::Corruption("node record truncated"));
        }
        self.in_use = src[0] & FLAG_IN_USE != 0;
        self.dense = src[0] & NODE_FLAG_DENSE != 0;
        self.next = u64_from_be(&src[1..9]);
        let count = src[9] as usize;
        if count > MAX_INLINE_LABELS {
            return Err(SombraError::Corruption("node label count out of range"));
        }
        self.labels.clear();
        for slot in 0..count {
            let offset = 10 + slot * 4;
            self.labels.push(LabelId(u32_from_be(&src[offset..offset + 4])));
        }
        Ok(())
    }
}

/// Relationship record; a member of one chain per endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationshipRecord {
    /// Relationship id.
    pub id: u64,
    /// In-use flag.
    pub in_use: bool,
    /// Source node.
    pub src: NodeId,
    /// Destination node.
    pub dst: NodeId,
    /// Relationship type.
    pub ty: TypeId,
    /// Previous slot in the source node's chain.
    pub src_prev: ChainLink,
    /// Next relationship in the source node's chain.
    pub src_next: u64,
    /// Previous slot in the destination node's chain.
    pub dst_prev: ChainLink,
    /// Next relationship in the destination node's chain.
    pub dst_next: u64,
}

impl Default for RelationshipRecord {
    fn default() -> Self {
        Self {
            id: NO_ID,
            in_use: false,
            src: NodeId(NO_ID),
            dst: NodeId(NO_ID),
            ty: TypeId(0),
            src_prev: ChainLink::default(),
            src_next: NO_ID,
            dst_prev: ChainLink::default(),
            dst_next: NO_ID,
        }
    }
}

const REL_FLAG_SRC_FIRST: u8 = 0x02;
const REL_FLAG_DST_FIRST: u8 = 0x04;

impl RelationshipRecord {
    /// Whether both endpoints are the same node.
    pub fn is_loop(&self) -> bool {
        self.src == self.dst
    }

    /// Previous slot of the chain belonging to `node`.
    pub fn prev_for(&self, node: NodeId) -> ChainLink {
        if self.src == node {
            self.src_prev
        } else {
            self.dst_prev
        }
    }

    /// Next relationship in the chain belonging to `node`.
    pub fn next_for(&self, node: NodeId) -> u64 {
        if self.src == node {
            self.src_next
        } else {
            self.dst_next
        }
    }

    /// Updates the previous slot for `node`; loops keep both sides in step.
    pub fn set_prev_for(&mut self, node: NodeId, link: ChainLink) {
        if self.src == node {
            self.src_prev = link;
        }
        if self.dst == node {
            self.dst_prev = link;
        }
    }

    /// Updates the next pointer for `node`; loops keep both sides in step.
    pub fn set_next_for(&mut self, node: NodeId, next: u64) {
        if self.src == node {
            self.src_next = next;
        }
        if self.dst == node {
            self.dst_next = next;
        }
    }

    /// Direction of this relationship as seen from `node`.
    pub fn direction_for(&self, node: NodeId) -> Option<RelationshipDirection> {
        if self.src == node && self.dst == node {
            Some(RelationshipDirection::Loop)
        } else if self.src == node {
            Some(RelationshipDirection::Outgoing)
        } else if self.dst == node {
            Some(RelationshipDirection::Incoming)
        } else {
            None
        }
    }
}

impl RecordFormat for RelationshipRecord {
    const SIZE: usize = 1 + 8 + 8 + 4 + 8 * 4;
    const NAME: &'static str = "relationship";
    const CURSOR: RecordCursorType = RecordCursorType::Relationship;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn clear(&mut self) {
        let id = self.id;
        *self = Self::default();
        self.id = id;
    }

    fn encode(&self, dst: &mut [u8]) -> Result<()> {
        let (src_prev, src_first) = self.src_prev.to_raw();
        let (dst_prev, dst_first) = self.dst_prev.to_raw();
        let mut flags = 0u8;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if src_first {
            flags |= REL_FLAG_SRC_FIRST;
        }
        if dst_first {
            flags |= REL_FLAG_DST_FIRST;
        }
        dst[0] = flags;
        dst[1..9].copy_from_slice(&self.src.0.to_be_bytes());
        dst[9..17].copy_from_slice(&self.dst.0.to_be_bytes());
        dst[17..21].copy_from_slice(&self.ty.0.to_be_bytes());
        dst[21..29].copy_from_slice(&src_prev.to_be_bytes());
        dst[29..37].copy_from_slice(&self.src_next.to_be_bytes());
        dst[37..45].copy_from_slice(&dst_prev.to_be_bytes());
        dst[45..53].copy_from_slice(&self.dst_next.to_be_bytes());
        Ok(())
    }

    fn decode(&mut self, src: &[u8]) -> Result<()> {
        if src.len() < Self::SIZE {
            return Err(SombraError::Corruption("relationship record truncated"));
        }
        let flags = src[0];
        self.in_use = flags & FLAG_IN_USE != 0;
        self.src = NodeId(u64_from_be(&src[1..9]));
        self.dst = NodeId(u64_from_be(&src[9..17]));
        self.ty = TypeId(u32_from_be(&src[17..21]));
        self.src_prev =
            ChainLink::from_raw(u64_from_be(&src[21..29]), flags & REL_FLAG_SRC_FIRST != 0);
        self.src_next = u64_from_be(&src[29..37]);
        self.dst_prev =
            ChainLink::from_raw(u64_from_be(&src[37..45]), flags & REL_FLAG_DST_FIRST != 0);
        self.dst_next = u64_from_be(&src[45..53]);
        Ok(())
    }
}

/// Per-(node, type) group record of a dense node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationshipGroupRecord {
    /// Group id.
    pub id: u64,
    /// In-use flag.
    pub in_use: bool,
    /// Relationship type of every chain in this group.
    pub ty: TypeId,
    /// Node owning the group.
    pub owning_node: NodeId,
    /// Next group of the same node.
    pub next: u64,
    /// Head of the outgoing chain.
    pub first_out: u64,
    /// Head of the incoming chain.
    pub first_in: u64,
    /// Head of the loop chain.
    pub first_loop: u64,
    /// Outgoing count is kept in the aggregate-degree store.
    pub external_degrees_out: bool,
    /// Incoming count is kept in the aggregate-degree store.
    pub external_degrees_in: bool,
    /// Loop count is kept in the aggregate-degree store.
    pub external_degrees_loop: bool,
}

impl Default for RelationshipGroupRecord {
    fn default() -> Self {
        Self {
            id: NO_ID,
            in_use: false,
            ty: TypeId(0),
            owning_node: NodeId(NO_ID),
            next: NO_ID,
            first_out: NO_ID,
            first_in: NO_ID,
            first_loop: NO_ID,
            external_degrees_out: false,
            external_degrees_in: false,
            external_degrees_loop: false,
        }
    }
}

const GROUP_FLAG_EXT_OUT: u8 = 0x02;
const GROUP_FLAG_EXT_IN: u8 = 0x04;
const GROUP_FLAG_EXT_LOOP: u8 = 0x08;

impl RelationshipGroupRecord {
    /// Head of the chain for `direction`.
    pub fn first(&self, direction: RelationshipDirection) -> u64 {
        match direction {
            RelationshipDirection::Outgoing => self.first_out,
            RelationshipDirection::Incoming => self.first_in,
            RelationshipDirection::Loop => self.first_loop,
        }
    }

    /// Sets the head of the chain for `direction`.
    pub fn set_first(&mut self, direction: RelationshipDirection, head: u64) {
        match direction {
            RelationshipDirection::Outgoing => self.first_out = head,
            RelationshipDirection::Incoming => self.first_in = head,
            RelationshipDirection::Loop => self.first_loop = head,
        }
    }

    /// Whether the count for `direction` lives in the aggregate-degree store.
    pub fn has_external_degrees(&self, direction: RelationshipDirection) -> bool {
        match direction {
            RelationshipDirection::Outgoing => self.external_degrees_out,
            RelationshipDirection::Incoming => self.external_degrees_in,
            RelationshipDirection::Loop => self.external_degrees_loop,
        }
    }

    /// Sets the external-degree flag for `direction`.
    pub fn set_external_degrees(&mut self, direction: RelationshipDirection, external: bool) {
        match direction {
            RelationshipDirection::Outgoing => self.external_degrees_out = external,
            RelationshipDirection::Incoming => self.external_degrees_in = external,
            RelationshipDirection::Loop => self.external_degrees_loop = external,
        }
    }
}

impl RecordFormat for RelationshipGroupRecord {
    const SIZE: usize = 1 + 4 + 8 * 5;
    const NAME: &'static str = "relationship_group";
    const CURSOR: RecordCursorType = RecordCursorType::Group;

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn clear(&mut self) {
        let id = self.id;
        *self = Self::default();
        self.id = id;
    }

    fn encode(&self, dst: &mut [u8]) -> Result<()> {
        let mut flags = 0u8;
        if self.in_use {
            flags |= FLAG_IN_USE;
        }
        if self.external_degrees_out {
            flags |= GROUP_FLAG_EXT_OUT;
        }
        if self.external_degrees_in {
            flags |= GROUP_FLAG_EXT_IN;
        }
        if self.external_degrees_loop {
            flags |= GROUP_FLAG_EXT_LOOP;
        }
        dst[0] = flags;
        dst[1..5].copy_from_slice(&self.ty.0.to_be_bytes());
        dst[5..13].copy_from_slice(&self.owning_node.0.to_be_bytes());
        dst[13..21].copy_from_slice(&self.next.to_be_bytes());
        dst[21..29].copy_from_slice(&self.first_out.to_be_bytes());
        dst[29..37].copy_from_slice(&self.first_in.to_be_bytes());
        dst[37..45].copy_from_slice(&self.first_loop.to_be_bytes());
        Ok(())
    }

    fn decode(&mut self, src: &[u8]) -> Result<()> {
        if src.len() < Self::SIZE {
            return Err(SombraError::Corruption("group record truncated"));
        }
        let flags = src[0];
        self.in_use = flags & FLAG_IN_USE != 0;
        self.external_degrees_out = flags & GROUP_FLAG_EXT_OUT != 0;
        self.external_degrees_in = flags & GROUP_FLAG_EXT_IN != 0;
        self.external_degrees_loop = flags & GROUP_FLAG_EXT_LOOP != 0;
        self.ty = TypeId(u32_from_be(&src[1..5]));
        self.owning_node = NodeId(u64_from_be(&src[5..13]));
        self.next = u64_from_be(&src[13..21]);
        self.first_out = u64_from_be(&src[21..29]);
        self.first_in = u64_from_be(&src[29..37]);
        self.first_loop = u64_from_be(&src[37..45]);
        Ok(())
    }
}

fn u64_from_be(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}

fn u32_from_be(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(arr)
}
