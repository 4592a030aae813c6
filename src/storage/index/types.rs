use std::fmt;

use crate::storage::types::EntityType;
use crate::types::{IndexId, Result, SombraError};

/// Kind of secondary index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexKind {
    /// Maps label or relationship-type tokens to entity ids.
    TokenLookup,
}

/// Lifecycle state of an index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexState {
    /// Created and being filled by a population scan.
    Populating,
    /// Fully populated and maintained by live updates.
    Online,
    /// Population failed; the index holds no usable content.
    Failed,
    /// Dropped; terminal.
    Dropped,
}

impl IndexState {
    /// Short name used in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Populating => "populating",
            IndexState::Online => "online",
            IndexState::Failed => "failed",
            IndexState::Dropped => "dropped",
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of an index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexDescriptor {
    /// Index id.
    pub id: IndexId,
    /// User-facing name.
    pub name: String,
    /// Entity kind the index covers.
    pub entity: EntityType,
    /// Index kind.
    pub kind: IndexKind,
}

/// Streaming interface over sorted, unique entity ids.
pub trait EntityIdStream {
    /// Pushes up to `max` identifiers into `out`, returning `true` when additional
    /// data remains and `false` once the stream is exhausted.
    fn next_batch(&mut self, out: &mut Vec<u64>, max: usize) -> Result<bool>;

    /// Convenience helper to fetch the next identifier, if any.
    fn next(&mut self) -> Result<Option<u64>> {
        let mut buf = Vec::with_capacity(1);
        loop {
            buf.clear();
            let has_more = self.next_batch(&mut buf, 1)?;
            if let Some(id) = buf.pop() {
                return Ok(Some(id));
            }
            if !has_more {
                return Ok(None);
            }
        }
    }
}

/// Adapter over an owned, sorted vector of ids.
pub struct VecIdStream {
    ids: Vec<u64>,
    pos: usize,
}

impl VecIdStream {
    /// Wraps `ids`, which must be sorted and unique.
    pub fn new(ids: Vec<u64>) -> Self {
        Self { ids, pos: 0 }
    }
}

impl EntityIdStream for VecIdStream {
    fn next_batch(&mut self, out: &mut Vec<u64>, max: usize) -> Result<bool> {
        if max == 0 {
            return Ok(self.pos < self.ids.len());
        }
        let remaining = self.ids.len().saturating_sub(self.pos);
        if remaining == 0 {
            return Ok(false);
        }
        let take = remaining.min(max);
        out.extend_from_slice(&self.ids[self.pos..self.pos + take]);
        self.pos += take;
        Ok(self.pos < self.ids.len())
    }
}

/// Drains an entire stream into `out`, appending in sorted order.
pub fn collect_all(stream: &mut dyn EntityIdStream, out: &mut Vec<u64>) -> Result<()> {
    const DEFAULT_BATCH: usize = 256;
    let mut batch = Vec::with_capacity(DEFAULT_BATCH);
    loop {
        batch.clear();
        let has_more = stream.next_batch(&mut batch, DEFAULT_BATCH)?;
        if batch.is_empty() {
            if !has_more {
                break;
            }
            return Err(SombraError::Corruption(
                "id stream yielded empty batch while reporting more data",
            ));
        }
        out.extend_from_slice(&batch);
        if !has_more {
            break;
        }
    }
    Ok(())
}

/// Sorted, de-duplicated union of several sorted streams.
///
/// Keeps one head per input and emits the minimum, advancing every input that
/// shares it.
pub struct UnionStream<'a> {
    inputs: Vec<Box<dyn EntityIdStream + 'a>>,
    heads: Vec<Option<u64>>,
    primed: bool,
}

impl<'a> UnionStream<'a> {
    /// Creates a union over `inputs`.
    pub fn new(inputs: Vec<Box<dyn EntityIdStream + 'a>>) -> Self {
        let heads = vec![None; inputs.len()];
        Self {
            inputs,
            heads,
            primed: false,
        }
    }

    fn prime(&mut self) -> Result<()> {
        if !self.primed {
            for (head, input) in self.heads.iter_mut().zip(self.inputs.iter_mut()) {
                *head = input.next()?;
            }
            self.primed = true;
        }
        Ok(())
    }
}

impl EntityIdStream for UnionStream<'_> {
    fn next_batch(&mut self, out: &mut Vec<u64>, max: usize) -> Result<bool> {
        self.prime()?;
        let mut produced = 0;
        while produced < max {
            let Some(min) = self.heads.iter().flatten().copied().min() else {
                return Ok(false);
            };
            out.push(min);
            produced += 1;
            for (head, input) in self.heads.iter_mut().zip(self.inputs.iter_mut()) {
                if *head == Some(min) {
                    *head = input.next()?;
                }
            }
        }
        Ok(self.heads.iter().any(Option::is_some))
    }
}
