//! Paged fixed-size record stores and the cursors that read them.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::{PropId, Result, SombraError};

use super::degrees::InMemoryGroupDegrees;
use super::record::{
    encoded_in_use, encoded_written, NodeRecord, RecordFormat, RecordLoad,
    RelationshipGroupRecord, RelationshipRecord, FLAG_WRITTEN,
};
use super::types::{EntityType, PropValueOwned};

/// Bytes per store page.
pub const PAGE_SIZE: usize = 8192;

/// Store a cursor is opened against.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RecordCursorType {
    /// Node store.
    Node,
    /// Relationship store.
    Relationship,
    /// Relationship group store.
    Group,
}

/// Hands out page cursors and tracks how many are open.
#[derive(Default)]
pub struct StoreCursors {
    open: Arc<AtomicUsize>,
}

impl StoreCursors {
    /// Creates a factory with no open cursors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a read cursor over the store of `kind`.
    pub fn read_cursor(&self, kind: RecordCursorType) -> PageCursor {
        self.open.fetch_add(1, Ordering::AcqRel);
        PageCursor {
            kind,
            open: Arc::clone(&self.open),
        }
    }

    /// Number of cursors currently open.
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}

/// Positionable read handle over one record store; released on drop.
#[derive(Debug)]
pub struct PageCursor {
    kind: RecordCursorType,
    open: Arc<AtomicUsize>,
}

impl PageCursor {
    /// Store this cursor reads.
    pub fn kind(&self) -> RecordCursorType {
        self.kind
    }
}

impl Drop for PageCursor {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Store of fixed-size records laid out in pages.
///
/// Ids are dense and never reused. Writes overwrite the record in place.
pub struct RecordStore<R: RecordFormat> {
    pages: RwLock<Vec<Box<[u8]>>>,
    high_id: AtomicU64,
    _format: PhantomData<fn() -> R>,
}

impl<R: RecordFormat> Default for RecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RecordFormat> RecordStore<R> {
    const PER_PAGE: usize = PAGE_SIZE / R::SIZE;

    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(Vec::new()),
            high_id: AtomicU64::new(0),
            _format: PhantomData,
        }
    }

    /// One past the highest allocated id.
    pub fn high_id(&self) -> u64 {
        self.high_id.load(Ordering::Acquire)
    }

    /// Reserves the next id. The record reads as unused until written.
    pub fn allocate(&self) -> u64 {
        let mut pages = self.pages.write();
        let id = self.high_id.load(Ordering::Acquire);
        let (page, _) = Self::locate(id);
        while pages.len() <= page {
            pages.push(vec![0u8; PAGE_SIZE].into_boxed_slice());
        }
        self.high_id.store(id + 1, Ordering::Release);
        id
    }

    /// Reads record `id` into `record` according to `load`.
    pub fn read(
        &self,
        id: u64,
        record: &mut R,
        load: RecordLoad,
        cursor: &PageCursor,
    ) -> Result<()> {
        if cursor.kind() != R::CURSOR {
            return Err(SombraError::Invalid("page cursor opened for another store"));
        }
        record.set_id(id);
        let mut buf = [0u8; 64];
        let bytes = &mut buf[..R::SIZE];
        if id < self.high_id() {
            let (page, offset) = Self::locate(id);
            let pages = self.pages.read();
            let Some(data) = pages.get(page) else {
                return Err(SombraError::Corruption("record page missing below high id"));
            };
            bytes.copy_from_slice(&data[offset..offset + R::SIZE]);
        }
        if encoded_in_use(bytes) {
            return record.decode(bytes);
        }
        if !encoded_written(bytes) && load != RecordLoad::Normal {
            record.clear();
            return Ok(());
        }
        match load {
            RecordLoad::Normal => {
                trace!(store = R::NAME, id, "record.read.not_in_use");
                Err(SombraError::NotFound)
            }
            RecordLoad::Check => {
                record.clear();
                Ok(())
            }
            RecordLoad::Always => record.decode(bytes),
        }
    }

    /// Writes `record` at its id, which must already be allocated.
    pub fn write(&self, record: &R) -> Result<()> {
        let id = record.id();
        if id >= self.high_id() {
            return Err(SombraError::Invalid("record id was never allocated"));
        }
        let mut buf = [0u8; 64];
        let bytes = &mut buf[..R::SIZE];
        record.encode(bytes)?;
        bytes[0] |= FLAG_WRITTEN;
        let (page, offset) = Self::locate(id);
        let mut pages = self.pages.write();
        let Some(data) = pages.get_mut(page) else {
            return Err(SombraError::Corruption("record page missing below high id"));
        };
        data[offset..offset + R::SIZE].copy_from_slice(bytes);
        Ok(())
    }

    fn locate(id: u64) -> (usize, usize) {
        let per_page = Self::PER_PAGE as u64;
        let page = (id / per_page) as usize;
        let offset = (id % per_page) as usize * R::SIZE;
        (page, offset)
    }
}

/// Side store of entity properties.
#[derive(Default)]
pub struct PropertyStore {
    entries: RwLock<FxHashMap<(EntityType, u64), Vec<(PropId, PropValueOwned)>>>,
}

impl PropertyStore {
    /// Creates an empty property store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the properties of an entity.
    pub fn set(&self, entity: EntityType, id: u64, mut props: Vec<(PropId, PropValueOwned)>) {
        props.sort_by_key(|(key, _)| *key);
        let mut entries = self.entries.write();
        if props.is_empty() {
            entries.remove(&(entity, id));
        } else {
            entries.insert((entity, id), props);
        }
    }

    /// Properties of an entity, optionally restricted to `keys`, sorted by key.
    pub fn get(
        &self,
        entity: EntityType,
        id: u64,
        keys: Option<&[PropId]>,
    ) -> Vec<(PropId, PropValueOwned)> {
        let entries = self.entries.read();
        let Some(props) = entries.get(&(entity, id)) else {
            return Vec::new();
        };
        props
            .iter()
            .filter(|(key, _)| keys.map_or(true, |wanted| wanted.contains(key)))
            .cloned()
            .collect()
    }

    /// Removes every property of an entity.
    pub fn remove(&self, entity: EntityType, id: u64) {
        self.entries.write().remove(&(entity, id));
    }
}

/// Every store a scan or cursor reads.
#[derive(Default)]
pub struct RecordStorage {
    /// Node records.
    pub nodes: RecordStore<NodeRecord>,
    /// Relationship records.
    pub relationships: RecordStore<RelationshipRecord>,
    /// Relationship group records.
    pub groups: RecordStore<RelationshipGroupRecord>,
    /// Aggregate counts of long group chains.
    pub group_degrees: InMemoryGroupDegrees,
    /// Entity properties.
    pub properties: PropertyStore,
    /// Cursor factory shared by all readers.
    pub cursors: StoreCursors,
}

impl RecordStorage {
    /// Creates empty stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// One past the highest id allocated for `entity`.
    pub fn high_id(&self, entity: EntityType) -> u64 {
        match entity {
            EntityType::Node => self.nodes.high_id(),
            EntityType::Relationship => self.relationships.high_id(),
        }
    }
}
