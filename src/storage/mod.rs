//! Record stores, relationship group cursors and online store scans.
//!
//! Nodes, relationships and relationship groups live in fixed-size record
//! stores. Dense nodes keep their relationships in per-type groups that a
//! [`RelationshipGroupCursor`] walks to count degrees. Store views scan every
//! node or relationship while writers keep running, optionally backed by a
//! token lookup index.

/// Token lookup indexes, their population and their drop protocol.
pub mod index;

/// Store scans and the views that create them.
pub mod scan;

mod builder;
mod degrees;
mod group_cursor;
mod metrics;
mod options;
mod record;
mod store;
mod tokens;
mod traversal;
mod types;
mod writer;

pub use builder::StoreBuilder;
pub use degrees::{
    BoundedDegrees, DegreeCounts, DegreeMutator, Direction, EagerDegrees, GroupDegreesStore,
    InMemoryGroupDegrees, RelationshipDirection, RelationshipSelection,
};
pub use group_cursor::RelationshipGroupCursor;

/// Metrics and profiling.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, ScanMetrics};

/// Store view configuration.
pub use options::{
    StoreViewOptions, DEFAULT_BATCH_SIZE, DEFAULT_DENSE_NODE_THRESHOLD,
    DEFAULT_EXTERNAL_DEGREES_THRESHOLD,
};
pub use record::{
    ChainLink, NodeRecord, RecordFormat, RecordLoad, RelationshipGroupRecord,
    RelationshipRecord, MAX_INLINE_LABELS, NO_ID,
};
pub use store::{
    PageCursor, PropertyStore, RecordCursorType, RecordStorage, RecordStore, StoreCursors,
    PAGE_SIZE,
};
pub use tokens::TokenRegistry;
pub use traversal::StorageReader;
pub use types::{EdgeSpec, EntityType, NodeSpec, PropValueOwned, TokenSet};
pub use writer::{EntityUpdate, StoreWriter, UpdateListener};
