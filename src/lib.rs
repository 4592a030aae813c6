//! Sombra store views: online scans over a record-based graph store.
//!
//! The crate pairs fixed-size node, relationship and relationship group
//! stores with cursors that count degrees of dense nodes and with store views
//! that scan entities while writers and index drops run concurrently.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;
