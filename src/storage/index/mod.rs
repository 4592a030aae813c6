//! Token lookup indexes and their lifecycle.
//!
//! An [`IndexProxy`] guards one index's state, postings and pinned scans.
//! The [`IndexRegistry`] owns the proxies and coordinates drops with scans.

#![forbid(unsafe_code)]

mod population;
mod proxy;
mod registry;
mod token;
mod types;

pub use population::{
    IndexPopulationJob, PopulationOutcome, PopulationUpdates, TokenIndexPopulator,
};
pub use proxy::{IndexProxy, TokenIdStream};
pub use registry::IndexRegistry;
pub use token::TokenIndex;
pub use types::{
    collect_all, EntityIdStream, IndexDescriptor, IndexKind, IndexState, UnionStream,
    VecIdStream,
};
