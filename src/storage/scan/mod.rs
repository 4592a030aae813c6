//! Online store scans.
//!
//! A scan walks every entity of one kind in ascending id order, classifies it
//! by its tokens and feeds matches to consumers. Scans run on the caller's
//! thread, can be stopped from any thread, and coordinate with index drops
//! through pins on the indexes they read or populate.

#![forbid(unsafe_code)]

mod dynamic;
mod entity;
mod full;

use std::sync::Arc;

use smallvec::SmallVec;

use crate::types::{PropId, Result};

use super::index::IndexProxy;
use super::types::{EntityType, PropValueOwned};

pub use dynamic::DynamicIndexStoreView;
pub use entity::EntityScan;
pub use full::FullScanStoreView;

/// Cancellable, run-once unit of scanning work.
pub trait StoreScan: Send + Sync {
    /// Runs the scan to completion on the calling thread.
    ///
    /// Fails with [`crate::types::SombraError::IndexDropped`] when an index the
    /// scan depends on was dropped before the scan could pin it, and with
    /// [`crate::types::SombraError::State`] when called a second time.
    fn run(&self, updates: &mut dyn ExternalUpdatesCheck) -> Result<()>;

    /// Requests termination at the next batch boundary. Never blocks.
    fn stop(&self);

    /// Progress so far; monotonically non-decreasing.
    fn progress(&self) -> PopulationProgress;
}

/// Hook for applying writes that happened while a scan was running.
pub trait ExternalUpdatesCheck {
    /// Whether updates are waiting.
    fn need_to_apply_external_updates(&self) -> bool;

    /// Applies waiting updates; every entity below `position` has been scanned.
    fn apply_external_updates(&mut self, position: u64) -> Result<()>;
}

/// [`ExternalUpdatesCheck`] with nothing to apply.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExternalUpdates;

impl ExternalUpdatesCheck for NoExternalUpdates {
    fn need_to_apply_external_updates(&self) -> bool {
        false
    }

    fn apply_external_updates(&mut self, _position: u64) -> Result<()> {
        Ok(())
    }
}

/// Receives `(entity, tokens)` for every matching entity, in scan order.
pub trait TokenScanConsumer: Send {
    /// Handles one matching entity.
    fn add_record(&mut self, entity: u64, tokens: &[u32]) -> Result<()>;

    /// Called after every batch.
    fn batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the scan completes without being stopped.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Receives the properties of every matching entity, in scan order.
pub trait PropertyScanConsumer: Send {
    /// Handles one matching entity and its selected properties.
    fn add_record(
        &mut self,
        entity: u64,
        tokens: &[u32],
        properties: &[(PropId, PropValueOwned)],
    ) -> Result<()>;

    /// Called after every batch.
    fn batch_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once when the scan completes without being stopped.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Token predicate of a scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TokenFilter {
    /// Every entity.
    #[default]
    All,
    /// Entities carrying at least one of the tokens (sorted, unique).
    Any(SmallVec<[u32; 4]>),
}

impl TokenFilter {
    /// Builds a filter from raw token ids; an empty list means every entity.
    pub fn from_tokens(tokens: &[u32]) -> Self {
        if tokens.is_empty() {
            return TokenFilter::All;
        }
        let mut sorted: SmallVec<[u32; 4]> = tokens.iter().copied().collect();
        sorted.sort_unstable();
        sorted.dedup();
        TokenFilter::Any(sorted)
    }

    /// Whether an entity carrying `tokens` passes.
    pub fn matches(&self, tokens: &[u32]) -> bool {
        match self {
            TokenFilter::All => true,
            TokenFilter::Any(wanted) => tokens
                .iter()
                .any(|token| wanted.binary_search(token).is_ok()),
        }
    }

    /// Requested tokens, or `None` for every entity.
    pub fn tokens(&self) -> Option<&[u32]> {
        match self {
            TokenFilter::All => None,
            TokenFilter::Any(tokens) => Some(tokens.as_slice()),
        }
    }
}

/// Completed and total work units of a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PopulationProgress {
    /// Units done.
    pub completed: u64,
    /// Units in scope; never zero.
    pub total: u64,
}

impl PopulationProgress {
    /// Progress of a scan that has not started.
    pub const NONE: PopulationProgress = PopulationProgress {
        completed: 0,
        total: 1,
    };

    /// Progress of a finished scan.
    pub const DONE: PopulationProgress = PopulationProgress {
        completed: 1,
        total: 1,
    };

    /// Builds progress, clamping `completed` to `total` and keeping `total` non-zero.
    pub fn new(completed: u64, total: u64) -> Self {
        let total = total.max(1);
        Self {
            completed: completed.min(total),
            total,
        }
    }

    /// Fraction in `[0.0, 1.0]`; exactly 1.0 only when complete.
    pub fn fraction(&self) -> f32 {
        if self.is_complete() {
            return 1.0;
        }
        // Near-complete ratios over large totals would round up to 1.0 in f32.
        let below_one = f64::from(1.0f32 - f32::EPSILON);
        (self.completed as f64 / self.total as f64).min(below_one) as f32
    }

    /// Whether every unit is done.
    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Parameters of one scan.
pub struct ScanRequest {
    pub(crate) entity: EntityType,
    pub(crate) filter: TokenFilter,
    pub(crate) property_keys: Option<Vec<PropId>>,
    pub(crate) token_consumer: Option<Box<dyn TokenScanConsumer>>,
    pub(crate) property_consumer: Option<Box<dyn PropertyScanConsumer>>,
    pub(crate) force_store_scan: bool,
    pub(crate) population_target: Option<Arc<IndexProxy>>,
}

impl ScanRequest {
    /// Scans every entity of `entity` with no consumer.
    pub fn new(entity: EntityType) -> Self {
        Self {
            entity,
            filter: TokenFilter::All,
            property_keys: None,
            token_consumer: None,
            property_consumer: None,
            force_store_scan: false,
            population_target: None,
        }
    }

    /// Scans nodes.
    pub fn nodes() -> Self {
        Self::new(EntityType::Node)
    }

    /// Scans relationships.
    pub fn relationships() -> Self {
        Self::new(EntityType::Relationship)
    }

    /// Entity kind scanned.
    pub fn entity(&self) -> EntityType {
        self.entity
    }

    /// Restricts the scan with `filter`.
    pub fn filter(mut self, filter: TokenFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Restricts the scan to entities carrying any of `tokens`.
    pub fn tokens(self, tokens: &[u32]) -> Self {
        self.filter(TokenFilter::from_tokens(tokens))
    }

    /// Loads only `keys` for the property consumer.
    pub fn property_keys(mut self, keys: &[PropId]) -> Self {
        self.property_keys = Some(keys.to_vec());
        self
    }

    /// Sets the token consumer.
    pub fn token_consumer(mut self, consumer: impl TokenScanConsumer + 'static) -> Self {
        self.token_consumer = Some(Box::new(consumer));
        self
    }

    /// Sets the property consumer.
    pub fn property_consumer(mut self, consumer: impl PropertyScanConsumer + 'static) -> Self {
        self.property_consumer = Some(Box::new(consumer));
        self
    }

    /// Forces a store scan even when an online token index could serve it.
    pub fn force_store_scan(mut self, force: bool) -> Self {
        self.force_store_scan = force;
        self
    }

    /// Marks the scan as the population of `target`.
    pub fn populating(mut self, target: Arc<IndexProxy>) -> Self {
        self.population_target = Some(target);
        self
    }
}
