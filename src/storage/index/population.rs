use std::sync::Arc;

use tracing::{debug, info};

use crate::storage::scan::{
    DynamicIndexStoreView, EntityScan, ExternalUpdatesCheck, PopulationProgress, ScanRequest,
    StoreScan, TokenScanConsumer,
};
use crate::storage::types::TokenSet;
use crate::types::{Result, SombraError};

use super::proxy::IndexProxy;

/// Scan consumer that writes scanned entries into a populating token index.
///
/// Entries are buffered per batch and flushed before the batch's external
/// updates are applied.
pub struct TokenIndexPopulator {
    proxy: Arc<IndexProxy>,
    pending: Vec<(u64, TokenSet)>,
    flushed: u64,
}

impl TokenIndexPopulator {
    /// Creates a populator for `proxy`.
    pub fn new(proxy: Arc<IndexProxy>) -> Self {
        Self {
            proxy,
            pending: Vec::new(),
            flushed: 0,
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.proxy.add_entries(&self.pending);
        self.flushed += self.pending.len() as u64;
        self.pending.clear();
    }
}

impl TokenScanConsumer for TokenIndexPopulator {
    fn add_record(&mut self, entity: u64, tokens: &[u32]) -> Result<()> {
        self.pending.push((entity, TokenSet::from_slice(tokens)));
        Ok(())
    }

    fn batch_complete(&mut self) -> Result<()> {
        self.flush();
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.flush();
        debug!(
            index = self.proxy.id().0,
            entries = self.flushed,
            "index.population.scanned"
        );
        Ok(())
    }
}

/// Applies the updates a populating index queued while its scan ran.
pub struct PopulationUpdates {
    proxy: Arc<IndexProxy>,
    total: u64,
    applied: usize,
}

impl PopulationUpdates {
    /// Creates the hook for `proxy` scanning ids below `total`.
    pub fn new(proxy: Arc<IndexProxy>, total: u64) -> Self {
        Self {
            proxy,
            total,
            applied: 0,
        }
    }

    /// Updates applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }
}

impl ExternalUpdatesCheck for PopulationUpdates {
    fn need_to_apply_external_updates(&self) -> bool {
        self.proxy.has_queued_updates()
    }

    fn apply_external_updates(&mut self, position: u64) -> Result<()> {
        self.applied += self.proxy.apply_queued(position, self.total);
        Ok(())
    }
}

/// How a population job ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PopulationOutcome {
    /// The index is online.
    Online,
    /// The job was stopped; the index stays populating.
    Stopped,
    /// The index was dropped while the job ran.
    Dropped,
}

/// Fills a populating token index from a full store scan, then brings it online.
pub struct IndexPopulationJob {
    proxy: Arc<IndexProxy>,
    scan: Arc<EntityScan>,
}

impl IndexPopulationJob {
    /// Prepares the population scan of `proxy` over the store behind `view`.
    pub fn new(view: &DynamicIndexStoreView, proxy: Arc<IndexProxy>) -> Result<Self> {
        let request = ScanRequest::new(proxy.descriptor().entity)
            .force_store_scan(true)
            .token_consumer(TokenIndexPopulator::new(Arc::clone(&proxy)))
            .populating(Arc::clone(&proxy));
        let scan = view.scan(request)?;
        Ok(Self { proxy, scan })
    }

    /// Index being populated.
    pub fn proxy(&self) -> &Arc<IndexProxy> {
        &self.proxy
    }

    /// Runs the scan on the calling thread and activates the index.
    ///
    /// Returns [`SombraError::IndexDropped`] when the index was dropped before
    /// the scan could pin it. Any other scan failure marks the index failed.
    pub fn run(&self) -> Result<PopulationOutcome> {
        let mut updates = PopulationUpdates::new(Arc::clone(&self.proxy), self.scan.total());
        if let Err(err) = self.scan.run(&mut updates) {
            if !err.is_concurrent_drop() && !matches!(err, SombraError::State(_)) {
                self.proxy.fail(&err);
            }
            return Err(err);
        }
        if !self.scan.progress().is_complete() {
            info!(index = self.proxy.id().0, "index.population.stopped");
            return Ok(PopulationOutcome::Stopped);
        }
        match self.proxy.activate() {
            Ok(()) => {
                debug!(
                    index = self.proxy.id().0,
                    applied = updates.applied(),
                    "index.population.updates_applied"
                );
                Ok(PopulationOutcome::Online)
            }
            Err(err) if err.is_concurrent_drop() => Ok(PopulationOutcome::Dropped),
            Err(err) => Err(err),
        }
    }

    /// Requests the scan to stop at its next batch boundary.
    pub fn stop(&self) {
        self.scan.stop();
    }

    /// Progress of the population scan.
    pub fn progress(&self) -> PopulationProgress {
        self.scan.progress()
    }
}
