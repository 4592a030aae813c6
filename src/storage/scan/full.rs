use std::sync::Arc;

use crate::primitives::concurrency::LockService;
use crate::storage::metrics::default_metrics;
use crate::storage::options::StoreViewOptions;
use crate::storage::store::RecordStorage;
use crate::types::Result;

use super::entity::{IdSource, ScanContext};
use super::{EntityScan, ScanRequest};

/// Store view that answers every request with a full store scan.
#[derive(Clone)]
pub struct FullScanStoreView {
    ctx: ScanContext,
}

impl FullScanStoreView {
    /// Creates a view over `storage` that reads entities under `locks`.
    pub fn new(
        storage: Arc<RecordStorage>,
        locks: Arc<dyn LockService>,
        options: &StoreViewOptions,
    ) -> Self {
        Self {
            ctx: ScanContext {
                storage,
                locks,
                metrics: options.metrics.clone().unwrap_or_else(default_metrics),
                batch_size: options.batch_size,
            },
        }
    }

    /// Store the view reads.
    pub fn storage(&self) -> &Arc<RecordStorage> {
        &self.ctx.storage
    }

    /// Creates a scan that visits every id below the current high id.
    ///
    /// Nothing is read until [`super::StoreScan::run`] is called.
    pub fn scan(&self, request: ScanRequest) -> Result<Arc<EntityScan>> {
        Ok(Arc::new(self.scan_from(request, IdSource::Store)))
    }

    pub(crate) fn scan_from(&self, request: ScanRequest, source: IdSource) -> EntityScan {
        EntityScan::new(self.ctx.clone(), request, source)
    }
}
