use std::sync::Arc;

use tracing::debug;

use crate::primitives::concurrency::LockService;
use crate::storage::index::{IndexRegistry, IndexState};
use crate::storage::options::StoreViewOptions;
use crate::storage::store::RecordStorage;
use crate::types::Result;

use super::entity::IdSource;
use super::{EntityScan, FullScanStoreView, ScanRequest, TokenFilter};

/// Store view that serves token-filtered scans from an online token index
/// when one exists and falls back to a full store scan otherwise.
#[derive(Clone)]
pub struct DynamicIndexStoreView {
    full: FullScanStoreView,
    registry: Arc<IndexRegistry>,
}

impl DynamicIndexStoreView {
    /// Creates a view over `storage` consulting `registry` for token indexes.
    pub fn new(
        storage: Arc<RecordStorage>,
        locks: Arc<dyn LockService>,
        options: &StoreViewOptions,
        registry: Arc<IndexRegistry>,
    ) -> Self {
        Self {
            full: FullScanStoreView::new(storage, locks, options),
            registry,
        }
    }

    /// Index catalog consulted by this view.
    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    /// Underlying full-scan view.
    pub fn full_scan_view(&self) -> &FullScanStoreView {
        &self.full
    }

    /// Creates the cheapest scan that satisfies `request`.
    ///
    /// Index-assisted scans still re-check every entity's tokens under its
    /// lock, so a stale posting never reaches a consumer.
    pub fn scan(&self, request: ScanRequest) -> Result<Arc<EntityScan>> {
        if request.force_store_scan || matches!(request.filter, TokenFilter::All) {
            return self.full.scan(request);
        }
        let entity = request.entity;
        match self.registry.token_index(entity) {
            Some(index) if index.state() == IndexState::Online => {
                debug!(
                    index = index.id().0,
                    entity = entity.as_str(),
                    "storeview.scan.index_assisted"
                );
                Ok(Arc::new(self.full.scan_from(request, IdSource::Index(index))))
            }
            other => {
                debug!(
                    entity = entity.as_str(),
                    index_state = other.as_ref().map(|index| index.state().as_str()),
                    "storeview.scan.fallback"
                );
                self.full.scan(request)
            }
        }
    }
}
