use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::storage::metrics::{default_metrics, ScanMetrics};
use crate::storage::types::EntityType;
use crate::storage::writer::{EntityUpdate, UpdateListener};
use crate::types::{IndexId, Result, SombraError};

use super::proxy::IndexProxy;
use super::types::{IndexDescriptor, IndexKind, IndexState};

/// How long a drop waits on a pinned scan between progress warnings.
const DROP_WAIT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Catalog of live indexes.
///
/// Also the [`UpdateListener`] that keeps them in step with the store.
pub struct IndexRegistry {
    next_id: AtomicU32,
    proxies: RwLock<FxHashMap<IndexId, Arc<IndexProxy>>>,
    metrics: Arc<dyn ScanMetrics>,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::with_metrics(default_metrics())
    }

    /// Creates an empty registry reporting drop waits to `metrics`.
    pub fn with_metrics(metrics: Arc<dyn ScanMetrics>) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            proxies: RwLock::new(FxHashMap::default()),
            metrics,
        }
    }

    /// Creates a populating token lookup index over `entity`.
    ///
    /// At most one token index may exist per entity kind.
    pub fn create_token_index(&self, entity: EntityType, name: &str) -> Result<Arc<IndexProxy>> {
        let mut proxies = self.proxies.write();
        if proxies
            .values()
            .any(|proxy| proxy.descriptor().entity == entity)
        {
            return Err(SombraError::State("a token index already exists for this entity"));
        }
        let id = IndexId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let proxy = Arc::new(IndexProxy::new(IndexDescriptor {
            id,
            name: name.to_owned(),
            entity,
            kind: IndexKind::TokenLookup,
        }));
        proxies.insert(id, Arc::clone(&proxy));
        info!(index = id.0, name, entity = entity.as_str(), "index.create");
        Ok(proxy)
    }

    /// Proxy of index `id`, if present.
    pub fn proxy(&self, id: IndexId) -> Option<Arc<IndexProxy>> {
        self.proxies.read().get(&id).cloned()
    }

    /// Token index over `entity`, in whatever state it is.
    pub fn token_index(&self, entity: EntityType) -> Option<Arc<IndexProxy>> {
        self.proxies
            .read()
            .values()
            .find(|proxy| proxy.descriptor().entity == entity)
            .cloned()
    }

    /// Descriptors and states of every registered index, ordered by id.
    pub fn indexes(&self) -> Vec<(IndexDescriptor, IndexState)> {
        let mut all: Vec<_> = self
            .proxies
            .read()
            .values()
            .map(|proxy| (proxy.descriptor().clone(), proxy.state()))
            .collect();
        all.sort_by_key(|(descriptor, _)| descriptor.id);
        all
    }

    /// Drops index `id`, waiting for every scan pinned to it.
    ///
    /// Scans that pin the index after this call starts fail with
    /// [`SombraError::IndexDropped`].
    pub fn drop_index(&self, id: IndexId) -> Result<()> {
        self.drop_index_warning_every(id, DROP_WAIT_WARN_INTERVAL)
            .map(|_| ())
    }

    /// Drops `id`, warning each time a pinned scan outlives `interval`.
    ///
    /// Returns how many warnings were logged.
    pub(crate) fn drop_index_warning_every(
        &self,
        id: IndexId,
        interval: Duration,
    ) -> Result<u32> {
        let Some(proxy) = self.proxies.write().remove(&id) else {
            return Err(SombraError::NotFound);
        };
        let waits = proxy.begin_drop();
        if !waits.is_empty() {
            self.metrics.drop_waited();
            info!(index = id.0, pinned = waits.len(), "index.drop.await_scans");
        }
        let started = Instant::now();
        let mut warnings = 0;
        for completion in &waits {
            while !completion.wait_timeout(interval) {
                warnings += 1;
                warn!(
                    index = id.0,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "index.drop.still_waiting"
                );
            }
        }
        proxy.finish_drop();
        info!(
            index = id.0,
            waited_ms = started.elapsed().as_millis() as u64,
            "index.drop.complete"
        );
        Ok(warnings)
    }
}

impl UpdateListener for IndexRegistry {
    fn on_update(&self, update: &EntityUpdate) -> Result<()> {
        let proxies: Vec<_> = self.proxies.read().values().cloned().collect();
        for proxy in proxies {
            proxy.on_update(update);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::concurrency::ScanCompletion;
    use crate::storage::metrics::CounterMetrics;
    use crate::storage::types::TokenSet;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn one_token_index_per_entity() -> Result<()> {
        let registry = IndexRegistry::new();
        let nodes = registry.create_token_index(EntityType::Node, "labels")?;
        registry.create_token_index(EntityType::Relationship, "types")?;
        assert!(matches!(
            registry.create_token_index(EntityType::Node, "again"),
            Err(SombraError::State(_))
        ));
        assert_eq!(registry.token_index(EntityType::Node).map(|p| p.id()), Some(nodes.id()));
        assert_eq!(registry.indexes().len(), 2);
        Ok(())
    }

    #[test]
    fn drop_waits_for_pinned_scan() -> Result<()> {
        let metrics = Arc::new(CounterMetrics::default());
        let registry = Arc::new(IndexRegistry::with_metrics(metrics.clone()));
        let proxy = registry.create_token_index(EntityType::Node, "labels")?;
        let completion = Arc::new(ScanCompletion::new());
        proxy.pin_scan(9, Arc::clone(&completion))?;

        let dropper = {
            let registry = Arc::clone(&registry);
            let id = proxy.id();
            thread::spawn(move || registry.drop_index(id))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!dropper.is_finished());
        assert_eq!(proxy.state(), IndexState::Dropped);
        assert!(registry.token_index(EntityType::Node).is_none());

        completion.complete();
        dropper.join().unwrap()?;
        assert_eq!(metrics.drop_waits.load(Ordering::Relaxed), 1);
        assert!(matches!(registry.drop_index(proxy.id()), Err(SombraError::NotFound)));
        Ok(())
    }

    #[test]
    fn slow_pinned_scan_is_reported_until_it_finishes() -> Result<()> {
        let registry = Arc::new(IndexRegistry::new());
        let proxy = registry.create_token_index(EntityType::Node, "labels")?;
        let completion = Arc::new(ScanCompletion::new());
        proxy.pin_scan(4, Arc::clone(&completion))?;

        let dropper = {
            let registry = Arc::clone(&registry);
            let id = proxy.id();
            thread::spawn(move || {
                registry.drop_index_warning_every(id, Duration::from_millis(2))
            })
        };
        thread::sleep(Duration::from_millis(40));
        assert!(!dropper.is_finished());
        completion.complete();
        let warnings = dropper.join().unwrap()?;
        assert!(warnings >= 1);
        assert_eq!(proxy.state(), IndexState::Dropped);

        let quick = registry.create_token_index(EntityType::Node, "labels")?;
        assert_eq!(registry.drop_index_warning_every(quick.id(), Duration::from_millis(2))?, 0);
        Ok(())
    }

    #[test]
    fn updates_route_by_entity_and_state() -> Result<()> {
        let registry = IndexRegistry::new();
        let nodes = registry.create_token_index(EntityType::Node, "labels")?;
        nodes.activate()?;
        registry.on_update(&EntityUpdate {
            entity: EntityType::Node,
            id: 3,
            before: TokenSet::new(),
            after: TokenSet::from_slice(&[8]),
        })?;
        assert!(nodes.contains(8, 3));
        Ok(())
    }
}
