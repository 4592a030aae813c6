use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::primitives::concurrency::ScanCompletion;
use crate::storage::types::TokenSet;
use crate::storage::writer::EntityUpdate;
use crate::types::{IndexId, Result, SombraError};

use super::token::TokenIndex;
use super::types::{EntityIdStream, IndexDescriptor, IndexState};

struct Pin {
    scan: u64,
    completion: Arc<ScanCompletion>,
}

struct ProxyInner {
    state: IndexState,
    dropping: bool,
    content: TokenIndex,
    queue: VecDeque<EntityUpdate>,
    pins: Vec<Pin>,
    populator: Option<u64>,
}

/// Live handle of one index: its state, content and the scans pinned to it.
///
/// Every transition happens under one mutex, so a drop observes either a pin
/// (and waits for it) or no pin (and the late scan fails).
pub struct IndexProxy {
    descriptor: IndexDescriptor,
    inner: Mutex<ProxyInner>,
}

impl IndexProxy {
    pub(crate) fn new(descriptor: IndexDescriptor) -> Self {
        Self {
            descriptor,
            inner: Mutex::new(ProxyInner {
                state: IndexState::Populating,
                dropping: false,
                content: TokenIndex::new(),
                queue: VecDeque::new(),
                pins: Vec::new(),
                populator: None,
            }),
        }
    }

    /// Index definition.
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// Index id.
    pub fn id(&self) -> IndexId {
        self.descriptor.id
    }

    /// Current state; a dropping index already reports `Dropped`.
    pub fn state(&self) -> IndexState {
        let inner = self.inner.lock();
        if inner.dropping {
            IndexState::Dropped
        } else {
            inner.state
        }
    }

    /// Whether scans may read this index.
    pub fn is_online(&self) -> bool {
        self.state() == IndexState::Online
    }

    /// Registers a running scan; the drop path waits for its completion.
    pub fn pin_scan(&self, scan: u64, completion: Arc<ScanCompletion>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dropping || inner.state == IndexState::Dropped {
            return Err(SombraError::IndexDropped(self.descriptor.id));
        }
        inner.pins.push(Pin { scan, completion });
        Ok(())
    }

    /// Removes a pin added by [`IndexProxy::pin_scan`].
    pub fn unpin_scan(&self, scan: u64) {
        self.inner.lock().pins.retain(|pin| pin.scan != scan);
    }

    /// Number of scans currently pinned.
    pub fn pinned_scans(&self) -> usize {
        self.inner.lock().pins.len()
    }

    /// Makes `scan` the only scan allowed to populate this index.
    pub fn claim_populator(&self, scan: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dropping || inner.state == IndexState::Dropped {
            return Err(SombraError::IndexDropped(self.descriptor.id));
        }
        if inner.state != IndexState::Populating {
            return Err(SombraError::State("index is not populating"));
        }
        match inner.populator {
            Some(owner) if owner != scan => {
                Err(SombraError::State("index already has an active populator"))
            }
            _ => {
                inner.populator = Some(scan);
                Ok(())
            }
        }
    }

    /// Frees the populator slot if `scan` holds it.
    pub fn release_populator(&self, scan: u64) {
        let mut inner = self.inner.lock();
        if inner.populator == Some(scan) {
            inner.populator = None;
        }
    }

    /// Adds scanned entries.
    pub fn add_entries(&self, entries: &[(u64, TokenSet)]) {
        let mut inner = self.inner.lock();
        for (entity, tokens) in entries {
            inner.content.add(*entity, tokens);
        }
    }

    /// Routes a live update: applied when online, queued while populating.
    pub fn on_update(&self, update: &EntityUpdate) {
        if update.entity != self.descriptor.entity {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.dropping {
            return;
        }
        match inner.state {
            IndexState::Online => inner.content.apply(update),
            IndexState::Populating => inner.queue.push_back(update.clone()),
            IndexState::Failed | IndexState::Dropped => {}
        }
    }

    /// Whether updates are waiting to be applied.
    pub fn has_queued_updates(&self) -> bool {
        !self.inner.lock().queue.is_empty()
    }

    /// Applies queued updates the scan can no longer observe.
    ///
    /// Updates for entities in `[position, total)` are discarded: the scan has
    /// not read them yet and will see their current state.
    pub fn apply_queued(&self, position: u64, total: u64) -> usize {
        let mut inner = self.inner.lock();
        let ProxyInner { queue, content, .. } = &mut *inner;
        let mut applied = 0;
        for update in queue.drain(..) {
            if update.id < position || update.id >= total {
                content.apply(&update);
                applied += 1;
            }
        }
        applied
    }

    /// Drains the queue and flips a populating index online.
    pub fn activate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.dropping {
            return Err(SombraError::IndexDropped(self.descriptor.id));
        }
        if inner.state != IndexState::Populating {
            return Err(SombraError::State("only a populating index can be activated"));
        }
        let ProxyInner { queue, content, .. } = &mut *inner;
        let drained = queue.len();
        for update in queue.drain(..) {
            content.apply(&update);
        }
        inner.state = IndexState::Online;
        info!(
            index = self.descriptor.id.0,
            name = %self.descriptor.name,
            entries = inner.content.len(),
            drained,
            "index.population.online"
        );
        Ok(())
    }

    /// Marks a populating index failed and discards its content.
    pub fn fail(&self, reason: &SombraError) {
        let mut inner = self.inner.lock();
        if inner.state == IndexState::Populating && !inner.dropping {
            inner.state = IndexState::Failed;
            inner.content.clear();
            inner.queue.clear();
            warn!(
                index = self.descriptor.id.0,
                error = %reason,
                "index.population.failed"
            );
        }
    }

    /// Marks the index dropping and returns the completions of pinned scans.
    pub(crate) fn begin_drop(&self) -> Vec<Arc<ScanCompletion>> {
        let mut inner = self.inner.lock();
        inner.dropping = true;
        inner
            .pins
            .iter()
            .map(|pin| Arc::clone(&pin.completion))
            .collect()
    }

    /// Releases the content of a dropped index.
    pub(crate) fn finish_drop(&self) {
        let mut inner = self.inner.lock();
        inner.state = IndexState::Dropped;
        inner.content.clear();
        inner.queue.clear();
        inner.pins.clear();
        inner.populator = None;
        debug!(index = self.descriptor.id.0, "index.drop.released");
    }

    /// Whether `entity` is indexed under `token`.
    pub fn contains(&self, token: u32, entity: u64) -> bool {
        self.inner.lock().content.contains(token, entity)
    }

    /// Number of postings.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().content.len()
    }

    /// Streams the entities of `token` in ascending order.
    pub fn token_stream(self: &Arc<Self>, token: u32) -> TokenIdStream {
        TokenIdStream {
            proxy: Arc::clone(self),
            token,
            last: None,
            exhausted: false,
        }
    }

    fn entities_after(
        &self,
        token: u32,
        after: Option<u64>,
        max: usize,
        out: &mut Vec<u64>,
    ) -> Result<bool> {
        let inner = self.inner.lock();
        if inner.state == IndexState::Dropped {
            return Err(SombraError::IndexDropped(self.descriptor.id));
        }
        Ok(inner.content.entities_after(token, after, max, out))
    }
}

/// Entities of one token, read in chunks so the proxy lock is held briefly.
pub struct TokenIdStream {
    proxy: Arc<IndexProxy>,
    token: u32,
    last: Option<u64>,
    exhausted: bool,
}

impl EntityIdStream for TokenIdStream {
    fn next_batch(&mut self, out: &mut Vec<u64>, max: usize) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let start = out.len();
        let more = self.proxy.entities_after(self.token, self.last, max, out)?;
        if let Some(last) = out[start..].last() {
            self.last = Some(*last);
        }
        self.exhausted = !more;
        Ok(more)
    }
}
