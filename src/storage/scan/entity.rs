use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::primitives::concurrency::{LockService, ScanCompletion};
use crate::storage::index::{EntityIdStream, IndexProxy, UnionStream};
use crate::storage::metrics::ScanMetrics;
use crate::storage::record::{NodeRecord, RecordLoad, RelationshipRecord};
use crate::storage::store::{PageCursor, RecordCursorType, RecordStorage};
use crate::storage::types::{EntityType, TokenSet};
use crate::types::{PropId, Result, SombraError};

use super::{
    ExternalUpdatesCheck, PopulationProgress, PropertyScanConsumer, ScanRequest, StoreScan,
    TokenFilter, TokenScanConsumer,
};

static NEXT_SCAN_ID: AtomicU64 = AtomicU64::new(1);

/// Where a scan takes its candidate ids from.
pub(crate) enum IdSource {
    /// Every id below the high id at creation.
    Store,
    /// Entities listed under the filter's tokens in an online token index.
    Index(Arc<IndexProxy>),
}

impl IdSource {
    fn as_str(&self) -> &'static str {
        match self {
            IdSource::Store => "store",
            IdSource::Index(_) => "index",
        }
    }
}

struct Consumers {
    token: Option<Box<dyn TokenScanConsumer>>,
    property: Option<Box<dyn PropertyScanConsumer>>,
}

/// Shared collaborators of every scan a view creates.
#[derive(Clone)]
pub(crate) struct ScanContext {
    pub storage: Arc<RecordStorage>,
    pub locks: Arc<dyn LockService>,
    pub metrics: Arc<dyn ScanMetrics>,
    pub batch_size: usize,
}

/// Scan over the entities of one kind, fed from the store or a token index.
///
/// Each entity is read under its shared lock, which is released before the
/// consumers see it. Stop requests and external updates are handled between
/// batches.
pub struct EntityScan {
    id: u64,
    ctx: ScanContext,
    entity: EntityType,
    filter: TokenFilter,
    property_keys: Option<Vec<PropId>>,
    source: IdSource,
    target: Option<Arc<IndexProxy>>,
    total: u64,
    position: AtomicU64,
    started: AtomicBool,
    stopped: AtomicBool,
    done: AtomicBool,
    completion: Arc<ScanCompletion>,
    consumers: Mutex<Consumers>,
}

/// Pins held for the duration of a run. Dropping it signals completion.
struct RunPins<'a> {
    scan: &'a EntityScan,
    pinned: SmallVec<[Arc<IndexProxy>; 2]>,
    populating: bool,
}

impl Drop for RunPins<'_> {
    fn drop(&mut self) {
        if self.populating {
            if let Some(target) = &self.scan.target {
                target.release_populator(self.scan.id);
            }
        }
        for proxy in &self.pinned {
            proxy.unpin_scan(self.scan.id);
        }
        self.scan.completion.complete();
    }
}

/// Per-run readers and buffers.
struct Visitor {
    node: NodeRecord,
    edge: RelationshipRecord,
    page: PageCursor,
    tokens: TokenSet,
    visited: u64,
    matched: u64,
}

impl EntityScan {
    pub(crate) fn new(ctx: ScanContext, request: ScanRequest, source: IdSource) -> Self {
        let total = ctx.storage.high_id(request.entity);
        Self {
            id: NEXT_SCAN_ID.fetch_add(1, Ordering::Relaxed),
            ctx,
            entity: request.entity,
            filter: request.filter,
            property_keys: request.property_keys,
            source,
            target: request.population_target,
            total,
            position: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            done: AtomicBool::new(false),
            completion: Arc::new(ScanCompletion::new()),
            consumers: Mutex::new(Consumers {
                token: request.token_consumer,
                property: request.property_consumer,
            }),
        }
    }

    /// Process-unique scan id.
    pub fn scan_id(&self) -> u64 {
        self.id
    }

    /// Whether candidates come from a token index.
    pub fn is_index_assisted(&self) -> bool {
        matches!(self.source, IdSource::Index(_))
    }

    /// Signal completed when the scan stops running, however it ends.
    pub fn completion(&self) -> Arc<ScanCompletion> {
        Arc::clone(&self.completion)
    }

    /// High id of the scanned store when the scan was created.
    pub fn total(&self) -> u64 {
        self.total
    }

    fn pin(&self) -> Result<RunPins<'_>> {
        let mut pins = RunPins {
            scan: self,
            pinned: SmallVec::new(),
            populating: false,
        };
        if let IdSource::Index(backing) = &self.source {
            backing.pin_scan(self.id, Arc::clone(&self.completion))?;
            pins.pinned.push(Arc::clone(backing));
        }
        if let Some(target) = &self.target {
            target.pin_scan(self.id, Arc::clone(&self.completion))?;
            pins.pinned.push(Arc::clone(target));
            target.claim_populator(self.id)?;
            pins.populating = true;
        }
        Ok(pins)
    }

    fn run_pinned(&self, updates: &mut dyn ExternalUpdatesCheck) -> Result<bool> {
        let mut consumers = self.consumers.lock();
        let mut visitor = Visitor {
            node: NodeRecord::default(),
            edge: RelationshipRecord::default(),
            page: self.ctx.storage.cursors.read_cursor(match self.entity {
                EntityType::Node => RecordCursorType::Node,
                EntityType::Relationship => RecordCursorType::Relationship,
            }),
            tokens: TokenSet::new(),
            visited: 0,
            matched: 0,
        };
        let batch_size = self.ctx.batch_size.max(1);
        match &self.source {
            IdSource::Store => {
                let mut next = 0u64;
                while next < self.total {
                    if self.stopped.load(Ordering::Acquire) {
                        return Ok(false);
                    }
                    let end = next.saturating_add(batch_size as u64).min(self.total);
                    for id in next..end {
                        self.visit(id, &mut visitor, &mut consumers)?;
                    }
                    self.end_batch(end, &mut visitor, &mut consumers, updates)?;
                    next = end;
                }
            }
            IdSource::Index(backing) => {
                let tokens = self.filter.tokens().unwrap_or(&[]);
                let inputs: Vec<Box<dyn EntityIdStream>> = tokens
                    .iter()
                    .map(|&token| Box::new(backing.token_stream(token)) as Box<dyn EntityIdStream>)
                    .collect();
                let mut stream = UnionStream::new(inputs);
                let mut batch = Vec::with_capacity(batch_size);
                loop {
                    if self.stopped.load(Ordering::Acquire) {
                        return Ok(false);
                    }
                    batch.clear();
                    let more = stream.next_batch(&mut batch, batch_size)?;
                    let in_range = batch.iter().copied().filter(|id| *id < self.total);
                    let mut last = None;
                    for id in in_range {
                        self.visit(id, &mut visitor, &mut consumers)?;
                        last = Some(id);
                    }
                    let reached_end = !more || batch.last().is_some_and(|id| *id >= self.total);
                    let position = if reached_end {
                        self.total
                    } else {
                        last.map_or(self.position.load(Ordering::Acquire), |id| id + 1)
                    };
                    self.end_batch(position, &mut visitor, &mut consumers, updates)?;
                    if reached_end {
                        break;
                    }
                }
            }
        }
        if let Some(token) = consumers.token.as_mut() {
            token.finish()?;
        }
        if let Some(property) = consumers.property.as_mut() {
            property.finish()?;
        }
        Ok(true)
    }

    fn visit(&self, id: u64, visitor: &mut Visitor, consumers: &mut Consumers) -> Result<()> {
        visitor.visited += 1;
        visitor.tokens.clear();
        let properties = {
            let _lock = self.ctx.locks.acquire_shared(self.entity.resource(), id);
            match self.entity {
                EntityType::Node => {
                    self.ctx
                        .storage
                        .nodes
                        .read(id, &mut visitor.node, RecordLoad::Check, &visitor.page)?;
                    if !visitor.node.in_use {
                        return Ok(());
                    }
                    visitor
                        .tokens
                        .extend(visitor.node.labels.iter().map(|label| label.0));
                }
                EntityType::Relationship => {
                    self.ctx.storage.relationships.read(
                        id,
                        &mut visitor.edge,
                        RecordLoad::Check,
                        &visitor.page,
                    )?;
                    if !visitor.edge.in_use {
                        return Ok(());
                    }
                    visitor.tokens.push(visitor.edge.ty.0);
                }
            }
            if !self.filter.matches(&visitor.tokens) {
                return Ok(());
            }
            consumers.property.as_ref().map(|_| {
                self.ctx
                    .storage
                    .properties
                    .get(self.entity, id, self.property_keys.as_deref())
            })
        };
        visitor.matched += 1;
        if let Some(token) = consumers.token.as_mut() {
            token.add_record(id, &visitor.tokens)?;
        }
        if let (Some(property), Some(values)) = (consumers.property.as_mut(), properties) {
            property.add_record(id, &visitor.tokens, &values)?;
        }
        Ok(())
    }

    fn end_batch(
        &self,
        position: u64,
        visitor: &mut Visitor,
        consumers: &mut Consumers,
        updates: &mut dyn ExternalUpdatesCheck,
    ) -> Result<()> {
        if let Some(token) = consumers.token.as_mut() {
            token.batch_complete()?;
        }
        if let Some(property) = consumers.property.as_mut() {
            property.batch_complete()?;
        }
        self.position.fetch_max(position, Ordering::AcqRel);
        if updates.need_to_apply_external_updates() {
            updates.apply_external_updates(position)?;
        }
        self.ctx.metrics.batch(visitor.visited, visitor.matched);
        debug!(
            scan = self.id,
            position,
            total = self.total,
            visited = visitor.visited,
            matched = visitor.matched,
            "storeview.scan.batch"
        );
        visitor.visited = 0;
        visitor.matched = 0;
        Ok(())
    }
}

impl StoreScan for EntityScan {
    fn run(&self, updates: &mut dyn ExternalUpdatesCheck) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SombraError::State("store scan can only be run once"));
        }
        let pins = match self.pin() {
            Ok(pins) => pins,
            Err(err) => {
                self.ctx.metrics.scan_failed();
                if err.is_concurrent_drop() {
                    info!(scan = self.id, error = %err, "storeview.scan.index_dropped");
                } else {
                    warn!(scan = self.id, error = %err, "storeview.scan.rejected");
                }
                return Err(err);
            }
        };

        let started = Instant::now();
        self.ctx.metrics.scan_started(self.entity.as_str());
        info!(
            scan = self.id,
            entity = self.entity.as_str(),
            source = self.source.as_str(),
            total = self.total,
            "storeview.scan.start"
        );
        let outcome = self.run_pinned(updates);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(true) => {
                self.position.store(self.total, Ordering::Release);
                self.done.store(true, Ordering::Release);
                self.ctx.metrics.scan_completed();
                info!(scan = self.id, elapsed_ms, "storeview.scan.complete");
            }
            Ok(false) => {
                self.ctx.metrics.scan_stopped();
                info!(
                    scan = self.id,
                    position = self.position.load(Ordering::Acquire),
                    elapsed_ms,
                    "storeview.scan.stopped"
                );
            }
            Err(err) => {
                self.ctx.metrics.scan_failed();
                warn!(scan = self.id, error = %err, "storeview.scan.failed");
            }
        }
        drop(pins);
        outcome.map(|_| ())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn progress(&self) -> PopulationProgress {
        if self.done.load(Ordering::Acquire) {
            return PopulationProgress::DONE;
        }
        let total = self.total.max(1);
        let position = self.position.load(Ordering::Acquire);
        PopulationProgress::new(position.min(total - 1), total)
    }
}
