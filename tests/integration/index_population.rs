//! Label index population tests
//!
//! Populates a node label index with a store scan while writers keep
//! creating, relabelling and deleting nodes, then checks the online index
//! against the store.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_storeview::primitives::concurrency::{LockService, ReentrantLockService, ResourceType};
use sombra_storeview::storage::index::{
    IndexPopulationJob, IndexProxy, IndexRegistry, IndexState, PopulationOutcome,
};
use sombra_storeview::storage::scan::DynamicIndexStoreView;
use sombra_storeview::storage::{
    EntityType, NodeRecord, NodeSpec, RecordCursorType, RecordLoad, RecordStorage, StoreBuilder,
    StoreViewOptions, StoreWriter,
};
use sombra_storeview::types::{LabelId, NodeId, Result, SombraError};

const INITIAL_NODES: u64 = 6_000;
const LABELS: u32 = 5;

struct Harness {
    storage: Arc<RecordStorage>,
    locks: Arc<dyn LockService>,
    registry: Arc<IndexRegistry>,
    view: DynamicIndexStoreView,
    writer: StoreWriter,
}

fn harness(batch_size: usize) -> Result<Harness> {
    let options = StoreViewOptions::default().batch_size(batch_size);
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let mut builder = StoreBuilder::new(options.clone());
    for _ in 0..INITIAL_NODES {
        let label = LabelId(rng.gen_range(0..LABELS));
        builder.add_node(NodeSpec::with_labels(&[label]));
    }
    let storage = Arc::new(builder.build()?);
    let locks: Arc<dyn LockService> = Arc::new(ReentrantLockService::new());
    let registry = Arc::new(IndexRegistry::new());
    let writer = StoreWriter::new(Arc::clone(&storage), Arc::clone(&locks), &options)
        .with_listener(registry.clone());
    let view = DynamicIndexStoreView::new(
        Arc::clone(&storage),
        Arc::clone(&locks),
        &options,
        Arc::clone(&registry),
    );
    Ok(Harness {
        storage,
        locks,
        registry,
        view,
        writer,
    })
}

fn assert_index_matches_store(storage: &RecordStorage, index: &IndexProxy) -> Result<()> {
    let page = storage.cursors.read_cursor(RecordCursorType::Node);
    let mut record = NodeRecord::default();
    let mut postings = 0;
    for id in 0..storage.nodes.high_id() {
        storage.nodes.read(id, &mut record, RecordLoad::Check, &page)?;
        if !record.in_use {
            for label in 0..LABELS {
                assert!(!index.contains(label, id), "deleted node {id} still indexed");
            }
            continue;
        }
        for label in 0..LABELS {
            let labelled = record.labels.contains(&LabelId(label));
            assert_eq!(index.contains(label, id), labelled, "node {id} label {label}");
        }
        postings += record.labels.len();
    }
    assert_eq!(index.entry_count(), postings);
    Ok(())
}

#[test]
fn population_with_concurrent_writes_matches_store() -> Result<()> {
    let harness = harness(256)?;
    let index = harness
        .registry
        .create_token_index(EntityType::Node, "node_labels")?;
    let job = IndexPopulationJob::new(&harness.view, Arc::clone(&index))?;
    let populating = AtomicBool::new(true);

    thread::scope(|scope| -> Result<()> {
        let writer = scope.spawn(|| -> Result<()> {
            let mut rng = ChaCha8Rng::seed_from_u64(99);
            let mut created = Vec::new();
            let mut rounds = 0;
            while populating.load(Ordering::Acquire) || rounds < 200 {
                rounds += 1;
                match rng.gen_range(0..3) {
                    0 => {
                        let label = LabelId(rng.gen_range(0..LABELS));
                        let node = harness.writer.create_node(NodeSpec::with_labels(&[label]))?;
                        created.push(node);
                    }
                    1 => {
                        let node = NodeId(rng.gen_range(0..INITIAL_NODES));
                        let labels = [
                            LabelId(rng.gen_range(0..LABELS)),
                            LabelId(rng.gen_range(0..LABELS)),
                        ];
                        harness.writer.set_labels(node, &labels)?;
                    }
                    _ => {
                        if let Some(node) = created.pop() {
                            harness.writer.delete_node(node)?;
                        }
                    }
                }
            }
            Ok(())
        });
        let outcome = job.run();
        populating.store(false, Ordering::Release);
        writer.join().unwrap()?;
        assert_eq!(outcome?, PopulationOutcome::Online);
        Ok(())
    })?;

    assert_eq!(index.state(), IndexState::Online);
    assert_index_matches_store(&harness.storage, &index)
}

#[test]
fn second_populator_is_rejected_without_failing_index() -> Result<()> {
    let harness = harness(128)?;
    let index = harness
        .registry
        .create_token_index(EntityType::Node, "node_labels")?;
    index.claim_populator(u64::MAX)?;
    let job = IndexPopulationJob::new(&harness.view, Arc::clone(&index))?;
    assert!(matches!(job.run(), Err(SombraError::State(_))));
    assert_eq!(index.state(), IndexState::Populating);
    assert_eq!(index.pinned_scans(), 0);

    index.release_populator(u64::MAX);
    let retry = IndexPopulationJob::new(&harness.view, Arc::clone(&index))?;
    assert_eq!(retry.run()?, PopulationOutcome::Online);
    assert_index_matches_store(&harness.storage, &index)
}

#[test]
fn drop_during_population_waits_and_reports_dropped() -> Result<()> {
    let harness = harness(64)?;
    let index = harness
        .registry
        .create_token_index(EntityType::Node, "node_labels")?;
    let job = IndexPopulationJob::new(&harness.view, Arc::clone(&index))?;

    let outcome = thread::scope(|scope| {
        let blocker = harness.locks.acquire_exclusive(ResourceType::Node, 1_000);
        let runner = scope.spawn(|| job.run());
        while index.pinned_scans() == 0 {
            thread::yield_now();
        }
        let dropper = scope.spawn(|| harness.registry.drop_index(index.id()));
        thread::sleep(Duration::from_millis(30));
        assert!(!dropper.is_finished());
        assert_eq!(index.state(), IndexState::Dropped);
        drop(blocker);
        let outcome = runner.join().unwrap();
        dropper.join().unwrap().map(|()| outcome)
    })?;

    assert_eq!(outcome?, PopulationOutcome::Dropped);
    assert_eq!(index.state(), IndexState::Dropped);
    assert_eq!(index.entry_count(), 0);
    Ok(())
}

#[test]
fn online_index_follows_later_writes() -> Result<()> {
    let harness = harness(1_000)?;
    let index = harness
        .registry
        .create_token_index(EntityType::Node, "node_labels")?;
    assert_eq!(
        IndexPopulationJob::new(&harness.view, Arc::clone(&index))?.run()?,
        PopulationOutcome::Online
    );
    let node = harness.writer.create_node(NodeSpec::with_labels(&[LabelId(2)]))?;
    assert!(index.contains(2, node.0));
    harness.writer.set_labels(node, &[LabelId(4)])?;
    assert!(!index.contains(2, node.0));
    assert!(index.contains(4, node.0));
    harness.writer.delete_node(node)?;
    assert!(!index.contains(4, node.0));
    assert_index_matches_store(&harness.storage, &index)
}
