//! Dynamic store view tests
//!
//! Exercises node scans backed by a label index and relationship scans
//! backed by a type index while the index is dropped from other threads,
//! plus stop and fallback behaviour.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_storeview::primitives::concurrency::{LockService, ReentrantLockService};
use sombra_storeview::storage::index::{
    IndexPopulationJob, IndexProxy, IndexRegistry, IndexState, PopulationOutcome,
};
use sombra_storeview::storage::scan::{
    DynamicIndexStoreView, NoExternalUpdates, ScanRequest, StoreScan,
    TokenScanConsumer,
};
use sombra_storeview::storage::{
    CounterMetrics, EdgeSpec, EntityType, NodeSpec, StoreBuilder, StoreViewOptions, StoreWriter,
    TokenRegistry, TokenSet,
};
use sombra_storeview::types::{LabelId, NodeId, Result, SombraError, TypeId};

const PERSON_NODES: u64 = 10_100;
const FRIEND_RELATIONSHIPS: u64 = 10_100;

struct Fixture {
    view: DynamicIndexStoreView,
    registry: Arc<IndexRegistry>,
    writer: StoreWriter,
    person: LabelId,
    city: LabelId,
    friend: TypeId,
}

fn fixture(options: StoreViewOptions) -> Result<Fixture> {
    let tokens = TokenRegistry::new();
    let person = tokens.get_or_create_label("person");
    let city = tokens.get_or_create_label("city");
    let friend = tokens.get_or_create_type("friend");
    let lives_in = tokens.get_or_create_type("lives_in");
    let mut builder = StoreBuilder::new(options.clone());
    let people: Vec<NodeId> = (0..PERSON_NODES)
        .map(|_| builder.add_node(NodeSpec::with_labels(&[person])))
        .collect();
    let cities: Vec<NodeId> = (0..25)
        .map(|_| builder.add_node(NodeSpec::with_labels(&[city])))
        .collect();
    for i in 0..FRIEND_RELATIONSHIPS as usize {
        let next = people[(i + 1) % people.len()];
        builder.add_relationship(EdgeSpec::new(people[i % people.len()], friend, next));
    }
    for (i, city) in cities.iter().enumerate() {
        builder.add_relationship(EdgeSpec::new(people[i], lives_in, *city));
    }
    let storage = Arc::new(builder.build()?);
    let locks: Arc<dyn LockService> = Arc::new(ReentrantLockService::new());
    let registry = Arc::new(IndexRegistry::new());
    let writer = StoreWriter::new(Arc::clone(&storage), Arc::clone(&locks), &options)
        .with_listener(registry.clone());
    let view = DynamicIndexStoreView::new(storage, locks, &options, Arc::clone(&registry));
    Ok(Fixture {
        view,
        registry,
        writer,
        person,
        city,
        friend,
    })
}

fn online_index(fixture: &Fixture, entity: EntityType) -> Result<Arc<IndexProxy>> {
    let name = match entity {
        EntityType::Node => "node_labels",
        EntityType::Relationship => "relationship_types",
    };
    let proxy = fixture.registry.create_token_index(entity, name)?;
    let job = IndexPopulationJob::new(&fixture.view, Arc::clone(&proxy))?;
    assert_eq!(job.run()?, PopulationOutcome::Online);
    Ok(proxy)
}

fn online_label_index(fixture: &Fixture) -> Result<Arc<IndexProxy>> {
    online_index(fixture, EntityType::Node)
}

fn person_scan(fixture: &Fixture) -> ScanRequest {
    ScanRequest::nodes().tokens(&[fixture.person.0])
}

fn friend_scan(fixture: &Fixture) -> ScanRequest {
    ScanRequest::relationships().tokens(&[fixture.friend.0])
}

#[derive(Clone, Default)]
struct Counter(Arc<AtomicU64>);

impl Counter {
    fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl TokenScanConsumer for Counter {
    fn add_record(&mut self, _entity: u64, _tokens: &[u32]) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn full_scan_visits_every_person_across_batches() -> Result<()> {
    let metrics = Arc::new(CounterMetrics::default());
    let fixture = fixture(StoreViewOptions::default().metrics(metrics.clone()))?;
    let counter = Counter::default();
    let scan = fixture.view.scan(
        ScanRequest::nodes()
            .tokens(&[fixture.person.0])
            .token_consumer(counter.clone()),
    )?;
    assert!(!scan.is_index_assisted());
    assert_eq!(scan.progress().fraction(), 0.0);
    scan.run(&mut NoExternalUpdates)?;
    assert_eq!(counter.get(), PERSON_NODES);
    assert_eq!(scan.progress().fraction(), 1.0);
    assert_eq!(metrics.batches.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.entities_matched.load(Ordering::Relaxed), PERSON_NODES);
    Ok(())
}

fn race_scan_against_drop(
    entity: EntityType,
    request: fn(&Fixture) -> ScanRequest,
    expected: u64,
) -> Result<()> {
    let fixture = fixture(StoreViewOptions::default())?;
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut aborted = 0;
    let mut completed = 0;
    for _ in 0..12 {
        let index = online_index(&fixture, entity)?;
        let counter = Counter::default();
        let scan = fixture
            .view
            .scan(request(&fixture).token_consumer(counter.clone()))?;
        assert!(scan.is_index_assisted());

        let delay = rng.gen_range(0..3u64);
        let result = thread::scope(|scope| {
            let dropper = scope.spawn(|| {
                thread::sleep(Duration::from_millis(delay));
                fixture.registry.drop_index(index.id())
            });
            let result = scan.run(&mut NoExternalUpdates);
            dropper.join().unwrap().map(|()| result)
        })?;

        match result {
            Err(err) => {
                assert!(err.is_concurrent_drop(), "unexpected failure: {err}");
                assert_eq!(counter.get(), 0);
                aborted += 1;
            }
            Ok(()) => {
                assert_eq!(counter.get(), expected);
                assert_eq!(scan.progress().fraction(), 1.0);
                completed += 1;
            }
        }
        assert!(scan.completion().is_complete());
        assert_eq!(index.state(), IndexState::Dropped);
        assert!(fixture.registry.token_index(entity).is_none());
    }
    assert_eq!(aborted + completed, 12);
    Ok(())
}

#[test]
fn concurrent_index_drop_either_aborts_or_completes() -> Result<()> {
    race_scan_against_drop(EntityType::Node, person_scan, PERSON_NODES)
}

#[test]
fn concurrent_type_index_drop_during_relationship_scan() -> Result<()> {
    race_scan_against_drop(EntityType::Relationship, friend_scan, FRIEND_RELATIONSHIPS)
}

struct Gate {
    reached: Arc<Barrier>,
    release: Arc<Barrier>,
    seen: u64,
}

impl TokenScanConsumer for Gate {
    fn add_record(&mut self, _entity: u64, _tokens: &[u32]) -> Result<()> {
        if self.seen == 0 {
            self.reached.wait();
            self.release.wait();
        }
        self.seen += 1;
        Ok(())
    }
}

fn assert_drop_waits_for_scan(
    entity: EntityType,
    request: fn(&Fixture) -> ScanRequest,
) -> Result<()> {
    let fixture = fixture(StoreViewOptions::default())?;
    let index = online_index(&fixture, entity)?;
    let reached = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let scan = fixture.view.scan(request(&fixture).token_consumer(Gate {
        reached: Arc::clone(&reached),
        release: Arc::clone(&release),
        seen: 0,
    }))?;
    assert!(scan.is_index_assisted());

    thread::scope(|scope| -> Result<()> {
        let runner = scope.spawn(|| scan.run(&mut NoExternalUpdates));
        reached.wait();
        let dropper = scope.spawn(|| fixture.registry.drop_index(index.id()));
        thread::sleep(Duration::from_millis(50));
        assert!(!dropper.is_finished());
        assert_eq!(index.state(), IndexState::Dropped);

        release.wait();
        runner.join().unwrap()?;
        dropper.join().unwrap()?;
        Ok(())
    })?;
    assert_eq!(scan.progress().fraction(), 1.0);
    assert_eq!(index.pinned_scans(), 0);
    Ok(())
}

#[test]
fn drop_waits_for_pinned_scan_to_finish() -> Result<()> {
    assert_drop_waits_for_scan(EntityType::Node, person_scan)
}

#[test]
fn type_index_drop_waits_for_relationship_scan() -> Result<()> {
    assert_drop_waits_for_scan(EntityType::Relationship, friend_scan)
}

#[test]
fn late_scan_fails_fast_after_drop() -> Result<()> {
    let fixture = fixture(StoreViewOptions::default())?;
    let index = online_label_index(&fixture)?;
    let counter = Counter::default();
    let scan = fixture.view.scan(
        ScanRequest::nodes()
            .tokens(&[fixture.person.0])
            .token_consumer(counter.clone()),
    )?;
    fixture.registry.drop_index(index.id())?;
    let err = scan.run(&mut NoExternalUpdates).unwrap_err();
    assert!(matches!(err, SombraError::IndexDropped(id) if id == index.id()));
    assert_eq!(counter.get(), 0);

    let retry = fixture.view.scan(
        ScanRequest::nodes()
            .tokens(&[fixture.person.0])
            .token_consumer(counter.clone()),
    )?;
    assert!(!retry.is_index_assisted());
    retry.run(&mut NoExternalUpdates)?;
    assert_eq!(counter.get(), PERSON_NODES);
    Ok(())
}

#[test]
fn dropping_an_unrelated_index_does_not_disturb_scan() -> Result<()> {
    let fixture = fixture(StoreViewOptions::default())?;
    let labels = online_label_index(&fixture)?;
    let types = fixture
        .registry
        .create_token_index(EntityType::Relationship, "relationship_types")?;
    let counter = Counter::default();
    let scan = fixture.view.scan(
        ScanRequest::nodes()
            .tokens(&[fixture.city.0])
            .token_consumer(counter.clone()),
    )?;
    fixture.registry.drop_index(types.id())?;
    scan.run(&mut NoExternalUpdates)?;
    assert_eq!(counter.get(), 25);
    assert_eq!(labels.state(), IndexState::Online);
    Ok(())
}

#[test]
fn index_assisted_scan_rechecks_labels_under_lock() -> Result<()> {
    let fixture = fixture(StoreViewOptions::default().batch_size(64))?;
    let index = online_label_index(&fixture)?;
    let relabelled = fixture.writer.create_node(NodeSpec::with_labels(&[fixture.city]))?;
    fixture.writer.set_labels(relabelled, &[fixture.person])?;
    let deleted = fixture.writer.create_node(NodeSpec::with_labels(&[fixture.city]))?;
    fixture.writer.delete_node(deleted)?;
    let stale = TokenSet::from_slice(&[fixture.city.0]);
    index.add_entries(&[(relabelled.0, stale.clone()), (deleted.0, stale)]);
    assert!(index.contains(fixture.city.0, relabelled.0));

    let seen = Arc::new(Mutex::new(Vec::new()));
    struct Ids(Arc<Mutex<Vec<u64>>>);
    impl TokenScanConsumer for Ids {
        fn add_record(&mut self, entity: u64, tokens: &[u32]) -> Result<()> {
            assert!(!tokens.is_empty());
            self.0.lock().push(entity);
            Ok(())
        }
    }
    let scan = fixture.view.scan(
        ScanRequest::nodes()
            .tokens(&[fixture.city.0])
            .token_consumer(Ids(Arc::clone(&seen))),
    )?;
    assert!(scan.is_index_assisted());
    scan.run(&mut NoExternalUpdates)?;
    let seen = seen.lock();
    assert_eq!(seen.len(), 25);
    assert!(!seen.contains(&relabelled.0));
    assert!(!seen.contains(&deleted.0));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    Ok(())
}

#[test]
fn populating_index_is_not_used_for_filtered_scans() -> Result<()> {
    let fixture = fixture(StoreViewOptions::default())?;
    let index = fixture
        .registry
        .create_token_index(EntityType::Node, "node_labels")?;
    assert_eq!(index.state(), IndexState::Populating);
    let counter = Counter::default();
    let scan = fixture.view.scan(
        ScanRequest::nodes()
            .tokens(&[fixture.city.0])
            .token_consumer(counter.clone()),
    )?;
    assert!(!scan.is_index_assisted());
    scan.run(&mut NoExternalUpdates)?;
    assert_eq!(counter.get(), 25);
    Ok(())
}

#[test]
fn stop_is_idempotent_from_many_threads() -> Result<()> {
    let fixture = fixture(StoreViewOptions::default().batch_size(100))?;
    let reached = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let scan = fixture.view.scan(ScanRequest::nodes().token_consumer(Gate {
        reached: Arc::clone(&reached),
        release: Arc::clone(&release),
        seen: 0,
    }))?;

    thread::scope(|scope| -> Result<()> {
        let runner = scope.spawn(|| scan.run(&mut NoExternalUpdates));
        reached.wait();
        let stoppers: Vec<_> = (0..4).map(|_| scope.spawn(|| scan.stop())).collect();
        for stopper in stoppers {
            stopper.join().unwrap();
        }
        scan.stop();
        release.wait();
        runner.join().unwrap()?;
        Ok(())
    })?;
    let progress = scan.progress();
    assert!(!progress.is_complete());
    assert!(progress.fraction() > 0.0);
    assert!(scan.completion().is_complete());
    Ok(())
}

#[test]
fn scan_runs_at_most_once() -> Result<()> {
    let fixture = fixture(StoreViewOptions::default())?;
    let scan = fixture.view.scan(ScanRequest::nodes())?;
    scan.run(&mut NoExternalUpdates)?;
    assert!(matches!(
        scan.run(&mut NoExternalUpdates),
        Err(SombraError::State(_))
    ));
    Ok(())
}
