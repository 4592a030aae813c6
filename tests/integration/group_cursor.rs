//! Relationship group cursor tests
//!
//! Degree counting over dense nodes: chain-length shortcuts, the aggregate
//! degree store, groups deleted under the cursor and writer inserts.

#![allow(missing_docs)]

use std::sync::Arc;

use proptest::prelude::*;
use sombra_storeview::primitives::concurrency::ReentrantLockService;
use sombra_storeview::storage::{
    Direction, EagerDegrees, EdgeSpec, NodeSpec, RecordLoad, RecordStorage, RelationshipDirection,
    RelationshipGroupCursor, RelationshipGroupRecord, RelationshipSelection, StorageReader,
    StoreBuilder, StoreViewOptions, StoreWriter, TokenRegistry,
};
use sombra_storeview::types::{NodeId, Result, SombraError, TypeId};

fn dense_options(external_at: u64) -> StoreViewOptions {
    StoreViewOptions::default()
        .dense_node_threshold(3)
        .external_degrees_threshold(external_at)
}

fn groups_of(storage: &RecordStorage, node: NodeId) -> Result<Vec<RelationshipGroupRecord>> {
    let (reference, dense) = {
        let mut reader = StorageReader::new(storage);
        let record = reader.node(node)?;
        (record.next, record.dense)
    };
    let mut cursor = RelationshipGroupCursor::new(storage);
    cursor.init(node, reference, dense)?;
    let mut groups = Vec::new();
    while cursor.next()? {
        groups.push(cursor.group().clone());
    }
    cursor.close();
    Ok(groups)
}

fn degrees_of(
    storage: &RecordStorage,
    node: NodeId,
    selection: &RelationshipSelection,
) -> Result<EagerDegrees> {
    let mut reader = StorageReader::new(storage);
    let mut degrees = EagerDegrees::new();
    reader.degrees(node, selection, &mut degrees)?;
    reader.close();
    Ok(degrees)
}

#[test]
fn friend_degrees_of_dense_node() -> Result<()> {
    let tokens = TokenRegistry::new();
    let friend = tokens.get_or_create_type("friend");
    let mut builder = StoreBuilder::new(dense_options(1_000));
    let me = builder.add_node(NodeSpec::default());
    for _ in 0..3 {
        let other = builder.add_node(NodeSpec::default());
        builder.add_relationship(EdgeSpec::new(me, friend, other));
    }
    let storage = builder.build()?;

    let groups = groups_of(&storage, me)?;
    assert_eq!(groups.len(), 1);
    assert!(!groups[0].has_external_degrees(RelationshipDirection::Outgoing));

    let degrees = degrees_of(&storage, me, &RelationshipSelection::all(Direction::Both))?;
    assert_eq!(degrees.outgoing(friend), 3);
    assert_eq!(degrees.incoming(friend), 0);
    assert_eq!(degrees.types().collect::<Vec<_>>(), vec![friend]);
    Ok(())
}

#[test]
fn deleted_group_is_skipped_and_later_groups_still_counted() -> Result<()> {
    let mut builder = StoreBuilder::new(dense_options(1_000));
    let hub = builder.add_node(NodeSpec::default());
    let other = builder.add_node(NodeSpec::default());
    for ty in [1, 2, 3] {
        for _ in 0..2 {
            builder.add_relationship(EdgeSpec::new(hub, TypeId(ty), other));
        }
    }
    let storage = builder.build()?;
    let groups = groups_of(&storage, hub)?;
    assert_eq!(
        groups.iter().map(|g| g.ty).collect::<Vec<_>>(),
        vec![TypeId(1), TypeId(2), TypeId(3)]
    );

    let mut deleted = groups[1].clone();
    deleted.in_use = false;
    storage.groups.write(&deleted)?;

    let remaining = groups_of(&storage, hub)?;
    assert_eq!(
        remaining.iter().map(|g| g.ty).collect::<Vec<_>>(),
        vec![TypeId(1), TypeId(3)]
    );
    let degrees = degrees_of(&storage, hub, &RelationshipSelection::all(Direction::Outgoing))?;
    assert_eq!(degrees.outgoing(TypeId(1)), 2);
    assert_eq!(degrees.outgoing(TypeId(2)), 0);
    assert_eq!(degrees.outgoing(TypeId(3)), 2);
    Ok(())
}

#[test]
fn configured_check_load_stops_at_deleted_group() -> Result<()> {
    let options = dense_options(1_000).record_load(RecordLoad::Check);
    let mut builder = StoreBuilder::new(options.clone());
    let hub = builder.add_node(NodeSpec::default());
    let other = builder.add_node(NodeSpec::default());
    for ty in [1, 2, 3] {
        for _ in 0..2 {
            builder.add_relationship(EdgeSpec::new(hub, TypeId(ty), other));
        }
    }
    let storage = builder.build()?;
    let mut deleted = groups_of(&storage, hub)?[1].clone();
    deleted.in_use = false;
    storage.groups.write(&deleted)?;

    // A checked read clears the deleted group, next pointer included.
    let (reference, dense) = {
        let mut reader = StorageReader::from_options(&storage, &options);
        let record = reader.node(hub)?;
        (record.next, record.dense)
    };
    let mut cursor = RelationshipGroupCursor::from_options(&storage, &options);
    cursor.init(hub, reference, dense)?;
    let mut seen = Vec::new();
    while cursor.next()? {
        seen.push(cursor.group_type());
    }
    cursor.close();
    assert_eq!(seen, vec![TypeId(1)]);

    let mut reader = StorageReader::from_options(&storage, &options);
    let mut degrees = EagerDegrees::new();
    reader.degrees(hub, &RelationshipSelection::all(Direction::Outgoing), &mut degrees)?;
    reader.close();
    assert_eq!(degrees.outgoing(TypeId(1)), 2);
    assert_eq!(degrees.outgoing(TypeId(3)), 0);

    let forced = StoreViewOptions::default();
    let mut reader = StorageReader::from_options(&storage, &forced);
    let mut degrees = EagerDegrees::new();
    reader.degrees(hub, &RelationshipSelection::all(Direction::Outgoing), &mut degrees)?;
    assert_eq!(degrees.outgoing(TypeId(3)), 2);
    Ok(())
}

#[test]
fn cursor_copy_is_unsupported() -> Result<()> {
    let storage = RecordStorage::new();
    let cursor = RelationshipGroupCursor::new(&storage);
    assert!(matches!(cursor.copy(), Err(SombraError::Unsupported(_))));
    Ok(())
}

#[test]
fn writer_inserts_on_dense_node_are_counted() -> Result<()> {
    let options = dense_options(4);
    let mut builder = StoreBuilder::new(options.clone());
    let hub = builder.add_node(NodeSpec::default());
    let other = builder.add_node(NodeSpec::default());
    for _ in 0..4 {
        builder.add_relationship(EdgeSpec::new(hub, TypeId(5), other));
    }
    let storage = Arc::new(builder.build()?);
    let writer = StoreWriter::new(
        Arc::clone(&storage),
        Arc::new(ReentrantLockService::new()),
        &options,
    );
    for _ in 0..2 {
        writer.create_relationship(EdgeSpec::new(hub, TypeId(5), other))?;
    }
    writer.create_relationship(EdgeSpec::new(other, TypeId(2), hub))?;
    writer.create_relationship(EdgeSpec::new(hub, TypeId(9), hub))?;

    let degrees = degrees_of(&storage, hub, &RelationshipSelection::all(Direction::Both))?;
    assert_eq!(degrees.outgoing(TypeId(5)), 6);
    assert_eq!(degrees.incoming(TypeId(2)), 1);
    assert_eq!(degrees.counts(TypeId(9)).loops, 1);
    assert_eq!(degrees.total_all(), 8);

    let groups = groups_of(&storage, hub)?;
    assert_eq!(
        groups.iter().map(|g| g.ty).collect::<Vec<_>>(),
        vec![TypeId(2), TypeId(5), TypeId(9)]
    );
    Ok(())
}

#[derive(Clone, Debug)]
struct TypeShape {
    out: usize,
    incoming: usize,
    loops: usize,
}

fn shape() -> impl Strategy<Value = TypeShape> {
    (0usize..12, 0usize..12, 0usize..5).prop_map(|(out, incoming, loops)| TypeShape {
        out,
        incoming,
        loops,
    })
}

fn build_shapes(shapes: &[TypeShape], external_at: u64) -> Result<(RecordStorage, NodeId)> {
    let mut builder = StoreBuilder::new(dense_options(external_at));
    let hub = builder.add_node(NodeSpec::default());
    let other = builder.add_node(NodeSpec::default());
    // Keep the hub dense even when every generated chain is empty.
    for _ in 0..3 {
        builder.add_relationship(EdgeSpec::new(hub, TypeId(100), other));
    }
    for (ty, shape) in shapes.iter().enumerate() {
        let ty = TypeId(ty as u32);
        for _ in 0..shape.out {
            builder.add_relationship(EdgeSpec::new(hub, ty, other));
        }
        for _ in 0..shape.incoming {
            builder.add_relationship(EdgeSpec::new(other, ty, hub));
        }
        for _ in 0..shape.loops {
            builder.add_relationship(EdgeSpec::new(hub, ty, hub));
        }
    }
    Ok((builder.build()?, hub))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn external_and_chain_counts_agree(shapes in proptest::collection::vec(shape(), 1..6)) {
        let selection = RelationshipSelection::all(Direction::Both);
        let (chained, hub) = build_shapes(&shapes, 1_000).unwrap();
        let (external, _) = build_shapes(&shapes, 1).unwrap();
        let via_chain = degrees_of(&chained, hub, &selection).unwrap();
        let via_store = degrees_of(&external, hub, &selection).unwrap();
        for (ty, shape) in shapes.iter().enumerate() {
            let ty = TypeId(ty as u32);
            prop_assert_eq!(via_chain.counts(ty), via_store.counts(ty));
            prop_assert_eq!(via_chain.counts(ty).outgoing as usize, shape.out);
            prop_assert_eq!(via_chain.counts(ty).incoming as usize, shape.incoming);
            prop_assert_eq!(via_chain.counts(ty).loops as usize, shape.loops);
        }
        prop_assert_eq!(via_chain.total_all(), via_store.total_all());
    }
}
