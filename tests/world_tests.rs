//! World tests
//!
//! Tests for:
//! - Entity lifecycle and free-slot reuse
//! - Parent/child hierarchy and transform propagation
//! - Cycle rejection
//! - Names and partitions
//! - Serialization round trip through an entity map

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{DVec3, Quat, Vec3};
use kiln::core::{InputMemoryStream, OutputMemoryStream};
use kiln::world::{EntityMap, World};

// ============================================================================
// Helper
// ============================================================================

const EPSILON: f64 = 1e-5;

fn dvec3_approx(a: DVec3, b: DVec3) -> bool {
    (a - b).abs().max_element() < EPSILON
}

fn spawn(world: &mut World, x: f64) -> kiln::EntityRef {
    world.create_entity(DVec3::new(x, 0.0, 0.0), Quat::IDENTITY)
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn created_entity_exists_until_destroyed() {
    let mut world = World::new();
    let e = spawn(&mut world, 0.0);
    assert!(world.has_entity(e));
    assert_eq!(world.entity_count(), 1);

    world.destroy_entity(e);
    assert!(!world.has_entity(e));
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn destroyed_slot_is_reused() {
    let mut world = World::new();
    let a = spawn(&mut world, 0.0);
    let _b = spawn(&mut world, 1.0);
    world.destroy_entity(a);
    let c = spawn(&mut world, 2.0);
    assert_eq!(c, a);
    assert_eq!(world.position(c), DVec3::new(2.0, 0.0, 0.0));
    assert_eq!(world.scale(c), Vec3::ONE);
}

#[test]
fn iteration_visits_live_entities_in_slot_order() {
    let mut world = World::new();
    let entities: Vec<_> = (0..4).map(|i| spawn(&mut world, f64::from(i))).collect();
    world.destroy_entity(entities[1]);

    let visited: Vec<_> = world.entities().collect();
    assert_eq!(visited, vec![entities[0], entities[2], entities[3]]);
    assert_eq!(world.first_entity(), Some(entities[0]));
    assert_eq!(world.next_entity(entities[0]), Some(entities[2]));
    assert_eq!(world.next_entity(entities[3]), None);
}

#[test]
fn signals_fire_on_lifecycle_and_moves() {
    let mut world = World::new();
    let created = Arc::new(AtomicUsize::new(0));
    let moved = Arc::new(AtomicUsize::new(0));
    {
        let created = Arc::clone(&created);
        world.entity_created().connect(move |_| {
            created.fetch_add(1, Ordering::Relaxed);
        });
        let moved = Arc::clone(&moved);
        world.entity_transformed().connect(move |_| {
            moved.fetch_add(1, Ordering::Relaxed);
        });
    }

    let e = spawn(&mut world, 0.0);
    world.set_position(e, DVec3::ONE);
    assert_eq!(created.load(Ordering::Relaxed), 1);
    assert_eq!(moved.load(Ordering::Relaxed), 1);
}

// ============================================================================
// Hierarchy
// ============================================================================

#[test]
fn child_follows_parent() {
    let mut world = World::new();
    let a = world.create_entity(DVec3::ZERO, Quat::IDENTITY);
    let b = world.create_entity(DVec3::ZERO, Quat::IDENTITY);

    world.set_parent(Some(a), b);
    world.set_local_position(b, DVec3::new(1.0, 0.0, 0.0));
    assert!(dvec3_approx(world.position(b), DVec3::new(1.0, 0.0, 0.0)));

    world.set_position(a, DVec3::new(5.0, 0.0, 0.0));
    assert!(dvec3_approx(world.position(b), DVec3::new(6.0, 0.0, 0.0)));
}

#[test]
fn rotated_parent_rotates_child_offset() {
    let mut world = World::new();
    let a = spawn(&mut world, 0.0);
    let b = spawn(&mut world, 0.0);
    world.set_parent(Some(a), b);
    world.set_local_position(b, DVec3::new(1.0, 0.0, 0.0));

    world.set_rotation(a, Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
    assert!(dvec3_approx(world.position(b), DVec3::new(0.0, 0.0, -1.0)));
}

#[test]
fn attaching_keeps_world_transform() {
    let mut world = World::new();
    let a = spawn(&mut world, 2.0);
    let b = spawn(&mut world, 3.0);
    world.set_parent(Some(a), b);

    assert_eq!(world.parent(b), Some(a));
    assert!(dvec3_approx(world.position(b), DVec3::new(3.0, 0.0, 0.0)));
    assert!(dvec3_approx(world.local_transform(b).pos, DVec3::new(1.0, 0.0, 0.0)));
}

#[test]
fn child_listed_once_under_parent() {
    let mut world = World::new();
    let a = spawn(&mut world, 0.0);
    let b = spawn(&mut world, 0.0);
    let c = spawn(&mut world, 0.0);

    world.set_parent(Some(a), b);
    world.set_parent(Some(a), c);
    world.set_parent(Some(a), b);

    let children: Vec<_> = world.children(a).collect();
    assert_eq!(children.len(), 2);
    assert_eq!(children.iter().filter(|&&e| e == b).count(), 1);
    assert!(children.contains(&c));
}

#[test]
fn reparenting_moves_child_between_parents() {
    let mut world = World::new();
    let a = spawn(&mut world, 0.0);
    let b = spawn(&mut world, 10.0);
    let c = spawn(&mut world, 0.0);

    world.set_parent(Some(a), c);
    world.set_parent(Some(b), c);
    assert_eq!(world.children(a).count(), 0);
    assert_eq!(world.children(b).collect::<Vec<_>>(), vec![c]);

    world.set_position(b, DVec3::new(11.0, 0.0, 0.0));
    assert!(dvec3_approx(world.position(c), DVec3::new(1.0, 0.0, 0.0)));
}

#[test]
fn cycle_is_rejected() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut world = World::new();
    let a = spawn(&mut world, 0.0);
    let b = spawn(&mut world, 0.0);
    let c = spawn(&mut world, 0.0);
    world.set_parent(Some(a), b);
    world.set_parent(Some(b), c);

    world.set_parent(Some(c), a);
    assert_eq!(world.parent(a), None);
    assert_eq!(world.parent(c), Some(b));
    assert!(world.is_descendant(a, c));

    world.set_parent(Some(a), a);
    assert_eq!(world.parent(a), None);
}

#[test]
fn destroying_parent_detaches_children_in_place() {
    let mut world = World::new();
    let a = spawn(&mut world, 1.0);
    let b = spawn(&mut world, 4.0);
    world.set_parent(Some(a), b);

    world.destroy_entity(a);
    assert!(world.has_entity(b));
    assert_eq!(world.parent(b), None);
    assert!(dvec3_approx(world.position(b), DVec3::new(4.0, 0.0, 0.0)));
}

#[test]
fn keep_children_move_leaves_children_behind() {
    let mut world = World::new();
    let a = spawn(&mut world, 0.0);
    let b = spawn(&mut world, 1.0);
    world.set_parent(Some(a), b);

    let mut tr = world.transform(a);
    tr.pos = DVec3::new(-3.0, 0.0, 0.0);
    world.set_transform_keep_children(a, tr);
    assert!(dvec3_approx(world.position(b), DVec3::new(1.0, 0.0, 0.0)));

    world.set_position(a, DVec3::ZERO);
    assert!(dvec3_approx(world.position(b), DVec3::new(4.0, 0.0, 0.0)));
}

// ============================================================================
// Names and partitions
// ============================================================================

#[test]
fn find_by_name_searches_children_or_roots() {
    let mut world = World::new();
    let root = spawn(&mut world, 0.0);
    let hand = spawn(&mut world, 0.0);
    world.set_entity_name(root, "body");
    world.set_entity_name(hand, "hand");
    world.set_parent(Some(root), hand);

    assert_eq!(world.find_by_name(None, "body"), Some(root));
    assert_eq!(world.find_by_name(None, "hand"), None);
    assert_eq!(world.find_by_name(Some(root), "hand"), Some(hand));
    assert_eq!(world.entity_name(hand), "hand");
}

#[test]
fn destroying_partition_destroys_its_entities() {
    let mut world = World::new();
    let main = world.active_partition();
    let keep = spawn(&mut world, 0.0);

    let level = world.create_partition("level");
    world.set_active_partition(level);
    let doomed = spawn(&mut world, 0.0);
    world.set_active_partition(main);

    assert_eq!(world.entity_partition(doomed), level);
    assert_eq!(world.partition(level).map(|p| p.name.as_str()), Some("level"));

    world.destroy_partition(level);
    assert!(world.has_entity(keep));
    assert!(!world.has_entity(doomed));
    assert!(world.partition(level).is_none());
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn serialized_world_reads_back() -> anyhow::Result<()> {
    let mut world = World::new();
    let a = world.create_entity(DVec3::new(1.0, 2.0, 3.0), Quat::from_rotation_z(0.5));
    let b = spawn(&mut world, 0.0);
    let c = spawn(&mut world, 7.0);
    world.set_scale(c, Vec3::new(2.0, 2.0, 2.0));
    world.set_entity_name(a, "parent");
    world.set_entity_name(b, "child");
    world.set_parent(Some(a), b);
    world.set_local_position(b, DVec3::new(0.0, 1.0, 0.0));

    let mut stream = OutputMemoryStream::new();
    world.serialize(&mut stream);

    let mut read = World::new();
    let mut map = EntityMap::new();
    read.deserialize(&mut InputMemoryStream::new(stream.data()), &mut map, true)?;

    assert_eq!(read.entity_count(), 3);
    for e in [a, b, c] {
        let copy = map.get(Some(e)).expect("mapped entity");
        assert_eq!(read.transform(copy), world.transform(e));
        assert_eq!(read.entity_name(copy), world.entity_name(e));
    }

    let (ra, rb) = (map.get(Some(a)).expect("a"), map.get(Some(b)).expect("b"));
    assert_eq!(read.parent(rb), Some(ra));
    assert_eq!(read.children(ra).collect::<Vec<_>>(), vec![rb]);

    read.set_position(ra, DVec3::ZERO);
    assert!(dvec3_approx(read.local_transform(rb).pos, DVec3::new(0.0, 1.0, 0.0)));
    Ok(())
}

#[test]
fn truncated_world_fails_to_read() {
    let mut world = World::new();
    spawn(&mut world, 1.0);
    let mut stream = OutputMemoryStream::new();
    world.serialize(&mut stream);

    let data = &stream.data()[..stream.len() - 3];
    let mut read = World::new();
    let mut map = EntityMap::new();
    assert!(read.deserialize(&mut InputMemoryStream::new(data), &mut map, true).is_err());
}
