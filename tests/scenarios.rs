use archetype_ecs::{QueryDesc, World};

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health(i32);

#[test]
fn create_destroy_cycle_invalidates_old_handle() {
    let mut world = World::new();
    let e = world.create();
    assert!(world.is_alive(e));

    world.destroy(e);
    assert!(!world.is_alive(e));

    let reused = world.create();
    assert_eq!(reused.index(), e.index());
    assert_ne!(reused, e);
    assert!(world.is_alive(reused));
    assert!(!world.is_alive(e));
}

#[test]
fn archetype_migration_preserves_shared_components() {
    let mut world = World::new();
    let e = world.create();
    world.add(e, Position { x: 3.0, y: 4.0 }).unwrap();
    world.add(e, Health(100)).unwrap();

    // Adding Velocity migrates Position and Health into a third archetype.
    world.add(e, Velocity { dx: 1.0, dy: 0.0 }).unwrap();

    assert_eq!(world.get::<Position>(e), Some(&Position { x: 3.0, y: 4.0 }));
    assert_eq!(world.get::<Health>(e), Some(&Health(100)));
    assert_eq!(world.get::<Velocity>(e), Some(&Velocity { dx: 1.0, dy: 0.0 }));

    world.remove::<Velocity>(e).unwrap();
    assert!(!world.has::<Velocity>(e));
    assert_eq!(world.get::<Position>(e), Some(&Position { x: 3.0, y: 4.0 }));
    assert_eq!(world.get::<Health>(e), Some(&Health(100)));
}

#[test]
fn destroy_swap_erase_compacts_archetype_without_disturbing_others() {
    let mut world = World::new();
    let entities: Vec<_> = (0..5)
        .map(|i| {
            let e = world.create();
            world.add(e, Health(i)).unwrap();
            e
        })
        .collect();

    // Destroy a middle entity; the last row should swap into its place.
    world.destroy(entities[1]);

    for (i, &e) in entities.iter().enumerate() {
        if i == 1 {
            assert!(!world.is_alive(e));
        } else {
            assert_eq!(world.get::<Health>(e), Some(&Health(i as i32)));
        }
    }
}

#[test]
fn deferred_flush_orders_destroy_before_remove_before_add() {
    let mut world = World::new();
    let survivor = world.create();
    world.add(survivor, Position { x: 0.0, y: 0.0 }).unwrap();

    let doomed = world.create();
    world.add(doomed, Position { x: 1.0, y: 1.0 }).unwrap();

    world.defer_begin();
    world.remove::<Position>(survivor).unwrap();
    world.add(survivor, Velocity { dx: 2.0, dy: 2.0 }).unwrap();
    world.destroy(doomed);

    // Nothing takes effect until defer_end.
    assert!(world.has::<Position>(survivor));
    assert!(world.is_alive(doomed));

    world.defer_end();

    assert!(!world.has::<Position>(survivor));
    assert_eq!(world.get::<Velocity>(survivor), Some(&Velocity { dx: 2.0, dy: 2.0 }));
    assert!(!world.is_alive(doomed));
}

#[test]
fn deferred_destroy_supersedes_earlier_staged_mutations() {
    let mut world = World::new();
    let e = world.create();

    world.defer_begin();
    world.add(e, Position { x: 5.0, y: 5.0 }).unwrap();
    world.add(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
    world.destroy(e);
    world.defer_end();

    assert!(!world.is_alive(e));
}

#[test]
fn deferred_add_after_staged_destroy_is_a_no_op() {
    let mut world = World::new();
    let e = world.create();

    world.defer_begin();
    world.add(e, Position { x: 5.0, y: 5.0 }).unwrap();
    world.destroy(e);
    world.add(e, Velocity { dx: 1.0, dy: 1.0 }).unwrap();
    world.defer_end();

    assert!(!world.is_alive(e));
}

#[test]
fn query_sees_archetypes_created_both_before_and_after_registration() {
    let mut world = World::new();
    world.register::<Position>();
    world.register::<Velocity>();

    let e1 = world.create();
    world.add(e1, Position { x: 1.0, y: 1.0 }).unwrap();

    let desc = QueryDesc::new().include(world.component_id::<Position>().unwrap());
    let query = world.make_query(&desc);

    // A second, distinct archetype carrying Position is created after the
    // query already exists and must still be picked up.
    let e2 = world.create();
    world.add(e2, Position { x: 2.0, y: 2.0 }).unwrap();
    world.add(e2, Velocity { dx: 0.0, dy: 0.0 }).unwrap();

    let mut found = Vec::new();
    let mut cursor = world.iter(query);
    while let Some((entity, ptrs)) = cursor.next() {
        let pos = unsafe { *(ptrs[0] as *const Position) };
        found.push((entity, pos));
    }

    assert_eq!(found.len(), 2);
    assert!(found.iter().any(|&(e, p)| e == e1 && p == Position { x: 1.0, y: 1.0 }));
    assert!(found.iter().any(|&(e, p)| e == e2 && p == Position { x: 2.0, y: 2.0 }));
}
