mod common;

use common::*;
use sim::{Area, Coord, RemovalReason, Request, SimConfig, SimEvent, SpawnRule};
use std::time::Duration;

fn dummy_at(x: i32, y: i32) -> Option<SpawnRule> {
    Some(SpawnRule::new(
        Some(Area::new(x, y, x, y)),
        Duration::from_secs(1),
        Duration::from_secs(1),
    ))
}

#[test]
fn players_see_each_other_on_entry() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    world.take_outbox();
    let bob = player(&mut world, map, "bob", 6, 3);

    assert!(sees(&world, alice, bob));
    assert!(sees(&world, bob, alice));
    assert!(!sees(&world, alice, alice));

    let outbox = world.take_outbox();
    let created = |recipient, subject| {
        events_for(&outbox, recipient)
            .iter()
            .any(|event| matches!(event, SimEvent::Created { entity, .. } if *entity == subject))
    };
    assert!(created(alice, bob));
    assert!(created(bob, alice));
}

#[test]
fn teleport_leaves_no_residual_visibility() {
    let field = long_field();
    let (mut world, map) = world(&field);
    let alice = player(&mut world, map, "alice", 3, 3);
    let bob = player(&mut world, map, "bob", 6, 3);
    let dummy = world.create_monster(map, "dummy", dummy_at(5, 5)).unwrap();
    assert!(sees(&world, alice, dummy));
    assert!(sees(&world, alice, bob));
    world.take_outbox();

    world
        .handle_request(
            alice,
            Request::AdminTeleport {
                position: Coord::new(65, 5),
            },
        )
        .unwrap();

    assert!(!sees(&world, alice, bob));
    assert!(!sees(&world, bob, alice));
    assert!(!sees(&world, alice, dummy));
    assert!(sees(&world, bob, dummy));

    let outbox = world.take_outbox();
    assert!(events_for(&outbox, bob).contains(&SimEvent::Removed {
        entity: alice,
        reason: RemovalReason::Teleport,
    }));
    assert!(events_for(&outbox, alice).contains(&SimEvent::RemoveAllEntities));

    world
        .handle_request(
            alice,
            Request::AdminTeleport {
                position: Coord::new(4, 4),
            },
        )
        .unwrap();
    assert!(sees(&world, alice, bob));
    assert!(sees(&world, bob, alice));
    assert!(sees(&world, alice, dummy));
}

#[test]
fn walking_out_of_range_drops_visibility() {
    let field = long_field();
    let (mut world, map) = world(&field);
    let alice = player(&mut world, map, "alice", 3, 5);
    let bob = player(&mut world, map, "bob", 5, 5);
    world.take_outbox();

    let destination = Coord::new(30, 5);
    world
        .handle_request(bob, Request::Move { target: destination })
        .unwrap();
    let arrived = tick_until(&mut world, Duration::from_secs(10), |world| {
        world
            .registry()
            .world_object(bob)
            .map_or(false, |obj| obj.position() == destination && !obj.is_moving())
    });
    assert!(arrived);

    assert!(!sees(&world, alice, bob));
    assert!(!sees(&world, bob, alice));
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, alice)
        .iter()
        .any(|event| matches!(event, SimEvent::Removed { entity, .. } if *entity == bob)));
}

#[test]
fn hidden_players_drop_out_of_view() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let bob = player(&mut world, map, "bob", 6, 3);
    world.take_outbox();

    world.handle_request(alice, Request::AdminHide).unwrap();
    assert!(!sees(&world, bob, alice));
    assert!(sees(&world, alice, bob));
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, bob).contains(&SimEvent::Removed {
        entity: alice,
        reason: RemovalReason::Hidden,
    }));
    assert!(events_for(&outbox, alice).contains(&SimEvent::AdminHideStatus { hidden: true }));
    assert!(!events_for(&outbox, alice)
        .iter()
        .any(|event| matches!(event, SimEvent::Removed { entity, .. } if *entity == alice)));

    world
        .handle_request(bob, Request::Move { target: Coord::new(7, 3) })
        .unwrap();
    tick_for(&mut world, Duration::from_secs(2));
    assert_eq!(world.registry().world_object(bob).unwrap().position(), Coord::new(7, 3));
    assert!(sees(&world, alice, bob));
    assert!(!sees(&world, bob, alice));

    world
        .handle_request(alice, Request::Move { target: Coord::new(4, 6) })
        .unwrap();
    tick_for(&mut world, Duration::from_secs(2));
    assert_eq!(world.registry().world_object(alice).unwrap().position(), Coord::new(4, 6));
    assert!(sees(&world, alice, bob));
    assert!(!sees(&world, bob, alice));
    let outbox = world.take_outbox();
    assert!(!events_for(&outbox, bob)
        .iter()
        .any(|event| matches!(event, SimEvent::Created { entity, .. } if *entity == alice)));

    world.handle_request(alice, Request::AdminHide).unwrap();
    assert!(sees(&world, bob, alice));
}

#[test]
fn spawn_immune_players_stay_unseen_until_immunity_ends() {
    let (mut world, map) = world_with_config(
        ROOM,
        game_data(),
        SimConfig {
            spawn_immunity: Duration::from_secs(1),
            ..config()
        },
    );
    let alice = player(&mut world, map, "alice", 3, 3);
    let bob = player(&mut world, map, "bob", 6, 3);
    assert!(!sees(&world, alice, bob));
    assert!(!sees(&world, bob, alice));
    world.take_outbox();

    tick_for(&mut world, Duration::from_millis(1500));

    assert!(sees(&world, alice, bob));
    assert!(sees(&world, bob, alice));
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, alice)
        .iter()
        .any(|event| matches!(event, SimEvent::Created { entity, .. } if *entity == bob)));
}

#[test]
fn acting_ends_spawn_immunity_early() {
    let (mut world, map) = world_with_config(
        ROOM,
        game_data(),
        SimConfig {
            spawn_immunity: Duration::from_secs(5),
            ..config()
        },
    );
    let alice = player(&mut world, map, "alice", 3, 3);
    let bob = player(&mut world, map, "bob", 6, 3);
    world.take_outbox();

    world
        .handle_request(alice, Request::Move { target: Coord::new(3, 6) })
        .unwrap();

    assert!(sees(&world, bob, alice));
    assert!(!sees(&world, alice, bob));
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, bob)
        .iter()
        .any(|event| matches!(event, SimEvent::Created { entity, .. } if *entity == alice)));

    world
        .handle_request(bob, Request::AdminKill { target: alice })
        .unwrap();
    world.handle_request(alice, Request::Respawn).unwrap();
    assert!(!sees(&world, bob, alice));
}

#[test]
fn observers_get_one_notice_per_monster_death() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let dummy = world.create_monster(map, "dummy", dummy_at(6, 3)).unwrap();
    world.take_outbox();

    world
        .handle_request(alice, Request::AdminKill { target: dummy })
        .unwrap();
    assert!(!sees(&world, alice, dummy));
    let outbox = world.take_outbox();
    let removals = events_for(&outbox, alice)
        .into_iter()
        .filter(|event| matches!(event, SimEvent::Removed { entity, .. } if *entity == dummy))
        .count();
    assert_eq!(removals, 1);
}
