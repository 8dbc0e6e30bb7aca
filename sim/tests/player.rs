mod common;

use common::*;
use sim::{
    area::int_distance, player::CharacterSnapshot, ActorState, Area, CharacterSkill, CharacterStat,
    Coord, RequestError, Request, SimEvent, SkillTarget, SpawnRule,
};
use std::time::Duration;

#[test]
fn player_chases_and_attacks_its_target() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 2, 2);
    let rule = SpawnRule::new(
        Some(Area::new(14, 7, 14, 7)),
        Duration::from_secs(1),
        Duration::from_secs(1),
    );
    let dummy = world.create_monster(map, "dummy", Some(rule)).unwrap();
    let max_hp = world
        .registry()
        .combat(dummy)
        .unwrap()
        .stat(CharacterStat::MaxHp);

    world
        .handle_request(alice, Request::Attack { target: dummy })
        .unwrap();
    let hit = tick_until(&mut world, Duration::from_secs(10), |world| {
        world
            .registry()
            .combat(dummy)
            .map_or(false, |combat| combat.stat(CharacterStat::Hp) < max_hp)
    });
    assert!(hit);

    let alice_at = world.registry().world_object(alice).unwrap().position();
    let dummy_at = world.registry().world_object(dummy).unwrap().position();
    let range = world
        .registry()
        .combat(alice)
        .unwrap()
        .stat(CharacterStat::Range);
    assert!(int_distance(alice_at, dummy_at) <= range);
    assert_eq!(world.registry().player(alice).unwrap().target, Some(dummy));
}

#[test]
fn killing_a_monster_grants_experience() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 2, 2);
    let poring = world.create_monster(map, "poring", None).unwrap();

    world
        .handle_request(alice, Request::Attack { target: poring })
        .unwrap();
    let mut exp_events = 0;
    let killed = tick_until(&mut world, Duration::from_secs(30), |world| {
        !world.registry().is_alive(poring)
    });
    assert!(killed);
    for outbound in world.take_outbox() {
        if outbound.recipients.contains(&alice) && matches!(outbound.event, SimEvent::ExpGain { .. }) {
            exp_events += 1;
        }
    }
    assert_eq!(exp_events, 1);
    assert_eq!(world.registry().player(alice).unwrap().exp, 10);

    world.tick(sim::FRAME_DURATION);
    assert_eq!(world.registry().player(alice).unwrap().target, None);
}

#[test]
fn dead_players_can_only_respawn() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let bob = player(&mut world, map, "bob", 5, 3);
    world.take_outbox();

    world
        .handle_request(bob, Request::AdminKill { target: alice })
        .unwrap();
    assert!(world.registry().world_object(alice).unwrap().is_dead());
    assert!(world.map(map).unwrap().players().contains(alice));
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, bob).contains(&SimEvent::Died { entity: alice }));

    assert_eq!(
        world.handle_request(
            alice,
            Request::Move {
                target: Coord::new(6, 6)
            }
        ),
        Err(RequestError::Dead)
    );
    world.handle_request(alice, Request::Respawn).unwrap();

    let combat = world.registry().combat(alice).unwrap();
    assert_eq!(combat.stat(CharacterStat::Hp), combat.stat(CharacterStat::MaxHp));
    assert_eq!(combat.stat(CharacterStat::Sp), combat.stat(CharacterStat::MaxSp));
    assert_eq!(
        world.registry().world_object(alice).unwrap().state,
        ActorState::Idle
    );
    assert_eq!(
        world.handle_request(alice, Request::Respawn),
        Err(RequestError::NotDead)
    );
}

#[test]
fn movement_requests_are_validated() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);

    let wall = Coord::new(8, 4);
    assert_eq!(
        world.handle_request(alice, Request::Move { target: wall }),
        Err(RequestError::Unwalkable(wall))
    );

    world
        .handle_request(alice, Request::SitStand { sitting: true })
        .unwrap();
    assert_eq!(
        world.handle_request(
            alice,
            Request::Move {
                target: Coord::new(12, 6)
            }
        ),
        Err(RequestError::CannotMove)
    );
    world
        .handle_request(alice, Request::SitStand { sitting: false })
        .unwrap();

    let destination = Coord::new(12, 6);
    world
        .handle_request(alice, Request::Move { target: destination })
        .unwrap();
    let arrived = tick_until(&mut world, Duration::from_secs(5), |world| {
        world
            .registry()
            .world_object(alice)
            .map_or(false, |obj| obj.position() == destination && !obj.is_moving())
    });
    assert!(arrived);
}

#[test]
fn requests_from_monsters_are_rejected() {
    let (mut world, map) = world(ROOM);
    player(&mut world, map, "alice", 3, 3);
    let poring = world.create_monster(map, "poring", None).unwrap();
    assert!(matches!(
        world.handle_request(poring, Request::StopAction),
        Err(RequestError::Component(_))
    ));
}

#[test]
fn newer_cast_request_replaces_the_queued_one() {
    let (mut world, map) = world(ROOM);
    let snapshot = CharacterSnapshot {
        level: 10,
        int: 50,
        learned_skills: vec![
            (CharacterSkill::FireBolt, 1),
            (CharacterSkill::ColdBolt, 1),
            (CharacterSkill::LightningBolt, 1),
        ],
        ..CharacterSnapshot::new("alice", Coord::new(3, 3))
    };
    let alice = world.create_player(map, &snapshot).unwrap();
    let rule = SpawnRule::new(
        Some(Area::new(6, 3, 6, 3)),
        Duration::from_secs(1),
        Duration::from_secs(1),
    );
    let dummy = world.create_monster(map, "dummy", Some(rule)).unwrap();
    let cast = |world: &mut sim::World, skill| {
        world
            .handle_request(
                alice,
                Request::UseSkill {
                    skill,
                    level: 1,
                    target: SkillTarget::Entity(dummy),
                },
            )
            .unwrap();
    };

    cast(&mut world, CharacterSkill::FireBolt);
    assert!(world.registry().combat(alice).unwrap().is_casting);
    cast(&mut world, CharacterSkill::ColdBolt);
    cast(&mut world, CharacterSkill::LightningBolt);

    let combat = world.registry().combat(alice).unwrap();
    assert_eq!(combat.casting_skill.map(|info| info.skill), Some(CharacterSkill::FireBolt));
    assert_eq!(combat.queued_cast.map(|info| info.skill), Some(CharacterSkill::LightningBolt));

    let mut cold_bolt_cast = false;
    let resumed = tick_until(&mut world, Duration::from_secs(3), |world| {
        let combat = world.registry().combat(alice).unwrap();
        let current = combat.casting_skill.map(|info| info.skill);
        cold_bolt_cast |= combat.is_casting && current == Some(CharacterSkill::ColdBolt);
        combat.is_casting && current == Some(CharacterSkill::LightningBolt)
    });
    assert!(resumed);
    assert!(!cold_bolt_cast);
}
