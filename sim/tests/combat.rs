mod common;

use common::*;
use sim::{
    combat::{self, AttackResult},
    AiState, Area, AttackFlags, CharacterStat, DamageInfo, Handle, MonsterSpecies, RemovalReason,
    Request, SimEvent, SpawnRule, World,
};
use std::time::Duration;

fn spawn_rule_at(x: i32, y: i32) -> Option<SpawnRule> {
    Some(SpawnRule::new(
        Some(Area::new(x, y, x, y)),
        Duration::from_secs(1),
        Duration::from_secs(1),
    ))
}

fn queue_hit(world: &mut World, source: Handle, target: Handle, damage: i32) {
    let time = world.time().elapsed;
    let info = DamageInfo {
        source,
        target,
        damage,
        hit_count: 1,
        time,
        attack_motion_time: Duration::ZERO,
        hit_lock_time: Duration::ZERO,
        skill: None,
        result: AttackResult::NormalDamage,
    };
    world
        .registry_mut()
        .combat_mut(target)
        .unwrap()
        .queue_damage(info);
}

#[test]
fn second_lethal_hit_does_not_kill_twice() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let poring = world.create_monster(map, "poring", spawn_rule_at(6, 3)).unwrap();
    world.take_outbox();

    queue_hit(&mut world, alice, poring, 100);
    queue_hit(&mut world, alice, poring, 100);
    world.tick(sim::FRAME_DURATION);

    let monster = world.registry().monster(poring).unwrap();
    assert_eq!(monster.current_state, AiState::Dead);
    assert!(world.registry().combat(poring).unwrap().damage_queue().is_empty());

    let outbox = world.take_outbox();
    let events = events_for(&outbox, alice);
    let deaths = events
        .iter()
        .filter(|event| {
            **event
                == SimEvent::Removed {
                    entity: poring,
                    reason: RemovalReason::Dead,
                }
        })
        .count();
    assert_eq!(deaths, 1);
    let exp_gains = events
        .iter()
        .filter(|event| matches!(event, SimEvent::ExpGain { .. }))
        .count();
    assert_eq!(exp_gains, 1);
    assert_eq!(world.registry().player(alice).unwrap().exp, 10);
}

#[test]
fn monsters_without_a_spawn_rule_are_freed_on_death() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let poring = world.create_monster(map, "poring", None).unwrap();

    world
        .handle_request(alice, Request::AdminKill { target: poring })
        .unwrap();
    assert!(!world.registry().is_alive(poring));
    assert!(!world.map(map).unwrap().entities().contains(poring));
    assert!(world
        .handle_request(alice, Request::AdminKill { target: poring })
        .is_err());
}

#[test]
fn level_difference_cut_has_a_floor() {
    let mut data = game_data();
    data.add_species(MonsterSpecies {
        level: 99,
        ..MonsterSpecies::new("elder", "Elder")
    });
    data.add_species(MonsterSpecies {
        level: 1,
        ..MonsterSpecies::new("youngling", "Youngling")
    });
    let (mut world, map) = world_with(ROOM, data);
    let alice = player(&mut world, map, "alice", 3, 3);
    let elder = world.create_monster(map, "elder", spawn_rule_at(6, 3)).unwrap();
    let youngling = world.create_monster(map, "youngling", spawn_rule_at(6, 6)).unwrap();

    let flags = AttackFlags::PHYSICAL | AttackFlags::IGNORE_EVASION | AttackFlags::IGNORE_DEFENSE;
    let (against_elder, against_youngling) = world
        .with_map(map, |_, ctx| {
            let elder = combat::calculate_combat_result_using_set_attack_power(
                ctx, alice, elder, 100, 100, 1., 1, flags, None, None,
            )
            .unwrap();
            let youngling = combat::calculate_combat_result_using_set_attack_power(
                ctx, alice, youngling, 100, 100, 1., 1, flags, None, None,
            )
            .unwrap();
            (elder, youngling)
        })
        .unwrap();

    assert_eq!(against_youngling.damage, 100);
    assert_eq!(against_elder.damage, 10);
    assert_eq!(against_elder.result, AttackResult::NormalDamage);
}

#[test]
fn zero_damage_only_on_a_miss() {
    let mut data = game_data();
    data.add_species(MonsterSpecies {
        agi: 46,
        def: 950,
        ..MonsterSpecies::new("shell", "Shell")
    });
    let (mut world, map) = world_with(ROOM, data);
    let alice = player(&mut world, map, "alice", 3, 3);
    let shell = world.create_monster(map, "shell", spawn_rule_at(6, 3)).unwrap();

    let results = world
        .with_map(map, |_, ctx| {
            (0..200)
                .map(|_| combat::calculate_combat_result(ctx, alice, shell, 1., 1, AttackFlags::PHYSICAL, None, None))
                .collect::<Result<Vec<_>, _>>()
        })
        .unwrap()
        .unwrap();

    let mut misses = 0;
    for info in &results {
        match info.result {
            AttackResult::Miss => {
                misses += 1;
                assert_eq!(info.damage, 0);
                assert_eq!(info.hit_count, 0);
            }
            AttackResult::NormalDamage => assert!(info.damage >= 1),
        }
    }
    assert!(misses > 0);
    assert!(misses < results.len());
}

#[test]
fn monster_hit_lock_is_capped() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let poring = world.create_monster(map, "poring", spawn_rule_at(6, 3)).unwrap();
    world.take_outbox();

    queue_hit(&mut world, alice, poring, 1);
    world.tick(sim::FRAME_DURATION);

    let cap = world.config().monster_hit_lock_cap;
    let outbox = world.take_outbox();
    let lock = events_for(&outbox, alice).into_iter().find_map(|event| match event {
        SimEvent::Hit { entity, lock_time, .. } if entity == poring => Some(lock_time),
        _ => None,
    });
    assert_eq!(lock, Some(cap));
    let combat = world.registry().combat(poring).unwrap();
    assert_eq!(
        combat.stat(CharacterStat::Hp),
        combat.stat(CharacterStat::MaxHp) - 1
    );
}
