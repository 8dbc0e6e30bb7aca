mod common;

use common::*;
use sim::{
    monster::{self, SkillAiHandler, SkillAiState},
    AiState, AiType, Area, CharacterStat, Handle, Request, SimEvent, SpawnRule,
};
use std::time::Duration;

fn rule(area: Area, respawn: Duration) -> Option<SpawnRule> {
    Some(SpawnRule::new(Some(area), respawn, respawn))
}

#[test]
fn aggressive_monsters_pick_up_nearby_players() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let wolf = world
        .create_monster(map, "wolf", rule(Area::new(12, 6, 12, 6), Duration::from_secs(5)))
        .unwrap();

    let targeted = tick_until(&mut world, Duration::from_secs(3), |world| {
        world.registry().monster(wolf).map_or(false, |monster| monster.target == Some(alice))
    });
    assert!(targeted);
    assert_ne!(world.registry().monster(wolf).unwrap().current_state, AiState::Idle);

    let max_hp = world.registry().combat(alice).unwrap().stat(CharacterStat::MaxHp);
    let bitten = tick_until(&mut world, Duration::from_secs(10), |world| {
        world
            .registry()
            .combat(alice)
            .map_or(false, |combat| combat.stat(CharacterStat::Hp) < max_hp)
    });
    assert!(bitten);
}

#[test]
fn monsters_idle_on_an_empty_map() {
    let (mut world, map) = world(ROOM);
    let wolf = world
        .create_monster(map, "wolf", rule(Area::new(12, 6, 12, 6), Duration::from_secs(5)))
        .unwrap();
    let start = world.registry().world_object(wolf).unwrap().position();

    tick_for(&mut world, Duration::from_millis(1500));

    let monster = world.registry().monster(wolf).unwrap();
    assert_eq!(monster.current_state, AiState::Idle);
    assert!(monster.next_ai_update() > world.time().elapsed);
    assert_eq!(world.registry().world_object(wolf).unwrap().position(), start);
}

#[test]
fn dead_monsters_respawn_inside_their_area() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let area = Area::new(10, 6, 14, 8);
    let poring = world
        .create_monster(map, "poring", rule(area, Duration::from_secs(1)))
        .unwrap();

    world
        .handle_request(alice, Request::AdminKill { target: poring })
        .unwrap();
    assert_eq!(world.registry().monster(poring).unwrap().current_state, AiState::Dead);
    assert!(!world.registry().world_object(poring).unwrap().is_active);
    assert!(world.map(map).unwrap().entities().contains(poring));
    world.take_outbox();

    let respawned = tick_until(&mut world, Duration::from_secs(5), |world| {
        world
            .registry()
            .monster(poring)
            .map_or(false, |monster| monster.current_state != AiState::Dead)
    });
    assert!(respawned);

    let obj = world.registry().world_object(poring).unwrap();
    assert!(obj.is_active);
    assert!(area.contains(obj.position()));
    let combat = world.registry().combat(poring).unwrap();
    assert_eq!(combat.stat(CharacterStat::Hp), combat.stat(CharacterStat::MaxHp));
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, alice)
        .iter()
        .any(|event| matches!(event, SimEvent::Created { entity, .. } if *entity == poring)));
}

#[test]
fn minions_die_with_their_master() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let master = world
        .create_monster(map, "wolf", rule(Area::new(14, 6, 14, 6), Duration::from_secs(5)))
        .unwrap();
    let minion = world.create_monster(map, "poring", None).unwrap();
    world
        .with_map(map, |_, ctx| monster::add_child(ctx, master, minion))
        .unwrap();

    let child = world.registry().monster(minion).unwrap();
    assert_eq!(child.master, Some(master));
    assert_eq!(child.ai_type, AiType::Minion);
    assert_eq!(world.registry().monster(master).unwrap().child_count(), 1);

    world
        .handle_request(alice, Request::AdminKill { target: master })
        .unwrap();
    assert!(!world.registry().is_alive(minion));
    assert!(!world.map(map).unwrap().entities().contains(minion));
    assert_eq!(world.registry().monster(master).unwrap().child_count(), 0);
}

#[test]
fn monsters_respawning_together_get_different_first_updates() {
    let (mut world, map) = world(ROOM);
    let alice = player(&mut world, map, "alice", 3, 3);
    let porings: Vec<Handle> = (0..4)
        .map(|i| {
            world
                .create_monster(map, "poring", rule(Area::new(10 + i, 6, 10 + i, 6), Duration::from_secs(1)))
                .unwrap()
        })
        .collect();

    for &poring in &porings {
        world
            .handle_request(alice, Request::AdminKill { target: poring })
            .unwrap();
    }
    let respawned = tick_until(&mut world, Duration::from_secs(5), |world| {
        porings.iter().any(|&poring| {
            world
                .registry()
                .monster(poring)
                .map_or(false, |monster| monster.current_state != AiState::Dead)
        })
    });
    assert!(respawned);

    let now = world.time().elapsed;
    let updates: Vec<Duration> = porings
        .iter()
        .map(|&poring| {
            let monster = world.registry().monster(poring).unwrap();
            assert_ne!(monster.current_state, AiState::Dead);
            monster.next_ai_update()
        })
        .collect();
    assert!(updates.iter().all(|&update| update > now));
    assert!(updates.iter().any(|&update| update != updates[0]));
}

fn howl(state: &mut SkillAiState<'_, '_>, _: AiState) {
    state.send_emote(3);
}

#[test]
fn throttled_monsters_neither_think_nor_scan_skills() {
    let mut data = game_data();
    data.register_skill_ai("wolf", SkillAiHandler::new(howl));
    let (mut world, map) = world_with(ROOM, data);
    let alice = player(&mut world, map, "alice", 3, 3);
    let wolf = world
        .create_monster(map, "wolf", rule(Area::new(6, 3, 6, 3), Duration::from_secs(5)))
        .unwrap();
    world
        .registry_mut()
        .monster_mut(wolf)
        .unwrap()
        .set_next_ai_update(Duration::from_secs(60));
    world.take_outbox();

    tick_for(&mut world, Duration::from_secs(3));

    let monster = world.registry().monster(wolf).unwrap();
    assert_eq!(monster.current_state, AiState::Idle);
    assert_eq!(monster.target, None);
    let outbox = world.take_outbox();
    assert!(!events_for(&outbox, alice)
        .iter()
        .any(|event| matches!(event, SimEvent::Emote { entity, .. } if *entity == wolf)));

    let now = world.time().elapsed;
    world.registry_mut().monster_mut(wolf).unwrap().set_next_ai_update(now);
    let targeted = tick_until(&mut world, Duration::from_secs(3), |world| {
        world.registry().monster(wolf).map_or(false, |monster| monster.target == Some(alice))
    });
    assert!(targeted);
}
