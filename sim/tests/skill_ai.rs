mod common;

use common::*;
use sim::{
    combat::AttackResult,
    monster::{SkillAiEvent, SkillAiFlags, SkillAiHandler, SkillAiState},
    AiState, Area, CharacterSkill, CharacterStat, Coord, DamageInfo, Handle, MapId, MonsterSpecies,
    SimEvent, SpawnRule, World,
};
use std::time::Duration;

fn spawn_rule_at(x: i32, y: i32) -> Option<SpawnRule> {
    Some(SpawnRule::new(
        Some(Area::new(x, y, x, y)),
        Duration::from_secs(1),
        Duration::from_secs(1),
    ))
}

fn world_with_handler(handler: SkillAiHandler) -> (World, MapId) {
    let mut data = game_data();
    data.add_species(MonsterSpecies {
        hp: 300,
        ..MonsterSpecies::new("mother", "Mother")
    });
    data.register_skill_ai("mother", handler);
    world_with(ROOM, data)
}

fn queue_hit(world: &mut World, source: Handle, target: Handle, damage: i32) {
    let time = world.time().elapsed;
    world
        .registry_mut()
        .combat_mut(target)
        .unwrap()
        .queue_damage(DamageInfo {
            source,
            target,
            damage,
            hit_count: 1,
            time,
            attack_motion_time: Duration::ZERO,
            hit_lock_time: Duration::ZERO,
            skill: None,
            result: AttackResult::NormalDamage,
        });
}

fn summon_once(state: &mut SkillAiState<'_, '_>, _: AiState) {
    if state.is_named_event_off_cooldown("brood") {
        state.summon_minions(2, "poring", 3, 3, Coord::new(0, 0));
        state.set_event_cooldown("brood", -1);
    }
}

#[test]
fn summoned_minions_follow_their_caller() {
    let (mut world, map) = world_with_handler(SkillAiHandler::new(summon_once));
    player(&mut world, map, "alice", 3, 3);
    let mother = world.create_monster(map, "mother", spawn_rule_at(12, 6)).unwrap();

    let summoned = tick_until(&mut world, Duration::from_secs(3), |world| {
        world.registry().monster(mother).map_or(false, |monster| monster.child_count() > 0)
    });
    assert!(summoned);
    tick_for(&mut world, Duration::from_secs(2));

    let children: Vec<Handle> = world.registry().monster(mother).unwrap().children().iter().collect();
    assert_eq!(children.len(), 2);
    for child in children {
        let minion = world.registry().monster(child).unwrap();
        assert_eq!(minion.master, Some(mother));
        assert!(!minion.gives_experience);
        assert!(world.map(map).unwrap().entities().contains(child));
    }
}

fn idle(_: &mut SkillAiState<'_, '_>, _: AiState) {}

fn last_stand(state: &mut SkillAiState<'_, '_>) {
    if state.is_named_event_off_cooldown("last_stand") {
        state.set_event_cooldown("last_stand", -1);
        state.enter_post_death_phase();
    }
}

#[test]
fn death_handler_can_cancel_the_first_death() {
    let (mut world, map) =
        world_with_handler(SkillAiHandler::new(idle).with_on_die(last_stand));
    let alice = player(&mut world, map, "alice", 3, 3);
    let mother = world.create_monster(map, "mother", spawn_rule_at(6, 3)).unwrap();
    world.take_outbox();

    queue_hit(&mut world, alice, mother, 1000);
    world.tick(sim::FRAME_DURATION);

    assert_eq!(world.registry().monster(mother).unwrap().current_state, AiState::Special);
    let combat = world.registry().combat(mother).unwrap();
    assert_eq!(combat.stat(CharacterStat::Hp), 1);
    assert!(!combat.is_targetable);
    assert!(!world.registry().world_object(mother).unwrap().is_dead());
    let outbox = world.take_outbox();
    assert!(events_for(&outbox, alice).contains(&SimEvent::TargetableChanged {
        entity: mother,
        targetable: false,
    }));

    queue_hit(&mut world, alice, mother, 1000);
    world.tick(sim::FRAME_DURATION);
    assert_eq!(world.registry().monster(mother).unwrap().current_state, AiState::Dead);
}

fn wave(state: &mut SkillAiState<'_, '_>) {
    state.send_emote(7);
}

fn greet(state: &mut SkillAiState<'_, '_>, _: AiState) {
    if state.try_cast(CharacterSkill::NoCast, 1, 1000, 0, 5000, SkillAiFlags::NONE) {
        state.on_cast_success(SkillAiEvent(wave));
    }
}

#[test]
fn cast_success_event_runs_once_per_cast() {
    let (mut world, map) = world_with_handler(SkillAiHandler::new(greet));
    let alice = player(&mut world, map, "alice", 3, 3);
    let mother = world.create_monster(map, "mother", spawn_rule_at(6, 3)).unwrap();
    world.take_outbox();

    tick_for(&mut world, Duration::from_secs(3));

    let outbox = world.take_outbox();
    let emotes = events_for(&outbox, alice)
        .into_iter()
        .filter(|event| *event == SimEvent::Emote { entity: mother, emote: 7 })
        .count();
    assert_eq!(emotes, 1);
}
