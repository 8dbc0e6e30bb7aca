use crate::{
    actor,
    area::{direction_towards, int_distance},
    combat::{AttackFlags, AttackResult, CharacterStat, DamageInfo, Element, TimingStat},
    command::SimEvent,
    error::ComponentError,
    map::{self, Map},
    registry::Registry,
    skill::CharacterSkill,
    Context, Coord, Handle,
};
use rand::Rng;
use std::time::Duration;

/// Class ids in this range belong to scripted objects that can never be
/// attacked or assisted.
fn is_untouchable_class(class_id: i32) -> bool {
    (1000..4000).contains(&class_id)
}

pub fn is_valid_ally(registry: &Registry, target: Handle, source: Handle) -> bool {
    if target == source || !target.is_combatant() {
        return false;
    }
    let (Ok(target_obj), Ok(source_obj)) = (registry.world_object(target), registry.world_object(source))
    else {
        return false;
    };
    if !target_obj.is_active || target_obj.is_dead() {
        return false;
    }
    if target_obj.map != source_obj.map || target.kind() != source.kind() {
        return false;
    }
    !is_untouchable_class(target_obj.class_id)
}

pub fn is_valid_target(
    registry: &Registry,
    target: Handle,
    source: Option<Handle>,
    can_harm_allies: bool,
    now: Duration,
) -> bool {
    if Some(target) == source || !target.is_combatant() {
        return false;
    }
    let (Ok(obj), Ok(combat)) = (registry.world_object(target), registry.combat(target)) else {
        return false;
    };
    if !obj.is_active || obj.is_dead() || !combat.is_targetable {
        return false;
    }
    if obj.map.is_none() || obj.hidden || obj.is_target_immune(now) {
        return false;
    }
    if let Some(source) = source {
        let Ok(source_obj) = registry.world_object(source) else {
            return false;
        };
        if source_obj.map != obj.map {
            return false;
        }
        if !can_harm_allies && source.kind() == target.kind() {
            return false;
        }
    }
    !is_untouchable_class(obj.class_id)
}

/// Whether `attacker` can strike `target` from where it stands. `range`
/// defaults to the attacker's range stat.
pub fn can_attack_target(
    map: &Map,
    ctx: &Context,
    attacker: Handle,
    target: Handle,
    range: Option<i32>,
) -> bool {
    let (Ok(attacker_obj), Ok(attacker_combat)) =
        (ctx.registry.world_object(attacker), ctx.registry.combat(attacker))
    else {
        return false;
    };
    let (Ok(target_obj), Ok(target_combat)) =
        (ctx.registry.world_object(target), ctx.registry.combat(target))
    else {
        return false;
    };
    let range = range.unwrap_or_else(|| attacker_combat.stat(CharacterStat::Range));
    target_combat.is_targetable
        && int_distance(attacker_obj.position(), target_obj.position()) <= range
        && attacker_obj.map == Some(map.id())
        && map.has_line_of_sight(attacker_obj.position(), target_obj.position())
}

pub fn test_hit_vs_evasion(
    ctx: &mut Context,
    attacker: Handle,
    target: Handle,
    attacker_hit_bonus: i32,
    defender_flee_bonus: i32,
) -> Result<bool, ComponentError> {
    let attacker_combat = ctx.registry.combat(attacker)?;
    let target_combat = ctx.registry.combat(target)?;
    let attacker_hit =
        attacker_combat.stat(CharacterStat::Level) + attacker_combat.stat(CharacterStat::Dex);
    let mut defender_agi = target_combat.stat(CharacterStat::Agi);
    if let Ok(player) = ctx.registry.player(target) {
        defender_agi += player.max_learned_level(CharacterSkill::ImproveDodge) * 3;
    }
    let defender_flee = target_combat.stat(CharacterStat::Level) + defender_agi;
    let mut rate = attacker_hit + attacker_hit_bonus + 75 - defender_flee - defender_flee_bonus;
    rate = rate.max(5);
    if target.is_player() {
        rate = rate.min(95);
    }
    Ok(rate > ctx.rng.gen_range(0..100))
}

/// Timing for a hit from `attacker` on `target`, with no damage filled in.
pub fn prepare_targeted_skill_result(
    ctx: &Context,
    attacker: Handle,
    target: Handle,
    skill: Option<CharacterSkill>,
) -> Result<DamageInfo, ComponentError> {
    let attacker_combat = ctx.registry.combat(attacker)?;
    let target_combat = ctx.registry.combat(target)?;
    let motion = attacker_combat.timing(TimingStat::AttackMotionTime);
    let delay = attacker_combat.timing(TimingStat::AttackDelayTime).max(motion);
    let sprite = attacker_combat
        .timing(TimingStat::SpriteAttackTiming)
        .min(delay);
    Ok(DamageInfo {
        source: attacker,
        target,
        damage: 0,
        hit_count: 0,
        time: ctx.time.after(sprite),
        attack_motion_time: sprite,
        hit_lock_time: target_combat.timing(TimingStat::HitDelayTime),
        skill,
        result: AttackResult::NormalDamage,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn calculate_combat_result_using_set_attack_power(
    ctx: &mut Context,
    attacker: Handle,
    target: Handle,
    atk1: i32,
    atk2: i32,
    attack_multiplier: f32,
    hit_count: u8,
    flags: AttackFlags,
    skill: Option<CharacterSkill>,
    element: Option<Element>,
) -> Result<DamageInfo, ComponentError> {
    debug_assert!(
        is_valid_target(
            ctx.registry,
            target,
            Some(attacker),
            flags.contains(AttackFlags::CAN_HARM_ALLIES),
            ctx.now()
        ),
        "{:?} attacking invalid target {:?}",
        attacker,
        target
    );
    let base_damage = ctx.rng.gen_range(atk1..=atk2.max(atk1));

    let element_modifier = match ctx.registry.monster(target) {
        Ok(monster) => ctx
            .data
            .element_table
            .attack_modifier(element.unwrap_or_default(), monster.species.element),
        Err(_) => 100,
    };

    let evade = flags.contains(AttackFlags::PHYSICAL)
        && !flags.contains(AttackFlags::IGNORE_EVASION)
        && !test_hit_vs_evasion(ctx, attacker, target, 0, 0)?;

    let target_combat = ctx.registry.combat(target)?;
    let mut defence_cut = 1.;
    let mut sub_defence = 0.;
    if !flags.contains(AttackFlags::IGNORE_DEFENSE) {
        if flags.contains(AttackFlags::PHYSICAL) {
            let def = target_combat.stat(CharacterStat::Def);
            defence_cut = 0.99f32.powi(def - 1);
            sub_defence = target_combat.stat(CharacterStat::Vit) as f32 * 0.7;
            if def > 900 {
                sub_defence = 999_999.;
            }
        }
        if flags.contains(AttackFlags::MAGICAL) {
            let mdef = target_combat.stat(CharacterStat::MDef);
            defence_cut = 0.99f32.powi(mdef - 1);
            sub_defence = target_combat.stat(CharacterStat::Int) as f32 * 0.7;
            if mdef > 900 {
                sub_defence = 999_999.;
            }
        }
    }

    let mut damage = (base_damage as f32 * attack_multiplier * (element_modifier as f32 / 100.)
        * defence_cut
        - sub_defence) as i32;
    damage = damage.max(1);

    let level_difference = (target_combat.stat(CharacterStat::Level)
        - ctx.registry.combat(attacker)?.stat(CharacterStat::Level)) as f32;
    let level_cut = if target.is_monster() {
        (1. - 0.015 * level_difference).clamp(0.1, 1.)
    } else {
        (1. - 0.005 * level_difference).clamp(0.5, 1.)
    };
    damage = ((level_cut * damage as f32) as i32).max(1);

    let mut hit_count = hit_count;
    let mut result = AttackResult::NormalDamage;
    if element_modifier == 0 || evade {
        damage = 0;
        hit_count = 0;
        result = AttackResult::Miss;
    }

    let mut info = prepare_targeted_skill_result(ctx, attacker, target, skill)?;
    info.damage = damage;
    info.hit_count = hit_count;
    info.result = result;
    Ok(info)
}

/// Rolls damage using the attacker's own physical or magical attack range.
#[allow(clippy::too_many_arguments)]
pub fn calculate_combat_result(
    ctx: &mut Context,
    attacker: Handle,
    target: Handle,
    attack_multiplier: f32,
    hit_count: u8,
    flags: AttackFlags,
    skill: Option<CharacterSkill>,
    element: Option<Element>,
) -> Result<DamageInfo, ComponentError> {
    let combat = ctx.registry.combat(attacker)?;
    let (atk1, atk2) = if flags.contains(AttackFlags::MAGICAL) {
        (
            combat.stat(CharacterStat::MagicAtkMin),
            combat.stat(CharacterStat::MagicAtkMax),
        )
    } else {
        (
            combat.stat(CharacterStat::Attack),
            combat.stat(CharacterStat::Attack2),
        )
    };
    let atk1 = atk1.max(1);
    let atk2 = atk2.max(atk1);
    calculate_combat_result_using_set_attack_power(
        ctx,
        attacker,
        target,
        atk1,
        atk2,
        attack_multiplier,
        hit_count,
        flags,
        skill,
        element,
    )
}

fn extend_attack_cooldown(ctx: &mut Context, handle: Handle, delay: Duration, motion: Duration) {
    let now = ctx.now();
    let delta = ctx.time.delta;
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if obj.attack_cooldown + delta + Duration::from_millis(5) < now {
        obj.attack_cooldown = now + delay;
    } else {
        obj.attack_cooldown += delay;
    }
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.add_delay(motion, now);
    }
    actor::add_move_lock_time(ctx, handle, motion, false);
}

/// Puts the attacker on cooldown for one attack. Consecutive attacks chain
/// their cooldowns rather than restarting from now.
pub fn apply_cooldown_for_attack_action(ctx: &mut Context, handle: Handle) {
    let Ok(combat) = ctx.registry.combat(handle) else {
        return;
    };
    let motion = combat.timing(TimingStat::AttackMotionTime);
    let delay = combat.timing(TimingStat::AttackDelayTime).max(motion);
    extend_attack_cooldown(ctx, handle, delay, motion);
}

pub fn apply_cooldown_for_attack_action_at(ctx: &mut Context, handle: Handle, target: Handle) {
    debug_assert!(is_valid_target(ctx.registry, target, Some(handle), false, ctx.now()));
    let Ok(position) = ctx.registry.world_object(target).map(|obj| obj.position()) else {
        return;
    };
    apply_cooldown_for_attack_action_towards(ctx, handle, position);
}

pub fn apply_cooldown_for_attack_action_towards(ctx: &mut Context, handle: Handle, position: Coord) {
    apply_cooldown_for_attack_action(ctx, handle);
    face(ctx, handle, position);
}

/// Players recover from support skills faster than from attacks.
pub fn apply_cooldown_for_support_skill_action(ctx: &mut Context, handle: Handle) {
    if !handle.is_player() {
        apply_cooldown_for_attack_action(ctx, handle);
        return;
    }
    let Ok(combat) = ctx.registry.combat(handle) else {
        return;
    };
    let cap = Duration::from_millis(500);
    let motion = combat.timing(TimingStat::AttackMotionTime).min(cap);
    let delay = combat
        .timing(TimingStat::AttackDelayTime)
        .min(cap)
        .max(motion);
    extend_attack_cooldown(ctx, handle, delay, motion);
}

pub(crate) fn face(ctx: &mut Context, handle: Handle, position: Coord) {
    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        if let Some(facing) = direction_towards(obj.position(), position) {
            obj.facing = facing;
        }
    }
}

/// Announces the attack and queues its damage on the target.
pub fn execute_combat_result(ctx: &mut Context, info: DamageInfo, send_attack: bool) {
    if send_attack {
        map::send_to_observers(
            ctx,
            info.source,
            SimEvent::Attack {
                source: info.source,
                target: info.target,
                damage: info.damage,
                hit_count: info.hit_count,
                motion_time: info.attack_motion_time,
            },
        );
    }
    if info.damage == 0 {
        return;
    }
    if let Ok(combat) = ctx.registry.combat_mut(info.target) {
        combat.queue_damage(info);
    }
}

pub fn perform_melee_attack(ctx: &mut Context, attacker: Handle, target: Handle) {
    apply_cooldown_for_attack_action_at(ctx, attacker, target);
    let Ok(mut info) = calculate_combat_result(
        ctx,
        attacker,
        target,
        1.,
        1,
        AttackFlags::PHYSICAL,
        None,
        None,
    ) else {
        return;
    };
    let double_attack = ctx
        .registry
        .player(attacker)
        .map_or(0, |player| player.learned_level(CharacterSkill::DoubleAttack));
    if info.hit_count > 0 && double_attack > 0 && ctx.rng.gen_range(0..20) < double_attack {
        info.hit_count = 2;
    }
    execute_combat_result(ctx, info, true);
}
