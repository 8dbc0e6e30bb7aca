use crate::{
    actor::{self, QueuedAction},
    area::int_distance,
    combat::{self, CharacterStat, SkillCastInfo},
    command::SimEvent,
    error::{SkillResult, SkillValidationError},
    map::{self, Map},
    monster, player,
    skill::{self, CharacterSkill, SkillTargetKind},
    Context, Coord, Handle,
};
use std::time::Duration;

/// Effective range of `skill` for `caster`. Melee skills reach at least as
/// far as the caster's normal attack.
pub fn skill_range(ctx: &Context, caster: Handle, skill: CharacterSkill) -> i32 {
    let range = skill.range();
    if skill.attributes().target == SkillTargetKind::Enemy && range <= 2 {
        let attack_range = ctx
            .registry
            .combat(caster)
            .map_or(range, |combat| combat.stat(CharacterStat::Range));
        return range.max(attack_range);
    }
    range
}

fn queue_cast(ctx: &mut Context, handle: Handle, info: SkillCastInfo) {
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.queued_cast = Some(info);
    }
    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        obj.queued_action = QueuedAction::Cast;
    }
}

/// Drops any pending cast and reports whether the caster may act at all.
fn begin_attempt(ctx: &mut Context, handle: Handle, skill: CharacterSkill) -> SkillResult {
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return Err(SkillValidationError::InvalidTarget);
    };
    obj.queued_action = QueuedAction::None;
    let is_dead = obj.is_dead();
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.queued_cast = None;
    }
    if is_dead {
        invariant!("{:?} attempted to use {:?} while dead", handle, skill);
        return Err(SkillValidationError::CasterDead);
    }
    Ok(())
}

fn skill_failed(ctx: &mut Context, handle: Handle, reason: SkillValidationError) -> SkillResult {
    if handle.is_player() {
        ctx.commands.send(
            handle,
            SimEvent::SkillFailed {
                entity: handle,
                reason,
            },
        );
    }
    Err(reason)
}

fn check_sp(ctx: &mut Context, handle: Handle, skill: CharacterSkill, level: i32) -> SkillResult {
    if handle.is_player() && !player::has_sp_for_skill(ctx, handle, skill, level) {
        return skill_failed(ctx, handle, SkillValidationError::InsufficientSp);
    }
    Ok(())
}

fn is_casting(ctx: &Context, handle: Handle) -> bool {
    ctx.registry
        .combat(handle)
        .map_or(false, |combat| combat.is_casting)
}

fn is_moving(ctx: &Context, handle: Handle) -> bool {
    ctx.registry
        .world_object(handle)
        .map_or(false, |obj| obj.is_moving())
}

fn in_attack_cooldown(ctx: &Context, handle: Handle) -> bool {
    let now = ctx.now();
    ctx.registry
        .world_object(handle)
        .map_or(false, |obj| obj.in_attack_cooldown(now))
}

/// Either runs the skill straight away or starts the cast bar.
fn begin_cast(map: &mut Map, ctx: &mut Context, handle: Handle, info: SkillCastInfo) {
    let cast_time = info
        .cast_time
        .unwrap_or_else(|| info.skill.cast_time(info.level));
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.casting_skill = Some(info);
    }
    if cast_time.is_zero() {
        execute_queued_skill_attack(map, ctx, handle);
        return;
    }
    let casting_time = ctx.time.after(cast_time);
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.is_casting = true;
        combat.casting_time = casting_time;
    }
    log::trace!("{:?} starts casting {:?} for {:?}", handle, info.skill, cast_time);
    let event = match info.position {
        Some(position) => SimEvent::StartCastGround {
            caster: handle,
            position,
            skill: info.skill,
            level: info.level,
            range: info.range,
            cast_time,
            hide_name: info.hide_name,
        },
        None => SimEvent::StartCast {
            caster: handle,
            target: info.target.filter(|&target| target != handle),
            skill: info.skill,
            level: info.level,
            cast_time,
            hide_name: info.hide_name,
        },
    };
    map::send_to_observers(ctx, handle, event);
}

#[allow(clippy::too_many_arguments)]
pub fn attempt_start_ground_targeted_skill(
    map: &mut Map,
    ctx: &mut Context,
    handle: Handle,
    target: Coord,
    skill: CharacterSkill,
    level: i32,
    cast_time: Option<Duration>,
    hide_name: bool,
) -> SkillResult {
    begin_attempt(ctx, handle, skill)?;
    let info = SkillCastInfo {
        skill,
        level,
        target: None,
        position: Some(target),
        cast_time,
        range: skill_range(ctx, handle, skill),
        hide_name,
    };
    if is_casting(ctx, handle) {
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    if is_moving(ctx, handle) {
        player::clear_target(ctx, handle);
        actor::shorten_move_path(map, ctx, handle);
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    if in_attack_cooldown(ctx, handle) {
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    check_sp(ctx, handle, skill, level)?;
    combat::face(ctx, handle, target);
    begin_cast(map, ctx, handle, info);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn attempt_start_self_target_skill(
    map: &mut Map,
    ctx: &mut Context,
    handle: Handle,
    skill: CharacterSkill,
    level: i32,
    cast_time: Option<Duration>,
    hide_name: bool,
) -> SkillResult {
    begin_attempt(ctx, handle, skill)?;
    let level = if level <= 0 { 10 } else { level };
    let info = SkillCastInfo {
        skill,
        level,
        target: Some(handle),
        position: None,
        cast_time,
        range: 0,
        hide_name,
    };
    if is_casting(ctx, handle) {
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    if is_moving(ctx, handle) {
        player::clear_target(ctx, handle);
        let has_cast_bar = cast_time.map_or(false, |time| !time.is_zero());
        if skill != CharacterSkill::NoCast || has_cast_bar {
            actor::stop_moving_immediately(ctx, handle, true);
        }
    }
    if in_attack_cooldown(ctx, handle) {
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    check_sp(ctx, handle, skill, level)?;
    begin_cast(map, ctx, handle, info);
    Ok(())
}

/// Starts a skill aimed at another entity, walking into range first when
/// needed.
#[allow(clippy::too_many_arguments)]
pub fn attempt_start_single_target_skill_attack(
    map: &mut Map,
    ctx: &mut Context,
    handle: Handle,
    target: Handle,
    skill: CharacterSkill,
    level: i32,
    cast_time: Option<Duration>,
    hide_name: bool,
) -> SkillResult {
    begin_attempt(ctx, handle, skill)?;
    if let Ok(player) = ctx.registry.player(handle) {
        if !player.verify_can_use_skill(skill, level) {
            log::info!("{:?} tried to use {:?} level {} without knowing it", handle, skill, level);
            return Err(SkillValidationError::NotLearned);
        }
    }
    let info = SkillCastInfo {
        skill,
        level,
        target: Some(target),
        position: None,
        cast_time,
        range: skill_range(ctx, handle, skill),
        hide_name,
    };
    if is_casting(ctx, handle) {
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    if is_moving(ctx, handle) {
        player::clear_target(ctx, handle);
        actor::shorten_move_path(map, ctx, handle);
        queue_cast(ctx, handle, info);
        return Ok(());
    }

    let (Ok(obj), Ok(target_obj)) = (ctx.registry.world_object(handle), ctx.registry.world_object(target))
    else {
        return skill_failed(ctx, handle, SkillValidationError::InvalidTarget);
    };
    let target_position = target_obj.position();
    if int_distance(obj.position(), target_position) > info.range {
        let now = ctx.now();
        let move_locked = obj.in_move_lock && obj.move_lock_time > now;
        if handle.is_player() {
            player::clear_target(ctx, handle);
            if move_locked {
                queue_cast(ctx, handle, info);
                return Ok(());
            }
        }
        if actor::try_move(map, ctx, handle, target_position, 1) {
            queue_cast(ctx, handle, info);
            return Ok(());
        }
        return Err(SkillValidationError::OutOfRange);
    }

    check_sp(ctx, handle, skill, level)?;
    if let Err(reason) = skill::validate_target(map, ctx, &info, handle) {
        return skill_failed(ctx, handle, reason);
    }
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.casting_skill = Some(info);
    }
    if in_attack_cooldown(ctx, handle) {
        queue_cast(ctx, handle, info);
        return Ok(());
    }
    if target != handle {
        combat::face(ctx, handle, target_position);
    }
    begin_cast(map, ctx, handle, info);
    Ok(())
}

/// Retries the queued cast. The queue slot is cleared first, so a failed
/// retry is simply dropped.
pub fn resume_queued_skill_action(map: &mut Map, ctx: &mut Context, handle: Handle) {
    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        obj.queued_action = QueuedAction::None;
    }
    let Some(info) = ctx
        .registry
        .combat_mut(handle)
        .ok()
        .and_then(|combat| combat.queued_cast.take())
    else {
        return;
    };
    if info.level <= 0 {
        return;
    }
    let result = if let Some(position) = info.position {
        attempt_start_ground_targeted_skill(
            map,
            ctx,
            handle,
            position,
            info.skill,
            info.level,
            info.cast_time,
            info.hide_name,
        )
    } else {
        let Some(target) = info.target.filter(|&target| ctx.registry.is_alive(target)) else {
            return;
        };
        if target == handle {
            attempt_start_self_target_skill(
                map,
                ctx,
                handle,
                info.skill,
                info.level,
                info.cast_time,
                info.hide_name,
            )
        } else {
            attempt_start_single_target_skill_attack(
                map,
                ctx,
                handle,
                target,
                info.skill,
                info.level,
                info.cast_time,
                info.hide_name,
            )
        }
    };
    if let Err(reason) = result {
        log::debug!("queued {:?} for {:?} was dropped: {}", info.skill, handle, reason);
    }
}

/// Runs the current cast immediately, without a cast bar.
pub fn execute_queued_skill_attack(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let Some(info) = ctx
        .registry
        .combat(handle)
        .ok()
        .and_then(|combat| combat.casting_skill)
    else {
        return;
    };
    if let Err(reason) = skill::validate_target(map, ctx, &info, handle) {
        log::debug!("{:?} failed {:?}: {}", handle, info.skill, reason);
        clear_casts(ctx, handle);
        return;
    }
    if handle.is_player() && !player::take_sp_for_skill(ctx, handle, info.skill, info.level) {
        let _ = skill_failed(ctx, handle, SkillValidationError::InsufficientSp);
        return;
    }
    skill::execute_skill(map, ctx, info, handle);
    clear_casts(ctx, handle);
    let was_immune = ctx
        .registry
        .world_object_mut(handle)
        .map_or(false, |obj| obj.reset_spawn_immunity());
    if was_immune {
        map.send_add_entity_around(ctx, handle);
    }
}

fn clear_casts(ctx: &mut Context, handle: Handle) {
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.casting_skill = None;
        combat.queued_cast = None;
    }
}

/// Completes a cast whose cast bar has run out.
pub(crate) fn finish_casting(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let Some(info) = ctx.registry.combat_mut(handle).ok().and_then(|combat| {
        combat.is_casting = false;
        combat.casting_skill.take()
    }) else {
        return;
    };
    if let Err(reason) = skill::validate_target(map, ctx, &info, handle) {
        log::debug!("cast of {:?} by {:?} fizzled: {}", info.skill, handle, reason);
        let _ = skill_failed(ctx, handle, reason);
        return;
    }
    if handle.is_player() && !player::take_sp_for_skill(ctx, handle, info.skill, info.level) {
        let _ = skill_failed(ctx, handle, SkillValidationError::InsufficientSp);
        return;
    }
    skill::execute_skill(map, ctx, info, handle);
    if handle.is_monster() {
        monster::run_cast_success_event(map, ctx, handle);
    }
}

/// Stops the cast bar without running the skill.
pub fn cancel_cast(ctx: &mut Context, handle: Handle) {
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.is_casting = false;
        combat.casting_skill = None;
    }
}
