use crate::{
    actor::{ActorState, QueuedAction, WorldObject, WorldPosition},
    area::{direction_towards, is_diagonal_step},
    combat,
    command::SimEvent,
    map::{self, Map},
    monster, npc, player, Context, Coord, EntityKind, Handle,
};
use std::time::Duration;

fn ordinal_duration_from_cardinal_duration(duration: Duration) -> Duration {
    const SQRT_2_X_1_000_000: u64 = 1_414_214;
    let ordinal_micros = (duration.as_micros() as u64 * SQRT_2_X_1_000_000) / 1_000_000;
    Duration::from_micros(ordinal_micros)
}

fn step_duration(speed: Duration, from: Coord, to: Coord) -> Duration {
    if is_diagonal_step(from, to) {
        ordinal_duration_from_cardinal_duration(speed)
    } else {
        speed
    }
}

/// Plans a path towards `target` and starts walking it.
///
/// Returns false when the destination is unwalkable, the actor cannot move,
/// or there is no path. A caster keeps its new path as a queued move.
pub fn try_move(
    map: &Map,
    ctx: &mut Context,
    handle: Handle,
    target: Coord,
    desired_distance: i32,
) -> bool {
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return false;
    };
    if !obj.can_move() || !map.is_walkable(target) {
        return false;
    }
    let Some(path) = map.get_path(obj.position(), target, desired_distance) else {
        return false;
    };
    let is_casting = ctx
        .registry
        .combat(handle)
        .map_or(false, |combat| combat.is_casting);
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return false;
    };
    let first = WorldPosition::from_coord(path[1]);
    obj.target_position = path[path.len() - 1];
    obj.next_step_duration = obj
        .move_speed
        .mul_f32(obj.world_position().distance(first));
    obj.move_start_position = obj.world_position();
    obj.move_progress = Duration::ZERO;
    obj.move_step = 0;
    obj.total_move_steps = path.len();
    if let Some(facing) = direction_towards(path[0], path[1]) {
        obj.facing = facing;
    }
    obj.walk_path = path;

    if is_casting {
        obj.queued_action = QueuedAction::Move;
        return true;
    }
    obj.queued_action = QueuedAction::None;
    obj.state = ActorState::Moving;
    let was_immune = obj.reset_spawn_immunity();
    let in_move_lock = obj.in_move_lock;
    if was_immune {
        map.send_add_entity_around(ctx, handle);
    }
    if !in_move_lock {
        map.start_move(ctx, handle);
    }
    true
}

/// Cuts the current walk short at the next waypoint.
pub fn shorten_move_path(map: &Map, ctx: &mut Context, handle: Handle) {
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if !obj.is_moving() || obj.move_step + 2 >= obj.total_move_steps {
        return;
    }
    let mut target = obj.walk_path[obj.move_step + 1];
    if obj.position() == target {
        obj.move_step += 1;
        if obj.move_step + 2 >= obj.total_move_steps {
            return;
        }
        target = obj.walk_path[obj.move_step + 1];
    }
    if !try_move(map, ctx, handle, target, 0) {
        log::warn!("could not shorten the path of {:?} to {:?}", handle, target);
    }
}

pub fn stop_moving_immediately(ctx: &mut Context, handle: Handle, reset_state: bool) {
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if !obj.is_moving() {
        return;
    }
    let position = obj.position();
    if reset_state {
        obj.state = ActorState::Idle;
        obj.total_move_steps = 0;
    }
    map::send_to_observers(ctx, handle, SimEvent::StopImmediate { entity: handle, position });
}

/// Holds the actor in place for `delay` without leaving the moving state.
pub fn add_move_lock_time(ctx: &mut Context, handle: Handle, delay: Duration, force: bool) -> bool {
    if delay.is_zero() {
        return false;
    }
    let now = ctx.now();
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return false;
    };
    if obj.in_move_lock && obj.move_lock_time < now && !force {
        return false;
    }
    if !obj.in_move_lock && obj.is_moving() {
        stop_moving_immediately(ctx, handle, false);
    }
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return false;
    };
    if !force || now + delay > obj.move_lock_time {
        obj.move_lock_time = now + delay;
    }
    obj.in_move_lock = true;
    let lock_until = obj.move_lock_time;
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.adjust_ai_update_if_shorter(lock_until);
    }
    true
}

pub fn sit_stand(ctx: &mut Context, handle: Handle, sitting: bool) {
    if !handle.is_player() {
        return;
    }
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if matches!(obj.state, ActorState::Moving | ActorState::Dead) {
        return;
    }
    obj.state = if sitting {
        ActorState::Sitting
    } else {
        ActorState::Idle
    };
    map::send_to_observers(ctx, handle, SimEvent::SitStand { entity: handle, sitting });
}

pub fn change_look_direction(ctx: &mut Context, handle: Handle, look_at: Coord) {
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if matches!(obj.state, ActorState::Moving | ActorState::Dead) {
        return;
    }
    let Some(facing) = direction_towards(obj.position(), look_at) else {
        return;
    };
    obj.facing = facing;
    map::send_to_observers(ctx, handle, SimEvent::FacingChanged { entity: handle, facing });
}

struct StepOutcome {
    last_position: WorldPosition,
    new_position: WorldPosition,
    still_moving: bool,
}

/// Advances the walk by one tick's worth of progress. Positions are
/// computed here but not applied.
fn advance_along_path(obj: &mut WorldObject, delta: Duration) -> StepOutcome {
    obj.move_progress += delta;
    let last_position = obj.world_position();
    let mut start = if obj.move_step == 0 {
        obj.move_start_position
    } else {
        WorldPosition::from_coord(obj.walk_path[obj.move_step])
    };
    let mut end = WorldPosition::from_coord(obj.walk_path[obj.move_step + 1]);
    let mut new_position = last_position;
    let mut facing = None;

    while obj.move_progress > obj.next_step_duration {
        obj.move_step += 1;
        if obj.move_step >= obj.total_move_steps - 1 {
            obj.state = ActorState::Idle;
            new_position = WorldPosition::from_coord(obj.walk_path[obj.move_step]);
            obj.total_move_steps = 0;
            break;
        }
        obj.move_progress -= obj.next_step_duration;
        let from = obj.walk_path[obj.move_step];
        let to = obj.walk_path[obj.move_step + 1];
        start = WorldPosition::from_coord(from);
        end = WorldPosition::from_coord(to);
        facing = direction_towards(from, to);
        obj.next_step_duration = step_duration(obj.move_speed, from, to);
    }

    let still_moving = obj.is_moving();
    if still_moving {
        let t = if obj.next_step_duration.is_zero() {
            1.
        } else {
            obj.move_progress.as_secs_f32() / obj.next_step_duration.as_secs_f32()
        };
        new_position = start.lerp(end, t);
    }
    if new_position.cell() != last_position.cell() {
        obj.step_count += 1;
        if let Some(facing) = facing {
            obj.facing = facing;
        }
    }
    StepOutcome {
        last_position,
        new_position,
        still_moving,
    }
}

fn perform_move_update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if obj.total_move_steps < 2 || obj.walk_path.len() < obj.total_move_steps {
        invariant!("{} is moving without a path", obj.name);
        obj.state = ActorState::Idle;
        return;
    }
    if obj.in_move_lock {
        if obj.move_lock_time >= now {
            return;
        }
        obj.in_move_lock = false;
        map.start_move(ctx, handle);
    }

    let delta = ctx.time.delta;
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    let outcome = advance_along_path(obj, delta);
    let last_cell = outcome.last_position.cell();
    let new_cell = outcome.new_position.cell();
    if new_cell != last_cell {
        map.change_entity_position(ctx, handle, outcome.last_position, outcome.new_position, true);
        map.trigger_area_of_effect_for_character(ctx, handle, last_cell, new_cell);
    } else {
        obj.set_world_position(outcome.new_position);
    }

    if !outcome.still_moving {
        resolve_stacking(map, ctx, handle);
    }
}

/// After arriving, step off any cell shared with another blocking entity.
fn resolve_stacking(map: &Map, ctx: &mut Context, handle: Handle) {
    if !map.is_entity_stacked(ctx, handle) {
        return;
    }
    if ctx
        .registry
        .player(handle)
        .map_or(false, |player| player.auto_attack_lock)
    {
        return;
    }
    if let Ok(monster) = ctx.registry.monster(handle) {
        if monster.target.map_or(false, |target| ctx.registry.is_alive(target)) {
            return;
        }
    }
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return;
    };
    if obj.queued_action != QueuedAction::None {
        return;
    }
    let position = obj.position();
    if let Some(free) = map.find_unoccupied_adjacent_tile(ctx, position) {
        try_move(map, ctx, handle, free, 0);
    }
}

/// Advances one entity by a tick: its category logic, its combat state,
/// then its movement.
pub fn update_entity(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let update_count = ctx.time.update_count;
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if obj.last_update == Some(update_count) {
        invariant!("{} is updating twice in tick {}", obj.name, update_count);
        return;
    }
    obj.last_update = Some(update_count);

    match handle.kind() {
        EntityKind::Npc | EntityKind::Effect => {
            npc::update(map, ctx, handle);
            let moving = ctx
                .registry
                .world_object(handle)
                .map_or(false, |obj| obj.is_active && obj.is_moving());
            if moving {
                perform_move_update(map, ctx, handle);
            }
            return;
        }
        EntityKind::Player => {
            let now = ctx.now();
            let immunity_ended = ctx
                .registry
                .world_object_mut(handle)
                .map_or(false, |obj| obj.clear_expired_spawn_immunity(now));
            if immunity_ended {
                map.send_add_entity_around(ctx, handle);
            }
            ctx.registry.count_visible_players(handle);
            player::update(map, ctx, handle);
            combat::update(map, ctx, handle);
        }
        EntityKind::Monster => {
            ctx.registry.count_visible_players(handle);
            monster::update(map, ctx, handle);
            combat::update(map, ctx, handle);
        }
    }

    let moving = ctx
        .registry
        .world_object(handle)
        .map_or(false, |obj| obj.is_active && obj.is_moving());
    if moving {
        perform_move_update(map, ctx, handle);
    }
}
