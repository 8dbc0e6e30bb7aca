use crate::{
    actor::{self, ActorState},
    combat::{self, CharacterStat, TimingStat},
    command::SimEvent,
    map::{self, Map},
    monster, player, Context, Handle,
};

/// Per-tick combat update: finishes a due cast, then applies due damage.
pub fn update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return;
    };
    if !obj.is_active {
        return;
    }
    let Ok(combat) = ctx.registry.combat(handle) else {
        return;
    };
    if combat.is_casting && combat.casting_time < now {
        combat::finish_casting(map, ctx, handle);
    }
    let has_damage = ctx
        .registry
        .combat(handle)
        .map_or(false, |combat| !combat.damage_queue().is_empty());
    if has_damage {
        attack_update(map, ctx, handle);
    }
}

/// Applies every queued hit whose time has passed, oldest first.
fn attack_update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    loop {
        let Ok(combat) = ctx.registry.combat_mut(handle) else {
            return;
        };
        let Some(info) = combat.pop_due_damage(now) else {
            return;
        };
        let hit_delay = combat.timing(TimingStat::HitDelayTime);
        let Ok(obj) = ctx.registry.world_object_mut(handle) else {
            return;
        };
        if obj.is_dead() || obj.is_target_immune(now) {
            break;
        }
        if obj.state == ActorState::Sitting {
            obj.state = ActorState::Idle;
        }
        if ctx.registry.is_alive(info.source) {
            if let Ok(obj) = ctx.registry.world_object_mut(handle) {
                obj.last_attacked = Some(info.source);
            }
        }

        let damage = info.damage * info.hit_count as i32;
        let lock_time = if handle.is_monster() {
            hit_delay.min(ctx.config.monster_hit_lock_cap)
        } else {
            hit_delay
        };
        actor::add_move_lock_time(ctx, handle, lock_time, false);
        map::send_to_observers(
            ctx,
            handle,
            SimEvent::Hit {
                entity: handle,
                damage,
                lock_time,
            },
        );

        let Ok(combat) = ctx.registry.combat_mut(handle) else {
            return;
        };
        combat.sub_stat(CharacterStat::Hp, damage);
        let hp = combat.stat(CharacterStat::Hp);
        if let Ok(monster) = ctx.registry.monster_mut(handle) {
            monster.last_damage_source = info.skill;
        }
        if hp > 0 {
            continue;
        }

        if handle.is_monster() {
            if let Ok(obj) = ctx.registry.world_object_mut(handle) {
                obj.reset_state(false);
            }
            monster::call_death_event(map, ctx, handle);
            let cancelled = ctx
                .registry
                .combat(handle)
                .map_or(false, |combat| combat.stat(CharacterStat::Hp) > 0);
            if cancelled {
                log::debug!("death of {:?} was cancelled", handle);
                return;
            }
            if let Ok(combat) = ctx.registry.combat_mut(handle) {
                combat.clear_damage_queue();
            }
            monster::die(map, ctx, handle, true, false);
            return;
        }
        if handle.is_player() {
            if let Ok(combat) = ctx.registry.combat_mut(handle) {
                combat.set_stat(CharacterStat::Hp, 0);
            }
            player::die(ctx, handle);
            return;
        }
    }
}

/// Heals a fixed amount plus 6% of max hp and shows it to observers.
pub fn heal(ctx: &mut Context, handle: Handle, amount: i32, show_value: bool) {
    let Ok(combat) = ctx.registry.combat_mut(handle) else {
        return;
    };
    let hp = combat.stat(CharacterStat::Hp);
    let max = combat.stat(CharacterStat::MaxHp);
    let amount = (amount + (max as f32 * 0.06) as i32).min(max - hp).max(0);
    combat.set_stat(CharacterStat::Hp, hp + amount);
    let on_map = ctx
        .registry
        .world_object(handle)
        .map_or(false, |obj| obj.map.is_some());
    if !on_map {
        return;
    }
    let amount = if show_value { amount } else { 0 };
    map::send_to_observers(ctx, handle, SimEvent::Heal { entity: handle, amount });
}

/// Hands the monster's experience to every player near it. A single kill
/// never grants more than one level's worth.
pub fn distribute_experience(map: &Map, ctx: &mut Context, monster: Handle) {
    let Ok(exp) = ctx.registry.monster(monster).map(|m| m.species.exp) else {
        return;
    };
    let Ok(position) = ctx.registry.world_object(monster).map(|obj| obj.position()) else {
        return;
    };
    let pool = ctx.pool;
    let mut players = pool.get();
    map.gather_players_in_range(
        ctx,
        position,
        ctx.config.experience_range,
        Some(&mut players),
        false,
        false,
    );
    let max_level = ctx.config.max_level;
    for handle in players.iter() {
        let Ok(player) = ctx.registry.player(handle) else {
            continue;
        };
        let mut level = player.level;
        if level >= max_level {
            continue;
        }
        let mut required = ctx.data.exp_required(level);
        let gained = exp.min(required);
        ctx.commands.send(handle, SimEvent::ExpGain { entity: handle, exp: gained });
        let mut current = player.exp + gained;
        if current < required {
            if let Ok(player) = ctx.registry.player_mut(handle) {
                player.exp = current;
            }
            continue;
        }
        while current >= required && level < max_level {
            current -= required;
            player::level_up(ctx, handle);
            level += 1;
            if level < max_level {
                required = ctx.data.exp_required(level);
            }
        }
        if let Ok(player) = ctx.registry.player_mut(handle) {
            player.exp = current;
        }
        map::send_to_observers(
            ctx,
            handle,
            SimEvent::LevelUp {
                entity: handle,
                level,
                exp: current,
            },
        );
        map::send_to_observers(ctx, handle, SimEvent::Heal { entity: handle, amount: 0 });
        if let Ok(combat) = ctx.registry.combat(handle) {
            let (sp, max_sp) = (combat.stat(CharacterStat::Sp), combat.stat(CharacterStat::MaxSp));
            ctx.commands.send(handle, SimEvent::SpChanged { entity: handle, sp, max_sp });
        }
    }
}
