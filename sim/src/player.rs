use crate::{
    actor::{self, ActorState, QueuedAction},
    area::square_distance,
    combat::{self, CharacterStat, CombatEntity, TimingStat},
    command::{RemovalReason, SimEvent},
    map::{self, Map},
    skill::CharacterSkill,
    Context, Coord, Handle,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Character data handed over by persistence when a player enters the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub name: String,
    pub position: Coord,
    pub level: u32,
    pub exp: u32,
    pub str: i32,
    pub agi: i32,
    pub vit: i32,
    pub int: i32,
    pub dex: i32,
    pub luk: i32,
    pub learned_skills: Vec<(CharacterSkill, i32)>,
}

impl CharacterSnapshot {
    pub fn new(name: impl Into<String>, position: Coord) -> Self {
        Self {
            name: name.into(),
            position,
            level: 1,
            exp: 0,
            str: 1,
            agi: 1,
            vit: 1,
            int: 1,
            dex: 1,
            luk: 1,
            learned_skills: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Player {
    pub level: u32,
    pub exp: u32,
    pub learned_skills: Vec<(CharacterSkill, i32)>,
    /// Entity the player is auto-attacking.
    pub target: Option<Handle>,
    /// Holds the player in place while it has an attack target.
    pub auto_attack_lock: bool,
}

impl Player {
    pub fn from_snapshot(snapshot: &CharacterSnapshot) -> Self {
        Self {
            level: snapshot.level.max(1),
            exp: snapshot.exp,
            learned_skills: snapshot.learned_skills.clone(),
            target: None,
            auto_attack_lock: false,
        }
    }

    pub fn learned_level(&self, skill: CharacterSkill) -> i32 {
        self.learned_skills
            .iter()
            .find(|(s, _)| *s == skill)
            .map_or(0, |&(_, level)| level)
    }

    pub fn max_learned_level(&self, skill: CharacterSkill) -> i32 {
        self.learned_level(skill)
    }

    pub fn verify_can_use_skill(&self, skill: CharacterSkill, level: i32) -> bool {
        level > 0 && self.learned_level(skill) >= level
    }
}

/// Base stats from the snapshot, then everything derived from them.
pub fn init_stats(combat: &mut CombatEntity, snapshot: &CharacterSnapshot) {
    combat.set_stat(CharacterStat::Level, snapshot.level.max(1) as i32);
    combat.set_stat(CharacterStat::Str, snapshot.str);
    combat.set_stat(CharacterStat::Agi, snapshot.agi);
    combat.set_stat(CharacterStat::Vit, snapshot.vit);
    combat.set_stat(CharacterStat::Int, snapshot.int);
    combat.set_stat(CharacterStat::Dex, snapshot.dex);
    combat.set_stat(CharacterStat::Luk, snapshot.luk);
    combat.set_stat(CharacterStat::Range, 1);
    update_stats(combat);
    combat.full_recovery(true, true);
}

pub fn update_stats(combat: &mut CombatEntity) {
    let level = combat.stat(CharacterStat::Level);
    let str = combat.stat(CharacterStat::Str);
    let agi = combat.stat(CharacterStat::Agi);
    let vit = combat.stat(CharacterStat::Vit);
    let int = combat.stat(CharacterStat::Int);
    let dex = combat.stat(CharacterStat::Dex);
    let luk = combat.stat(CharacterStat::Luk);

    combat.set_stat(CharacterStat::MaxHp, 35 + level * 8 * (100 + vit) / 100);
    combat.set_stat(CharacterStat::MaxSp, 10 + level * 2 * (100 + int) / 100);
    let attack = 10 + str + (str / 10) * (str / 10) + dex / 5 + luk / 5;
    combat.set_stat(CharacterStat::Attack, attack);
    combat.set_stat(CharacterStat::Attack2, attack + str / 5 + 10);
    combat.set_stat(CharacterStat::MagicAtkMin, int + (int / 7) * (int / 7));
    combat.set_stat(CharacterStat::MagicAtkMax, int + (int / 5) * (int / 5));
    combat.set_stat(CharacterStat::Def, vit / 2);
    combat.set_stat(CharacterStat::MDef, int / 2);

    let aspd = 100. + agi as f32 + combat.stat(CharacterStat::AspdBonus) as f32;
    let delay = Duration::from_secs_f32(1.2 * 100. / aspd.max(1.));
    let motion = delay.min(Duration::from_millis(600));
    combat.set_timing(TimingStat::AttackDelayTime, delay);
    combat.set_timing(TimingStat::AttackMotionTime, motion);
    combat.set_timing(TimingStat::SpriteAttackTiming, motion.mul_f32(0.6));
    combat.set_timing(TimingStat::HitDelayTime, Duration::from_millis(300));
    combat.set_timing(TimingStat::MoveSpeed, Duration::from_millis(150));
}

pub fn has_sp_for_skill(ctx: &Context, handle: Handle, skill: CharacterSkill, level: i32) -> bool {
    ctx.registry
        .combat(handle)
        .map_or(false, |combat| combat.stat(CharacterStat::Sp) >= skill.sp_cost(level))
}

pub fn take_sp_for_skill(ctx: &mut Context, handle: Handle, skill: CharacterSkill, level: i32) -> bool {
    let cost = skill.sp_cost(level);
    let Ok(combat) = ctx.registry.combat_mut(handle) else {
        return false;
    };
    let sp = combat.stat(CharacterStat::Sp);
    if sp < cost {
        return false;
    }
    combat.set_stat(CharacterStat::Sp, sp - cost);
    let max_sp = combat.stat(CharacterStat::MaxSp);
    if cost > 0 {
        ctx.commands.send(
            handle,
            SimEvent::SpChanged {
                entity: handle,
                sp: sp - cost,
                max_sp,
            },
        );
    }
    true
}

pub fn clear_target(ctx: &mut Context, handle: Handle) {
    if let Ok(player) = ctx.registry.player_mut(handle) {
        player.target = None;
        player.auto_attack_lock = false;
    }
}

pub fn set_target(ctx: &mut Context, handle: Handle, target: Handle) {
    if let Ok(player) = ctx.registry.player_mut(handle) {
        player.target = Some(target);
        player.auto_attack_lock = true;
    }
}

pub fn level_up(ctx: &mut Context, handle: Handle) {
    let Ok(player) = ctx.registry.player_mut(handle) else {
        return;
    };
    player.level += 1;
    let level = player.level;
    let Ok(combat) = ctx.registry.combat_mut(handle) else {
        return;
    };
    combat.set_stat(CharacterStat::Level, level as i32);
    update_stats(combat);
    combat.full_recovery(true, true);
    log::debug!("{:?} reached level {}", handle, level);
}

/// Pins hp at zero and stops every action. The player stays on its map.
pub fn die(ctx: &mut Context, handle: Handle) {
    actor::stop_moving_immediately(ctx, handle, false);
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    obj.state = ActorState::Dead;
    obj.queued_action = QueuedAction::None;
    obj.total_move_steps = 0;
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.set_stat(CharacterStat::Hp, 0);
        combat.clear_damage_queue();
        combat.is_casting = false;
        combat.casting_skill = None;
        combat.queued_cast = None;
    }
    clear_target(ctx, handle);
    log::debug!("player {:?} died", handle);
    map::send_to_observers(ctx, handle, SimEvent::Died { entity: handle });
}

/// Brings a dead player back with full hp and sp where it fell.
pub fn respawn(map: &Map, ctx: &mut Context, handle: Handle) -> bool {
    let spawn_immunity = ctx.time.after(ctx.config.spawn_immunity);
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return false;
    };
    if !obj.is_dead() {
        return false;
    }
    obj.reset_state(true);
    obj.set_spawn_immunity(spawn_immunity);
    let Ok(combat) = ctx.registry.combat_mut(handle) else {
        return false;
    };
    combat.full_recovery(true, true);
    let hp = combat.stat(CharacterStat::Hp);
    let max_hp = combat.stat(CharacterStat::MaxHp);
    let sp = combat.stat(CharacterStat::Sp);
    let max_sp = combat.stat(CharacterStat::MaxSp);
    ctx.commands.send(handle, SimEvent::HpChanged { entity: handle, hp, max_hp });
    ctx.commands.send(handle, SimEvent::SpChanged { entity: handle, sp, max_sp });
    if ctx.registry.is_target_immune(handle, ctx.now()) {
        map.hide_from_observers(ctx, handle, RemovalReason::Refresh);
    } else {
        map.refresh_entity(ctx, handle);
    }
    true
}

fn is_combat_ready(ctx: &Context, handle: Handle) -> bool {
    let now = ctx.now();
    let casting = ctx
        .registry
        .combat(handle)
        .map_or(true, |combat| combat.is_casting);
    ctx.registry.world_object(handle).map_or(false, |obj| {
        obj.state == ActorState::Idle && !casting && !obj.in_attack_cooldown(now)
    })
}

/// Resumes held actions, then keeps auto-attacking the current target.
pub fn update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    if !obj.is_active || obj.is_dead() {
        return;
    }
    let queued = obj.queued_action;
    let locked = obj.update_and_check_move_lock(now);
    let target_position = obj.target_position;

    if is_combat_ready(ctx, handle) {
        match queued {
            QueuedAction::Cast => {
                combat::resume_queued_skill_action(map, ctx, handle);
                return;
            }
            QueuedAction::Move if !locked => {
                if let Ok(obj) = ctx.registry.world_object_mut(handle) {
                    obj.queued_action = QueuedAction::None;
                }
                actor::try_move(map, ctx, handle, target_position, 0);
                return;
            }
            _ => (),
        }
    }

    let Some(target) = ctx.registry.player(handle).ok().and_then(|player| player.target) else {
        return;
    };
    if !combat::is_valid_target(ctx.registry, target, Some(handle), false, now) {
        clear_target(ctx, handle);
        return;
    }
    if ctx
        .registry
        .combat(handle)
        .map_or(true, |combat| combat.is_casting)
    {
        return;
    }
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return;
    };
    let (moving, path_end) = (obj.is_moving(), obj.target_position);
    let Ok(target_cell) = ctx.registry.world_object(target).map(|obj| obj.position()) else {
        return;
    };

    if combat::can_attack_target(map, ctx, handle, target, None) {
        if moving {
            actor::stop_moving_immediately(ctx, handle, true);
        }
        let in_cooldown = ctx
            .registry
            .world_object(handle)
            .map_or(true, |obj| obj.in_attack_cooldown(now));
        if !in_cooldown {
            combat::perform_melee_attack(ctx, handle, target);
        }
        return;
    }
    if !moving || square_distance(path_end, target_cell) > 1 {
        actor::try_move(map, ctx, handle, target_cell, 1);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn skill_use_requires_learned_level() {
        let mut snapshot = CharacterSnapshot::new("novice", Coord::new(0, 0));
        snapshot.learned_skills.push((CharacterSkill::FireBolt, 3));
        let player = Player::from_snapshot(&snapshot);
        assert!(player.verify_can_use_skill(CharacterSkill::FireBolt, 3));
        assert!(!player.verify_can_use_skill(CharacterSkill::FireBolt, 4));
        assert!(!player.verify_can_use_skill(CharacterSkill::Bash, 1));
        assert!(!player.verify_can_use_skill(CharacterSkill::FireBolt, 0));
    }

    #[test]
    fn derived_stats_follow_level() {
        let mut snapshot = CharacterSnapshot::new("novice", Coord::new(0, 0));
        snapshot.level = 10;
        let mut combat = CombatEntity::default();
        init_stats(&mut combat, &snapshot);
        let hp_at_10 = combat.stat(CharacterStat::MaxHp);
        assert_eq!(combat.stat(CharacterStat::Hp), hp_at_10);
        combat.set_stat(CharacterStat::Level, 11);
        update_stats(&mut combat);
        assert!(combat.stat(CharacterStat::MaxHp) > hp_at_10);
        assert!(combat.timing(TimingStat::SpriteAttackTiming) <= combat.timing(TimingStat::AttackMotionTime));
    }
}
