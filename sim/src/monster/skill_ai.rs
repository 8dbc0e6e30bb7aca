use crate::{
    actor::{self, QueuedAction},
    area::{int_distance, Area},
    combat::{self, CharacterStat},
    command::{RemovalReason, SimEvent},
    error::SkillResult,
    map::{self, Map},
    monster::{self, AiState},
    skill::{CharacterSkill, SkillTargetKind},
    spawn, Context, Coord, Handle,
};
use rand::Rng;
use std::{fmt, ops::BitOr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SkillAiFlags(u8);

impl SkillAiFlags {
    pub const NONE: Self = Self(0);
    /// Reach anywhere within view.
    pub const UNLIMITED_RANGE: Self = Self(1 << 0);
    pub const HIDE_SKILL_NAME: Self = Self(1 << 1);
    /// Ground skills land on the caster instead of a target.
    pub const NO_TARGET: Self = Self(1 << 2);
    pub const EVENT_ON_START_CAST: Self = Self(1 << 3);
    /// Ignore the current target and pick any enemy in range.
    pub const RANDOM_TARGET: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SkillAiFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Deferred callback run when a cast started by a skill handler completes.
#[derive(Clone, Copy)]
pub struct SkillAiEvent(pub fn(&mut SkillAiState<'_, '_>));

impl fmt::Debug for SkillAiEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SkillAiEvent")
    }
}

/// Per-species skill behaviour, registered by species code.
#[derive(Clone, Copy)]
pub struct SkillAiHandler {
    pub update: fn(&mut SkillAiState<'_, '_>, AiState),
    /// Runs before death is committed and may cancel it.
    pub on_die: Option<fn(&mut SkillAiState<'_, '_>)>,
}

impl SkillAiHandler {
    pub fn new(update: fn(&mut SkillAiState<'_, '_>, AiState)) -> Self {
        Self { update, on_die: None }
    }

    pub fn with_on_die(self, on_die: fn(&mut SkillAiState<'_, '_>)) -> Self {
        Self {
            on_die: Some(on_die),
            ..self
        }
    }
}

impl fmt::Debug for SkillAiHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SkillAiHandler")
            .field("on_die", &self.on_die.is_some())
            .finish()
    }
}

/// What a skill handler sees of its monster while it runs.
pub struct SkillAiState<'a, 'c> {
    map: &'a mut Map,
    ctx: &'a mut Context<'c>,
    monster: Handle,
    target_for_skill: Option<Handle>,
    skill_cast_success: bool,
    execute_event_at_start_of_cast: bool,
    cast_success_event: Option<SkillAiEvent>,
}

impl<'a, 'c> SkillAiState<'a, 'c> {
    pub(crate) fn new(map: &'a mut Map, ctx: &'a mut Context<'c>, monster: Handle) -> Self {
        Self {
            map,
            ctx,
            monster,
            target_for_skill: None,
            skill_cast_success: false,
            execute_event_at_start_of_cast: false,
            cast_success_event: None,
        }
    }

    pub(crate) fn ctx(&mut self) -> &mut Context<'c> {
        self.ctx
    }

    pub(crate) fn skill_cast_success(&self) -> bool {
        self.skill_cast_success
    }

    pub(crate) fn execute_event_at_start_of_cast(&self) -> bool {
        self.execute_event_at_start_of_cast
    }

    pub(crate) fn take_cast_success_event(&mut self) -> Option<SkillAiEvent> {
        self.cast_success_event.take()
    }

    pub(crate) fn queued_and_casting(&self) -> (QueuedAction, bool) {
        let queued = self
            .ctx
            .registry
            .world_object(self.monster)
            .map_or(QueuedAction::None, |obj| obj.queued_action);
        let casting = self
            .ctx
            .registry
            .combat(self.monster)
            .map_or(false, |combat| combat.is_casting);
        (queued, casting)
    }

    pub fn handle(&self) -> Handle {
        self.monster
    }

    pub fn now(&self) -> Duration {
        self.ctx.now()
    }

    /// Registers the callback to run once the cast that just started lands.
    pub fn on_cast_success(&mut self, event: SkillAiEvent) {
        self.cast_success_event = Some(event);
    }

    pub fn hp_percent(&self) -> i32 {
        self.ctx
            .registry
            .combat(self.monster)
            .map_or(0, |combat| combat.hp_percent())
    }

    pub fn minion_count(&self) -> usize {
        self.ctx
            .registry
            .monster(self.monster)
            .map_or(0, |monster| monster.child_count())
    }

    pub fn position(&self) -> Coord {
        self.ctx
            .registry
            .world_object(self.monster)
            .map_or(Coord::new(0, 0), |obj| obj.position())
    }

    pub fn last_damage_source(&self) -> Option<CharacterSkill> {
        self.ctx
            .registry
            .monster(self.monster)
            .ok()
            .and_then(|monster| monster.last_damage_source)
    }

    pub fn target_for_skill(&self) -> Option<Handle> {
        self.target_for_skill
    }

    pub fn distance_to_selected_target(&self) -> Option<i32> {
        let target = self.target_for_skill?;
        let position = self.ctx.registry.world_object(target).ok()?.position();
        Some(int_distance(self.position(), position))
    }

    pub fn die(&mut self, give_experience: bool) {
        monster::die(self.map, self.ctx, self.monster, give_experience, false);
    }

    /// Cancels a pending death. The monster stays at 1 hp, untargetable, in
    /// the special state, so the handler can script what happens next.
    pub fn enter_post_death_phase(&mut self) {
        let handle = self.monster;
        let Ok(combat) = self.ctx.registry.combat_mut(handle) else {
            return;
        };
        if combat.stat(CharacterStat::Hp) > 0 {
            log::warn!("{:?} entered its post death phase while still alive", handle);
        }
        combat.is_targetable = false;
        combat.clear_damage_queue();
        combat.set_stat(CharacterStat::Hp, 1);
        combat.is_casting = false;
        combat.reset_skill_cooldowns();
        if let Ok(monster) = self.ctx.registry.monster_mut(handle) {
            monster.current_state = AiState::Special;
        }
        if let Ok(obj) = self.ctx.registry.world_object_mut(handle) {
            obj.queued_action = QueuedAction::None;
        }
        actor::stop_moving_immediately(self.ctx, handle, true);
        map::send_to_observers(
            self.ctx,
            handle,
            SimEvent::TargetableChanged {
                entity: handle,
                targetable: false,
            },
        );
    }

    fn skill_fail(&mut self) -> bool {
        self.skill_cast_success = false;
        self.target_for_skill = None;
        false
    }

    fn skill_success(&mut self) -> bool {
        self.skill_cast_success = true;
        self.target_for_skill = None;
        self.cast_success_event = None;
        if let Ok(monster) = self.ctx.registry.monster_mut(self.monster) {
            monster.cast_success_event = None;
        }
        true
    }

    pub fn is_named_event_off_cooldown(&self, name: &str) -> bool {
        let now = self.ctx.now();
        self.ctx
            .registry
            .monster(self.monster)
            .map_or(true, |monster| monster.is_named_event_off_cooldown(name, now))
    }

    /// A negative cooldown never expires.
    pub fn set_event_cooldown(&mut self, name: &str, cooldown_ms: i64) {
        let until = match u64::try_from(cooldown_ms) {
            Ok(ms) => self.ctx.time.after(Duration::from_millis(ms)),
            Err(_) => Duration::MAX,
        };
        if let Ok(monster) = self.ctx.registry.monster_mut(self.monster) {
            monster.set_event_cooldown(name, until);
        }
    }

    pub fn reset_all_cooldowns(&mut self) {
        if let Ok(monster) = self.ctx.registry.monster_mut(self.monster) {
            monster.clear_event_cooldowns();
        }
        if let Ok(combat) = self.ctx.registry.combat_mut(self.monster) {
            combat.reset_skill_cooldowns();
        }
    }

    pub fn put_skill_on_cooldown(&mut self, skill: CharacterSkill, cooldown_ms: u64) {
        let until = self.ctx.time.after(Duration::from_millis(cooldown_ms));
        if let Ok(combat) = self.ctx.registry.combat_mut(self.monster) {
            combat.set_skill_cooldown(skill, until);
        }
    }

    pub fn change_ai_state(&mut self, state: AiState) {
        let now = self.ctx.now();
        if let Ok(monster) = self.ctx.registry.monster_mut(self.monster) {
            monster.current_state = state;
            monster.update_state_change_time(now);
        }
    }

    pub fn time_in_ai_state(&self) -> Duration {
        let now = self.ctx.now();
        self.ctx
            .registry
            .monster(self.monster)
            .map_or(Duration::ZERO, |monster| monster.time_in_current_ai_state(now))
    }

    /// How long the monster has gone without a target. `None` while it has one.
    pub fn time_out_of_combat(&self) -> Option<Duration> {
        let monster = self.ctx.registry.monster(self.monster).ok()?;
        if monster.target.map_or(false, |target| self.ctx.registry.is_alive(target)) {
            return None;
        }
        Some(self.ctx.now().saturating_sub(monster.last_combat_time()))
    }

    /// Takes the monster off the map view without stopping its updates.
    pub fn admin_hide(&mut self) {
        let handle = self.monster;
        let now = self.ctx.now();
        let Ok(obj) = self.ctx.registry.world_object(handle) else {
            return;
        };
        if obj.hidden || obj.map.is_none() {
            return;
        }
        self.map.remove_entity(self.ctx, handle, RemovalReason::Hidden, false);
        if let Ok(obj) = self.ctx.registry.world_object_mut(handle) {
            obj.hidden = true;
        }
        if let Ok(monster) = self.ctx.registry.monster_mut(handle) {
            monster.previous_state = monster.current_state;
            monster.current_state = AiState::Hidden;
            monster.update_state_change_time(now);
        }
        if let Ok(combat) = self.ctx.registry.combat_mut(handle) {
            combat.clear_damage_queue();
        }
    }

    pub fn admin_unhide(&mut self) {
        let handle = self.monster;
        let now = self.ctx.now();
        let Ok(obj) = self.ctx.registry.world_object_mut(handle) else {
            return;
        };
        if !obj.hidden {
            return;
        }
        if obj.map.is_none() {
            invariant!("{:?} cannot unhide, it is not on a map", handle);
            return;
        }
        obj.hidden = false;
        self.map.add_entity(self.ctx, handle, false);
        if let Ok(monster) = self.ctx.registry.monster_mut(handle) {
            monster.current_state = monster.previous_state;
            monster.previous_state = AiState::Hidden;
            monster.update_state_change_time(now);
        }
    }

    pub fn set_hp_no_notify(&mut self, hp: i32, ignore_max: bool) {
        if let Ok(combat) = self.ctx.registry.combat_mut(self.monster) {
            let hp = if ignore_max {
                hp
            } else {
                hp.min(combat.stat(CharacterStat::MaxHp))
            };
            combat.set_stat(CharacterStat::Hp, hp);
        }
    }

    pub fn teleport_near_random_minion(&mut self, distance: i32) {
        let handle = self.monster;
        let rng = &mut *self.ctx.rng;
        let Some(child) = self
            .ctx
            .registry
            .monster(handle)
            .ok()
            .and_then(|monster| monster.random_child(rng))
        else {
            return;
        };
        let Ok(child_position) = self.ctx.registry.world_object(child).map(|obj| obj.position()) else {
            return;
        };
        let position =
            self.map
                .random_visible_position_in_area(child_position, distance / 2, distance, self.ctx.rng);
        let hidden = self
            .ctx
            .registry
            .world_object(handle)
            .map_or(false, |obj| obj.hidden);
        if hidden {
            if let Ok(obj) = self.ctx.registry.world_object_mut(handle) {
                obj.set_position(position);
            }
        } else {
            self.map
                .teleport_entity(self.ctx, handle, position, RemovalReason::Teleport);
        }
    }

    /// Rolls `chance` out of 1000 for a skill that is off cooldown.
    pub fn check_cast(&mut self, skill: CharacterSkill, chance: i32) -> bool {
        let now = self.ctx.now();
        if self
            .ctx
            .registry
            .combat(self.monster)
            .map_or(true, |combat| combat.is_skill_on_cooldown(skill, now))
        {
            return false;
        }
        self.ctx.rng.gen_range(0..1000) < chance
    }

    pub fn look_at(&mut self, position: Coord) {
        actor::change_look_direction(self.ctx, self.monster, position);
    }

    fn selected_or_current_target(&self) -> Option<Handle> {
        let now = self.ctx.now();
        let valid = |target: Handle| {
            combat::is_valid_target(self.ctx.registry, target, Some(self.monster), false, now)
        };
        self.target_for_skill.filter(|&target| valid(target)).or_else(|| {
            self.ctx
                .registry
                .monster(self.monster)
                .ok()
                .and_then(|monster| monster.target)
                .filter(|&target| self.ctx.registry.is_alive(target))
        })
    }

    fn random_enemy_in_range(&mut self, range: i32) -> Option<Handle> {
        let pool = self.ctx.pool;
        let mut enemies = pool.get();
        self.map
            .gather_enemies_in_range(self.ctx, self.monster, range, &mut enemies, true, true);
        match enemies.len() {
            0 => None,
            1 => enemies.get(0),
            len => enemies.get(self.ctx.rng.gen_range(0..len)),
        }
    }

    fn finish_cast(&mut self, result: SkillResult, skill: CharacterSkill, delay_ms: u64) -> bool {
        if let Err(reason) = result {
            log::trace!("{:?} could not cast {:?}: {}", self.monster, skill, reason);
            return self.skill_fail();
        }
        self.put_skill_on_cooldown(skill, delay_ms);
        self.skill_success()
    }

    /// Starts casting `skill`, choosing a target from its target kind. The
    /// skill then goes on cooldown for `delay_ms`.
    pub fn cast(
        &mut self,
        skill: CharacterSkill,
        level: i32,
        cast_time_ms: u64,
        delay_ms: u64,
        flags: SkillAiFlags,
    ) -> bool {
        let handle = self.monster;
        let range = if flags.contains(SkillAiFlags::UNLIMITED_RANGE) {
            self.ctx.config.unlimited_skill_range
        } else {
            combat::skill_range(self.ctx, handle, skill)
        };
        let hide_name = flags.contains(SkillAiFlags::HIDE_SKILL_NAME);
        let cast_time = Some(Duration::from_millis(cast_time_ms));
        self.execute_event_at_start_of_cast = flags.contains(SkillAiFlags::EVENT_ON_START_CAST);

        let mut target_kind = skill.attributes().target;
        if target_kind == SkillTargetKind::Ally && self.target_for_skill.is_none() {
            target_kind = SkillTargetKind::SelfCast;
        }
        let result = match target_kind {
            SkillTargetKind::Passive => return self.skill_fail(),
            SkillTargetKind::Ground => {
                let position = if flags.contains(SkillAiFlags::NO_TARGET) {
                    self.position()
                } else {
                    let target = match self.selected_or_current_target() {
                        Some(target) => Some(target),
                        None => self.random_enemy_in_range(range),
                    };
                    let Some(position) = target
                        .and_then(|target| self.ctx.registry.world_object(target).ok())
                        .map(|obj| obj.position())
                    else {
                        return self.skill_fail();
                    };
                    position
                };
                combat::attempt_start_ground_targeted_skill(
                    self.map, self.ctx, handle, position, skill, level, cast_time, hide_name,
                )
            }
            SkillTargetKind::SelfCast => combat::attempt_start_self_target_skill(
                self.map, self.ctx, handle, skill, level, cast_time, hide_name,
            ),
            SkillTargetKind::Ally => {
                let Some(target) = self.target_for_skill else {
                    return self.skill_fail();
                };
                if !combat::can_attack_target(self.map, self.ctx, handle, target, Some(range)) {
                    return self.skill_fail();
                }
                combat::attempt_start_single_target_skill_attack(
                    self.map, self.ctx, handle, target, skill, level, cast_time, hide_name,
                )
            }
            SkillTargetKind::Enemy => {
                let current = self
                    .selected_or_current_target()
                    .filter(|_| !flags.contains(SkillAiFlags::RANDOM_TARGET));
                let target = match current {
                    Some(target) => {
                        if !combat::can_attack_target(self.map, self.ctx, handle, target, Some(range)) {
                            return self.skill_fail();
                        }
                        target
                    }
                    None => match self.random_enemy_in_range(range) {
                        Some(target) => target,
                        None => return self.skill_fail(),
                    },
                };
                combat::attempt_start_single_target_skill_attack(
                    self.map, self.ctx, handle, target, skill, level, cast_time, hide_name,
                )
            }
        };
        self.finish_cast(result, skill, delay_ms)
    }

    /// Rolls for the skill, then casts it.
    pub fn try_cast(
        &mut self,
        skill: CharacterSkill,
        level: i32,
        chance: i32,
        cast_time_ms: u64,
        delay_ms: u64,
        flags: SkillAiFlags,
    ) -> bool {
        if !self.check_cast(skill, chance) {
            return self.skill_fail();
        }
        let flags = if skill == CharacterSkill::NoCast {
            flags | SkillAiFlags::HIDE_SKILL_NAME
        } else {
            flags
        };
        let cast = self.cast(skill, level, cast_time_ms, delay_ms, flags);
        if cast {
            if let Ok(monster) = self.ctx.registry.monster_mut(self.monster) {
                monster.last_damage_source = None;
            }
        }
        cast
    }

    pub fn cancel_cast(&mut self) {
        combat::cancel_cast(self.ctx, self.monster);
    }

    /// Summons the minions listed in the species definition.
    pub fn call_default_minions(&mut self) {
        let Ok(minions) = self
            .ctx
            .registry
            .monster(self.monster)
            .map(|monster| monster.species.minions.clone())
        else {
            return;
        };
        if minions.is_empty() {
            log::warn!("{:?} called its default minions but has none", self.monster);
            return;
        }
        for minion in minions {
            self.summon_minions(minion.count, &minion.code, 3, 3, Coord::new(0, 0));
        }
    }

    /// Spawns `count` monsters of species `code` around the caster and makes
    /// them its minions. Minions give no experience.
    pub fn summon_minions(&mut self, count: usize, code: &str, width: i32, height: i32, offset: Coord) {
        let area = Area::around_rect(self.position() + offset, width, height).clip(&self.map.bounds());
        for _ in 0..count {
            let minion = match spawn::create_monster(self.map, self.ctx, code, Some(area), None) {
                Ok(minion) => minion,
                Err(error) => {
                    log::warn!("{:?} failed to summon {}: {}", self.monster, code, error);
                    return;
                }
            };
            if let Ok(monster) = self.ctx.registry.monster_mut(minion) {
                monster.reset_ai_update_time();
                monster.gives_experience = false;
            }
            monster::add_child(self.ctx, self.monster, minion);
        }
    }

    pub fn send_emote(&mut self, emote: i32) {
        map::send_to_observers(
            self.ctx,
            self.monster,
            SimEvent::Emote {
                entity: self.monster,
                emote,
            },
        );
    }

    /// Selects an ally whose hp is under `percent` as the next skill target.
    pub fn find_ally_below_hp_percent(&mut self, percent: i32) -> bool {
        self.target_for_skill = None;
        let pool = self.ctx.pool;
        let mut allies = pool.get();
        let range = self.ctx.config.ally_search_range;
        self.map
            .gather_allies_in_range(self.ctx, self.monster, range, &mut allies, true, false);
        if allies.is_empty() {
            return false;
        }
        let offset = self.ctx.rng.gen_range(0..allies.len());
        for i in 0..allies.len() {
            let Some(ally) = allies.get((i + offset) % allies.len()) else {
                continue;
            };
            let below = self
                .ctx
                .registry
                .combat(ally)
                .map_or(false, |combat| combat.hp_percent() < percent);
            if below {
                self.target_for_skill = Some(ally);
                return true;
            }
        }
        false
    }

    pub fn random_free_tile_in_range(&mut self, range: i32) -> Coord {
        let position = self.position();
        let area = Area::around(position, range).clip(&self.map.bounds());
        self.map
            .walk()
            .find_walkable_cell_in_area(area, self.ctx.rng)
            .unwrap_or(position)
    }

    /// Selects any attackable player on the map as the next skill target.
    pub fn find_random_player_on_map(&mut self) -> bool {
        let now = self.ctx.now();
        let pool = self.ctx.pool;
        let mut candidates = pool.get();
        for player in self.map.players().iter() {
            if combat::is_valid_target(self.ctx.registry, player, Some(self.monster), false, now) {
                candidates.add(player);
            }
        }
        if candidates.is_empty() {
            return false;
        }
        self.target_for_skill = candidates.get(self.ctx.rng.gen_range(0..candidates.len()));
        self.target_for_skill.is_some()
    }
}
