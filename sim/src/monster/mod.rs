use crate::{
    actor::{self, ActorState, QueuedAction},
    area::{square_distance, Area},
    combat::{self, CharacterStat, CombatEntity, Element, TimingStat},
    command::{RemovalReason, SimEvent},
    entity_list::EntityList,
    map::Map,
    skill::CharacterSkill,
    spawn, Context, Handle,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{mem, time::Duration};

pub mod ai;
mod skill_ai;

pub use ai::{AiEntry, AiInput, AiOutput, AiState, AiTables, AiType};
pub use skill_ai::{SkillAiEvent, SkillAiFlags, SkillAiHandler, SkillAiState};

const MIN_IDLE_WAIT: Duration = Duration::from_secs(3);
const MAX_IDLE_WAIT: Duration = Duration::from_secs(6);
const WANDER_DISTANCE: i32 = 9;
const MASTER_FOLLOW_DISTANCE: i32 = 5;
const FIRST_AI_UPDATE: Duration = Duration::from_secs(1);
const UNOBSERVED_AI_DELAY: Duration = Duration::from_millis(500);
const RESPAWN_AI_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinionEntry {
    pub code: String,
    pub count: usize,
}

/// Static definition shared by every monster of one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonsterSpecies {
    pub code: String,
    pub name: String,
    pub class_id: i32,
    pub level: i32,
    pub hp: i32,
    pub exp: u32,
    pub attack_min: i32,
    pub attack_max: i32,
    pub def: i32,
    pub mdef: i32,
    pub str: i32,
    pub agi: i32,
    pub vit: i32,
    pub int: i32,
    pub dex: i32,
    pub luk: i32,
    pub range: i32,
    pub scan_distance: i32,
    pub element: Element,
    pub ai_type: AiType,
    pub move_speed: Duration,
    pub attack_damage_timing: Duration,
    pub hit_time: Duration,
    pub attack_lock_time: Duration,
    pub recharge_time: Duration,
    pub minions: Vec<MinionEntry>,
}

impl Default for MonsterSpecies {
    fn default() -> Self {
        Self {
            code: String::new(),
            name: String::new(),
            class_id: 4000,
            level: 1,
            hp: 50,
            exp: 10,
            attack_min: 5,
            attack_max: 10,
            def: 0,
            mdef: 0,
            str: 1,
            agi: 1,
            vit: 1,
            int: 1,
            dex: 1,
            luk: 1,
            range: 1,
            scan_distance: 10,
            element: Element::Neutral,
            ai_type: AiType::Passive,
            move_speed: Duration::from_millis(200),
            attack_damage_timing: Duration::from_millis(300),
            hit_time: Duration::from_millis(300),
            attack_lock_time: Duration::from_millis(500),
            recharge_time: Duration::from_millis(1500),
            minions: Vec::new(),
        }
    }
}

impl MonsterSpecies {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Where a monster lives and how it comes back after dying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnRule {
    /// `None` spawns anywhere on the map.
    pub area: Option<Area>,
    pub min_respawn_time: Duration,
    pub max_respawn_time: Duration,
    /// Wandering never leaves the spawn area.
    pub lock_to_spawn: bool,
}

impl SpawnRule {
    pub fn new(area: Option<Area>, min_respawn_time: Duration, max_respawn_time: Duration) -> Self {
        Self {
            area,
            min_respawn_time,
            max_respawn_time,
            lock_to_spawn: false,
        }
    }

    pub fn respawn_delay<R: Rng>(&self, rng: &mut R, min: Duration, max: Duration) -> Duration {
        let upper = self.max_respawn_time.max(self.min_respawn_time);
        let delay = if upper > self.min_respawn_time {
            rng.gen_range(self.min_respawn_time..=upper)
        } else {
            upper
        };
        delay.clamp(min, max.max(min))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monster {
    pub species: MonsterSpecies,
    pub spawn_rule: Option<SpawnRule>,
    pub ai_type: AiType,
    pub current_state: AiState,
    pub previous_state: AiState,
    pub target: Option<Handle>,
    pub master: Option<Handle>,
    children: EntityList,
    pub last_damage_source: Option<CharacterSkill>,
    pub gives_experience: bool,
    pub lock_movement_to_spawn: bool,
    next_ai_update: Duration,
    next_skill_ai_update: Duration,
    next_move_update: Duration,
    state_change_time: Duration,
    last_combat_time: Duration,
    dead_timeout: Duration,
    event_cooldowns: Vec<(String, Duration)>,
    #[serde(skip)]
    skill_ai: Option<SkillAiHandler>,
    #[serde(skip)]
    cast_success_event: Option<SkillAiEvent>,
}

impl Monster {
    pub fn new(
        species: MonsterSpecies,
        spawn_rule: Option<SpawnRule>,
        skill_ai: Option<SkillAiHandler>,
        now: Duration,
    ) -> Self {
        let lock_movement_to_spawn = spawn_rule.as_ref().map_or(false, |rule| rule.lock_to_spawn);
        Self {
            ai_type: species.ai_type,
            species,
            spawn_rule,
            current_state: AiState::Idle,
            previous_state: AiState::Idle,
            target: None,
            master: None,
            children: EntityList::new(),
            last_damage_source: None,
            gives_experience: true,
            lock_movement_to_spawn,
            next_ai_update: now + FIRST_AI_UPDATE,
            next_skill_ai_update: now + FIRST_AI_UPDATE,
            next_move_update: now,
            state_change_time: now,
            last_combat_time: now,
            dead_timeout: Duration::ZERO,
            event_cooldowns: Vec::new(),
            skill_ai,
            cast_success_event: None,
        }
    }

    pub fn next_ai_update(&self) -> Duration {
        self.next_ai_update
    }

    pub fn set_next_ai_update(&mut self, time: Duration) {
        self.next_ai_update = time;
    }

    pub fn reset_ai_update_time(&mut self) {
        self.next_ai_update = Duration::ZERO;
    }

    pub fn adjust_ai_update_if_shorter(&mut self, time: Duration) {
        if time < self.next_ai_update {
            self.next_ai_update = time;
        }
    }

    /// Pushes the next AI update back, typically while an attack animation plays.
    pub fn add_delay(&mut self, delay: Duration, now: Duration) {
        self.next_ai_update += delay;
        if self.next_ai_update < now {
            self.next_ai_update = now + delay;
        }
    }

    pub fn update_state_change_time(&mut self, now: Duration) {
        self.state_change_time = now;
    }

    pub fn time_in_current_ai_state(&self, now: Duration) -> Duration {
        now.saturating_sub(self.state_change_time)
    }

    pub fn last_combat_time(&self) -> Duration {
        self.last_combat_time
    }

    pub fn skill_ai(&self) -> Option<SkillAiHandler> {
        self.skill_ai
    }

    pub fn set_skill_ai(&mut self, handler: Option<SkillAiHandler>) {
        self.skill_ai = handler;
    }

    pub fn children(&self) -> &EntityList {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn remove_child(&mut self, child: Handle) {
        self.children.remove(child);
    }

    pub fn random_child<R: Rng>(&self, rng: &mut R) -> Option<Handle> {
        if self.children.is_empty() {
            return None;
        }
        self.children.get(rng.gen_range(0..self.children.len()))
    }

    pub fn is_named_event_off_cooldown(&self, name: &str, now: Duration) -> bool {
        self.event_cooldowns
            .iter()
            .find(|(event, _)| event == name)
            .map_or(true, |&(_, until)| now > until)
    }

    pub fn set_event_cooldown(&mut self, name: &str, until: Duration) {
        match self.event_cooldowns.iter_mut().find(|(event, _)| event == name) {
            Some((_, cooldown)) => *cooldown = until,
            None => self.event_cooldowns.push((name.to_string(), until)),
        }
    }

    pub fn clear_event_cooldowns(&mut self) {
        self.event_cooldowns.clear();
    }
}

pub fn init_stats(combat: &mut CombatEntity, species: &MonsterSpecies) {
    let int = species.int;
    let magic_min = (int + int / 7 * int / 7).max(species.attack_min / 2);
    let magic_max = (int + int / 5 * int / 5).max(species.attack_max / 2);
    combat.set_stat(CharacterStat::Level, species.level);
    combat.set_stat(CharacterStat::Hp, species.hp);
    combat.set_stat(CharacterStat::MaxHp, species.hp);
    combat.set_stat(CharacterStat::Attack, species.attack_min);
    combat.set_stat(CharacterStat::Attack2, species.attack_max);
    combat.set_stat(CharacterStat::MagicAtkMin, magic_min);
    combat.set_stat(CharacterStat::MagicAtkMax, magic_max);
    combat.set_stat(CharacterStat::Range, species.range);
    combat.set_stat(CharacterStat::Def, species.def);
    combat.set_stat(CharacterStat::MDef, species.mdef);
    combat.set_stat(CharacterStat::Str, species.str);
    combat.set_stat(CharacterStat::Agi, species.agi);
    combat.set_stat(CharacterStat::Vit, species.vit);
    combat.set_stat(CharacterStat::Int, species.int);
    combat.set_stat(CharacterStat::Dex, species.dex);
    combat.set_stat(CharacterStat::Luk, species.luk);
    combat.set_timing(TimingStat::MoveSpeed, species.move_speed);
    combat.set_timing(TimingStat::SpriteAttackTiming, species.attack_damage_timing);
    combat.set_timing(TimingStat::HitDelayTime, species.hit_time);
    combat.set_timing(TimingStat::AttackMotionTime, species.attack_lock_time);
    combat.set_timing(TimingStat::AttackDelayTime, species.recharge_time);
}

/// Rescales attack timings by the attack speed bonus. When the attack delay
/// drops below the motion time, the motion is shortened to match.
pub fn update_stats(combat: &mut CombatEntity, species: &MonsterSpecies) {
    let aspd_bonus = 100. / (combat.stat(CharacterStat::AspdBonus) + 100).max(1) as f32;
    let recharge = species.recharge_time.mul_f32(aspd_bonus);
    let mut motion = species.attack_lock_time;
    let mut sprite = species.attack_damage_timing;
    if recharge < motion && !motion.is_zero() {
        let ratio = recharge.as_secs_f32() / motion.as_secs_f32();
        motion = motion.mul_f32(ratio);
        sprite = sprite.mul_f32(ratio);
    }
    combat.set_timing(TimingStat::AttackDelayTime, recharge);
    combat.set_timing(TimingStat::AttackMotionTime, motion);
    combat.set_timing(TimingStat::SpriteAttackTiming, sprite);
}

pub fn change_ai_skill_handler(ctx: &mut Context, handle: Handle, code: &str) {
    let handler = ctx.data.skill_ai(code);
    if handler.is_none() {
        log::warn!("no skill ai handler named {} for {:?}", code, handle);
        return;
    }
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.skill_ai = handler;
    }
}

pub fn has_master(ctx: &Context, handle: Handle) -> bool {
    ctx.registry
        .monster(handle)
        .ok()
        .and_then(|monster| monster.master)
        .map_or(false, |master| ctx.registry.is_alive(master))
}

/// Binds `child` to `parent`. The child takes the parent's walking speed and
/// switches to `ai_type` unless that is `Empty`.
pub fn make_child(ctx: &mut Context, child: Handle, parent: Handle, ai_type: AiType) {
    let Ok(speed) = ctx.registry.world_object(parent).map(|obj| obj.move_speed) else {
        invariant!("{:?} cannot become a child of missing {:?}", child, parent);
        return;
    };
    let Ok(monster) = ctx.registry.monster_mut(child) else {
        invariant!("{:?} cannot be made a child, it is not a monster", child);
        return;
    };
    monster.master = Some(parent);
    if ai_type != AiType::Empty {
        monster.ai_type = ai_type;
    }
    if let Ok(combat) = ctx.registry.combat_mut(child) {
        combat.set_timing(TimingStat::MoveSpeed, speed);
    }
    if let Ok(obj) = ctx.registry.world_object_mut(child) {
        obj.move_speed = speed;
    }
}

pub fn add_child(ctx: &mut Context, parent: Handle, child: Handle) {
    if !child.is_monster() || !ctx.registry.is_alive(child) {
        invariant!("cannot add {:?} as a child of {:?}", child, parent);
        return;
    }
    let Ok(monster) = ctx.registry.monster_mut(parent) else {
        return;
    };
    monster.children.insert(child);
    make_child(ctx, child, parent, AiType::Minion);
}

fn validate_target(ctx: &Context, handle: Handle) -> bool {
    let Some(target) = ctx.registry.monster(handle).ok().and_then(|monster| monster.target) else {
        return false;
    };
    combat::is_valid_target(ctx.registry, target, Some(handle), false, ctx.now())
}

fn current_target(ctx: &Context, handle: Handle) -> Option<Handle> {
    if validate_target(ctx, handle) {
        ctx.registry.monster(handle).ok().and_then(|monster| monster.target)
    } else {
        None
    }
}

/// Changes target. A player becoming the target is told about it.
pub fn swap_target(ctx: &mut Context, handle: Handle, new_target: Handle) {
    let now = ctx.now();
    let Ok(monster) = ctx.registry.monster_mut(handle) else {
        return;
    };
    if monster.target == Some(new_target) {
        return;
    }
    monster.target = Some(new_target);
    monster.last_combat_time = now;
    if new_target.is_player() {
        if ctx.registry.world_object(new_target).map_or(false, |obj| obj.is_dead()) {
            log::warn!("{:?} is targeting dead player {:?}", handle, new_target);
        }
        ctx.commands
            .send(new_target, SimEvent::MonsterTarget { monster: handle });
    }
}

/// Picks up the target of a nearby monster of the same species that is
/// already fighting and in sight.
pub fn can_assist_ally(map: &Map, ctx: &Context, handle: Handle, distance: i32) -> Option<Handle> {
    let position = ctx.registry.world_object(handle).ok()?.position();
    let species = ctx.registry.monster(handle).ok()?.species.code.as_str();
    let pool = ctx.pool;
    let mut allies = pool.get();
    map.gather_monsters_of_type_in_range(ctx, position, distance, species, &mut allies);
    for ally in allies.iter() {
        if ally == handle {
            continue;
        }
        let (Ok(monster), Ok(obj)) = (ctx.registry.monster(ally), ctx.registry.world_object(ally)) else {
            continue;
        };
        if monster.current_state != AiState::Attacking
            || !map.has_line_of_sight(position, obj.position())
        {
            continue;
        }
        let Some(target) = monster.target else {
            continue;
        };
        if combat::is_valid_target(ctx.registry, target, Some(handle), false, ctx.now()) {
            return Some(target);
        }
    }
    None
}

pub fn find_random_target_in_range(
    map: &Map,
    ctx: &mut Context,
    handle: Handle,
    distance: i32,
) -> Option<Handle> {
    let range = ctx.registry.monster(handle).ok()?.species.range;
    let pool = ctx.pool;
    let mut targets = pool.get();
    map.gather_valid_targets(ctx, handle, distance, range, &mut targets);
    match targets.len() {
        0 => None,
        1 => targets.get(0),
        len => targets.get(ctx.rng.gen_range(0..len)),
    }
}

/// Kills the monster. Children die with it without granting experience.
/// `is_master_command` is set when the master is the one killing the
/// child, so the child does not detach itself from a list being emptied.
pub fn die(map: &mut Map, ctx: &mut Context, handle: Handle, give_experience: bool, is_master_command: bool) {
    let Ok(monster) = ctx.registry.monster_mut(handle) else {
        return;
    };
    if monster.current_state == AiState::Dead {
        return;
    }
    monster.current_state = AiState::Dead;
    let gives_experience = monster.gives_experience;
    let children = mem::take(&mut monster.children);
    let master = monster.master;
    let spawn_rule = monster.spawn_rule.clone();
    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        obj.state = ActorState::Dead;
    }
    log::debug!("monster {:?} died", handle);

    if give_experience && gives_experience {
        combat::distribute_experience(map, ctx, handle);
    }
    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        obj.is_active = false;
        obj.queued_action = QueuedAction::None;
    }
    if let Ok(combat) = ctx.registry.combat_mut(handle) {
        combat.is_casting = false;
        combat.casting_skill = None;
        combat.queued_cast = None;
    }

    for child in children.iter() {
        die(map, ctx, child, false, true);
    }
    if let Some(master) = master.filter(|_| !is_master_command) {
        if let Ok(monster) = ctx.registry.monster_mut(master) {
            monster.remove_child(handle);
        }
    }

    let Some(rule) = spawn_rule else {
        spawn::fully_remove_entity(map, ctx, handle, RemovalReason::Dead);
        return;
    };
    map.remove_entity(ctx, handle, RemovalReason::Dead, false);
    let now = ctx.now();
    let delay = rule.respawn_delay(ctx.rng, ctx.config.min_respawn_time, ctx.config.max_respawn_time);
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.next_ai_update = now + delay + RESPAWN_AI_DELAY;
        monster.dead_timeout = now + delay;
        monster.target = None;
        monster.cast_success_event = None;
    }
    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        obj.clear_visible_players();
    }
}

/// Restores a respawning monster to its freshly spawned state.
pub fn reset_after_respawn(ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let jitter = ctx.rng.gen_range(Duration::ZERO..ctx.config.ai_tick_rate.max(Duration::from_millis(1)));
    let first_update = now + ctx.config.ai_tick_rate + jitter;
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.current_state = AiState::Idle;
        monster.previous_state = AiState::Idle;
        monster.target = None;
        monster.last_damage_source = None;
        monster.cast_success_event = None;
        monster.next_ai_update = first_update;
        monster.next_move_update = now;
        monster.state_change_time = now;
        monster.last_combat_time = now;
        monster.event_cooldowns.clear();
        let species = monster.species.clone();
        if let Ok(combat) = ctx.registry.combat_mut(handle) {
            init_stats(combat, &species);
            update_stats(combat, &species);
            combat.clear_damage_queue();
            combat.reset_skill_cooldowns();
            combat.is_casting = false;
            combat.casting_skill = None;
            combat.queued_cast = None;
            combat.is_targetable = true;
        }
    }
}

pub fn call_death_event(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let Some(on_die) = ctx
        .registry
        .monster(handle)
        .ok()
        .and_then(|monster| monster.skill_ai)
        .and_then(|handler| handler.on_die)
    else {
        return;
    };
    let mut state = SkillAiState::new(map, ctx, handle);
    on_die(&mut state);
}

pub fn run_cast_success_event(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let Some(event) = ctx
        .registry
        .monster_mut(handle)
        .ok()
        .and_then(|monster| monster.cast_success_event.take())
    else {
        return;
    };
    let mut state = SkillAiState::new(map, ctx, handle);
    (event.0)(&mut state);
}

/// Runs the species skill handler once. Returns whether it started a cast.
pub(crate) fn ai_skill_scan_update(map: &mut Map, ctx: &mut Context, handle: Handle) -> bool {
    let now = ctx.now();
    let interval = ctx.config.skill_ai_interval;
    let jitter = ctx.rng.gen_range(Duration::ZERO..=ctx.config.skill_ai_jitter);
    let Ok(monster) = ctx.registry.monster_mut(handle) else {
        return false;
    };
    let Some(handler) = monster.skill_ai else {
        return false;
    };
    let ai_state = monster.current_state;
    if ai_state != AiState::Attacking {
        monster.next_skill_ai_update = now + interval + jitter;
    }

    let mut state = SkillAiState::new(map, ctx, handle);
    (handler.update)(&mut state, ai_state);
    let success = state.skill_cast_success();
    if success {
        if let Some(event) = state.take_cast_success_event() {
            let run_now = state.execute_event_at_start_of_cast() || {
                let (queued, casting) = state.queued_and_casting();
                queued == QueuedAction::None && !casting
            };
            if run_now {
                (event.0)(&mut state);
            } else if let Ok(monster) = state.ctx().registry.monster_mut(handle) {
                monster.cast_success_event = Some(event);
            }
        }
    }
    drop(state);

    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.last_damage_source = None;
        if ai_state == AiState::Idle {
            monster.target = None;
        }
    }
    success
}

fn input_check(map: &Map, ctx: &Context, handle: Handle, input: AiInput) -> bool {
    let now = ctx.now();
    let (Ok(monster), Ok(obj)) = (ctx.registry.monster(handle), ctx.registry.world_object(handle)) else {
        return false;
    };
    let position = obj.position();
    let target_cell = || {
        current_target(ctx, handle)
            .and_then(|target| ctx.registry.world_object(target).ok())
            .map(|target| target.position())
    };
    let master = monster.master.filter(|&master| ctx.registry.is_alive(master));
    match input {
        AiInput::Always => true,
        AiInput::WaitEnd => monster.next_move_update <= now,
        AiInput::Attacked => obj.last_attacked.map_or(false, |attacker| {
            combat::is_valid_target(ctx.registry, attacker, Some(handle), false, now)
        }),
        AiInput::PlayersNearby => map.quick_check_players_nearby(position, monster.species.scan_distance),
        AiInput::TargetInvalid => !validate_target(ctx, handle),
        AiInput::TargetInAttackRange => current_target(ctx, handle)
            .map_or(false, |target| combat::can_attack_target(map, ctx, handle, target, None)),
        AiInput::TargetOutOfRange => current_target(ctx, handle)
            .map_or(false, |target| !combat::can_attack_target(map, ctx, handle, target, None)),
        AiInput::TargetMoved => {
            obj.is_moving()
                && target_cell().map_or(false, |cell| square_distance(obj.target_position, cell) > 1)
        }
        AiInput::NotMoving => !obj.is_moving(),
        AiInput::MasterOutOfSight => master
            .and_then(|master| ctx.registry.world_object(master).ok())
            .map_or(false, |master| square_distance(position, master.position()) > MASTER_FOLLOW_DISTANCE),
        AiInput::MasterAttacking => master
            .and_then(|master| ctx.registry.monster(master).ok())
            .filter(|master| master.current_state == AiState::Attacking)
            .and_then(|master| master.target)
            .map_or(false, |target| combat::is_valid_target(ctx.registry, target, Some(handle), false, now)),
        AiInput::DeadTimeoutEnd => monster.dead_timeout <= now,
    }
}

fn start_idle_wait(ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let wait = ctx.rng.gen_range(MIN_IDLE_WAIT..=MAX_IDLE_WAIT);
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.next_move_update = now + wait;
    }
}

fn random_move(map: &Map, ctx: &mut Context, handle: Handle) -> bool {
    start_idle_wait(ctx, handle);
    let (Ok(monster), Ok(obj)) = (ctx.registry.monster(handle), ctx.registry.world_object(handle)) else {
        return false;
    };
    if obj.move_speed.is_zero() {
        return false;
    }
    let spawn_area = monster
        .spawn_rule
        .as_ref()
        .and_then(|rule| rule.area)
        .filter(|_| monster.lock_movement_to_spawn);
    let area = spawn_area
        .unwrap_or_else(|| Area::around(obj.position(), WANDER_DISTANCE))
        .clip(&map.bounds());
    let Some(destination) = map.walk().find_walkable_cell_in_area(area, ctx.rng) else {
        return false;
    };
    actor::try_move(map, ctx, handle, destination, 0)
}

fn perform_attack(map: &mut Map, ctx: &mut Context, handle: Handle) -> bool {
    let now = ctx.now();
    if current_target(ctx, handle).is_none() {
        return false;
    }
    if ctx.registry.world_object(handle).map_or(false, |obj| obj.is_moving()) {
        actor::stop_moving_immediately(ctx, handle, true);
    }
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return false;
    };
    if obj.in_attack_cooldown(now) {
        return true;
    }
    let has_skill_ai = ctx
        .registry
        .monster(handle)
        .map_or(false, |monster| monster.skill_ai.is_some());
    if has_skill_ai && ai_skill_scan_update(map, ctx, handle) {
        return true;
    }
    let Some(target) = current_target(ctx, handle) else {
        return true;
    };
    combat::perform_melee_attack(ctx, handle, target);
    if let Ok(monster) = ctx.registry.monster_mut(handle) {
        monster.last_combat_time = now;
    }
    true
}

fn output_check(map: &mut Map, ctx: &mut Context, handle: Handle, output: AiOutput) -> bool {
    let (Ok(monster), Ok(obj)) = (ctx.registry.monster(handle), ctx.registry.world_object(handle)) else {
        return false;
    };
    let scan_distance = monster.species.scan_distance;
    let master = monster.master;
    let last_attacked = obj.last_attacked;
    match output {
        AiOutput::None => true,
        AiOutput::WaitStart => {
            start_idle_wait(ctx, handle);
            true
        }
        AiOutput::RandomMoveStart => random_move(map, ctx, handle),
        AiOutput::SetAttackerAsTarget => match last_attacked {
            Some(attacker) => {
                swap_target(ctx, handle, attacker);
                true
            }
            None => false,
        },
        AiOutput::FindNewTarget => match find_random_target_in_range(map, ctx, handle, scan_distance) {
            Some(target) => {
                swap_target(ctx, handle, target);
                true
            }
            None => false,
        },
        AiOutput::AssistAlly => match can_assist_ally(map, ctx, handle, scan_distance) {
            Some(target) => {
                swap_target(ctx, handle, target);
                true
            }
            None => false,
        },
        AiOutput::CopyMasterTarget => {
            let target = master
                .and_then(|master| ctx.registry.monster(master).ok())
                .and_then(|master| master.target);
            match target {
                Some(target) => {
                    swap_target(ctx, handle, target);
                    true
                }
                None => false,
            }
        }
        AiOutput::StartChase => {
            let cell = current_target(ctx, handle)
                .and_then(|target| ctx.registry.world_object(target).ok())
                .map(|target| target.position());
            match cell {
                Some(cell) => actor::try_move(map, ctx, handle, cell, 1),
                None => false,
            }
        }
        AiOutput::PerformAttack => perform_attack(map, ctx, handle),
        AiOutput::ClearTarget => {
            if let Ok(monster) = ctx.registry.monster_mut(handle) {
                monster.target = None;
            }
            start_idle_wait(ctx, handle);
            true
        }
        AiOutput::FollowMaster => {
            let cell = master
                .and_then(|master| ctx.registry.world_object(master).ok())
                .map(|master| master.position());
            match cell {
                Some(cell) => actor::try_move(map, ctx, handle, cell, 2),
                None => false,
            }
        }
        AiOutput::TryRespawn => spawn::respawn_monster(map, ctx, handle),
    }
}

fn ai_state_machine_update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let (Ok(monster), Ok(obj), Ok(combat)) = (
        ctx.registry.monster(handle),
        ctx.registry.world_object(handle),
        ctx.registry.combat(handle),
    ) else {
        return;
    };
    if cfg!(debug_assertions) && !obj.is_active && monster.current_state != AiState::Dead {
        log::warn!("{:?} is inactive but in ai state {:?}", handle, monster.current_state);
    }
    let run_skill_ai = monster.skill_ai.is_some()
        && monster.next_skill_ai_update < now
        && !obj.is_dead()
        && !combat.is_casting
        && !obj.in_attack_cooldown(now)
        && monster.current_state != AiState::Attacking
        && obj.queued_action != QueuedAction::Cast;
    if run_skill_ai {
        ai_skill_scan_update(map, ctx, handle);
    }

    let data = ctx.data;
    let Ok(ai_type) = ctx.registry.monster(handle).map(|monster| monster.ai_type) else {
        return;
    };
    for entry in data.ai_table(ai_type) {
        let Ok(current_state) = ctx.registry.monster(handle).map(|monster| monster.current_state) else {
            return;
        };
        if entry.input_state != current_state {
            continue;
        }
        if !input_check(map, ctx, handle, entry.input) {
            continue;
        }
        if !output_check(map, ctx, handle, entry.output) {
            continue;
        }
        if let Ok(monster) = ctx.registry.monster_mut(handle) {
            if entry.output_state != current_state {
                log::debug!(
                    "{:?}: {:?} -> {:?} on {:?}/{:?}",
                    handle,
                    current_state,
                    entry.output_state,
                    entry.input,
                    entry.output
                );
            }
            monster.previous_state = current_state;
            monster.current_state = entry.output_state;
            monster.state_change_time = now;
        }
        break;
    }

    if let Ok(obj) = ctx.registry.world_object_mut(handle) {
        obj.last_attacked = None;
    }
    let tick_rate = ctx.config.ai_tick_rate;
    let delta = ctx.time.delta;
    let heartbeat = ctx
        .rng
        .gen_range(ctx.config.idle_ai_heartbeat_min..=ctx.config.idle_ai_heartbeat_max);
    let observed = ctx
        .registry
        .world_object(handle)
        .map_or(false, |obj| obj.has_visible_players());
    let Ok(monster) = ctx.registry.monster_mut(handle) else {
        return;
    };
    if map.player_count() == 0 {
        monster.next_ai_update = now + heartbeat;
    } else if monster.next_ai_update < now {
        if monster.next_ai_update + delta < now {
            monster.next_ai_update = now + tick_rate;
        } else {
            monster.next_ai_update += tick_rate;
        }
        if !observed {
            monster.next_ai_update += UNOBSERVED_AI_DELAY;
        }
    }
}

fn in_combat_ready_state(ctx: &Context, handle: Handle) -> bool {
    let now = ctx.now();
    let (Ok(obj), Ok(combat)) = (ctx.registry.world_object(handle), ctx.registry.combat(handle)) else {
        return false;
    };
    obj.state == ActorState::Idle && !combat.is_casting && !obj.in_attack_cooldown(now)
}

/// Per-tick monster update. The AI only runs once its own throttle allows,
/// and never while nobody is on the map or while casting.
pub fn update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let now = ctx.now();
    let Ok(monster) = ctx.registry.monster(handle) else {
        return;
    };
    if map.player_count() == 0 {
        if monster.next_ai_update < now {
            let heartbeat = ctx
                .rng
                .gen_range(ctx.config.idle_ai_heartbeat_min..=ctx.config.idle_ai_heartbeat_max);
            if let Ok(monster) = ctx.registry.monster_mut(handle) {
                monster.next_ai_update = now + heartbeat;
            }
        }
        return;
    }
    if monster.next_ai_update > now {
        return;
    }
    if ctx.registry.combat(handle).map_or(false, |combat| combat.is_casting) {
        return;
    }
    let Ok(queued) = ctx.registry.world_object(handle).map(|obj| obj.queued_action) else {
        return;
    };
    if matches!(queued, QueuedAction::None | QueuedAction::Move) {
        ai_state_machine_update(map, ctx, handle);
    }
    if !ctx.registry.is_alive(handle) || !in_combat_ready_state(ctx, handle) {
        return;
    }
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return;
    };
    let queued = obj.queued_action;
    match queued {
        QueuedAction::Cast => combat::resume_queued_skill_action(map, ctx, handle),
        QueuedAction::Move => {
            if obj.update_and_check_move_lock(now) {
                return;
            }
            obj.queued_action = QueuedAction::None;
            let target = obj.target_position;
            actor::try_move(map, ctx, handle, target, 0);
        }
        QueuedAction::None => (),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand_isaac::Isaac64Rng;

    fn monster() -> Monster {
        Monster::new(MonsterSpecies::new("poring", "Poring"), None, None, Duration::ZERO)
    }

    #[test]
    fn delay_never_leaves_update_in_the_past() {
        let mut monster = monster();
        let now = Duration::from_secs(10);
        monster.add_delay(Duration::from_millis(200), now);
        assert_eq!(monster.next_ai_update(), now + Duration::from_millis(200));
        monster.add_delay(Duration::from_millis(200), now);
        assert_eq!(monster.next_ai_update(), now + Duration::from_millis(400));
        monster.adjust_ai_update_if_shorter(now);
        assert_eq!(monster.next_ai_update(), now);
        monster.adjust_ai_update_if_shorter(now + Duration::from_secs(1));
        assert_eq!(monster.next_ai_update(), now);
    }

    #[test]
    fn named_event_cooldowns() {
        let mut monster = monster();
        let now = Duration::from_secs(1);
        assert!(monster.is_named_event_off_cooldown("summon", now));
        monster.set_event_cooldown("summon", now + Duration::from_secs(5));
        assert!(!monster.is_named_event_off_cooldown("summon", now));
        assert!(monster.is_named_event_off_cooldown("heal", now));
        assert!(monster.is_named_event_off_cooldown("summon", now + Duration::from_secs(6)));
        monster.clear_event_cooldowns();
        assert!(monster.is_named_event_off_cooldown("summon", now));
    }

    #[test]
    fn respawn_delay_is_clamped() {
        let mut rng = Isaac64Rng::seed_from_u64(0);
        let min = Duration::from_millis(400);
        let max = Duration::from_secs(3600);
        let instant = SpawnRule::new(None, Duration::ZERO, Duration::ZERO);
        assert_eq!(instant.respawn_delay(&mut rng, min, max), min);
        let slow = SpawnRule::new(None, Duration::from_secs(5000), Duration::from_secs(9000));
        assert_eq!(slow.respawn_delay(&mut rng, min, max), max);
        let normal = SpawnRule::new(None, Duration::from_secs(5), Duration::from_secs(10));
        for _ in 0..20 {
            let delay = normal.respawn_delay(&mut rng, min, max);
            assert!(delay >= Duration::from_secs(5) && delay <= Duration::from_secs(10));
        }
    }

    #[test]
    fn derived_magic_attack_uses_the_larger_source() {
        let mut species = MonsterSpecies::new("golem", "Golem");
        species.int = 10;
        species.attack_min = 100;
        species.attack_max = 140;
        let mut combat = CombatEntity::default();
        init_stats(&mut combat, &species);
        assert_eq!(combat.stat(CharacterStat::MagicAtkMin), 50);
        assert_eq!(combat.stat(CharacterStat::MagicAtkMax), 70);
        assert_eq!(combat.stat(CharacterStat::Hp), species.hp);
    }

    #[test]
    fn attack_speed_shortens_motion() {
        let mut species = MonsterSpecies::new("wolf", "Wolf");
        species.recharge_time = Duration::from_millis(1000);
        species.attack_lock_time = Duration::from_millis(800);
        let mut combat = CombatEntity::default();
        init_stats(&mut combat, &species);
        combat.set_stat(CharacterStat::AspdBonus, 100);
        update_stats(&mut combat, &species);
        let delay = combat.timing(TimingStat::AttackDelayTime);
        assert_eq!(delay, Duration::from_millis(500));
        assert!(combat.timing(TimingStat::AttackMotionTime) <= delay + Duration::from_millis(1));
    }
}
