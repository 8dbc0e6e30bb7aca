use crate::{
    actor,
    combat,
    command::{CommandBuilder, Outbound, RemovalReason, SimEvent},
    data::GameData,
    entity_list::EntityListPool,
    error::{RequestError, SpawnError},
    map::{Map, MapId, WalkData},
    monster::{self, SpawnRule},
    npc::Npc,
    player::{self, CharacterSnapshot},
    registry::{EntityKind, Registry},
    skill::CharacterSkill,
    spawn, Context, Coord, Handle, SimConfig, SimTime,
};
use rand::SeedableRng;
use rand_isaac::Isaac64Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillTarget {
    Entity(Handle),
    Ground(Coord),
    SelfCast,
}

/// Player input forwarded by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Move { target: Coord },
    Attack { target: Handle },
    UseSkill {
        skill: CharacterSkill,
        level: i32,
        target: SkillTarget,
    },
    SitStand { sitting: bool },
    LookAt { position: Coord },
    StopAction,
    Respawn,
    AdminTeleport { position: Coord },
    AdminHide,
    AdminKill { target: Handle },
}

/// Owns every map and entity and advances them one tick at a time.
#[derive(Debug)]
pub struct World {
    registry: Registry,
    maps: Vec<Map>,
    commands: CommandBuilder,
    pool: EntityListPool,
    rng: Isaac64Rng,
    data: GameData,
    config: SimConfig,
    time: SimTime,
}

impl World {
    pub fn new(seed: u64, data: GameData, config: SimConfig) -> Self {
        Self {
            registry: Registry::default(),
            maps: Vec::new(),
            commands: CommandBuilder::default(),
            pool: EntityListPool::default(),
            rng: Isaac64Rng::seed_from_u64(seed),
            data,
            config,
            time: SimTime::default(),
        }
    }

    pub fn add_map(&mut self, name: impl Into<String>, walk: WalkData) -> MapId {
        let id = MapId(self.maps.len());
        let map = Map::new(id, name, walk, &self.config);
        log::info!("loaded map {} as {:?}", map.name(), id);
        self.maps.push(map);
        id
    }

    pub fn map(&self, id: MapId) -> Option<&Map> {
        self.maps.get(id.0)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn data(&self) -> &GameData {
        &self.data
    }

    /// Runs `f` against one map with a context borrowing the rest of the
    /// world. Returns `None` if there is no such map.
    pub fn with_map<T>(&mut self, id: MapId, f: impl FnOnce(&mut Map, &mut Context) -> T) -> Option<T> {
        let Self {
            registry,
            maps,
            commands,
            pool,
            rng,
            data,
            config,
            time,
        } = self;
        let map = maps.get_mut(id.0)?;
        let mut ctx = Context {
            registry,
            commands,
            pool,
            rng,
            data,
            config,
            time: *time,
        };
        Some(f(map, &mut ctx))
    }

    fn map_of(&self, handle: Handle) -> Result<MapId, RequestError> {
        self.registry
            .world_object(handle)?
            .map
            .ok_or(RequestError::NotOnMap)
    }

    /// Advances the clock by `delta`, then updates every map and every entity
    /// on it once.
    pub fn tick(&mut self, delta: Duration) {
        self.time.advance(delta);
        let Self {
            registry,
            maps,
            commands,
            pool,
            rng,
            data,
            config,
            time,
        } = self;
        for map in maps.iter_mut() {
            let mut ctx = Context {
                registry: &mut *registry,
                commands: &mut *commands,
                pool: &*pool,
                rng: &mut *rng,
                data: &*data,
                config: &*config,
                time: *time,
            };
            map.update(&mut ctx);
            let mut handles = pool.get();
            handles.extend_from(map.entities());
            for handle in handles.iter() {
                if ctx.registry.is_alive(handle) {
                    actor::update_entity(map, &mut ctx, handle);
                }
            }
        }
    }

    pub fn handle_request(&mut self, handle: Handle, request: Request) -> Result<(), RequestError> {
        self.registry.player(handle)?;
        let map = self.map_of(handle)?;
        log::trace!("{:?} requested {:?}", handle, request);
        self.with_map(map, |map, ctx| handle_request(map, ctx, handle, request))
            .unwrap_or(Err(RequestError::NotOnMap))
    }

    pub fn create_player(&mut self, map: MapId, snapshot: &CharacterSnapshot) -> Result<Handle, SpawnError> {
        self.with_map(map, |map, ctx| spawn::create_player(map, ctx, snapshot))
            .unwrap_or(Err(SpawnError::UnknownMap(map)))
    }

    /// Spawns a monster inside its rule's area, or anywhere on the map when
    /// there is no rule. Monsters without a rule never respawn.
    pub fn create_monster(
        &mut self,
        map: MapId,
        code: &str,
        spawn_rule: Option<SpawnRule>,
    ) -> Result<Handle, SpawnError> {
        self.with_map(map, |map, ctx| spawn::create_monster(map, ctx, code, None, spawn_rule))
            .unwrap_or(Err(SpawnError::UnknownMap(map)))
    }

    pub fn create_npc(&mut self, map: MapId, name: &str, position: Coord, npc: Npc) -> Result<Handle, SpawnError> {
        self.with_map(map, |map, ctx| spawn::create_npc(map, ctx, name, position, npc))
            .unwrap_or(Err(SpawnError::UnknownMap(map)))
    }

    pub fn create_effect(
        &mut self,
        map: MapId,
        owner: Option<Handle>,
        position: Coord,
        duration: Duration,
    ) -> Result<Handle, SpawnError> {
        self.with_map(map, |map, ctx| spawn::create_effect(map, ctx, owner, position, duration))
            .unwrap_or(Err(SpawnError::UnknownMap(map)))
    }

    /// Removes the entity from its map and frees its slot. Any handle to it
    /// stops being alive.
    pub fn fully_remove_entity(&mut self, handle: Handle) -> bool {
        if !self.registry.is_alive(handle) {
            return false;
        }
        let reason = if handle.is_player() {
            RemovalReason::Disconnect
        } else {
            RemovalReason::OutOfSight
        };
        match self.map_of(handle) {
            Ok(map) => {
                self.with_map(map, |map, ctx| spawn::fully_remove_entity(map, ctx, handle, reason));
            }
            Err(_) => {
                self.registry.free(handle);
            }
        }
        true
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        self.commands.take_outbox()
    }
}

fn handle_request(map: &mut Map, ctx: &mut Context, handle: Handle, request: Request) -> Result<(), RequestError> {
    let is_dead = ctx.registry.world_object(handle)?.is_dead();
    match request {
        Request::Respawn => {
            if !is_dead {
                return Err(RequestError::NotDead);
            }
            player::respawn(map, ctx, handle);
            return Ok(());
        }
        _ if is_dead => return Err(RequestError::Dead),
        _ => (),
    }

    match request {
        Request::Move { target } => {
            if !map.is_walkable(target) {
                return Err(RequestError::Unwalkable(target));
            }
            player::clear_target(ctx, handle);
            if !actor::try_move(map, ctx, handle, target, 0) {
                return Err(RequestError::CannotMove);
            }
        }
        Request::Attack { target } => {
            if !combat::is_valid_target(ctx.registry, target, Some(handle), false, ctx.now()) {
                return Err(RequestError::InvalidTarget(target));
            }
            if ctx.registry.world_object_mut(handle)?.reset_spawn_immunity() {
                map.send_add_entity_around(ctx, handle);
            }
            player::set_target(ctx, handle, target);
        }
        Request::UseSkill { skill, level, target } => match target {
            SkillTarget::Entity(target) => combat::attempt_start_single_target_skill_attack(
                map, ctx, handle, target, skill, level, None, false,
            )?,
            SkillTarget::Ground(position) => combat::attempt_start_ground_targeted_skill(
                map, ctx, handle, position, skill, level, None, false,
            )?,
            SkillTarget::SelfCast => {
                combat::attempt_start_self_target_skill(map, ctx, handle, skill, level, None, false)?
            }
        },
        Request::SitStand { sitting } => actor::sit_stand(ctx, handle, sitting),
        Request::LookAt { position } => actor::change_look_direction(ctx, handle, position),
        Request::StopAction => {
            player::clear_target(ctx, handle);
            actor::shorten_move_path(map, ctx, handle);
        }
        Request::AdminTeleport { position } => {
            if !map.is_walkable(position) {
                return Err(RequestError::Unwalkable(position));
            }
            map.teleport_entity(ctx, handle, position, RemovalReason::Teleport);
        }
        Request::AdminHide => {
            let hidden = !ctx.registry.world_object(handle)?.hidden;
            if hidden {
                map.hide_from_observers(ctx, handle, RemovalReason::Hidden);
                ctx.registry.world_object_mut(handle)?.hidden = true;
            } else {
                ctx.registry.world_object_mut(handle)?.hidden = false;
                map.send_add_entity_around(ctx, handle);
            }
            ctx.commands.send(handle, SimEvent::AdminHideStatus { hidden });
        }
        Request::AdminKill { target } => {
            let on_this_map = ctx
                .registry
                .world_object(target)
                .map_or(false, |obj| obj.map == Some(map.id()) && !obj.is_dead());
            if !on_this_map {
                return Err(RequestError::InvalidTarget(target));
            }
            log::info!("{:?} killed {:?}", handle, target);
            match target.kind() {
                EntityKind::Monster => monster::die(map, ctx, target, false, false),
                EntityKind::Player => player::die(ctx, target),
                EntityKind::Npc | EntityKind::Effect => return Err(RequestError::InvalidTarget(target)),
            }
        }
        Request::Respawn => (),
    }
    Ok(())
}
