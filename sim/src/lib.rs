pub use direction::Direction;
pub use entity_table::{ComponentTable, Entity};
pub use grid_2d::{Coord, Grid, Size};
use rand_isaac::Isaac64Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log an error and fail fast in debug builds. In release builds the caller
/// carries on and treats the offending operation as a no-op.
macro_rules! invariant {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        debug_assert!(false, $($arg)*);
    }};
}

pub mod actor;
pub mod area;
pub mod combat;
pub mod command;
pub mod data;
pub mod entity_list;
pub mod error;
pub mod map;
pub mod monster;
pub mod npc;
pub mod player;
pub mod registry;
pub mod skill;
mod spawn;
mod world;

use command::CommandBuilder;
use data::GameData;
use entity_list::EntityListPool;
use registry::Registry;

pub use actor::{ActorState, QueuedAction, WorldObject, WorldPosition};
pub use area::Area;
pub use combat::{AttackFlags, CharacterStat, CombatEntity, DamageInfo, Element, TimingStat};
pub use command::{Outbound, RemovalReason, SimEvent};
pub use error::{ComponentError, RequestError, SkillValidationError, SpawnError};
pub use map::{Map, MapId, WalkData};
pub use monster::{AiState, AiType, Monster, MonsterSpecies, SpawnRule};
pub use registry::{Actor, EntityKind, Handle};
pub use skill::CharacterSkill;
pub use world::{Request, SkillTarget, World};

pub const FRAME_DURATION: Duration = Duration::from_micros(1_000_000 / 60);

/// Static tuning values injected by the server bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub chunk_size: i32,
    pub max_view_distance: i32,
    pub ai_tick_rate: Duration,
    pub idle_ai_heartbeat_min: Duration,
    pub idle_ai_heartbeat_max: Duration,
    pub skill_ai_interval: Duration,
    pub skill_ai_jitter: Duration,
    pub spawn_immunity: Duration,
    pub min_respawn_time: Duration,
    pub max_respawn_time: Duration,
    pub monster_hit_lock_cap: Duration,
    pub experience_range: i32,
    pub ally_search_range: i32,
    pub unlimited_skill_range: i32,
    pub max_level: u32,
    pub max_path_length: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8,
            max_view_distance: 21,
            ai_tick_rate: Duration::from_millis(50),
            idle_ai_heartbeat_min: Duration::from_secs(2),
            idle_ai_heartbeat_max: Duration::from_secs(3),
            skill_ai_interval: Duration::from_millis(850),
            skill_ai_jitter: Duration::from_millis(300),
            spawn_immunity: Duration::from_secs(5),
            min_respawn_time: Duration::from_millis(400),
            max_respawn_time: Duration::from_secs(3600),
            monster_hit_lock_cap: Duration::from_millis(150),
            experience_range: 12,
            ally_search_range: 9,
            unlimited_skill_range: 21,
            max_level: 99,
            max_path_length: 32,
        }
    }
}

/// Clock state for the tick being processed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SimTime {
    pub elapsed: Duration,
    pub delta: Duration,
    pub update_count: u64,
}

impl SimTime {
    pub fn advance(&mut self, delta: Duration) {
        self.elapsed += delta;
        self.delta = delta;
        self.update_count += 1;
    }

    /// The absolute time `duration` from now.
    pub fn after(&self, duration: Duration) -> Duration {
        self.elapsed.saturating_add(duration)
    }

    pub fn has_passed(&self, deadline: Duration) -> bool {
        deadline < self.elapsed
    }
}

/// Everything an entity update may touch besides the map it lives on.
pub struct Context<'a> {
    pub registry: &'a mut Registry,
    pub commands: &'a mut CommandBuilder,
    pub pool: &'a EntityListPool,
    pub rng: &'a mut Isaac64Rng,
    pub data: &'a GameData,
    pub config: &'a SimConfig,
    pub time: SimTime,
}

impl<'a> Context<'a> {
    pub fn now(&self) -> Duration {
        self.time.elapsed
    }
}
