use crate::{entity_list::EntityList, map::MapId, Coord, Direction, Handle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod movement;
pub use movement::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorState {
    Idle,
    Moving,
    Sitting,
    Dead,
}

/// Action held back until the current cast or move-lock ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedAction {
    None,
    Cast,
    Move,
}

/// Continuous position used while interpolating between cells.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WorldPosition {
    pub x: f32,
    pub y: f32,
}

impl WorldPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn from_coord(coord: Coord) -> Self {
        Self::new(coord.x as f32, coord.y as f32)
    }

    /// The cell this position is considered to occupy.
    pub fn cell(self) -> Coord {
        Coord::new(self.x.round() as i32, self.y.round() as i32)
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0., 1.);
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    pub fn distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Positional and lifecycle state shared by every kind of entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldObject {
    pub handle: Handle,
    pub name: String,
    pub map: Option<MapId>,
    pub is_active: bool,
    pub hidden: bool,
    /// Announced to every player on the map (bosses, party members).
    pub is_important: bool,
    pub class_id: i32,
    position: Coord,
    world_position: WorldPosition,
    pub facing: Direction,
    pub state: ActorState,
    pub queued_action: QueuedAction,
    pub target_position: Coord,
    pub walk_path: Vec<Coord>,
    pub move_start_position: WorldPosition,
    /// Time taken to cross one cell orthogonally.
    pub move_speed: Duration,
    pub move_progress: Duration,
    pub next_step_duration: Duration,
    pub move_step: usize,
    pub total_move_steps: usize,
    pub move_lock_time: Duration,
    pub in_move_lock: bool,
    pub attack_cooldown: Duration,
    spawn_immunity: Option<Duration>,
    pub last_attacked: Option<Handle>,
    pub step_count: u32,
    pub last_update: Option<u64>,
    visible_players: EntityList,
}

impl WorldObject {
    pub fn new(handle: Handle, name: impl Into<String>, position: Coord) -> Self {
        Self {
            handle,
            name: name.into(),
            map: None,
            is_active: true,
            hidden: false,
            is_important: false,
            class_id: 0,
            position,
            world_position: WorldPosition::from_coord(position),
            facing: Direction::South,
            state: ActorState::Idle,
            queued_action: QueuedAction::None,
            target_position: position,
            walk_path: Vec::new(),
            move_start_position: WorldPosition::from_coord(position),
            move_speed: Duration::from_millis(150),
            move_progress: Duration::ZERO,
            next_step_duration: Duration::ZERO,
            move_step: 0,
            total_move_steps: 0,
            move_lock_time: Duration::ZERO,
            in_move_lock: false,
            attack_cooldown: Duration::ZERO,
            spawn_immunity: None,
            last_attacked: None,
            step_count: 0,
            last_update: None,
            visible_players: EntityList::new(),
        }
    }

    pub fn position(&self) -> Coord {
        self.position
    }

    pub fn world_position(&self) -> WorldPosition {
        self.world_position
    }

    /// Snaps to the centre of `coord`. Callers are responsible for keeping
    /// chunk membership in step.
    pub fn set_position(&mut self, coord: Coord) {
        self.position = coord;
        self.world_position = WorldPosition::from_coord(coord);
    }

    pub fn set_world_position(&mut self, world_position: WorldPosition) {
        self.world_position = world_position;
        self.position = world_position.cell();
    }

    pub fn is_moving(&self) -> bool {
        self.state == ActorState::Moving
    }

    pub fn is_dead(&self) -> bool {
        self.state == ActorState::Dead
    }

    pub fn steps_remaining(&self) -> usize {
        self.total_move_steps.saturating_sub(self.move_step)
    }

    pub fn can_move(&self) -> bool {
        !matches!(self.state, ActorState::Sitting | ActorState::Dead) && !self.move_speed.is_zero()
    }

    pub fn reset_state(&mut self, reset_if_dead: bool) {
        self.move_progress = Duration::ZERO;
        self.queued_action = QueuedAction::None;
        if self.state != ActorState::Dead || reset_if_dead {
            self.state = ActorState::Idle;
        }
    }

    pub fn set_spawn_immunity(&mut self, until: Duration) {
        self.spawn_immunity = Some(until);
    }

    /// Returns whether the object was immune before.
    pub fn reset_spawn_immunity(&mut self) -> bool {
        self.spawn_immunity.take().is_some()
    }

    /// Drops immunity that ran out by `now`. Returns true if it did.
    pub fn clear_expired_spawn_immunity(&mut self, now: Duration) -> bool {
        match self.spawn_immunity {
            Some(until) if until <= now => {
                self.spawn_immunity = None;
                true
            }
            _ => false,
        }
    }

    /// Spawn-immune entities cannot be targeted and do not block cells.
    pub fn is_target_immune(&self, now: Duration) -> bool {
        self.spawn_immunity.map_or(false, |until| until > now)
    }

    pub fn in_attack_cooldown(&self, now: Duration) -> bool {
        self.attack_cooldown > now
    }

    pub fn update_and_check_move_lock(&mut self, now: Duration) -> bool {
        self.in_move_lock = self.move_lock_time > now;
        self.in_move_lock
    }

    /// Whether `observer` may be shown this object at all, ignoring range.
    pub fn is_able_to_be_seen_by(&self, observer: Handle) -> bool {
        self.is_active && (observer == self.handle || !self.hidden)
    }

    pub fn visible_players(&self) -> &EntityList {
        &self.visible_players
    }

    pub fn has_visible_players(&self) -> bool {
        !self.visible_players.is_empty()
    }

    pub fn is_player_visible(&self, player: Handle) -> bool {
        self.visible_players.contains(player)
    }

    pub fn add_visible_player(&mut self, player: Handle) {
        if player == self.handle {
            invariant!("{} attempted to add itself to its own visibility set", self.name);
            return;
        }
        if !player.is_player() {
            invariant!("{} attempted to add non-player {:?} as an observer", self.name, player);
            return;
        }
        if !self.visible_players.insert(player) {
            log::debug!("{} already visible to {:?}", self.name, player);
        }
    }

    pub fn remove_visible_player(&mut self, player: Handle) {
        if !self.visible_players.remove(player) {
            log::debug!("{} was not visible to {:?}", self.name, player);
        }
    }

    pub fn clear_visible_players(&mut self) {
        self.visible_players.clear();
    }

    /// Moves the visibility set out so it can be used alongside a mutable
    /// borrow of the registry. Pair with `restore_visible_players`.
    pub fn take_visible_players(&mut self) -> EntityList {
        std::mem::take(&mut self.visible_players)
    }

    pub fn restore_visible_players(&mut self, list: EntityList) {
        self.visible_players = list;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{EntityKind, Registry};

    #[test]
    fn world_position_rounds_to_cell() {
        let a = WorldPosition::from_coord(Coord::new(2, 2));
        let b = WorldPosition::from_coord(Coord::new(3, 3));
        assert_eq!(a.lerp(b, 0.4).cell(), Coord::new(2, 2));
        assert_eq!(a.lerp(b, 0.6).cell(), Coord::new(3, 3));
        assert_eq!(a.lerp(b, 4.).cell(), Coord::new(3, 3));
    }

    #[test]
    fn visibility_set_rejects_self_and_non_players() {
        let mut registry = Registry::default();
        let player = registry.alloc(EntityKind::Player);
        let other = registry.alloc(EntityKind::Player);
        let monster = registry.alloc(EntityKind::Monster);
        let mut obj = WorldObject::new(player, "p", Coord::new(0, 0));
        obj.add_visible_player(other);
        obj.add_visible_player(other);
        assert_eq!(obj.visible_players().len(), 1);
        let result = std::panic::catch_unwind(move || {
            let mut obj = WorldObject::new(player, "p", Coord::new(0, 0));
            obj.add_visible_player(monster);
            obj.visible_players().len()
        });
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        } else {
            assert_eq!(result.ok(), Some(0));
        }
    }

    #[test]
    fn spawn_immunity_expires() {
        let mut registry = Registry::default();
        let handle = registry.alloc(EntityKind::Monster);
        let mut obj = WorldObject::new(handle, "m", Coord::new(0, 0));
        obj.set_spawn_immunity(Duration::from_secs(5));
        assert!(obj.is_target_immune(Duration::from_secs(4)));
        assert!(!obj.is_target_immune(Duration::from_secs(5)));
        assert!(!obj.clear_expired_spawn_immunity(Duration::from_secs(4)));
        assert!(obj.clear_expired_spawn_immunity(Duration::from_secs(5)));
        assert!(!obj.clear_expired_spawn_immunity(Duration::from_secs(6)));
        obj.set_spawn_immunity(Duration::from_secs(5));
        assert!(obj.reset_spawn_immunity());
        assert!(!obj.reset_spawn_immunity());
        assert!(!obj.is_target_immune(Duration::ZERO));
    }
}
