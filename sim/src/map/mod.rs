use crate::{
    area::{square_distance, Area},
    command::{RemovalReason, SimEvent},
    entity_list::EntityList,
    Context, Coord, Handle, SimConfig,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

mod aoe;
mod chunk;
mod gather;
pub mod path;
mod visibility;
mod walk;

pub use aoe::{AoeEffect, AoeId, AreaOfEffect};
pub use chunk::Chunk;
pub use visibility::add_visible_players_as_recipients;
pub(crate) use visibility::send_to_observers;
pub use walk::{Cell, WalkData, WalkDataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapId(pub usize);

/// A map's spatial index. Entity state lives in the registry; the map only
/// knows which handles are where.
#[derive(Debug)]
pub struct Map {
    id: MapId,
    name: String,
    walk: WalkData,
    bounds: Area,
    chunk_size: i32,
    chunk_width: i32,
    chunk_height: i32,
    chunks: Vec<Chunk>,
    players: EntityList,
    entities: EntityList,
    important: EntityList,
    aoes: Vec<AreaOfEffect>,
    next_aoe_id: u32,
    chunk_check_id: usize,
    view_distance: i32,
    max_path_length: usize,
}

fn align(value: i32, alignment: i32) -> i32 {
    let remainder = value % alignment;
    if remainder == 0 {
        value
    } else {
        value - remainder + alignment
    }
}

impl Map {
    pub fn new(id: MapId, name: impl Into<String>, walk: WalkData, config: &SimConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        let bounds = walk.bounds();
        let chunk_width = align(bounds.width(), chunk_size) / chunk_size;
        let chunk_height = align(bounds.height(), chunk_size) / chunk_size;
        let name = name.into();
        log::debug!(
            "map {} is {}x{} with {}x{} chunks",
            name,
            bounds.width(),
            bounds.height(),
            chunk_width,
            chunk_height
        );
        Self {
            id,
            name,
            walk,
            bounds,
            chunk_size,
            chunk_width,
            chunk_height,
            chunks: vec![Chunk::default(); (chunk_width * chunk_height) as usize],
            players: EntityList::new(),
            entities: EntityList::new(),
            important: EntityList::new(),
            aoes: Vec::new(),
            next_aoe_id: 0,
            chunk_check_id: 0,
            view_distance: config.max_view_distance,
            max_path_length: config.max_path_length,
        }
    }

    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn walk(&self) -> &WalkData {
        &self.walk
    }

    pub fn bounds(&self) -> Area {
        self.bounds
    }

    pub fn view_distance(&self) -> i32 {
        self.view_distance
    }

    pub fn max_path_length(&self) -> usize {
        self.max_path_length
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> &EntityList {
        &self.players
    }

    /// Every entity the map updates, including dead monsters waiting to respawn.
    pub fn entities(&self) -> &EntityList {
        &self.entities
    }

    pub fn important_entities(&self) -> &EntityList {
        &self.important
    }

    fn chunk_index(&self, coord: Coord) -> Option<usize> {
        if !self.bounds.contains(coord) {
            return None;
        }
        Some((coord.x / self.chunk_size + (coord.y / self.chunk_size) * self.chunk_width) as usize)
    }

    pub fn chunk(&self, coord: Coord) -> Option<&Chunk> {
        self.chunk_index(coord).map(|index| &self.chunks[index])
    }

    fn chunk_indices_for_area(&self, area: Area) -> impl Iterator<Item = usize> {
        let area = area.clip(&self.bounds);
        let size = self.chunk_size;
        let width = self.chunk_width;
        let chunk_area = if area.is_empty() {
            Area::new(0, 0, -1, -1)
        } else {
            Area::new(
                area.min.x / size,
                area.min.y / size,
                area.max.x / size,
                area.max.y / size,
            )
        };
        chunk_area
            .coords()
            .map(move |coord| (coord.x + coord.y * width) as usize)
    }

    /// Chunks overlapping the square of radius `distance` around `center`.
    fn chunk_indices(&self, center: Coord, distance: i32) -> impl Iterator<Item = usize> {
        self.chunk_indices_for_area(Area::around(center, distance))
    }

    fn move_between_chunks(&mut self, handle: Handle, from: Coord, to: Coord) -> bool {
        let (Some(old), Some(new)) = (self.chunk_index(from), self.chunk_index(to)) else {
            invariant!("{:?} moved from {:?} to {:?}, outside map {}", handle, from, to, self.name);
            return false;
        };
        if old == new {
            return true;
        }
        if !self.chunks[old].remove(handle) {
            invariant!("{:?} was missing from its chunk when moving chunks", handle);
        }
        self.chunks[new].add(handle);
        true
    }

    /// Places the entity in its chunk and announces it when it is active.
    pub fn add_entity(&mut self, ctx: &mut Context, handle: Handle, add_to_instance: bool) {
        let id = self.id;
        let Ok(obj) = ctx.registry.world_object_mut(handle) else {
            invariant!("tried to add {:?} to map {} without a world object", handle, self.name);
            return;
        };
        obj.map = Some(id);
        let is_active = obj.is_active;
        let position = obj.position();
        let Some(chunk) = self.chunk_index(position) else {
            invariant!("{:?} added to map {} at out of bounds cell {:?}", handle, self.name, position);
            return;
        };
        if is_active {
            self.send_add_entity_around(ctx, handle);
        }
        self.chunks[chunk].add(handle);
        if add_to_instance {
            self.entities.insert(handle);
        }
        if handle.is_player() {
            if !self.players.insert(handle) {
                invariant!("player {:?} added to map {} twice", handle, self.name);
            }
            log::debug!("map {} now has {} players", self.name, self.players.len());
        }
    }

    /// Takes the entity out of the spatial index and tells its observers.
    pub fn remove_entity(
        &mut self,
        ctx: &mut Context,
        handle: Handle,
        reason: RemovalReason,
        remove_from_instance: bool,
    ) {
        if !ctx.registry.is_alive(handle) {
            return;
        }
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return;
        };
        let position = obj.position();
        let is_dead = obj.is_dead();
        let is_important = obj.is_important;
        self.send_remove_entity_around(ctx, handle, reason);
        if let Ok(obj) = ctx.registry.world_object_mut(handle) {
            obj.clear_visible_players();
        }
        let removed = self
            .chunk_index(position)
            .map_or(false, |index| self.chunks[index].remove(handle));
        if !removed && !is_dead {
            log::warn!("removing {:?} from map {}, but it was not in its chunk", handle, self.name);
        }
        if remove_from_instance {
            self.entities.remove(handle);
        }
        if handle.is_player() {
            self.players.remove(handle);
            log::debug!("map {} now has {} players", self.name, self.players.len());
        }
        if is_important {
            self.remove_important_entity(ctx, handle);
        }
    }

    pub fn register_important_entity(&mut self, ctx: &mut Context, handle: Handle) {
        self.important.insert(handle);
        self.update_important_entity(ctx, handle);
    }

    /// Announces the entity's position to everyone on the map.
    pub fn update_important_entity(&self, ctx: &mut Context, handle: Handle) {
        if self.players.is_empty() {
            return;
        }
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return;
        };
        let position = obj.position();
        ctx.commands.add_recipients(&self.players);
        ctx.commands.send_multi(SimEvent::ImportantEntity {
            entity: handle,
            position,
        });
        ctx.commands.clear_recipients();
    }

    pub fn remove_important_entity(&mut self, ctx: &mut Context, handle: Handle) {
        self.important.remove(handle);
        if self.players.is_empty() {
            return;
        }
        ctx.commands.add_recipients(&self.players);
        ctx.commands
            .send_multi(SimEvent::ImportantEntityRemoved { entity: handle });
        ctx.commands.clear_recipients();
    }

    fn clear_inactive(&mut self, ctx: &Context, index: usize) {
        let dropped = self.chunks[index].clear_inactive(ctx.registry);
        if dropped > 0 {
            log::debug!("map {} dropped {} stale players from chunk {}", self.name, dropped, index);
        }
    }

    /// Per-tick housekeeping. Clears one chunk, round-robin.
    pub fn update(&mut self, ctx: &mut Context) {
        if self.chunks.is_empty() {
            return;
        }
        self.clear_inactive(ctx, self.chunk_check_id);
        self.chunk_check_id += 1;
        if self.chunk_check_id >= self.chunks.len() {
            self.chunk_check_id = 0;
            ctx.registry.retain_active(&mut self.players);
            ctx.registry.retain_active(&mut self.important);
        }
        self.expire_areas_of_effect(ctx.now());
        if cfg!(debug_assertions) && self.chunk_check_id == 0 && self.players.is_empty() {
            self.check_no_observers(ctx);
        }
    }

    fn check_no_observers(&self, ctx: &mut Context) {
        for chunk in &self.chunks {
            for handle in chunk.all.iter() {
                if ctx.registry.count_visible_players(handle) > 0 {
                    invariant!(
                        "map {} has no players, but {:?} is still observed",
                        self.name,
                        handle
                    );
                }
            }
        }
    }

    pub fn is_walkable(&self, coord: Coord) -> bool {
        self.walk.is_cell_walkable(coord)
    }

    pub fn has_line_of_sight(&self, from: Coord, to: Coord) -> bool {
        self.walk.has_line_of_sight(from, to)
    }

    pub fn get_path(&self, from: Coord, to: Coord, desired_distance: i32) -> Option<Vec<Coord>> {
        path::get_path(&self.walk, from, to, desired_distance, self.max_path_length)
    }

    pub fn has_path(&self, from: Coord, to: Coord, desired_distance: i32) -> bool {
        path::has_path(&self.walk, from, to, desired_distance, self.max_path_length)
    }

    /// Tries random cells first, then falls back to a scan of the area.
    pub fn find_position_in_area<R: Rng>(&self, area: Area, rng: &mut R) -> Option<Coord> {
        if area.clip(&self.bounds) != area {
            log::warn!("searching area {:?} which exceeds the bounds of map {}", area, self.name);
        }
        if let Some(coord) = self.walk.find_walkable_cell_in_area(area, rng) {
            return Some(coord);
        }
        log::debug!("falling back to a tile scan of {:?} on map {}", area, self.name);
        let found = self.walk.scan_for_walkable_cell(area);
        if found.is_none() {
            log::warn!("no walkable cell in {:?} on map {}", area, self.name);
        }
        found
    }

    pub fn find_random_position_on_map<R: Rng>(&self, rng: &mut R) -> Option<Coord> {
        let area = self.bounds.shrink(5, 5);
        let area = if area.is_empty() { self.bounds } else { area };
        (0..50)
            .map(|_| area.random_coord(rng))
            .find(|&coord| self.walk.is_cell_walkable(coord))
    }

    fn random_walkable_position_with_min_distance<R: Rng>(
        &self,
        area: Area,
        min_distance: i32,
        tries: usize,
        rng: &mut R,
    ) -> Option<Coord> {
        let center = area.center();
        (0..=tries).map(|_| area.random_coord(rng)).find(|&coord| {
            self.walk.is_cell_walkable(coord) && square_distance(center, coord) >= min_distance
        })
    }

    /// A walkable cell visible from `center`, shrinking the search radius
    /// until one is found. Falls back to `center`.
    pub fn random_visible_position_in_area<R: Rng>(
        &self,
        center: Coord,
        min_distance: i32,
        distance: i32,
        rng: &mut R,
    ) -> Coord {
        for i in 0..distance {
            let d = distance - i;
            let min_distance = (min_distance - i).max(0);
            let area = Area::around(center, d).clip(&self.bounds);
            if let Some(coord) = self.random_walkable_position_with_min_distance(area, min_distance, 20, rng) {
                if self.walk.has_line_of_sight(center, coord) {
                    return coord;
                }
            }
        }
        center
    }

    /// Probes up to nine cells scattered around the centre of `area`.
    ///
    /// Both axes are scaled by the outer loop counter, so the tried cells lie on
    /// the diagonal through the centre; the inner counter only repeats the
    /// draw with fresh random offsets.
    pub fn find_position_using_9_slice<R: Rng>(&self, area: Area, rng: &mut R) -> Option<Coord> {
        let center = area.center();
        let bounds = self.bounds.shrink(4, 4);
        let xr = (area.width() / 2).max(1);
        let yr = (area.height() / 2).max(1);
        let x_dir = if rng.gen_range(0..20000) % 2 == 1 { 1 } else { -1 };
        let y_dir = if rng.gen_range(0..20000) % 2 == 1 { 1 } else { -1 };
        for i in -1..2 {
            for _ in -1..2 {
                let sx = center.x + i * (rng.gen_range(0..20000) % xr) * x_dir;
                let sy = center.y + i * (rng.gen_range(0..20000) % yr) * y_dir;
                let target = Coord::new(sx, sy);
                if bounds.contains(target) && self.walk.is_cell_walkable(target) {
                    return Some(target);
                }
            }
        }
        None
    }
}
