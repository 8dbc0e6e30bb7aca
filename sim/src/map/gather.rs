use crate::{
    area::{in_range, int_distance},
    combat,
    entity_list::EntityList,
    map::Map,
    Context, Coord, EntityKind, Handle,
};
use rand::Rng;

impl Map {
    /// Counts active players within `distance` of `center`, adding them to
    /// `list` when one is given.
    pub fn gather_players_in_range(
        &self,
        ctx: &Context,
        center: Coord,
        distance: i32,
        mut list: Option<&mut EntityList>,
        check_line_of_sight: bool,
        check_immunity: bool,
    ) -> usize {
        let mut count = 0;
        for index in self.chunk_indices(center, distance) {
            for player in self.chunks[index].players.iter() {
                let Ok(obj) = ctx.registry.world_object(player) else {
                    continue;
                };
                if !obj.is_active {
                    continue;
                }
                if check_immunity && (obj.is_target_immune(ctx.now()) || obj.is_dead()) {
                    continue;
                }
                if !in_range(center, obj.position(), distance) {
                    continue;
                }
                if check_line_of_sight && !self.walk.has_line_of_sight(center, obj.position()) {
                    continue;
                }
                if let Some(list) = list.as_deref_mut() {
                    list.add(player);
                }
                count += 1;
            }
        }
        count
    }

    pub fn gather_entities_in_range(
        &self,
        ctx: &Context,
        center: Coord,
        distance: i32,
        list: &mut EntityList,
    ) {
        for index in self.chunk_indices(center, distance) {
            for handle in self.chunks[index].all.iter() {
                let Ok(obj) = ctx.registry.world_object(handle) else {
                    continue;
                };
                if obj.is_active && in_range(center, obj.position(), distance) {
                    list.add(handle);
                }
            }
        }
    }

    pub fn gather_monsters_in_area(
        &self,
        ctx: &Context,
        center: Coord,
        distance: i32,
        list: &mut EntityList,
    ) {
        for index in self.chunk_indices(center, distance) {
            for handle in self.chunks[index].monsters.iter() {
                if ctx.registry.is_active(handle) {
                    list.add(handle);
                }
            }
        }
    }

    pub fn gather_monsters_of_type_in_range(
        &self,
        ctx: &Context,
        center: Coord,
        distance: i32,
        species: &str,
        list: &mut EntityList,
    ) {
        for index in self.chunk_indices(center, distance) {
            for handle in self.chunks[index].monsters.iter() {
                let (Ok(obj), Ok(monster)) =
                    (ctx.registry.world_object(handle), ctx.registry.monster(handle))
                else {
                    continue;
                };
                if obj.is_active
                    && monster.species.code == species
                    && in_range(center, obj.position(), distance)
                {
                    list.add(handle);
                }
            }
        }
    }

    pub fn has_monster_of_type_in_range(
        &self,
        ctx: &Context,
        center: Coord,
        distance: i32,
        species: &str,
    ) -> bool {
        let pool = ctx.pool;
        let mut list = pool.get();
        self.gather_monsters_of_type_in_range(ctx, center, distance, species, &mut list);
        !list.is_empty()
    }

    pub fn gather_allies_in_range(
        &self,
        ctx: &Context,
        source: Handle,
        distance: i32,
        list: &mut EntityList,
        check_line_of_sight: bool,
        check_immunity: bool,
    ) {
        let Ok(center) = ctx.registry.world_object(source).map(|obj| obj.position()) else {
            return;
        };
        for index in self.chunk_indices(center, distance) {
            for handle in self.chunks[index].all.iter() {
                let Ok(obj) = ctx.registry.world_object(handle) else {
                    continue;
                };
                if !obj.is_active || handle.kind() == EntityKind::Npc {
                    continue;
                }
                if check_immunity && obj.is_target_immune(ctx.now()) {
                    continue;
                }
                if !combat::is_valid_ally(ctx.registry, handle, source) {
                    continue;
                }
                if !in_range(center, obj.position(), distance) {
                    continue;
                }
                if check_line_of_sight && !self.walk.has_line_of_sight(center, obj.position()) {
                    continue;
                }
                list.add(handle);
            }
        }
    }

    pub fn has_ally_in_range(
        &self,
        ctx: &Context,
        source: Handle,
        distance: i32,
        check_line_of_sight: bool,
        check_immunity: bool,
    ) -> bool {
        let pool = ctx.pool;
        let mut list = pool.get();
        self.gather_allies_in_range(ctx, source, distance, &mut list, check_line_of_sight, check_immunity);
        !list.is_empty()
    }

    /// Enemies of `source` within `distance` of `center`. Line of sight, when
    /// checked, is measured from the source rather than from `center`.
    #[allow(clippy::too_many_arguments)]
    pub fn gather_enemies_in_area(
        &self,
        ctx: &Context,
        source: Handle,
        center: Coord,
        distance: i32,
        list: &mut EntityList,
        check_line_of_sight: bool,
        check_immunity: bool,
    ) {
        let Ok(source_position) = ctx.registry.world_object(source).map(|obj| obj.position()) else {
            return;
        };
        for index in self.chunk_indices(center, distance) {
            for handle in self.chunks[index].all.iter() {
                let Ok(obj) = ctx.registry.world_object(handle) else {
                    continue;
                };
                if !obj.is_active || handle.kind() == EntityKind::Npc {
                    continue;
                }
                if check_immunity && obj.is_target_immune(ctx.now()) {
                    continue;
                }
                if !combat::is_valid_target(ctx.registry, handle, Some(source), false, ctx.now()) {
                    continue;
                }
                if !in_range(center, obj.position(), distance) {
                    continue;
                }
                if check_line_of_sight && !self.walk.has_line_of_sight(source_position, obj.position()) {
                    continue;
                }
                list.add(handle);
            }
        }
    }

    pub fn gather_enemies_in_range(
        &self,
        ctx: &Context,
        source: Handle,
        distance: i32,
        list: &mut EntityList,
        check_line_of_sight: bool,
        check_immunity: bool,
    ) {
        let Ok(center) = ctx.registry.world_object(source).map(|obj| obj.position()) else {
            return;
        };
        self.gather_enemies_in_area(ctx, source, center, distance, list, check_line_of_sight, check_immunity);
    }

    /// Enemies the source can see and either hit from where it stands or
    /// walk to.
    pub fn gather_valid_targets(
        &self,
        ctx: &Context,
        source: Handle,
        distance: i32,
        attack_range: i32,
        list: &mut EntityList,
    ) {
        let Ok(center) = ctx.registry.world_object(source).map(|obj| obj.position()) else {
            return;
        };
        for index in self.chunk_indices(center, distance) {
            for handle in self.chunks[index].all.iter() {
                let Ok(obj) = ctx.registry.world_object(handle) else {
                    continue;
                };
                if !obj.is_active || obj.hidden || handle.kind() == EntityKind::Npc {
                    continue;
                }
                if obj.is_target_immune(ctx.now()) {
                    continue;
                }
                if !combat::is_valid_target(ctx.registry, handle, Some(source), false, ctx.now()) {
                    continue;
                }
                let position = obj.position();
                if !in_range(center, position, distance) || !self.walk.has_line_of_sight(center, position) {
                    continue;
                }
                if int_distance(center, position) > attack_range && !self.has_path(center, position, 1) {
                    continue;
                }
                list.add(handle);
            }
        }
    }

    /// Cheap test for whether any chunk near `center` holds a player.
    pub fn quick_check_players_nearby(&self, center: Coord, distance: i32) -> bool {
        if self.players.is_empty() {
            return false;
        }
        self.chunk_indices(center, distance)
            .any(|index| !self.chunks[index].players.is_empty())
    }

    fn blocks_cell(&self, ctx: &Context, handle: Handle) -> bool {
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return false;
        };
        if !obj.is_active || obj.hidden || obj.is_target_immune(ctx.now()) {
            return false;
        }
        !ctx.registry.npc(handle).map_or(false, |npc| npc.is_event)
    }

    pub fn is_tile_occupied(&self, ctx: &Context, coord: Coord) -> bool {
        self.chunk_indices(coord, 0).any(|index| {
            self.chunks[index].all.iter().any(|handle| {
                ctx.registry
                    .world_object(handle)
                    .map_or(false, |obj| obj.position() == coord)
                    && self.blocks_cell(ctx, handle)
            })
        })
    }

    /// Whether another visible, blocking entity shares the actor's cell.
    pub fn is_entity_stacked(&self, ctx: &Context, handle: Handle) -> bool {
        let Ok(position) = ctx.registry.world_object(handle).map(|obj| obj.position()) else {
            return false;
        };
        self.chunk_indices(position, 0).any(|index| {
            self.chunks[index].all.iter().any(|other| {
                other != handle
                    && ctx
                        .registry
                        .world_object(other)
                        .map_or(false, |obj| obj.position() == position)
                    && self.blocks_cell(ctx, other)
            })
        })
    }

    /// Looks for a free walkable neighbour of `coord`.
    ///
    /// Starting from a random offset into a 27-long cycle, nine consecutive
    /// values are mapped onto the 3x3 neighbourhood with random axis flips.
    /// The same cell can be tried more than once and some neighbours may be
    /// skipped.
    pub fn find_unoccupied_adjacent_tile(&self, ctx: &mut Context, coord: Coord) -> Option<Coord> {
        let x_sign = if ctx.rng.gen_range(0..2) == 0 { -1 } else { 1 };
        let y_sign = if ctx.rng.gen_range(0..2) == 0 { -1 } else { 1 };
        let start = ctx.rng.gen_range(0..27);
        for i in start..start + 9 {
            let x = (i / 3) % 3 - 1;
            let y = (i + 1) % 3 - 1;
            if x == 0 && y == 0 {
                continue;
            }
            let test = Coord::new(coord.x + x * x_sign, coord.y + y * y_sign);
            if self.walk.is_cell_walkable(test) && !self.is_tile_occupied(ctx, test) {
                return Some(test);
            }
        }
        None
    }
}
