use crate::{
    actor::WorldObject,
    area::Area,
    combat::CombatEntity,
    command::RemovalReason,
    error::SpawnError,
    map::Map,
    monster::{self, Monster, SpawnRule},
    npc::Npc,
    player::{self, CharacterSnapshot, Player},
    registry::{EntityData, EntityKind},
    Context, Coord, Handle, TimingStat,
};
use entity_table::entity_data;
use rand::Rng;
use std::time::Duration;

/// Picks a free cell for a spawn. Without an area anything on the map will do.
fn spawn_position<R: Rng>(map: &Map, area: Option<Area>, rng: &mut R) -> Option<Coord> {
    let Some(area) = area else {
        return map.find_random_position_on_map(rng);
    };
    let area = area.clip(&map.bounds());
    map.find_position_using_9_slice(area, rng)
        .or_else(|| map.find_position_in_area(area, rng))
        .or_else(|| map.find_random_position_on_map(rng))
}

fn insert_on_map(map: &mut Map, ctx: &mut Context, handle: Handle, entity_data: EntityData) {
    ctx.registry.insert_entity_data(handle, entity_data);
    map.add_entity(ctx, handle, true);
}

pub fn create_player(
    map: &mut Map,
    ctx: &mut Context,
    snapshot: &CharacterSnapshot,
) -> Result<Handle, SpawnError> {
    let position = if map.is_walkable(snapshot.position) {
        snapshot.position
    } else {
        log::warn!(
            "{} logged in on unwalkable cell {:?} of map {}",
            snapshot.name,
            snapshot.position,
            map.name()
        );
        map.find_random_position_on_map(ctx.rng)
            .ok_or(SpawnError::NoFreeCell)?
    };
    let handle = ctx.registry.alloc(EntityKind::Player);
    let mut world_object = WorldObject::new(handle, snapshot.name.clone(), position);
    world_object.is_active = false;
    world_object.set_spawn_immunity(ctx.time.after(ctx.config.spawn_immunity));
    let mut combat = CombatEntity::default();
    player::init_stats(&mut combat, snapshot);
    player::update_stats(&mut combat);
    combat.full_recovery(true, true);
    world_object.move_speed = combat.timing(TimingStat::MoveSpeed);

    insert_on_map(
        map,
        ctx,
        handle,
        entity_data! {
            world_object: world_object,
            combat: combat,
            player: Player::from_snapshot(snapshot),
        },
    );
    map.activate_player_and_notify_nearby(ctx, handle);
    log::info!("player {} entered map {} at {:?}", snapshot.name, map.name(), position);
    Ok(handle)
}

/// Spawns a monster of species `code` in `area`, falling back to the spawn
/// rule's area and then to anywhere on the map.
pub fn create_monster(
    map: &mut Map,
    ctx: &mut Context,
    code: &str,
    area: Option<Area>,
    spawn_rule: Option<SpawnRule>,
) -> Result<Handle, SpawnError> {
    let data = ctx.data;
    let species = data
        .species(code)
        .ok_or_else(|| SpawnError::UnknownSpecies(code.to_string()))?
        .clone();
    let area = area.or_else(|| spawn_rule.as_ref().and_then(|rule| rule.area));
    let position = spawn_position(map, area, ctx.rng).ok_or(SpawnError::NoFreeCell)?;

    let now = ctx.now();
    let jitter = ctx.rng.gen_range(Duration::ZERO..ctx.config.ai_tick_rate.max(Duration::from_millis(1)));
    let handle = ctx.registry.alloc(EntityKind::Monster);
    let mut world_object = WorldObject::new(handle, species.name.clone(), position);
    world_object.class_id = species.class_id;
    world_object.move_speed = species.move_speed;
    let mut combat = CombatEntity::default();
    monster::init_stats(&mut combat, &species);
    monster::update_stats(&mut combat, &species);
    let mut monster = Monster::new(species, spawn_rule, data.skill_ai(code), now);
    let first_update = monster.next_ai_update() + jitter;
    monster.set_next_ai_update(first_update);

    insert_on_map(
        map,
        ctx,
        handle,
        entity_data! {
            world_object: world_object,
            combat: combat,
            monster: monster,
        },
    );
    log::debug!("spawned {} as {:?} at {:?}", code, handle, position);
    Ok(handle)
}

pub fn create_npc(
    map: &mut Map,
    ctx: &mut Context,
    name: &str,
    position: Coord,
    npc: Npc,
) -> Result<Handle, SpawnError> {
    if !map.bounds().contains(position) {
        return Err(SpawnError::NoFreeCell);
    }
    let handle = ctx.registry.alloc(EntityKind::Npc);
    insert_on_map(
        map,
        ctx,
        handle,
        entity_data! {
            world_object: WorldObject::new(handle, name, position),
            npc: npc,
        },
    );
    Ok(handle)
}

/// Places a short-lived marker that removes itself after `duration`, or
/// sooner if its owner goes away.
pub fn create_effect(
    map: &mut Map,
    ctx: &mut Context,
    owner: Option<Handle>,
    position: Coord,
    duration: Duration,
) -> Result<Handle, SpawnError> {
    if !map.bounds().contains(position) {
        return Err(SpawnError::NoFreeCell);
    }
    let expires = ctx.time.after(duration);
    let handle = ctx.registry.alloc(EntityKind::Effect);
    insert_on_map(
        map,
        ctx,
        handle,
        entity_data! {
            world_object: WorldObject::new(handle, "effect", position),
            npc: Npc::event(owner, Some(expires)),
        },
    );
    Ok(handle)
}

/// Takes the entity off its map and releases its slot.
pub fn fully_remove_entity(map: &mut Map, ctx: &mut Context, handle: Handle, reason: RemovalReason) {
    if !ctx.registry.is_alive(handle) {
        return;
    }
    map.remove_entity(ctx, handle, reason, true);
    ctx.registry.free(handle);
}

/// Puts a dead monster back into its spawn area at full health.
pub fn respawn_monster(map: &mut Map, ctx: &mut Context, handle: Handle) -> bool {
    let Ok(area) = ctx
        .registry
        .monster(handle)
        .map(|monster| monster.spawn_rule.as_ref().and_then(|rule| rule.area))
    else {
        return false;
    };
    let Some(position) = spawn_position(map, area, ctx.rng) else {
        log::warn!("no free cell to respawn {:?} on map {}", handle, map.name());
        return false;
    };
    let Ok(obj) = ctx.registry.world_object_mut(handle) else {
        return false;
    };
    obj.set_position(position);
    obj.reset_state(true);
    obj.walk_path.clear();
    obj.is_active = true;
    obj.hidden = false;
    obj.last_attacked = None;
    obj.clear_visible_players();
    monster::reset_after_respawn(ctx, handle);
    map.add_entity(ctx, handle, false);
    log::debug!("respawned {:?} at {:?}", handle, position);
    true
}
