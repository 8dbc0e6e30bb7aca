use crate::{
    actor::{self, WorldObject, WorldPosition},
    area::{in_range, midpoint, square_distance},
    command::{RemovalReason, SimEvent},
    entity_list::EntityList,
    map::Map,
    Context, Coord, Handle,
};
use std::time::Duration;

/// Whether `observer` should currently be tracking `subject`. Hidden and
/// spawn-immune subjects are tracked by nobody.
fn should_observe(observer: &WorldObject, subject: &WorldObject, view_distance: i32, now: Duration) -> bool {
    observer.handle.is_player()
        && observer.handle != subject.handle
        && observer.is_active
        && subject.is_able_to_be_seen_by(observer.handle)
        && !subject.is_target_immune(now)
        && in_range(observer.position(), subject.position(), view_distance)
}

fn created(obj: &WorldObject) -> SimEvent {
    SimEvent::Created {
        entity: obj.handle,
        position: obj.position(),
        facing: obj.facing,
    }
}

/// Adds everyone observing `handle` to the current recipients, plus the
/// entity itself when it is a player.
pub fn add_visible_players_as_recipients(ctx: &mut Context, handle: Handle) {
    let Ok(obj) = ctx.registry.world_object(handle) else {
        return;
    };
    ctx.commands.add_recipients(obj.visible_players());
    if handle.is_player() {
        ctx.commands.add_recipient(handle);
    }
}

/// Sends `event` to everyone who can see `handle` and clears the recipients.
pub(crate) fn send_to_observers(ctx: &mut Context, handle: Handle, event: SimEvent) {
    add_visible_players_as_recipients(ctx, handle);
    ctx.commands.send_multi(event);
    ctx.commands.clear_recipients();
}

impl Map {
    fn observe_pair(&self, ctx: &Context, observer: Handle, subject: Handle) -> Option<(bool, bool)> {
        let observer = ctx.registry.world_object(observer).ok()?;
        let subject = ctx.registry.world_object(subject).ok()?;
        let should = should_observe(observer, subject, self.view_distance, ctx.now());
        let current = subject.is_player_visible(observer.handle);
        Some((should, current))
    }

    /// Reconciles both directions of visibility between a mover and one
    /// other entity. Returns true if anything changed.
    fn resolve_visibility(
        &self,
        ctx: &mut Context,
        mover: Handle,
        other: Handle,
        adds: &mut EntityList,
        removes: &mut EntityList,
    ) -> bool {
        let mut changed = false;
        if mover.is_player() {
            if let Some((should, current)) = self.observe_pair(ctx, mover, other) {
                if current != should {
                    changed = true;
                    if let Ok(obj) = ctx.registry.world_object_mut(other) {
                        if should {
                            obj.add_visible_player(mover);
                            let event = created(obj);
                            ctx.commands.send(mover, event);
                        } else {
                            obj.remove_visible_player(mover);
                            ctx.commands.send(
                                mover,
                                SimEvent::Removed {
                                    entity: other,
                                    reason: RemovalReason::OutOfSight,
                                },
                            );
                        }
                    }
                }
            }
        }
        if other.is_player() {
            if let Some((should, current)) = self.observe_pair(ctx, other, mover) {
                if current != should {
                    changed = true;
                    if let Ok(obj) = ctx.registry.world_object_mut(mover) {
                        if should {
                            obj.add_visible_player(other);
                            adds.add(other);
                        } else {
                            obj.remove_visible_player(other);
                            removes.add(other);
                        }
                    }
                }
            }
        }
        changed
    }

    /// Moves an entity to `new_position` and brings every affected
    /// visibility set up to date.
    ///
    /// Displacements larger than the width of the view window rebuild
    /// visibility from scratch. Shorter moves only examine chunks that can
    /// hold an entity in range of the mover before or after the move.
    pub fn change_entity_position(
        &mut self,
        ctx: &mut Context,
        mover: Handle,
        old_position: WorldPosition,
        new_position: WorldPosition,
        is_walk_update: bool,
    ) {
        let Ok(obj) = ctx.registry.world_object(mover) else {
            return;
        };
        let old_cell = old_position.cell();
        let new_cell = new_position.cell();
        let distance = square_distance(obj.position(), new_cell);
        ctx.commands.clear_recipients();

        if distance > self.view_distance * 2 + 1 {
            // observers are found around the old position, so clear them
            // before the entity leaves it
            self.send_remove_entity_around(ctx, mover, RemovalReason::OutOfSight);
            if let Ok(obj) = ctx.registry.world_object_mut(mover) {
                obj.clear_visible_players();
                obj.set_world_position(new_position);
            }
            self.move_between_chunks(mover, old_cell, new_cell);
            if mover.is_player() {
                ctx.commands.send(mover, SimEvent::RemoveAllEntities);
                if let Ok(obj) = ctx.registry.world_object_mut(mover) {
                    obj.is_active = false;
                }
                self.activate_player_and_notify_nearby(ctx, mover);
            } else {
                self.send_add_entity_around(ctx, mover);
            }
            return;
        }

        if let Ok(obj) = ctx.registry.world_object_mut(mover) {
            obj.set_world_position(new_position);
        }
        self.move_between_chunks(mover, old_cell, new_cell);

        let pool = ctx.pool;
        let mut adds = pool.get();
        let mut removes = pool.get();
        let mut moves = pool.get();
        if !is_walk_update && mover.is_player() {
            moves.add(mover);
        }
        let center = midpoint(old_cell, new_cell);
        let search = self.view_distance + distance / 2 + 1;
        for index in self.chunk_indices(center, search) {
            let chunk = &self.chunks[index];
            let candidates = if mover.is_player() {
                &chunk.all
            } else {
                &chunk.players
            };
            for other in candidates.iter() {
                if other == mover {
                    continue;
                }
                let changed = self.resolve_visibility(ctx, mover, other, &mut adds, &mut removes);
                if changed || is_walk_update || !other.is_player() {
                    continue;
                }
                if ctx
                    .registry
                    .world_object(mover)
                    .map_or(false, |obj| obj.is_player_visible(other))
                {
                    moves.insert(other);
                }
            }
        }

        let Ok(obj) = ctx.registry.world_object(mover) else {
            return;
        };
        let created = created(obj);
        let is_important = obj.is_important;
        let step_count = obj.step_count;
        if !adds.is_empty() {
            ctx.commands.add_recipients(&adds);
            ctx.commands.send_multi(created);
            ctx.commands.clear_recipients();
        }
        if !removes.is_empty() {
            ctx.commands.add_recipients(&removes);
            ctx.commands.send_multi(SimEvent::Removed {
                entity: mover,
                reason: RemovalReason::OutOfSight,
            });
            ctx.commands.clear_recipients();
        }
        if !moves.is_empty() {
            ctx.commands.add_recipients(&moves);
            ctx.commands.send_multi(SimEvent::Moved {
                entity: mover,
                position: new_cell,
            });
            ctx.commands.clear_recipients();
        }
        if is_important && (!is_walk_update || step_count % 4 == 0) {
            self.update_important_entity(ctx, mover);
        }
    }

    /// Registers every nearby player that is not yet observing `handle` and
    /// tells them it exists.
    pub fn send_add_entity_around(&self, ctx: &mut Context, handle: Handle) {
        let Ok(position) = ctx.registry.world_object(handle).map(|obj| obj.position()) else {
            return;
        };
        ctx.commands.clear_recipients();
        for index in self.chunk_indices(position, self.view_distance) {
            for player in self.chunks[index].players.iter() {
                let Some((should, current)) = self.observe_pair(ctx, player, handle) else {
                    continue;
                };
                if !should || current {
                    continue;
                }
                if let Ok(obj) = ctx.registry.world_object_mut(handle) {
                    obj.add_visible_player(player);
                }
                ctx.commands.add_recipient(player);
            }
        }
        if ctx.commands.has_recipients() {
            if let Ok(obj) = ctx.registry.world_object(handle) {
                let event = created(obj);
                ctx.commands.send_multi(event);
            }
            ctx.commands.clear_recipients();
        }
    }

    /// Tells the entity's observers it is gone and forgets them. Unlike
    /// `send_remove_entity_around`, the entity keeps seeing everything else.
    pub fn hide_from_observers(&self, ctx: &mut Context, handle: Handle, reason: RemovalReason) {
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return;
        };
        if obj.has_visible_players() {
            ctx.commands.clear_recipients();
            ctx.commands.add_recipients(obj.visible_players());
            ctx.commands.send_multi(SimEvent::Removed {
                entity: handle,
                reason,
            });
            ctx.commands.clear_recipients();
        }
        if let Ok(obj) = ctx.registry.world_object_mut(handle) {
            obj.clear_visible_players();
        }
    }

    /// Tells the entity's observers it is gone. A player is also removed
    /// from the visibility set of everything around it.
    pub fn send_remove_entity_around(&self, ctx: &mut Context, handle: Handle, reason: RemovalReason) {
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return;
        };
        let position = obj.position();
        if obj.has_visible_players() {
            ctx.commands.add_recipients(obj.visible_players());
            ctx.commands.send_multi(SimEvent::Removed {
                entity: handle,
                reason,
            });
            ctx.commands.clear_recipients();
        }
        if !handle.is_player() {
            return;
        }
        for index in self.chunk_indices(position, self.view_distance) {
            for other in self.chunks[index].all.iter() {
                if other == handle {
                    continue;
                }
                if let Ok(obj) = ctx.registry.world_object_mut(other) {
                    if obj.is_player_visible(handle) {
                        obj.remove_visible_player(handle);
                    }
                }
            }
        }
    }

    /// Marks a player active, then exchanges creation notices with every
    /// entity in view.
    pub fn activate_player_and_notify_nearby(&mut self, ctx: &mut Context, player: Handle) {
        let Ok(obj) = ctx.registry.world_object_mut(player) else {
            return;
        };
        if obj.is_active {
            log::warn!("activating player {} who is already active", obj.name);
        }
        obj.is_active = true;
        obj.is_important = true;
        let position = obj.position();
        let hidden = obj.hidden;

        let pool = ctx.pool;
        let mut nearby = pool.get();
        ctx.commands.clear_recipients();
        ctx.commands.add_recipient(player);
        for index in self.chunk_indices(position, self.view_distance) {
            for other in self.chunks[index].all.iter() {
                if other == player {
                    continue;
                }
                if let Some((true, current)) = self.observe_pair(ctx, other, player) {
                    if !current {
                        if let Ok(obj) = ctx.registry.world_object_mut(player) {
                            obj.add_visible_player(other);
                        }
                    }
                    ctx.commands.add_recipient(other);
                }
                if let Some((true, current)) = self.observe_pair(ctx, player, other) {
                    if !current {
                        if let Ok(obj) = ctx.registry.world_object_mut(other) {
                            obj.add_visible_player(player);
                        }
                    }
                    nearby.add(other);
                }
            }
        }
        if let Ok(obj) = ctx.registry.world_object(player) {
            let event = created(obj);
            ctx.commands.send_multi(event);
        }
        ctx.commands.clear_recipients();
        for other in nearby.iter() {
            if let Ok(obj) = ctx.registry.world_object(other) {
                let event = created(obj);
                ctx.commands.send(player, event);
            }
        }

        self.register_important_entity(ctx, player);
        for entity in self.important.iter() {
            if entity == player {
                continue;
            }
            if let Ok(obj) = ctx.registry.world_object(entity) {
                let position = obj.position();
                ctx.commands
                    .send(player, SimEvent::ImportantEntity { entity, position });
            }
        }
        if hidden {
            ctx.commands
                .send(player, SimEvent::AdminHideStatus { hidden: true });
        }
    }

    /// Moves an entity in one jump, as if it left the map and came back.
    pub fn teleport_entity(
        &mut self,
        ctx: &mut Context,
        handle: Handle,
        position: Coord,
        reason: RemovalReason,
    ) {
        if !self.bounds.contains(position) {
            invariant!("teleporting {:?} out of the bounds of map {}", handle, self.name);
            return;
        }
        actor::stop_moving_immediately(ctx, handle, true);
        self.send_remove_entity_around(ctx, handle, reason);
        let Ok(obj) = ctx.registry.world_object_mut(handle) else {
            return;
        };
        let old_position = obj.position();
        obj.set_position(position);
        obj.clear_visible_players();
        obj.walk_path.clear();
        self.move_between_chunks(handle, old_position, position);
        log::debug!("teleported {:?} from {:?} to {:?}", handle, old_position, position);

        if handle.is_player() {
            ctx.commands.send(handle, SimEvent::RemoveAllEntities);
            if let Ok(obj) = ctx.registry.world_object_mut(handle) {
                obj.is_active = false;
            }
            self.activate_player_and_notify_nearby(ctx, handle);
        } else {
            self.send_add_entity_around(ctx, handle);
        }
    }

    /// Makes observers drop and recreate the entity.
    pub fn refresh_entity(&self, ctx: &mut Context, handle: Handle) {
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return;
        };
        if !obj.has_visible_players() {
            return;
        }
        let event = created(obj);
        ctx.commands.add_recipients(obj.visible_players());
        ctx.commands.send_multi(SimEvent::Removed {
            entity: handle,
            reason: RemovalReason::Refresh,
        });
        ctx.commands.send_multi(event);
        ctx.commands.clear_recipients();
    }

    pub fn start_move(&self, ctx: &mut Context, handle: Handle) {
        let Ok(obj) = ctx.registry.world_object(handle) else {
            return;
        };
        let event = SimEvent::StartMove {
            entity: handle,
            position: obj.position(),
            target: obj.target_position,
        };
        send_to_observers(ctx, handle, event);
    }
}
