use crate::{
    actor::WorldObject, combat::CombatEntity, entity_list::EntityList, error::ComponentError,
    monster::Monster, npc::Npc, player::Player,
};
use entity_table::{declare_entity_module, Entity, EntityAllocator};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Monster,
    Npc,
    Effect,
}

/// Generation-stamped reference to an entity plus its category.
///
/// Handles are the only way simulation structures refer to each other. A
/// handle whose slot has since been freed (and possibly reused with a new
/// generation) is reported as not alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    entity: Entity,
    kind: EntityKind,
}

impl Handle {
    pub fn entity(self) -> Entity {
        self.entity
    }

    pub fn kind(self) -> EntityKind {
        self.kind
    }

    pub fn is_player(self) -> bool {
        self.kind == EntityKind::Player
    }

    pub fn is_monster(self) -> bool {
        self.kind == EntityKind::Monster
    }

    pub fn is_combatant(self) -> bool {
        matches!(self.kind, EntityKind::Player | EntityKind::Monster)
    }
}

declare_entity_module! {
    components {
        handle: Handle,
        world_object: WorldObject,
        combat: CombatEntity,
        player: Player,
        monster: Monster,
        npc: Npc,
    }
}
pub use components::{Components, EntityData};

/// Borrowed view of an entity's category-specific component.
#[derive(Debug, Clone, Copy)]
pub enum Actor<'a> {
    Player(&'a Player),
    Monster(&'a Monster),
    Npc(&'a Npc),
    Effect,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Registry {
    entity_allocator: EntityAllocator,
    pub components: Components,
}

impl Registry {
    pub fn alloc(&mut self, kind: EntityKind) -> Handle {
        let entity = self.entity_allocator.alloc();
        let handle = Handle { entity, kind };
        self.components.handle.insert(entity, handle);
        handle
    }

    pub fn insert_entity_data(&mut self, handle: Handle, entity_data: EntityData) {
        self.components.insert_entity_data(handle.entity, entity_data);
        self.components.handle.insert(handle.entity, handle);
    }

    /// Releases the slot. Any copy of `handle` held elsewhere stops being alive.
    pub fn free(&mut self, handle: Handle) -> bool {
        if !self.is_alive(handle) {
            return false;
        }
        self.components.remove_entity(handle.entity);
        self.entity_allocator.free(handle.entity);
        true
    }

    pub fn is_alive(&self, handle: Handle) -> bool {
        self.components.handle.get(handle.entity) == Some(&handle)
    }

    /// Alive and currently taking part in the simulation.
    pub fn is_active(&self, handle: Handle) -> bool {
        self.world_object(handle).map_or(false, |obj| obj.is_active)
    }

    fn check(&self, handle: Handle) -> Result<(), ComponentError> {
        if self.is_alive(handle) {
            Ok(())
        } else {
            Err(ComponentError::Expired(handle))
        }
    }

    fn check_kind(&self, handle: Handle, kind: EntityKind) -> Result<(), ComponentError> {
        self.check(handle)?;
        if handle.kind != kind {
            return Err(ComponentError::WrongKind {
                handle,
                expected: kind_name(kind),
                found: handle.kind,
            });
        }
        Ok(())
    }

    fn check_combatant(&self, handle: Handle) -> Result<(), ComponentError> {
        self.check(handle)?;
        if !handle.is_combatant() {
            return Err(ComponentError::WrongKind {
                handle,
                expected: "player or monster",
                found: handle.kind,
            });
        }
        Ok(())
    }

    pub fn actor(&self, handle: Handle) -> Result<Actor<'_>, ComponentError> {
        self.check(handle)?;
        Ok(match handle.kind {
            EntityKind::Player => Actor::Player(self.player(handle)?),
            EntityKind::Monster => Actor::Monster(self.monster(handle)?),
            EntityKind::Npc => Actor::Npc(self.npc(handle)?),
            EntityKind::Effect => Actor::Effect,
        })
    }

    pub fn world_object(&self, handle: Handle) -> Result<&WorldObject, ComponentError> {
        self.check(handle)?;
        self.components
            .world_object
            .get(handle.entity)
            .ok_or(missing(handle, "world object"))
    }

    pub fn world_object_mut(&mut self, handle: Handle) -> Result<&mut WorldObject, ComponentError> {
        self.check(handle)?;
        self.components
            .world_object
            .get_mut(handle.entity)
            .ok_or(missing(handle, "world object"))
    }

    pub fn combat(&self, handle: Handle) -> Result<&CombatEntity, ComponentError> {
        self.check_combatant(handle)?;
        self.components
            .combat
            .get(handle.entity)
            .ok_or(missing(handle, "combat"))
    }

    pub fn combat_mut(&mut self, handle: Handle) -> Result<&mut CombatEntity, ComponentError> {
        self.check_combatant(handle)?;
        self.components
            .combat
            .get_mut(handle.entity)
            .ok_or(missing(handle, "combat"))
    }

    pub fn player(&self, handle: Handle) -> Result<&Player, ComponentError> {
        self.check_kind(handle, EntityKind::Player)?;
        self.components
            .player
            .get(handle.entity)
            .ok_or(missing(handle, "player"))
    }

    pub fn player_mut(&mut self, handle: Handle) -> Result<&mut Player, ComponentError> {
        self.check_kind(handle, EntityKind::Player)?;
        self.components
            .player
            .get_mut(handle.entity)
            .ok_or(missing(handle, "player"))
    }

    pub fn monster(&self, handle: Handle) -> Result<&Monster, ComponentError> {
        self.check_kind(handle, EntityKind::Monster)?;
        self.components
            .monster
            .get(handle.entity)
            .ok_or(missing(handle, "monster"))
    }

    pub fn monster_mut(&mut self, handle: Handle) -> Result<&mut Monster, ComponentError> {
        self.check_kind(handle, EntityKind::Monster)?;
        self.components
            .monster
            .get_mut(handle.entity)
            .ok_or(missing(handle, "monster"))
    }

    pub fn npc(&self, handle: Handle) -> Result<&Npc, ComponentError> {
        self.check_kind(handle, EntityKind::Npc)?;
        self.components
            .npc
            .get(handle.entity)
            .ok_or(missing(handle, "npc"))
    }

    pub fn is_target_immune(&self, handle: Handle, now: Duration) -> bool {
        self.world_object(handle)
            .map_or(false, |obj| obj.is_target_immune(now))
    }

    /// Drops stale and inactive handles from `list`.
    pub fn retain_active(&self, list: &mut EntityList) {
        list.retain(|handle| self.is_active(handle));
    }

    /// Prunes inactive observers from an entity's visibility set and
    /// returns how many remain.
    pub fn count_visible_players(&mut self, handle: Handle) -> usize {
        let Ok(obj) = self.world_object_mut(handle) else {
            return 0;
        };
        let mut visible = obj.take_visible_players();
        self.retain_active(&mut visible);
        let count = visible.len();
        if let Ok(obj) = self.world_object_mut(handle) {
            obj.restore_visible_players(visible);
        }
        count
    }
}

fn missing(handle: Handle, component: &'static str) -> ComponentError {
    ComponentError::Missing { handle, component }
}

fn kind_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Player => "player",
        EntityKind::Monster => "monster",
        EntityKind::Npc => "npc",
        EntityKind::Effect => "effect",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{npc::Npc, Coord};

    #[test]
    fn freed_handles_are_not_alive() {
        let mut registry = Registry::default();
        let a = registry.alloc(EntityKind::Npc);
        assert!(registry.is_alive(a));
        assert!(registry.free(a));
        assert!(!registry.is_alive(a));
        let b = registry.alloc(EntityKind::Npc);
        assert!(!registry.is_alive(a));
        assert!(registry.is_alive(b));
        assert!(!registry.free(a));
    }

    #[test]
    fn typed_access_reports_wrong_kind() {
        let mut registry = Registry::default();
        let npc = registry.alloc(EntityKind::Npc);
        registry.insert_entity_data(
            npc,
            EntityData {
                world_object: Some(WorldObject::new(npc, "sign", Coord::new(1, 1))),
                npc: Some(Npc::default()),
                ..Default::default()
            },
        );
        assert!(matches!(registry.actor(npc), Ok(Actor::Npc(_))));
        assert_eq!(
            registry.monster(npc).err(),
            Some(ComponentError::WrongKind {
                handle: npc,
                expected: "monster",
                found: EntityKind::Npc,
            })
        );
        assert!(matches!(
            registry.combat(npc),
            Err(ComponentError::WrongKind { .. })
        ));
        registry.free(npc);
        assert_eq!(
            registry.world_object(npc).err(),
            Some(ComponentError::Expired(npc))
        );
    }
}
