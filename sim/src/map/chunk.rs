use crate::{entity_list::EntityList, map::AoeId, registry::Registry, EntityKind, Handle};

/// One square bucket of the spatial grid.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub players: EntityList,
    pub monsters: EntityList,
    pub all: EntityList,
    pub aoes: Vec<AoeId>,
}

impl Chunk {
    pub fn add(&mut self, handle: Handle) {
        if self.all.contains(handle) {
            invariant!("{:?} added to a chunk it already belongs to", handle);
            return;
        }
        self.all.add(handle);
        match handle.kind() {
            EntityKind::Player => self.players.add(handle),
            EntityKind::Monster => self.monsters.add(handle),
            EntityKind::Npc | EntityKind::Effect => (),
        }
    }

    pub fn remove(&mut self, handle: Handle) -> bool {
        let removed = self.all.remove(handle);
        match handle.kind() {
            EntityKind::Player => {
                self.players.remove(handle);
            }
            EntityKind::Monster => {
                self.monsters.remove(handle);
            }
            EntityKind::Npc | EntityKind::Effect => (),
        }
        removed
    }

    /// Drops stale and inactive handles. Returns how many players were dropped.
    pub fn clear_inactive(&mut self, registry: &Registry) -> usize {
        let players = self.players.len();
        registry.retain_active(&mut self.players);
        registry.retain_active(&mut self.monsters);
        registry.retain_active(&mut self.all);
        players - self.players.len()
    }
}
