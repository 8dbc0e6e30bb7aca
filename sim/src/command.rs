use crate::{
    entity_list::EntityList, error::SkillValidationError, skill::CharacterSkill, Coord, Direction,
    Handle,
};
use serde::{Deserialize, Serialize};
use std::{mem, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalReason {
    OutOfSight,
    Dead,
    Teleport,
    Refresh,
    Hidden,
    Disconnect,
}

/// Semantic notifications produced by the simulation. The session layer
/// turns these into packets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimEvent {
    Created {
        entity: Handle,
        position: Coord,
        facing: Direction,
    },
    Removed {
        entity: Handle,
        reason: RemovalReason,
    },
    RemoveAllEntities,
    StartMove {
        entity: Handle,
        position: Coord,
        target: Coord,
    },
    Moved {
        entity: Handle,
        position: Coord,
    },
    StopImmediate {
        entity: Handle,
        position: Coord,
    },
    Attack {
        source: Handle,
        target: Handle,
        damage: i32,
        hit_count: u8,
        motion_time: Duration,
    },
    Hit {
        entity: Handle,
        damage: i32,
        lock_time: Duration,
    },
    StartCast {
        caster: Handle,
        target: Option<Handle>,
        skill: CharacterSkill,
        level: i32,
        cast_time: Duration,
        hide_name: bool,
    },
    StartCastGround {
        caster: Handle,
        position: Coord,
        skill: CharacterSkill,
        level: i32,
        range: i32,
        cast_time: Duration,
        hide_name: bool,
    },
    SkillUsed {
        caster: Handle,
        skill: CharacterSkill,
        level: i32,
        position: Coord,
    },
    SkillFailed {
        entity: Handle,
        reason: SkillValidationError,
    },
    Heal {
        entity: Handle,
        amount: i32,
    },
    HpChanged {
        entity: Handle,
        hp: i32,
        max_hp: i32,
    },
    SpChanged {
        entity: Handle,
        sp: i32,
        max_sp: i32,
    },
    ExpGain {
        entity: Handle,
        exp: u32,
    },
    LevelUp {
        entity: Handle,
        level: u32,
        exp: u32,
    },
    Died {
        entity: Handle,
    },
    SitStand {
        entity: Handle,
        sitting: bool,
    },
    FacingChanged {
        entity: Handle,
        facing: Direction,
    },
    MonsterTarget {
        monster: Handle,
    },
    Emote {
        entity: Handle,
        emote: i32,
    },
    TargetableChanged {
        entity: Handle,
        targetable: bool,
    },
    AdminHideStatus {
        hidden: bool,
    },
    ImportantEntity {
        entity: Handle,
        position: Coord,
    },
    ImportantEntityRemoved {
        entity: Handle,
    },
}

impl SimEvent {
    /// The entity an event is about, if any.
    pub fn subject(&self) -> Option<Handle> {
        use SimEvent::*;
        match *self {
            Created { entity, .. }
            | Removed { entity, .. }
            | StartMove { entity, .. }
            | Moved { entity, .. }
            | StopImmediate { entity, .. }
            | Hit { entity, .. }
            | SkillFailed { entity, .. }
            | Heal { entity, .. }
            | HpChanged { entity, .. }
            | SpChanged { entity, .. }
            | ExpGain { entity, .. }
            | LevelUp { entity, .. }
            | Died { entity }
            | SitStand { entity, .. }
            | FacingChanged { entity, .. }
            | Emote { entity, .. }
            | TargetableChanged { entity, .. }
            | ImportantEntity { entity, .. }
            | ImportantEntityRemoved { entity } => Some(entity),
            Attack { source, .. } => Some(source),
            StartCast { caster, .. } | StartCastGround { caster, .. } | SkillUsed { caster, .. } => {
                Some(caster)
            }
            MonsterTarget { monster } => Some(monster),
            RemoveAllEntities | AdminHideStatus { .. } => None,
        }
    }
}

/// One event together with the players who must receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub recipients: Vec<Handle>,
    pub event: SimEvent,
}

/// Collects recipients, then stamps each sent event with the current
/// recipient set.
#[derive(Debug, Default)]
pub struct CommandBuilder {
    recipients: Vec<Handle>,
    outbox: Vec<Outbound>,
}

impl CommandBuilder {
    pub fn add_recipient(&mut self, handle: Handle) {
        if !self.recipients.contains(&handle) {
            self.recipients.push(handle);
        }
    }

    pub fn add_recipients(&mut self, list: &EntityList) {
        for handle in list.iter() {
            self.add_recipient(handle);
        }
    }

    pub fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }

    pub fn clear_recipients(&mut self) {
        self.recipients.clear();
    }

    /// Sends `event` to the current recipients. Nothing is queued when
    /// there is nobody to tell.
    pub fn send_multi(&mut self, event: SimEvent) {
        if self.recipients.is_empty() {
            return;
        }
        self.outbox.push(Outbound {
            recipients: self.recipients.clone(),
            event,
        });
    }

    /// Sends `event` to a single player regardless of the recipient set.
    pub fn send(&mut self, recipient: Handle, event: SimEvent) {
        self.outbox.push(Outbound {
            recipients: vec![recipient],
            event,
        });
    }

    pub fn outbox(&self) -> &[Outbound] {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        mem::take(&mut self.outbox)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{EntityKind, Registry};

    #[test]
    fn recipients_are_snapshotted_per_event() {
        let mut registry = Registry::default();
        let a = registry.alloc(EntityKind::Player);
        let b = registry.alloc(EntityKind::Player);
        let mut commands = CommandBuilder::default();
        commands.send_multi(SimEvent::Died { entity: a });
        assert!(commands.outbox().is_empty());
        commands.add_recipient(a);
        commands.add_recipient(b);
        commands.add_recipient(a);
        commands.send_multi(SimEvent::Died { entity: b });
        commands.clear_recipients();
        assert!(!commands.has_recipients());
        let outbox = commands.take_outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].recipients, vec![a, b]);
        assert!(commands.take_outbox().is_empty());
    }
}
