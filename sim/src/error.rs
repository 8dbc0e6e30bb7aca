use crate::{map::MapId, registry::EntityKind, Coord, Handle};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("handle {0:?} refers to an entity that no longer exists")]
    Expired(Handle),
    #[error("handle {handle:?} is a {found:?} but a {expected} was required")]
    WrongKind {
        handle: Handle,
        expected: &'static str,
        found: EntityKind,
    },
    #[error("entity {handle:?} has no {component} component")]
    Missing {
        handle: Handle,
        component: &'static str,
    },
}

/// Reasons a skill use is refused. These are reported back to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum SkillValidationError {
    #[error("invalid target")]
    InvalidTarget,
    #[error("target is out of range")]
    OutOfRange,
    #[error("no line of sight to target")]
    NoLineOfSight,
    #[error("not enough sp")]
    InsufficientSp,
    #[error("skill has not been learned")]
    NotLearned,
    #[error("cannot use skills while dead")]
    CasterDead,
    #[error("skill cannot be used this way")]
    InvalidSkill,
}

pub type SkillResult = Result<(), SkillValidationError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error(transparent)]
    Skill(#[from] SkillValidationError),
    #[error("entity is not on a map")]
    NotOnMap,
    #[error("entity cannot move right now")]
    CannotMove,
    #[error("cell {0:?} cannot be walked on")]
    Unwalkable(Coord),
    #[error("target {0:?} cannot be attacked")]
    InvalidTarget(Handle),
    #[error("entity is dead")]
    Dead,
    #[error("entity is not dead")]
    NotDead,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpawnError {
    #[error("no monster species with code {0:?}")]
    UnknownSpecies(String),
    #[error("no map with id {0:?}")]
    UnknownMap(MapId),
    #[error("no free cell could be found in the spawn area")]
    NoFreeCell,
}
