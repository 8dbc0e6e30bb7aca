use crate::{command::RemovalReason, map::Map, spawn, Context, Handle};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Non-combat actor: signposts, shops, and short-lived effect markers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Npc {
    /// Event objects never block cells.
    pub is_event: bool,
    pub owner: Option<Handle>,
    /// Time at which the npc removes itself.
    pub expires: Option<Duration>,
}

impl Npc {
    pub fn event(owner: Option<Handle>, expires: Option<Duration>) -> Self {
        Self {
            is_event: true,
            owner,
            expires,
        }
    }
}

pub fn update(map: &mut Map, ctx: &mut Context, handle: Handle) {
    let Ok(npc) = ctx.registry.npc(handle) else {
        return;
    };
    let owner_gone = npc
        .owner
        .map_or(false, |owner| !ctx.registry.is_alive(owner));
    let expired = npc.expires.map_or(false, |expires| ctx.time.has_passed(expires));
    if expired || owner_gone {
        log::trace!("removing npc {:?}", handle);
        spawn::fully_remove_entity(map, ctx, handle, RemovalReason::OutOfSight);
    }
}
