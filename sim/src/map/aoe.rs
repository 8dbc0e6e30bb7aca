use crate::{
    actor,
    area::Area,
    combat::{self, AttackResult, DamageInfo},
    map::Map,
    Context, Coord, Handle,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AoeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AoeEffect {
    Damage { damage: i32 },
    Snare { duration: Duration },
}

/// A zone that affects actors stepping into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaOfEffect {
    pub id: AoeId,
    pub area: Area,
    pub source: Handle,
    pub effect: AoeEffect,
    pub expires: Duration,
    pub active: bool,
}

impl AreaOfEffect {
    /// True when a step from `from` to `to` crosses into the zone.
    pub fn has_touched(&self, from: Coord, to: Coord) -> bool {
        !self.area.contains(from) && self.area.contains(to)
    }
}

impl Map {
    pub fn create_area_of_effect(
        &mut self,
        area: Area,
        source: Handle,
        effect: AoeEffect,
        expires: Duration,
    ) -> AoeId {
        let id = AoeId(self.next_aoe_id);
        self.next_aoe_id += 1;
        let area = area.clip(&self.bounds);
        for index in self.chunk_indices_for_area(area) {
            self.chunks[index].aoes.push(id);
        }
        self.aoes.push(AreaOfEffect {
            id,
            area,
            source,
            effect,
            expires,
            active: true,
        });
        id
    }

    pub fn remove_area_of_effect(&mut self, id: AoeId) {
        let Some(index) = self.aoes.iter().position(|aoe| aoe.id == id) else {
            return;
        };
        let aoe = self.aoes.swap_remove(index);
        for index in self.chunk_indices_for_area(aoe.area) {
            self.chunks[index].aoes.retain(|&other| other != id);
        }
    }

    pub fn areas_of_effect(&self) -> &[AreaOfEffect] {
        &self.aoes
    }

    pub(crate) fn expire_areas_of_effect(&mut self, now: Duration) {
        let expired = self
            .aoes
            .iter()
            .filter(|aoe| aoe.expires <= now)
            .map(|aoe| aoe.id)
            .collect::<Vec<_>>();
        for id in expired {
            self.remove_area_of_effect(id);
        }
    }

    pub fn trigger_area_of_effect_for_character(
        &mut self,
        ctx: &mut Context,
        handle: Handle,
        from: Coord,
        to: Coord,
    ) {
        let Some(chunk) = self.chunk_index(to) else {
            return;
        };
        let touched = self.chunks[chunk]
            .aoes
            .iter()
            .filter_map(|&id| self.aoes.iter().find(|aoe| aoe.id == id))
            .filter(|aoe| aoe.active && aoe.has_touched(from, to))
            .map(|aoe| (aoe.source, aoe.effect))
            .collect::<Vec<_>>();
        for (source, effect) in touched {
            match effect {
                AoeEffect::Damage { damage } => {
                    if !combat::is_valid_target(ctx.registry, handle, Some(source), false, ctx.now()) {
                        continue;
                    }
                    let info = DamageInfo {
                        source,
                        target: handle,
                        damage,
                        hit_count: 1,
                        time: ctx.now(),
                        attack_motion_time: Duration::ZERO,
                        hit_lock_time: Duration::ZERO,
                        skill: None,
                        result: AttackResult::NormalDamage,
                    };
                    if let Ok(combat) = ctx.registry.combat_mut(handle) {
                        combat.queue_damage(info);
                    }
                }
                AoeEffect::Snare { duration } => {
                    actor::add_move_lock_time(ctx, handle, duration, true);
                }
            }
        }
    }
}
