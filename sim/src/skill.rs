use crate::{
    area::{int_distance, Area},
    combat::{self, AttackFlags, Element, SkillCastInfo},
    command::SimEvent,
    error::{SkillResult, SkillValidationError},
    map::{self, AoeEffect, Map},
    Context, Coord, Handle,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacterSkill {
    /// An "action" with no effect of its own. Used by monster scripts to
    /// play a cast bar or to trigger a cast-success event.
    NoCast,
    Bash,
    MagnumBreak,
    FireBolt,
    ColdBolt,
    LightningBolt,
    ThunderStorm,
    FireWall,
    Quagmire,
    Heal,
    ImproveDodge,
    DoubleAttack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillTargetKind {
    Passive,
    SelfCast,
    Enemy,
    Ally,
    Ground,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SkillEffect {
    None,
    Damage {
        flags: AttackFlags,
        multiplier: f32,
        per_level: f32,
        element: Option<Element>,
    },
    AreaDamage {
        flags: AttackFlags,
        multiplier: f32,
        per_level: f32,
        radius: i32,
        element: Option<Element>,
    },
    Zone {
        effect: AoeEffect,
        radius: i32,
        duration: Duration,
    },
    Heal,
}

/// Static attributes of a skill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkillAttributes {
    pub target: SkillTargetKind,
    pub range: i32,
    pub cast_time_per_level: Duration,
    pub sp_base: i32,
    pub sp_per_level: i32,
    pub effect: SkillEffect,
    /// Damage lands once per level (bolt skills).
    pub hit_per_level: bool,
}

impl SkillAttributes {
    const fn passive() -> Self {
        Self {
            target: SkillTargetKind::Passive,
            range: 0,
            cast_time_per_level: Duration::ZERO,
            sp_base: 0,
            sp_per_level: 0,
            effect: SkillEffect::None,
            hit_per_level: false,
        }
    }
}

fn bolt(element: Element) -> SkillAttributes {
    SkillAttributes {
        target: SkillTargetKind::Enemy,
        range: 9,
        cast_time_per_level: Duration::from_millis(700),
        sp_base: 10,
        sp_per_level: 2,
        effect: SkillEffect::Damage {
            flags: AttackFlags::MAGICAL,
            multiplier: 1.,
            per_level: 0.,
            element: Some(element),
        },
        hit_per_level: true,
    }
}

impl CharacterSkill {
    pub fn attributes(self) -> SkillAttributes {
        use CharacterSkill::*;
        match self {
            NoCast => SkillAttributes {
                target: SkillTargetKind::SelfCast,
                ..SkillAttributes::passive()
            },
            Bash => SkillAttributes {
                target: SkillTargetKind::Enemy,
                range: 2,
                sp_base: 8,
                effect: SkillEffect::Damage {
                    flags: AttackFlags::PHYSICAL,
                    multiplier: 1.,
                    per_level: 0.3,
                    element: None,
                },
                ..SkillAttributes::passive()
            },
            MagnumBreak => SkillAttributes {
                target: SkillTargetKind::SelfCast,
                sp_base: 30,
                effect: SkillEffect::AreaDamage {
                    flags: AttackFlags::PHYSICAL,
                    multiplier: 1.,
                    per_level: 0.2,
                    radius: 2,
                    element: Some(Element::Fire),
                },
                ..SkillAttributes::passive()
            },
            FireBolt => bolt(Element::Fire),
            ColdBolt => bolt(Element::Water),
            LightningBolt => bolt(Element::Wind),
            ThunderStorm => SkillAttributes {
                target: SkillTargetKind::Ground,
                range: 9,
                cast_time_per_level: Duration::from_millis(1000),
                sp_base: 24,
                sp_per_level: 5,
                effect: SkillEffect::AreaDamage {
                    flags: AttackFlags::MAGICAL,
                    multiplier: 0.8,
                    per_level: 0.,
                    radius: 2,
                    element: Some(Element::Wind),
                },
                hit_per_level: true,
            },
            FireWall => SkillAttributes {
                target: SkillTargetKind::Ground,
                range: 9,
                cast_time_per_level: Duration::from_millis(200),
                sp_base: 40,
                effect: SkillEffect::Zone {
                    effect: AoeEffect::Damage { damage: 50 },
                    radius: 1,
                    duration: Duration::from_secs(5),
                },
                ..SkillAttributes::passive()
            },
            Quagmire => SkillAttributes {
                target: SkillTargetKind::Ground,
                range: 9,
                sp_base: 5,
                sp_per_level: 5,
                effect: SkillEffect::Zone {
                    effect: AoeEffect::Snare {
                        duration: Duration::from_millis(1500),
                    },
                    radius: 2,
                    duration: Duration::from_secs(10),
                },
                ..SkillAttributes::passive()
            },
            Heal => SkillAttributes {
                target: SkillTargetKind::Ally,
                range: 9,
                sp_base: 10,
                sp_per_level: 3,
                effect: SkillEffect::Heal,
                ..SkillAttributes::passive()
            },
            ImproveDodge | DoubleAttack => SkillAttributes::passive(),
        }
    }

    pub fn sp_cost(self, level: i32) -> i32 {
        let attr = self.attributes();
        attr.sp_base + attr.sp_per_level * (level - 1).max(0)
    }

    pub fn cast_time(self, level: i32) -> Duration {
        self.attributes().cast_time_per_level * level.max(0) as u32
    }

    pub fn range(self) -> i32 {
        self.attributes().range
    }
}

/// Checks that the cast can land on its target right now.
pub fn validate_target(map: &Map, ctx: &Context, info: &SkillCastInfo, caster: Handle) -> SkillResult {
    let attr = info.skill.attributes();
    let Ok(caster_obj) = ctx.registry.world_object(caster) else {
        return Err(SkillValidationError::InvalidTarget);
    };
    if caster_obj.is_dead() {
        return Err(SkillValidationError::CasterDead);
    }
    let caster_position = caster_obj.position();
    match attr.target {
        SkillTargetKind::Passive => Err(SkillValidationError::InvalidSkill),
        SkillTargetKind::SelfCast => Ok(()),
        SkillTargetKind::Ground => {
            let position = info.position.ok_or(SkillValidationError::InvalidTarget)?;
            if int_distance(caster_position, position) > info.range {
                return Err(SkillValidationError::OutOfRange);
            }
            if !map.has_line_of_sight(caster_position, position) {
                return Err(SkillValidationError::NoLineOfSight);
            }
            Ok(())
        }
        SkillTargetKind::Enemy | SkillTargetKind::Ally => {
            let target = info.target.ok_or(SkillValidationError::InvalidTarget)?;
            let valid = if attr.target == SkillTargetKind::Enemy {
                combat::is_valid_target(ctx.registry, target, Some(caster), false, ctx.now())
            } else {
                target == caster || combat::is_valid_ally(ctx.registry, target, caster)
            };
            if !valid {
                return Err(SkillValidationError::InvalidTarget);
            }
            let target_position = ctx
                .registry
                .world_object(target)
                .map(|obj| obj.position())
                .map_err(|_| SkillValidationError::InvalidTarget)?;
            if int_distance(caster_position, target_position) > info.range {
                return Err(SkillValidationError::OutOfRange);
            }
            if !map.has_line_of_sight(caster_position, target_position) {
                return Err(SkillValidationError::NoLineOfSight);
            }
            Ok(())
        }
    }
}

fn skill_multiplier(multiplier: f32, per_level: f32, level: i32) -> f32 {
    multiplier + per_level * level as f32
}

/// Applies a skill's effect. Target validity has already been checked.
pub fn execute_skill(map: &mut Map, ctx: &mut Context, info: SkillCastInfo, caster: Handle) {
    let attr = info.skill.attributes();
    log::trace!("{:?} executes {:?} level {}", caster, info.skill, info.level);
    let hit_count = if attr.hit_per_level {
        info.level.clamp(1, 10) as u8
    } else {
        1
    };
    match attr.effect {
        SkillEffect::None => {
            if info.skill == CharacterSkill::NoCast {
                return;
            }
            log::warn!("skill {:?} has no effect to execute", info.skill);
        }
        SkillEffect::Damage {
            flags,
            multiplier,
            per_level,
            element,
        } => {
            let Some(target) = info.target else {
                return;
            };
            if !combat::is_valid_target(ctx.registry, target, Some(caster), false, ctx.now()) {
                return;
            }
            if flags.contains(AttackFlags::PHYSICAL) {
                combat::apply_cooldown_for_attack_action_at(ctx, caster, target);
            } else {
                combat::apply_cooldown_for_support_skill_action(ctx, caster);
            }
            let multiplier = skill_multiplier(multiplier, per_level, info.level);
            if let Ok(damage) = combat::calculate_combat_result(
                ctx,
                caster,
                target,
                multiplier,
                hit_count,
                flags,
                Some(info.skill),
                element,
            ) {
                combat::execute_combat_result(ctx, damage, true);
            }
        }
        SkillEffect::AreaDamage {
            flags,
            multiplier,
            per_level,
            radius,
            element,
        } => {
            let Ok(caster_position) = ctx.registry.world_object(caster).map(|obj| obj.position())
            else {
                return;
            };
            let center = info.position.unwrap_or(caster_position);
            combat::apply_cooldown_for_support_skill_action(ctx, caster);
            send_skill_used(ctx, caster, info, center);
            let pool = ctx.pool;
            let mut targets = pool.get();
            map.gather_enemies_in_area(ctx, caster, center, radius, &mut targets, true, true);
            let multiplier = skill_multiplier(multiplier, per_level, info.level);
            for target in targets.iter() {
                if let Ok(damage) = combat::calculate_combat_result(
                    ctx,
                    caster,
                    target,
                    multiplier,
                    hit_count,
                    flags,
                    Some(info.skill),
                    element,
                ) {
                    combat::execute_combat_result(ctx, damage, false);
                }
            }
        }
        SkillEffect::Zone {
            effect,
            radius,
            duration,
        } => {
            let Some(position) = info.position else {
                return;
            };
            combat::apply_cooldown_for_support_skill_action(ctx, caster);
            send_skill_used(ctx, caster, info, position);
            let expires = ctx.time.after(duration);
            map.create_area_of_effect(Area::around(position, radius), caster, effect, expires);
        }
        SkillEffect::Heal => {
            let target = info.target.unwrap_or(caster);
            combat::apply_cooldown_for_support_skill_action(ctx, caster);
            let Ok(caster_combat) = ctx.registry.combat(caster) else {
                return;
            };
            let level = caster_combat.stat(combat::CharacterStat::Level);
            let int = caster_combat.stat(combat::CharacterStat::Int);
            let amount = (level + int) / 8 * (4 + 8 * info.level);
            let position = ctx
                .registry
                .world_object(target)
                .map_or(Coord::new(0, 0), |obj| obj.position());
            send_skill_used(ctx, caster, info, position);
            combat::heal(ctx, target, amount, true);
        }
    }
}

fn send_skill_used(ctx: &mut Context, caster: Handle, info: SkillCastInfo, position: Coord) {
    map::send_to_observers(
        ctx,
        caster,
        SimEvent::SkillUsed {
            caster,
            skill: info.skill,
            level: info.level,
            position,
        },
    );
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sp_cost_scales_with_level() {
        assert_eq!(CharacterSkill::FireBolt.sp_cost(1), 10);
        assert_eq!(CharacterSkill::FireBolt.sp_cost(4), 16);
        assert_eq!(CharacterSkill::NoCast.sp_cost(10), 0);
    }

    #[test]
    fn bolts_cast_longer_at_higher_levels() {
        assert_eq!(CharacterSkill::ColdBolt.cast_time(3), Duration::from_millis(2100));
        assert!(CharacterSkill::Bash.cast_time(10).is_zero());
    }
}
