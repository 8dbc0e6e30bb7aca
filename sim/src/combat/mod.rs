use crate::{skill::CharacterSkill, Coord, Handle};
use serde::{Deserialize, Serialize};
use std::{ops::BitOr, time::Duration};

mod cast;
mod damage;
mod element;
mod resolve;

pub use cast::*;
pub use damage::*;
pub use element::{Element, ElementTable};
pub use resolve::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CharacterStat {
    Level,
    Hp,
    MaxHp,
    Sp,
    MaxSp,
    Str,
    Agi,
    Vit,
    Int,
    Dex,
    Luk,
    Attack,
    Attack2,
    MagicAtkMin,
    MagicAtkMax,
    Def,
    MDef,
    Range,
    AspdBonus,
}

impl CharacterStat {
    pub const COUNT: usize = 19;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingStat {
    MoveSpeed,
    /// Delay between the start of an attack animation and the damage landing.
    SpriteAttackTiming,
    HitDelayTime,
    AttackMotionTime,
    AttackDelayTime,
}

impl TimingStat {
    pub const COUNT: usize = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttackFlags(u8);

impl AttackFlags {
    pub const NONE: Self = Self(0);
    pub const PHYSICAL: Self = Self(1 << 0);
    pub const MAGICAL: Self = Self(1 << 1);
    pub const IGNORE_DEFENSE: Self = Self(1 << 2);
    pub const IGNORE_EVASION: Self = Self(1 << 3);
    pub const CAN_HARM_ALLIES: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AttackFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackResult {
    NormalDamage,
    Miss,
}

/// A pending hit, applied by the target once `time` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageInfo {
    pub source: Handle,
    pub target: Handle,
    pub damage: i32,
    pub hit_count: u8,
    pub time: Duration,
    pub attack_motion_time: Duration,
    pub hit_lock_time: Duration,
    pub skill: Option<CharacterSkill>,
    pub result: AttackResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkillCastInfo {
    pub skill: CharacterSkill,
    pub level: i32,
    pub target: Option<Handle>,
    pub position: Option<Coord>,
    /// Overrides the skill's own cast time when set.
    pub cast_time: Option<Duration>,
    pub range: i32,
    pub hide_name: bool,
}

/// Combat state of a player or monster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatEntity {
    pub is_targetable: bool,
    pub is_casting: bool,
    pub casting_time: Duration,
    pub casting_skill: Option<SkillCastInfo>,
    pub queued_cast: Option<SkillCastInfo>,
    stats: [i32; CharacterStat::COUNT],
    timings: [Duration; TimingStat::COUNT],
    skill_cooldowns: Vec<(CharacterSkill, Duration)>,
    damage_queue: Vec<DamageInfo>,
}

impl Default for CombatEntity {
    fn default() -> Self {
        let mut combat = Self {
            is_targetable: true,
            is_casting: false,
            casting_time: Duration::ZERO,
            casting_skill: None,
            queued_cast: None,
            stats: [0; CharacterStat::COUNT],
            timings: [Duration::ZERO; TimingStat::COUNT],
            skill_cooldowns: Vec::new(),
            damage_queue: Vec::new(),
        };
        combat.set_stat(CharacterStat::Range, 2);
        combat
    }
}

impl CombatEntity {
    pub fn stat(&self, stat: CharacterStat) -> i32 {
        self.stats[stat as usize]
    }

    pub fn set_stat(&mut self, stat: CharacterStat, value: i32) {
        self.stats[stat as usize] = value;
    }

    pub fn add_stat(&mut self, stat: CharacterStat, value: i32) {
        self.stats[stat as usize] += value;
    }

    pub fn sub_stat(&mut self, stat: CharacterStat, value: i32) {
        self.stats[stat as usize] -= value;
    }

    pub fn timing(&self, timing: TimingStat) -> Duration {
        self.timings[timing as usize]
    }

    pub fn set_timing(&mut self, timing: TimingStat, value: Duration) {
        self.timings[timing as usize] = value;
    }

    pub fn hp_percent(&self) -> i32 {
        let max = self.stat(CharacterStat::MaxHp);
        if max <= 0 {
            return 0;
        }
        self.stat(CharacterStat::Hp) * 100 / max
    }

    pub fn is_skill_on_cooldown(&self, skill: CharacterSkill, now: Duration) -> bool {
        self.skill_cooldowns
            .iter()
            .any(|&(s, until)| s == skill && until > now)
    }

    pub fn set_skill_cooldown(&mut self, skill: CharacterSkill, until: Duration) {
        match self.skill_cooldowns.iter_mut().find(|(s, _)| *s == skill) {
            Some(entry) => entry.1 = until,
            None => self.skill_cooldowns.push((skill, until)),
        }
    }

    pub fn reset_skill_cooldowns(&mut self) {
        self.skill_cooldowns.clear();
    }

    /// Restores hp without exceeding the maximum.
    pub fn heal_hp(&mut self, amount: i32) {
        let hp = self.stat(CharacterStat::Hp);
        let max = self.stat(CharacterStat::MaxHp);
        self.set_stat(CharacterStat::Hp, (hp + amount).min(max));
    }

    pub fn full_recovery(&mut self, hp: bool, sp: bool) {
        if hp {
            self.set_stat(CharacterStat::Hp, self.stat(CharacterStat::MaxHp));
        }
        if sp {
            self.set_stat(CharacterStat::Sp, self.stat(CharacterStat::MaxSp));
        }
    }

    /// Inserts after any entry scheduled for the same time or earlier.
    pub fn queue_damage(&mut self, info: DamageInfo) {
        let index = self.damage_queue.partition_point(|queued| queued.time <= info.time);
        self.damage_queue.insert(index, info);
    }

    pub fn clear_damage_queue(&mut self) {
        self.damage_queue.clear();
    }

    pub fn damage_queue(&self) -> &[DamageInfo] {
        &self.damage_queue
    }

    /// Removes the earliest entry if it is due.
    fn pop_due_damage(&mut self, now: Duration) -> Option<DamageInfo> {
        match self.damage_queue.first() {
            Some(info) if info.time < now => Some(self.damage_queue.remove(0)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{EntityKind, Registry};

    fn hit(source: Handle, target: Handle, damage: i32, millis: u64) -> DamageInfo {
        DamageInfo {
            source,
            target,
            damage,
            hit_count: 1,
            time: Duration::from_millis(millis),
            attack_motion_time: Duration::ZERO,
            hit_lock_time: Duration::ZERO,
            skill: None,
            result: AttackResult::NormalDamage,
        }
    }

    #[test]
    fn damage_queue_stays_time_ordered() {
        let mut registry = Registry::default();
        let a = registry.alloc(EntityKind::Player);
        let b = registry.alloc(EntityKind::Monster);
        let mut combat = CombatEntity::default();
        combat.queue_damage(hit(a, b, 1, 300));
        combat.queue_damage(hit(a, b, 2, 100));
        combat.queue_damage(hit(a, b, 3, 300));
        combat.queue_damage(hit(a, b, 4, 200));
        let order: Vec<_> = combat.damage_queue().iter().map(|d| d.damage).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
        assert_eq!(combat.pop_due_damage(Duration::from_millis(100)), None);
        assert_eq!(
            combat.pop_due_damage(Duration::from_millis(101)).map(|d| d.damage),
            Some(2)
        );
    }

    #[test]
    fn skill_cooldowns_expire() {
        let mut combat = CombatEntity::default();
        combat.set_skill_cooldown(CharacterSkill::FireBolt, Duration::from_secs(2));
        assert!(combat.is_skill_on_cooldown(CharacterSkill::FireBolt, Duration::from_secs(1)));
        assert!(!combat.is_skill_on_cooldown(CharacterSkill::FireBolt, Duration::from_secs(2)));
        assert!(!combat.is_skill_on_cooldown(CharacterSkill::Bash, Duration::ZERO));
        combat.set_skill_cooldown(CharacterSkill::FireBolt, Duration::from_secs(5));
        combat.reset_skill_cooldowns();
        assert!(!combat.is_skill_on_cooldown(CharacterSkill::FireBolt, Duration::ZERO));
    }

    #[test]
    fn heal_is_capped_at_max() {
        let mut combat = CombatEntity::default();
        combat.set_stat(CharacterStat::MaxHp, 100);
        combat.set_stat(CharacterStat::Hp, 90);
        combat.heal_hp(50);
        assert_eq!(combat.stat(CharacterStat::Hp), 100);
        assert_eq!(combat.hp_percent(), 100);
    }

    #[test]
    fn attack_flags_combine() {
        let flags = AttackFlags::PHYSICAL | AttackFlags::IGNORE_EVASION;
        assert!(flags.contains(AttackFlags::PHYSICAL));
        assert!(!flags.contains(AttackFlags::MAGICAL));
        assert!(flags.contains(AttackFlags::NONE));
    }
}
