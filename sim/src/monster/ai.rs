use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AiState {
    #[default]
    Idle,
    Chasing,
    Attacking,
    Special,
    Hidden,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AiType {
    #[default]
    Passive,
    Aggressive,
    Minion,
    Immobile,
    Empty,
}

/// Conditions on the monster's situation, checked before the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiInput {
    Always,
    WaitEnd,
    Attacked,
    PlayersNearby,
    TargetInvalid,
    TargetInAttackRange,
    TargetOutOfRange,
    TargetMoved,
    NotMoving,
    MasterOutOfSight,
    MasterAttacking,
    DeadTimeoutEnd,
}

/// Actions attempted once the input holds. The transition only happens
/// when the action succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiOutput {
    None,
    WaitStart,
    RandomMoveStart,
    SetAttackerAsTarget,
    FindNewTarget,
    AssistAlly,
    CopyMasterTarget,
    StartChase,
    PerformAttack,
    ClearTarget,
    FollowMaster,
    TryRespawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiEntry {
    pub input_state: AiState,
    pub input: AiInput,
    pub output: AiOutput,
    pub output_state: AiState,
}

const fn entry(input_state: AiState, input: AiInput, output: AiOutput, output_state: AiState) -> AiEntry {
    AiEntry {
        input_state,
        input,
        output,
        output_state,
    }
}

use AiInput as I;
use AiOutput as O;
use AiState as S;

const RESPAWN: AiEntry = entry(S::Dead, I::DeadTimeoutEnd, O::TryRespawn, S::Idle);

const CHASE_AND_ATTACK: [AiEntry; 9] = [
    entry(S::Chasing, I::TargetInvalid, O::ClearTarget, S::Idle),
    entry(S::Chasing, I::TargetInAttackRange, O::PerformAttack, S::Attacking),
    entry(S::Chasing, I::NotMoving, O::StartChase, S::Chasing),
    entry(S::Chasing, I::NotMoving, O::ClearTarget, S::Idle),
    entry(S::Chasing, I::TargetMoved, O::StartChase, S::Chasing),
    entry(S::Attacking, I::TargetInvalid, O::ClearTarget, S::Idle),
    entry(S::Attacking, I::TargetInAttackRange, O::PerformAttack, S::Attacking),
    entry(S::Attacking, I::TargetOutOfRange, O::StartChase, S::Chasing),
    entry(S::Attacking, I::TargetOutOfRange, O::ClearTarget, S::Idle),
];

pub const PASSIVE: [AiEntry; 12] = [
    entry(S::Idle, I::Attacked, O::SetAttackerAsTarget, S::Attacking),
    entry(S::Idle, I::WaitEnd, O::RandomMoveStart, S::Idle),
    CHASE_AND_ATTACK[0],
    CHASE_AND_ATTACK[1],
    CHASE_AND_ATTACK[2],
    CHASE_AND_ATTACK[3],
    CHASE_AND_ATTACK[4],
    CHASE_AND_ATTACK[5],
    CHASE_AND_ATTACK[6],
    CHASE_AND_ATTACK[7],
    CHASE_AND_ATTACK[8],
    RESPAWN,
];

pub const AGGRESSIVE: [AiEntry; 14] = [
    entry(S::Idle, I::Attacked, O::SetAttackerAsTarget, S::Attacking),
    entry(S::Idle, I::PlayersNearby, O::FindNewTarget, S::Attacking),
    entry(S::Idle, I::PlayersNearby, O::AssistAlly, S::Attacking),
    entry(S::Idle, I::WaitEnd, O::RandomMoveStart, S::Idle),
    CHASE_AND_ATTACK[0],
    CHASE_AND_ATTACK[1],
    CHASE_AND_ATTACK[2],
    CHASE_AND_ATTACK[3],
    CHASE_AND_ATTACK[4],
    CHASE_AND_ATTACK[5],
    CHASE_AND_ATTACK[6],
    CHASE_AND_ATTACK[7],
    CHASE_AND_ATTACK[8],
    RESPAWN,
];

pub const MINION: [AiEntry; 14] = [
    entry(S::Idle, I::Attacked, O::SetAttackerAsTarget, S::Attacking),
    entry(S::Idle, I::MasterAttacking, O::CopyMasterTarget, S::Attacking),
    entry(S::Idle, I::MasterOutOfSight, O::FollowMaster, S::Idle),
    entry(S::Idle, I::WaitEnd, O::WaitStart, S::Idle),
    CHASE_AND_ATTACK[0],
    CHASE_AND_ATTACK[1],
    CHASE_AND_ATTACK[2],
    CHASE_AND_ATTACK[3],
    CHASE_AND_ATTACK[4],
    CHASE_AND_ATTACK[5],
    CHASE_AND_ATTACK[6],
    CHASE_AND_ATTACK[7],
    CHASE_AND_ATTACK[8],
    RESPAWN,
];

pub const IMMOBILE: [AiEntry; 6] = [
    entry(S::Idle, I::Attacked, O::SetAttackerAsTarget, S::Attacking),
    entry(S::Idle, I::PlayersNearby, O::FindNewTarget, S::Attacking),
    entry(S::Attacking, I::TargetInvalid, O::ClearTarget, S::Idle),
    entry(S::Attacking, I::TargetInAttackRange, O::PerformAttack, S::Attacking),
    entry(S::Attacking, I::TargetOutOfRange, O::ClearTarget, S::Idle),
    RESPAWN,
];

/// Transition tables for every archetype. Entries are scanned in order and
/// the first one that fires wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTables {
    pub passive: Vec<AiEntry>,
    pub aggressive: Vec<AiEntry>,
    pub minion: Vec<AiEntry>,
    pub immobile: Vec<AiEntry>,
}

impl Default for AiTables {
    fn default() -> Self {
        Self {
            passive: PASSIVE.to_vec(),
            aggressive: AGGRESSIVE.to_vec(),
            minion: MINION.to_vec(),
            immobile: IMMOBILE.to_vec(),
        }
    }
}

impl AiTables {
    pub fn get(&self, ai_type: AiType) -> &[AiEntry] {
        match ai_type {
            AiType::Passive => &self.passive,
            AiType::Aggressive => &self.aggressive,
            AiType::Minion => &self.minion,
            AiType::Immobile => &self.immobile,
            AiType::Empty => &[],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_state_but_idle_can_be_left() {
        let tables = AiTables::default();
        for ai_type in [AiType::Passive, AiType::Aggressive, AiType::Minion] {
            let table = tables.get(ai_type);
            for state in [AiState::Chasing, AiState::Attacking, AiState::Dead] {
                assert!(
                    table
                        .iter()
                        .any(|entry| entry.input_state == state && entry.output_state != state),
                    "{:?} has no way out of {:?}",
                    ai_type,
                    state
                );
            }
        }
    }

    #[test]
    fn only_aggressive_monsters_search_for_targets() {
        let tables = AiTables::default();
        let searches = |ai_type| {
            tables
                .get(ai_type)
                .iter()
                .any(|entry| entry.output == AiOutput::FindNewTarget)
        };
        assert!(searches(AiType::Aggressive));
        assert!(searches(AiType::Immobile));
        assert!(!searches(AiType::Passive));
        assert!(!searches(AiType::Minion));
        assert!(tables.get(AiType::Empty).is_empty());
    }
}
