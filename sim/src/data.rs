use crate::{
    combat::ElementTable,
    monster::{AiEntry, AiTables, AiType, MonsterSpecies, SkillAiHandler},
};
use std::collections::HashMap;

/// Static game data injected by the server bootstrap.
#[derive(Debug, Clone)]
pub struct GameData {
    species: HashMap<String, MonsterSpecies>,
    skill_ai: HashMap<String, SkillAiHandler>,
    /// Experience needed to advance from each level, indexed by level.
    exp_chart: Vec<u32>,
    pub element_table: ElementTable,
    pub ai_tables: AiTables,
}

fn default_exp_chart(max_level: u32) -> Vec<u32> {
    (0..=max_level)
        .map(|level| 10 + ((level as f32).powf(2.6) * 8.) as u32)
        .collect()
}

impl Default for GameData {
    fn default() -> Self {
        Self {
            species: HashMap::new(),
            skill_ai: HashMap::new(),
            exp_chart: default_exp_chart(99),
            element_table: ElementTable::default(),
            ai_tables: AiTables::default(),
        }
    }
}

impl GameData {
    pub fn add_species(&mut self, species: MonsterSpecies) {
        if self.species.contains_key(&species.code) {
            log::warn!("monster species {} defined twice, keeping the later one", species.code);
        }
        self.species.insert(species.code.clone(), species);
    }

    pub fn species(&self, code: &str) -> Option<&MonsterSpecies> {
        self.species.get(code)
    }

    /// Registers the skill handler used by monsters of species `code`.
    pub fn register_skill_ai(&mut self, code: impl Into<String>, handler: SkillAiHandler) {
        self.skill_ai.insert(code.into(), handler);
    }

    pub fn skill_ai(&self, code: &str) -> Option<SkillAiHandler> {
        self.skill_ai.get(code).copied()
    }

    pub fn set_exp_chart(&mut self, chart: Vec<u32>) {
        self.exp_chart = chart;
    }

    pub fn exp_required(&self, level: u32) -> u32 {
        self.exp_chart
            .get(level as usize)
            .or(self.exp_chart.last())
            .copied()
            .unwrap_or(u32::MAX)
            .max(1)
    }

    pub fn ai_table(&self, ai_type: AiType) -> &[AiEntry] {
        self.ai_tables.get(ai_type)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exp_requirement_grows_and_saturates() {
        let mut data = GameData::default();
        assert!(data.exp_required(2) > data.exp_required(1));
        data.set_exp_chart(vec![0, 10, 20]);
        assert_eq!(data.exp_required(0), 1);
        assert_eq!(data.exp_required(2), 20);
        assert_eq!(data.exp_required(50), 20);
    }
}
