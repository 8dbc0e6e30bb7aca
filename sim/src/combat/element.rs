use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Element {
    #[default]
    Neutral,
    Water,
    Earth,
    Fire,
    Wind,
    Poison,
    Holy,
    Shadow,
    Ghost,
    Undead,
}

impl Element {
    pub const COUNT: usize = 10;
}

/// Percentage modifiers indexed by attack element, then defence element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementTable {
    modifiers: [[i32; Element::COUNT]; Element::COUNT],
}

impl Default for ElementTable {
    fn default() -> Self {
        Self {
            modifiers: [
                [100, 100, 100, 100, 100, 100, 100, 100, 25, 100],
                [100, 25, 100, 150, 50, 100, 75, 100, 100, 100],
                [100, 100, 25, 50, 150, 100, 75, 100, 100, 100],
                [100, 50, 150, 25, 100, 100, 75, 100, 100, 125],
                [100, 175, 50, 100, 25, 100, 75, 100, 100, 100],
                [100, 100, 125, 125, 125, 0, 75, 50, 100, 0],
                [100, 100, 100, 100, 100, 100, 0, 125, 100, 150],
                [100, 100, 100, 100, 100, 50, 125, 0, 100, 0],
                [25, 100, 100, 100, 100, 100, 75, 75, 125, 100],
                [100, 100, 100, 100, 100, 50, 100, 0, 100, 0],
            ],
        }
    }
}

impl ElementTable {
    pub fn attack_modifier(&self, attack: Element, defence: Element) -> i32 {
        self.modifiers[attack as usize][defence as usize]
    }

    pub fn set_attack_modifier(&mut self, attack: Element, defence: Element, modifier: i32) {
        self.modifiers[attack as usize][defence as usize] = modifier;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_is_attack_then_defence() {
        let table = ElementTable::default();
        assert_eq!(table.attack_modifier(Element::Water, Element::Fire), 150);
        assert_eq!(table.attack_modifier(Element::Fire, Element::Water), 50);
        assert_eq!(table.attack_modifier(Element::Neutral, Element::Ghost), 25);
        assert_eq!(table.attack_modifier(Element::Holy, Element::Holy), 0);
    }
}
