use crate::{area::Area, Coord, Grid, Size};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cell {
    Wall,
    Floor,
    /// Blocks movement but not line of sight (water, low fences).
    Snipeable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalkDataError {
    #[error("walk data is empty")]
    Empty,
    #[error("row {0} has a different width to the first row")]
    Ragged(usize),
    #[error("unexpected char {ch:?} at {coord:?}")]
    UnexpectedChar { ch: char, coord: Coord },
}

/// Static walkability of a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkData {
    cells: Grid<Cell>,
    bounds: Area,
}

impl WalkData {
    pub fn new(size: Size) -> Self {
        Self {
            cells: Grid::new_clone(size, Cell::Floor),
            bounds: Area::from_size(size),
        }
    }

    /// Parses rows of `.` (floor), `#` (wall) and `~` (snipeable).
    pub fn from_text(txt: &str) -> Result<Self, WalkDataError> {
        let rows = txt
            .lines()
            .map(str::trim_end)
            .filter(|row| !row.is_empty())
            .collect::<Vec<_>>();
        let width = rows.first().map(|row| row.chars().count()).ok_or(WalkDataError::Empty)?;
        if width == 0 {
            return Err(WalkDataError::Empty);
        }
        let mut walk_data = Self::new(Size::new(width as u32, rows.len() as u32));
        for (y, row) in rows.into_iter().enumerate() {
            if row.chars().count() != width {
                return Err(WalkDataError::Ragged(y));
            }
            for (x, ch) in row.chars().enumerate() {
                let coord = Coord::new(x as i32, y as i32);
                let cell = match ch {
                    '.' => Cell::Floor,
                    '#' => Cell::Wall,
                    '~' => Cell::Snipeable,
                    _ => return Err(WalkDataError::UnexpectedChar { ch, coord }),
                };
                *walk_data.cells.get_checked_mut(coord) = cell;
            }
        }
        Ok(walk_data)
    }

    pub fn size(&self) -> Size {
        self.cells.size()
    }

    pub fn bounds(&self) -> Area {
        self.bounds
    }

    pub fn set_cell(&mut self, coord: Coord, cell: Cell) {
        if let Some(c) = self.cells.get_mut(coord) {
            *c = cell;
        }
    }

    pub fn is_cell_walkable(&self, coord: Coord) -> bool {
        matches!(self.cells.get(coord), Some(Cell::Floor))
    }

    fn is_cell_snipeable(&self, coord: Coord) -> bool {
        matches!(self.cells.get(coord), Some(Cell::Floor | Cell::Snipeable))
    }

    pub fn has_line_of_sight(&self, from: Coord, to: Coord) -> bool {
        if from == to {
            return self.is_cell_snipeable(from);
        }
        line_2d::coords_between(from, to).all(|coord| self.is_cell_snipeable(coord))
    }

    /// Random probing for a walkable cell. Gives up after a fixed number of
    /// attempts.
    pub fn find_walkable_cell_in_area<R: rand::Rng>(&self, area: Area, rng: &mut R) -> Option<Coord> {
        let area = area.clip(&self.bounds);
        if area.is_empty() {
            return None;
        }
        (0..100)
            .map(|_| area.random_coord(rng))
            .find(|&coord| self.is_cell_walkable(coord))
    }

    /// Exhaustive row-major scan for a walkable cell.
    pub fn scan_for_walkable_cell(&self, area: Area) -> Option<Coord> {
        area.clip(&self.bounds)
            .coords()
            .find(|&coord| self.is_cell_walkable(coord))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand_isaac::Isaac64Rng;

    const MAP: &str = "\
.....
.#~..
.....
";

    #[test]
    fn parse_and_query() {
        let walk = WalkData::from_text(MAP).unwrap();
        assert_eq!(walk.size(), Size::new(5, 3));
        assert!(walk.is_cell_walkable(Coord::new(0, 0)));
        assert!(!walk.is_cell_walkable(Coord::new(1, 1)));
        assert!(!walk.is_cell_walkable(Coord::new(2, 1)));
        assert!(!walk.is_cell_walkable(Coord::new(-1, 0)));
    }

    #[test]
    fn walls_block_sight_but_water_does_not() {
        let walk = WalkData::from_text(MAP).unwrap();
        assert!(!walk.has_line_of_sight(Coord::new(0, 1), Coord::new(4, 1)));
        assert!(walk.has_line_of_sight(Coord::new(2, 0), Coord::new(2, 2)));
        assert!(walk.has_line_of_sight(Coord::new(0, 0), Coord::new(4, 0)));
    }

    #[test]
    fn rejects_unknown_cells() {
        assert_eq!(
            WalkData::from_text("..\n.x\n").err(),
            Some(WalkDataError::UnexpectedChar {
                ch: 'x',
                coord: Coord::new(1, 1)
            })
        );
        assert_eq!(WalkData::from_text("..\n.\n").err(), Some(WalkDataError::Ragged(1)));
    }

    #[test]
    fn finds_walkable_cells() {
        let walk = WalkData::from_text("###\n#.#\n###\n").unwrap();
        let mut rng = Isaac64Rng::seed_from_u64(3);
        let area = Area::around(Coord::new(1, 1), 1);
        assert_eq!(walk.scan_for_walkable_cell(area), Some(Coord::new(1, 1)));
        assert_eq!(walk.find_walkable_cell_in_area(area, &mut rng), Some(Coord::new(1, 1)));
    }
}
