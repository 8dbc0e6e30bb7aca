use crate::{
    area::{square_distance, Area},
    map::WalkData,
    Coord, Direction,
};
use std::{cmp::Reverse, collections::BinaryHeap};

const CARDINAL_COST: u32 = 10;
const ORDINAL_COST: u32 = 14;
const UNVISITED: usize = usize::MAX;

fn heuristic(from: Coord, to: Coord) -> u32 {
    let dx = (from.x - to.x).unsigned_abs();
    let dy = (from.y - to.y).unsigned_abs();
    CARDINAL_COST * dx.max(dy) + (ORDINAL_COST - CARDINAL_COST) * dx.min(dy)
}

/// Search state covering the square window a path of `max_length` steps can
/// reach. Anything outside the window is unreachable by construction.
struct Window {
    area: Area,
    cost: Vec<u32>,
    steps: Vec<usize>,
    parent: Vec<usize>,
    closed: Vec<bool>,
}

impl Window {
    fn new(area: Area) -> Self {
        let len = (area.width() * area.height()).max(0) as usize;
        Self {
            area,
            cost: vec![u32::MAX; len],
            steps: vec![0; len],
            parent: vec![UNVISITED; len],
            closed: vec![false; len],
        }
    }

    fn index(&self, coord: Coord) -> Option<usize> {
        if !self.area.contains(coord) {
            return None;
        }
        let x = (coord.x - self.area.min.x) as usize;
        let y = (coord.y - self.area.min.y) as usize;
        Some(x + y * self.area.width() as usize)
    }

    fn coord(&self, index: usize) -> Coord {
        let width = self.area.width() as usize;
        Coord::new(
            self.area.min.x + (index % width) as i32,
            self.area.min.y + (index / width) as i32,
        )
    }

    fn unwind(&self, mut index: usize) -> Vec<Coord> {
        let mut path = vec![self.coord(index)];
        while self.parent[index] != UNVISITED {
            index = self.parent[index];
            path.push(self.coord(index));
        }
        path.reverse();
        path
    }
}

fn can_step(walk: &WalkData, from: Coord, direction: Direction) -> bool {
    let offset = direction.coord();
    let to = from + offset;
    if !walk.is_cell_walkable(to) {
        return false;
    }
    if offset.x != 0 && offset.y != 0 {
        // diagonal moves may not clip a wall corner
        return walk.is_cell_walkable(Coord::new(to.x, from.y))
            && walk.is_cell_walkable(Coord::new(from.x, to.y));
    }
    true
}

/// Finds a path from `start` to within `desired_distance` cells of `target`.
///
/// The returned waypoints begin with `start`. Returns `None` when there is no
/// route of at most `max_length` steps, or when `start` already satisfies the
/// distance requirement.
pub fn get_path(
    walk: &WalkData,
    start: Coord,
    target: Coord,
    desired_distance: i32,
    max_length: usize,
) -> Option<Vec<Coord>> {
    if square_distance(start, target) <= desired_distance {
        return None;
    }
    if square_distance(start, target) > max_length as i32 + desired_distance {
        return None;
    }
    let area = Area::around(start, max_length as i32).clip(&walk.bounds());
    let mut window = Window::new(area);
    let start_index = window.index(start)?;
    window.cost[start_index] = 0;
    let mut open = BinaryHeap::new();
    open.push(Reverse((heuristic(start, target), start_index)));
    while let Some(Reverse((_, index))) = open.pop() {
        if window.closed[index] {
            continue;
        }
        window.closed[index] = true;
        let coord = window.coord(index);
        if square_distance(coord, target) <= desired_distance {
            return Some(window.unwind(index));
        }
        if window.steps[index] >= max_length {
            continue;
        }
        for direction in Direction::all() {
            if !can_step(walk, coord, direction) {
                continue;
            }
            let next = coord + direction.coord();
            let Some(next_index) = window.index(next) else {
                continue;
            };
            if window.closed[next_index] {
                continue;
            }
            let step_cost = if direction.coord().x != 0 && direction.coord().y != 0 {
                ORDINAL_COST
            } else {
                CARDINAL_COST
            };
            let cost = window.cost[index] + step_cost;
            if cost < window.cost[next_index] {
                window.cost[next_index] = cost;
                window.steps[next_index] = window.steps[index] + 1;
                window.parent[next_index] = index;
                open.push(Reverse((cost + heuristic(next, target), next_index)));
            }
        }
    }
    None
}

pub fn has_path(
    walk: &WalkData,
    start: Coord,
    target: Coord,
    desired_distance: i32,
    max_length: usize,
) -> bool {
    square_distance(start, target) <= desired_distance
        || get_path(walk, start, target, desired_distance, max_length).is_some()
}

#[cfg(test)]
mod test {
    use super::*;

    fn walk(txt: &str) -> WalkData {
        WalkData::from_text(txt).unwrap()
    }

    #[test]
    fn straight_line() {
        let walk = walk(".....\n.....\n");
        let path = get_path(&walk, Coord::new(0, 0), Coord::new(4, 0), 0, 32).unwrap();
        assert_eq!(path.first(), Some(&Coord::new(0, 0)));
        assert_eq!(path.last(), Some(&Coord::new(4, 0)));
        assert_eq!(path.len(), 5);
    }

    #[test]
    fn stops_next_to_target() {
        let walk = walk(".....\n");
        let path = get_path(&walk, Coord::new(0, 0), Coord::new(4, 0), 1, 32).unwrap();
        assert_eq!(path.last(), Some(&Coord::new(3, 0)));
        assert!(get_path(&walk, Coord::new(3, 0), Coord::new(4, 0), 1, 32).is_none());
    }

    #[test]
    fn does_not_cut_corners() {
        let walk = walk(
            "\
..
#.
",
        );
        let path = get_path(&walk, Coord::new(0, 0), Coord::new(1, 1), 0, 32).unwrap();
        assert_eq!(
            path,
            vec![Coord::new(0, 0), Coord::new(1, 0), Coord::new(1, 1)]
        );
    }

    #[test]
    fn routes_around_walls() {
        let walk = walk(
            "\
.#...
.#.#.
...#.
",
        );
        let path = get_path(&walk, Coord::new(0, 0), Coord::new(4, 0), 0, 32).unwrap();
        assert_eq!(path.last(), Some(&Coord::new(4, 0)));
        assert!(path.iter().all(|&c| walk.is_cell_walkable(c)));
        for pair in path.windows(2) {
            assert_eq!(square_distance(pair[0], pair[1]), 1);
        }
    }

    #[test]
    fn respects_max_length() {
        let walk = walk("..........\n");
        assert!(get_path(&walk, Coord::new(0, 0), Coord::new(9, 0), 0, 5).is_none());
        assert!(has_path(&walk, Coord::new(0, 0), Coord::new(5, 0), 0, 5));
    }

    #[test]
    fn unreachable_target() {
        let walk = walk("..#..\n..#..\n");
        assert!(!has_path(&walk, Coord::new(0, 0), Coord::new(4, 0), 0, 32));
    }
}
