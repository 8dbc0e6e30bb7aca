use crate::{Coord, Direction, Size};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive rectangle of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub min: Coord,
    pub max: Coord,
}

impl Area {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min: Coord::new(min_x, min_y),
            max: Coord::new(max_x, max_y),
        }
    }

    pub fn around(center: Coord, distance: i32) -> Self {
        Self::around_rect(center, distance, distance)
    }

    pub fn around_rect(center: Coord, width: i32, height: i32) -> Self {
        Self::new(
            center.x - width,
            center.y - height,
            center.x + width,
            center.y + height,
        )
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width() as i32 - 1, size.height() as i32 - 1)
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x + 1
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y + 1
    }

    pub fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y
    }

    pub fn center(&self) -> Coord {
        Coord::new(
            (self.min.x + self.max.x) / 2,
            (self.min.y + self.max.y) / 2,
        )
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= self.min.x && coord.x <= self.max.x && coord.y >= self.min.y && coord.y <= self.max.y
    }

    pub fn clip(&self, bounds: &Area) -> Self {
        Self::new(
            self.min.x.max(bounds.min.x),
            self.min.y.max(bounds.min.y),
            self.max.x.min(bounds.max.x),
            self.max.y.min(bounds.max.y),
        )
    }

    pub fn shrink(&self, x: i32, y: i32) -> Self {
        Self::new(self.min.x + x, self.min.y + y, self.max.x - x, self.max.y - y)
    }

    pub fn overlaps(&self, other: &Area) -> bool {
        !self.clip(other).is_empty()
    }

    pub fn coords(&self) -> impl Iterator<Item = Coord> {
        let Area { min, max } = *self;
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| Coord::new(x, y)))
    }

    pub fn random_coord<R: Rng>(&self, rng: &mut R) -> Coord {
        if self.is_empty() {
            return self.min;
        }
        Coord::new(
            rng.gen_range(self.min.x..=self.max.x),
            rng.gen_range(self.min.y..=self.max.y),
        )
    }
}

/// Chebyshev distance. This is the metric used for chunk and view range tests.
pub fn square_distance(a: Coord, b: Coord) -> i32 {
    (a.x - b.x).abs().max((a.y - b.y).abs())
}

pub fn in_range(a: Coord, b: Coord, distance: i32) -> bool {
    square_distance(a, b) <= distance
}

/// Euclidean distance truncated to whole cells, used for attack and skill ranges.
pub fn int_distance(a: Coord, b: Coord) -> i32 {
    let dx = (a.x - b.x) as f32;
    let dy = (a.y - b.y) as f32;
    (dx * dx + dy * dy).sqrt() as i32
}

pub fn midpoint(a: Coord, b: Coord) -> Coord {
    Coord::new((a.x + b.x) / 2, (a.y + b.y) / 2)
}

pub fn is_diagonal_step(from: Coord, to: Coord) -> bool {
    from.x != to.x && from.y != to.y
}

/// The compass direction that best approximates the offset from `from` to `to`.
pub fn direction_towards(from: Coord, to: Coord) -> Option<Direction> {
    let step = Coord::new((to.x - from.x).signum(), (to.y - from.y).signum());
    Direction::all().find(|direction| direction.coord() == step)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clip_to_bounds() {
        let bounds = Area::from_size(Size::new(10, 10));
        let area = Area::around(Coord::new(1, 8), 3).clip(&bounds);
        assert_eq!(area, Area::new(0, 5, 4, 9));
    }

    #[test]
    fn chebyshev_distance() {
        assert_eq!(square_distance(Coord::new(0, 0), Coord::new(3, -7)), 7);
        assert!(in_range(Coord::new(2, 2), Coord::new(4, 4), 2));
        assert!(!in_range(Coord::new(2, 2), Coord::new(5, 4), 2));
    }

    #[test]
    fn direction_of_offset() {
        let d = direction_towards(Coord::new(5, 5), Coord::new(9, 1));
        assert_eq!(d, Some(Direction::NorthEast));
        assert_eq!(direction_towards(Coord::new(5, 5), Coord::new(5, 5)), None);
    }

    #[test]
    fn coords_cover_whole_area() {
        let area = Area::new(2, 3, 4, 4);
        assert_eq!(area.coords().count(), 6);
        assert!(area.coords().all(|c| area.contains(c)));
    }
}
