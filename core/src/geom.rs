use derive_more::{Add, Constructor, Mul, Sub, Sum};

/// Pixel-space point or direction, `(row, col)` like the contour arrays.
#[derive(Add, Sub, Mul, Sum, Constructor, Default, PartialEq, Debug, Copy, Clone)]
pub struct Vec2F {
    pub row: f64,
    pub col: f64,
}

impl Vec2F {
    pub fn norm(&self) -> f64 {
        self.row.hypot(self.col)
    }

    pub fn dot(&self, other: Vec2F) -> f64 {
        self.row * other.row + self.col * other.col
    }
}

impl From<(f64, f64)> for Vec2F {
    fn from((row, col): (f64, f64)) -> Self {
        Vec2F { row, col }
    }
}

impl From<Vec2F> for (f64, f64) {
    fn from(v: Vec2F) -> Self {
        (v.row, v.col)
    }
}
