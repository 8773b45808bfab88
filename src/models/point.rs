use std::ops::{Add, Mul, Sub};

/// 2D point (or vector) with floating point coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Length of this point interpreted as a vector
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Dot product with another vector
    pub fn dot(&self, other: &Point) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Midpoint between two points
    pub fn midpoint(&self, other: &Point) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    /// Round both coordinates to the nearest integer pixel
    pub fn round(&self) -> Self {
        Self::new(self.x.round(), self.y.round())
    }

    /// Both coordinates are finite (not NaN or infinite)
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Integer pixel coordinates, truncated toward zero
    pub fn to_pixel(&self) -> (i32, i32) {
        (self.x as i32, self.y as i32)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;

    fn mul(self, rhs: f32) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_ops() {
        let a = Point::new(1.0, 2.0);
        let b = Point::new(4.0, 6.0);
        assert_eq!(b - a, Point::new(3.0, 4.0));
        assert_eq!(a + b, Point::new(5.0, 8.0));
        assert_eq!(a * 2.0, Point::new(2.0, 4.0));
        assert!(((b - a).norm() - 5.0).abs() < 1e-6);
        assert_eq!(a.dot(&b), 16.0);
        assert_eq!(a.midpoint(&b), Point::new(2.5, 4.0));
    }

    #[test]
    fn test_round_and_pixel() {
        let p = Point::new(10.6, -3.4);
        assert_eq!(p.round(), Point::new(11.0, -3.0));
        assert_eq!(p.to_pixel(), (10, -3));
        assert!(!Point::new(f32::NAN, 0.0).is_finite());
    }
}
