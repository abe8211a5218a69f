//! Screen-space primitives shared by the locator and the platform seams.

use serde::{Deserialize, Serialize};

/// A point in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance. Avoids the sqrt for tolerance checks.
    pub fn distance_sq(self, other: Point) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        dx * dx + dy * dy
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.distance_sq(other) as f64).sqrt()
    }

    pub fn offset(self, dx: i32, dy: i32) -> Point {
        Point::new(self.x + dx, self.y + dy)
    }
}

/// An axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Build a rectangle, clamping the origin to the screen edge and
    /// rejecting degenerate sizes.
    pub fn checked(left: i32, top: i32, width: i32, height: i32) -> Option<Rect> {
        if width <= 0 || height <= 0 {
            return None;
        }
        Some(Rect {
            left: left.max(0),
            top: top.max(0),
            width,
            height,
        })
    }

    /// Square region of `radius` around `center`, clamped to the screen edge.
    pub fn around(center: Point, radius: i32) -> Option<Rect> {
        Rect::checked(center.x - radius, center.y - radius, radius * 2, radius * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_sq_is_symmetric() {
        let a = Point::new(3, 4);
        let b = Point::new(0, 0);
        assert_eq!(a.distance_sq(b), 25);
        assert_eq!(b.distance_sq(a), 25);
    }

    #[test]
    fn checked_rejects_degenerate_sizes() {
        assert!(Rect::checked(0, 0, 0, 10).is_none());
        assert!(Rect::checked(0, 0, 10, -1).is_none());
    }

    #[test]
    fn around_clamps_to_screen_edge() {
        let region = Rect::around(Point::new(10, 10), 170).expect("region");
        assert_eq!(region.left, 0);
        assert_eq!(region.top, 0);
        assert_eq!(region.width, 340);
        assert_eq!(region.height, 340);
    }
}
