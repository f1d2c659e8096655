//! Axis-aligned bounding box.

use nalgebra::Point3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box (AABB).
///
/// Registration derives its working resolution from the box diagonal, so
/// [`Aabb::diagonal`] is the measurement most callers need.
///
/// # Example
///
/// ```
/// use mesh_types::{Aabb, Point3};
///
/// let aabb = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 3.0, 6.0));
///
/// assert_eq!(aabb.diagonal(), 7.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner (smallest x, y, z values).
    pub min: Point3<f64>,
    /// Maximum corner (largest x, y, z values).
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a new AABB from two corners, reordering per axis if needed.
    #[must_use]
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self {
            min: Point3::new(min.x.min(max.x), min.y.min(max.y), min.z.min(max.z)),
            max: Point3::new(min.x.max(max.x), min.y.max(max.y), min.z.max(max.z)),
        }
    }

    /// Create an empty AABB (min > max), ready to be expanded.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::{Aabb, Point3};
    ///
    /// let mut aabb = Aabb::empty();
    /// assert!(aabb.is_empty());
    ///
    /// aabb.expand_to_include(&Point3::new(1.0, 2.0, 3.0));
    /// assert!(!aabb.is_empty());
    /// ```
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Point3::new is not const in nalgebra
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Create an AABB enclosing every point of the iterator.
    ///
    /// Returns an empty AABB if the iterator is empty.
    #[must_use]
    pub fn from_points<'a>(points: impl Iterator<Item = &'a Point3<f64>>) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            aabb.expand_to_include(point);
        }
        aabb
    }

    /// Check if the AABB is empty (min > max on any axis).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Length of the main diagonal. Zero for empty boxes.
    #[inline]
    #[must_use]
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (self.max - self.min).norm()
    }

    /// Grow the box so it contains `point`.
    pub fn expand_to_include(&mut self, point: &Point3<f64>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_new_reorders_corners() {
        let aabb = Aabb::new(Point3::new(1.0, 0.0, 5.0), Point3::new(0.0, 2.0, 3.0));
        assert_eq!(aabb.min, Point3::new(0.0, 0.0, 3.0));
        assert_eq!(aabb.max, Point3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn test_from_points() {
        let points = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 5.0, 3.0),
            Point3::new(-2.0, 8.0, 1.0),
        ];
        let aabb = Aabb::from_points(points.iter());
        assert_eq!(aabb.min, Point3::new(-2.0, 0.0, 0.0));
        assert_eq!(aabb.max, Point3::new(10.0, 8.0, 3.0));
    }

    #[test]
    fn test_empty_has_zero_extent() {
        let aabb = Aabb::empty();
        assert!(aabb.is_empty());
        assert_eq!(aabb.diagonal(), 0.0);
    }

    #[test]
    fn test_unit_cube_diagonal() {
        let aabb = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(aabb.diagonal(), 3.0_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_single_point_box() {
        let p = Point3::new(3.0, -1.0, 2.0);
        let aabb = Aabb::from_points(std::iter::once(&p));
        assert!(!aabb.is_empty());
        assert_eq!(aabb.diagonal(), 0.0);
    }
}
