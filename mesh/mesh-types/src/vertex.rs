//! Mesh vertices.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A vertex in 3D space with an optional unit normal.
///
/// # Example
///
/// ```
/// use mesh_types::{Point3, Vector3, Vertex};
///
/// let plain = Vertex::from_coords(1.0, 2.0, 3.0);
/// assert!(plain.normal.is_none());
///
/// let oriented = Vertex::with_normal(Point3::new(1.0, 2.0, 3.0), Vector3::z());
/// assert_eq!(plain.position, oriented.position);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal, when the source geometry provides one.
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a vertex with only a position.
    #[inline]
    #[must_use]
    pub const fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Point3::new is not const in nalgebra
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with position and normal.
    #[inline]
    #[must_use]
    pub const fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }

    /// Returns true when every coordinate is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_coords() {
        let v = Vertex::from_coords(1.0, -2.0, 3.5);
        assert_eq!(v.position, Point3::new(1.0, -2.0, 3.5));
        assert!(v.normal.is_none());
    }

    #[test]
    fn test_with_normal() {
        let v = Vertex::with_normal(Point3::origin(), Vector3::x());
        assert_eq!(v.normal, Some(Vector3::x()));
    }

    #[test]
    fn test_is_finite() {
        assert!(Vertex::from_coords(0.0, 1.0, 2.0).is_finite());
        assert!(!Vertex::from_coords(f64::NAN, 1.0, 2.0).is_finite());
        assert!(!Vertex::from_coords(0.0, f64::INFINITY, 2.0).is_finite());
    }
}
