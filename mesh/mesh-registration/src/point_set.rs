//! Sampled points with per-point unit normals.

use crate::{RegistrationError, RegistrationResult, RigidTransform};
use mesh_types::Aabb;
use nalgebra::{Point3, Vector3};

/// An ordered point set with a parallel sequence of unit normals.
///
/// Produced by [`crate::sample_mesh`] and consumed by every later stage.
/// Construction guarantees `points.len() == normals.len()` and finite
/// coordinates.
///
/// # Example
///
/// ```
/// use mesh_registration::{PointSet, RegistrationError};
/// use nalgebra::{Point3, Vector3};
///
/// let ok = PointSet::new(vec![Point3::origin()], vec![Vector3::z()]);
/// assert!(ok.is_ok());
///
/// let mismatched = PointSet::new(vec![Point3::origin()], vec![]);
/// assert!(matches!(mismatched, Err(RegistrationError::NormalCountMismatch { .. })));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointSet {
    points: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
}

impl PointSet {
    /// Pairs points with normals.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NormalCountMismatch`] when the lengths
    /// differ and [`RegistrationError::NonFiniteCoordinates`] for NaN or
    /// infinite coordinates.
    pub fn new(points: Vec<Point3<f64>>, normals: Vec<Vector3<f64>>) -> RegistrationResult<Self> {
        if points.len() != normals.len() {
            return Err(RegistrationError::NormalCountMismatch {
                points: points.len(),
                normals: normals.len(),
            });
        }
        if points.iter().any(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(RegistrationError::NonFiniteCoordinates);
        }
        Ok(Self { points, normals })
    }

    /// Point positions.
    #[must_use]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Unit normals, parallel to [`PointSet::points`].
    #[must_use]
    pub fn normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    /// Number of points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when there are no points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Bounding box of the points.
    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.points.iter())
    }

    /// Replaces the normals, keeping the points.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::NormalCountMismatch`] on a length mismatch.
    pub fn with_normals(self, normals: Vec<Vector3<f64>>) -> RegistrationResult<Self> {
        Self::new(self.points, normals)
    }

    /// A copy moved by `transform`; normals are rotated.
    #[must_use]
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        Self {
            points: transform.transform_points(&self.points),
            normals: self
                .normals
                .iter()
                .map(|n| transform.transform_normal(n))
                .collect(),
        }
    }

    /// Splits into points and normals.
    #[must_use]
    pub fn into_parts(self) -> (Vec<Point3<f64>>, Vec<Vector3<f64>>) {
        (self.points, self.normals)
    }
}
