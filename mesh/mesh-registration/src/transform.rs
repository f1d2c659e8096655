//! Transform types produced by registration.
//!
//! [`RigidTransform`] covers both rigid and similarity motions (a uniform
//! scale of 1 means rigid). [`AffineParameters`] holds the general linear
//! map fitted by coherent point drift.

use mesh_types::IndexedMesh;
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, UnitQuaternion, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Whether an estimated transform carries a scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransformKind {
    /// Rotation and translation only.
    #[default]
    Rigid,
    /// Rotation, translation and isotropic scale.
    Similarity,
}

/// A rigid transformation with optional uniform scale.
///
/// The transformation is applied in the order: scale -> rotate -> translate.
///
/// # Example
///
/// ```
/// use mesh_registration::RigidTransform;
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
/// use std::f64::consts::FRAC_PI_2;
///
/// let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
/// let transform = RigidTransform::new(rotation, Vector3::new(1.0, 2.0, 3.0));
///
/// let moved = transform.transform_point(&Point3::new(1.0, 0.0, 0.0));
/// assert!((moved - Point3::new(1.0, 3.0, 3.0)).norm() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Rotation as a unit quaternion.
    pub rotation: UnitQuaternion<f64>,
    /// Translation vector.
    pub translation: Vector3<f64>,
    /// Uniform scale factor (1.0 for rigid motions).
    pub scale: f64,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// Creates a rigid transform (scale 1) from rotation and translation.
    #[must_use]
    pub const fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
            scale: 1.0,
        }
    }

    /// Creates a similarity transform from rotation, translation and scale.
    #[must_use]
    pub const fn with_scale(
        rotation: UnitQuaternion<f64>,
        translation: Vector3<f64>,
        scale: f64,
    ) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(UnitQuaternion::identity(), Vector3::zeros())
    }

    /// A pure translation.
    #[must_use]
    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(UnitQuaternion::identity(), translation)
    }

    /// A pure rotation about the origin.
    #[must_use]
    pub fn from_rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self::new(rotation, Vector3::zeros())
    }

    /// A pure uniform scale about the origin.
    #[must_use]
    pub fn from_scale(scale: f64) -> Self {
        Self::with_scale(UnitQuaternion::identity(), Vector3::zeros(), scale)
    }

    /// Builds a transform from a rotation matrix that is already orthonormal.
    #[must_use]
    pub fn from_rotation_matrix(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation =
            UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(*rotation));
        Self::new(rotation, translation)
    }

    /// The 3x3 rotation matrix (without scale).
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        *self.rotation.to_rotation_matrix().matrix()
    }

    /// Transforms a 3D point.
    #[must_use]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * (point.coords * self.scale) + self.translation)
    }

    /// Transforms a direction: scaled and rotated, never translated.
    #[must_use]
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (vector * self.scale)
    }

    /// Rotates a unit normal. Scale does not affect normal directions.
    #[must_use]
    pub fn transform_normal(&self, normal: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * normal
    }

    /// Transforms every point of a slice into a new vector.
    #[must_use]
    pub fn transform_points(&self, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// Composes this transform with another (self * other).
    ///
    /// The result applies `other` first, then `self`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * (other.translation * self.scale),
            scale: self.scale * other.scale,
        }
    }

    /// Computes the inverse of this transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let inv_scale = 1.0 / self.scale;
        let inv_rotation = self.rotation.inverse();
        Self {
            rotation: inv_rotation,
            translation: inv_rotation * (-self.translation * inv_scale),
            scale: inv_scale,
        }
    }

    /// Converts to a 4x4 homogeneous matrix (scale folded into the rotation block).
    #[must_use]
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.rotation_matrix() * self.scale));
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Angle in radians of the rotation taking `self` to `other`.
    #[must_use]
    pub fn rotation_angle_to(&self, other: &Self) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }

    /// Whether the scale differs from 1 by more than `epsilon`.
    #[must_use]
    pub fn is_similarity(&self, epsilon: f64) -> bool {
        (self.scale - 1.0).abs() > epsilon
    }

    /// Returns true if this transform is approximately the identity.
    #[must_use]
    pub fn is_identity(&self, epsilon: f64) -> bool {
        self.rotation.angle().abs() < epsilon
            && self.translation.norm() < epsilon
            && (self.scale - 1.0).abs() < epsilon
    }
}

/// A general affine map `x' = matrix * x + translation`.
///
/// Produced by [`crate::fit_affine_cpd`]. The matrix need not be orthonormal.
///
/// # Example
///
/// ```
/// use mesh_registration::AffineParameters;
/// use nalgebra::{Matrix3, Point3, Vector3};
///
/// let stretch = AffineParameters::new(
///     Matrix3::from_diagonal(&Vector3::new(2.0, 1.0, 1.0)),
///     Vector3::new(0.0, 0.0, 1.0),
/// );
/// let p = stretch.transform_point(&Point3::new(1.0, 1.0, 1.0));
/// assert_eq!(p, Point3::new(2.0, 1.0, 2.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AffineParameters {
    /// Linear part, column-vector convention.
    pub matrix: Matrix3<f64>,
    /// Translation applied after the linear part.
    pub translation: Vector3<f64>,
}

impl Default for AffineParameters {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineParameters {
    /// Creates affine parameters from a matrix and translation.
    #[must_use]
    pub const fn new(matrix: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            matrix,
            translation,
        }
    }

    /// The identity map.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Applies the map to a point.
    #[must_use]
    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.matrix * point.coords + self.translation)
    }

    /// Applies the map to a slice of points.
    #[must_use]
    pub fn transform_points(&self, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }

    /// 4x4 homogeneous form.
    #[must_use]
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut mat = Matrix4::identity();
        mat.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.matrix);
        mat.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        mat
    }

    /// Returns a copy of `mesh` with every vertex moved by this map.
    ///
    /// Normals are carried through the inverse transpose and renormalized.
    /// They are dropped when the matrix is singular.
    #[must_use]
    pub fn apply_to_mesh(&self, mesh: &IndexedMesh) -> IndexedMesh {
        let normal_matrix = self.matrix.try_inverse().map(|inv| inv.transpose());
        let mut result = mesh.clone();
        for vertex in &mut result.vertices {
            vertex.position = self.transform_point(&vertex.position);
            vertex.normal = match (vertex.normal, normal_matrix) {
                (Some(n), Some(m)) => (m * n).try_normalize(f64::EPSILON),
                _ => None,
            };
        }
        result
    }
}
