//! Closed-form least-squares fitting of rigid and similarity transforms.
//!
//! Kabsch for the rotation, with Umeyama's optimal isotropic scale when
//! requested. RANSAC calls [`fit_pairs`] with borrowed point pairs, so the
//! fit never copies the sample.

use crate::{RegistrationError, RegistrationResult, RigidTransform};
use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};

/// Source variance below which the scale estimate falls back to 1.
const MIN_SOURCE_VARIANCE: f64 = 1e-12;

/// Computes the least-squares transform taking `source_points` onto `target_points`.
///
/// # Arguments
///
/// * `source_points` - Points to be transformed
/// * `target_points` - Paired target positions, same length and order
/// * `compute_scale` - If true, also solves for a uniform scale (similarity)
///
/// # Errors
///
/// Returns an error if:
/// - Either point set is empty
/// - The point sets have different lengths
/// - SVD computation fails
///
/// # Example
///
/// ```
/// use mesh_registration::compute_rigid_transform;
/// use nalgebra::Point3;
///
/// let source = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
/// ];
/// let target = vec![
///     Point3::new(1.0, 2.0, 3.0),
///     Point3::new(2.0, 2.0, 3.0),
///     Point3::new(1.0, 3.0, 3.0),
/// ];
///
/// let transform = compute_rigid_transform(&source, &target, false).unwrap();
/// let aligned = transform.transform_point(&source[0]);
/// assert!((aligned - target[0]).norm() < 1e-9);
/// ```
pub fn compute_rigid_transform(
    source_points: &[Point3<f64>],
    target_points: &[Point3<f64>],
    compute_scale: bool,
) -> RegistrationResult<RigidTransform> {
    if source_points.is_empty() {
        return Err(RegistrationError::EmptySourceMesh);
    }
    if target_points.is_empty() {
        return Err(RegistrationError::EmptyTargetMesh);
    }
    if source_points.len() != target_points.len() {
        return Err(RegistrationError::InvalidParameter(format!(
            "point sets must have equal length: {} vs {}",
            source_points.len(),
            target_points.len()
        )));
    }

    fit_pairs(source_points.iter().zip(target_points), compute_scale)
}

/// Fits a transform to an iterator of `(source, target)` pairs.
///
/// The iterator is walked twice (centroids, then covariance).
///
/// # Errors
///
/// Returns [`RegistrationError::EmptyPointSet`] for an empty iterator and
/// [`RegistrationError::SvdFailed`] if the decomposition fails.
pub(crate) fn fit_pairs<'a, I>(pairs: I, compute_scale: bool) -> RegistrationResult<RigidTransform>
where
    I: Iterator<Item = (&'a Point3<f64>, &'a Point3<f64>)> + Clone,
{
    let mut count = 0_usize;
    let mut source_sum = Vector3::zeros();
    let mut target_sum = Vector3::zeros();
    for (s, t) in pairs.clone() {
        source_sum += s.coords;
        target_sum += t.coords;
        count += 1;
    }
    if count == 0 {
        return Err(RegistrationError::EmptyPointSet);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = count as f64;
    let source_centroid = source_sum / n;
    let target_centroid = target_sum / n;

    // H = sum((s - s_mean) * (t - t_mean)^T)
    let mut h = Matrix3::zeros();
    let mut source_variance = 0.0;
    for (s, t) in pairs.clone() {
        let sc = s.coords - source_centroid;
        let tc = t.coords - target_centroid;
        h += sc * tc.transpose();
        source_variance += sc.norm_squared();
    }

    let rotation = rotation_from_covariance(&h)?;

    let scale = if compute_scale && source_variance > MIN_SOURCE_VARIANCE {
        let cross: f64 = pairs
            .map(|(s, t)| (rotation * (s.coords - source_centroid)).dot(&(t.coords - target_centroid)))
            .sum();
        cross / source_variance
    } else {
        1.0
    };

    let translation = target_centroid - scale * (rotation * source_centroid);
    Ok(RigidTransform::with_scale(rotation, translation, scale))
}

/// Rotation R = V * U^T from the SVD of the cross-covariance, reflection corrected.
pub(crate) fn rotation_from_covariance(h: &Matrix3<f64>) -> RegistrationResult<UnitQuaternion<f64>> {
    let svd = h.svd(true, true);
    let u = svd.u.ok_or(RegistrationError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(RegistrationError::SvdFailed)?;

    let mut v = v_t.transpose();
    let mut rotation_matrix = v * u.transpose();

    // det(R) = -1: flip the axis of the smallest singular value.
    if rotation_matrix.determinant() < 0.0 {
        v.column_mut(2).neg_mut();
        rotation_matrix = v * u.transpose();
    }

    Ok(UnitQuaternion::from_rotation_matrix(
        &Rotation3::from_matrix_unchecked(rotation_matrix),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn tetrahedron() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.3, 1.0, 0.0),
            Point3::new(0.2, 0.4, 0.9),
        ]
    }

    #[test]
    fn test_pure_translation() {
        let source = tetrahedron();
        let translation = Vector3::new(5.0, 3.0, 2.0);
        let target: Vec<_> = source.iter().map(|p| p + translation).collect();

        let transform = compute_rigid_transform(&source, &target, false).unwrap();

        assert!(transform.rotation.angle() < 1e-9);
        assert_relative_eq!(transform.translation, translation, epsilon = 1e-9);
        assert_relative_eq!(transform.scale, 1.0);
    }

    #[test]
    fn test_rotation_and_translation() {
        let source = tetrahedron();
        let truth = RigidTransform::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI / 2.0),
            Vector3::new(10.0, 5.0, 0.0),
        );
        let target = truth.transform_points(&source);

        let transform = compute_rigid_transform(&source, &target, false).unwrap();

        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(transform.transform_point(s).coords, t.coords, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_similarity_recovers_scale() {
        let source = tetrahedron();
        let truth = RigidTransform::with_scale(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI / 3.0),
            Vector3::new(1.0, 2.0, 3.0),
            1.5,
        );
        let target = truth.transform_points(&source);

        let transform = compute_rigid_transform(&source, &target, true).unwrap();

        assert_relative_eq!(transform.scale, 1.5, epsilon = 1e-9);
        for (s, t) in source.iter().zip(&target) {
            assert_relative_eq!(transform.transform_point(s).coords, t.coords, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rigid_fit_ignores_scale_difference() {
        let source = tetrahedron();
        let target: Vec<_> = source.iter().map(|p| Point3::from(p.coords * 2.0)).collect();
        let transform = compute_rigid_transform(&source, &target, false).unwrap();
        assert_relative_eq!(transform.scale, 1.0);
        assert!(transform.rotation.angle() < 1e-9);
    }

    #[test]
    fn test_reflection_produces_proper_rotation() {
        let source = tetrahedron();
        let target: Vec<_> = source.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect();

        let transform = compute_rigid_transform(&source, &target, false).unwrap();
        assert_relative_eq!(transform.rotation_matrix().determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fit_pairs_matches_slice_api() {
        let source = tetrahedron();
        let truth = RigidTransform::new(
            UnitQuaternion::from_euler_angles(0.2, 0.1, -0.4),
            Vector3::new(-1.0, 0.5, 2.0),
        );
        let target = truth.transform_points(&source);

        let from_pairs = fit_pairs(source.iter().zip(&target), false).unwrap();
        let from_slices = compute_rigid_transform(&source, &target, false).unwrap();
        assert_relative_eq!(
            from_pairs.translation,
            from_slices.translation,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_errors() {
        let one = vec![Point3::new(1.0, 0.0, 0.0)];
        let empty: Vec<Point3<f64>> = Vec::new();
        assert!(matches!(
            compute_rigid_transform(&empty, &one, false),
            Err(RegistrationError::EmptySourceMesh)
        ));
        assert!(matches!(
            compute_rigid_transform(&one, &empty, false),
            Err(RegistrationError::EmptyTargetMesh)
        ));
        assert!(matches!(
            compute_rigid_transform(&tetrahedron(), &one, false),
            Err(RegistrationError::InvalidParameter(_))
        ));
        assert!(matches!(
            fit_pairs(empty.iter().zip(&empty), false),
            Err(RegistrationError::EmptyPointSet)
        ));
    }
}
