//! Landmark-based alignment.
//!
//! Landmarks are hand-placed point pairs, for example anatomical stops
//! marked on an implant plate and on the orbit it should sit in. Two fits
//! are offered:
//! - **Least squares** - Kabsch (or Umeyama with scale) over all pairs
//! - **Pivot** - Slide one landmark onto its partner, then rotate about it
//!
//! The pivot fit keeps the chosen landmark exactly in place, which a
//! centroid-based least-squares fit does not.

use crate::kabsch::{compute_rigid_transform, rotation_from_covariance};
use crate::{RegistrationError, RegistrationResult, RigidTransform};
use mesh_types::IndexedMesh;
use nalgebra::{Matrix3, Point3};
use tracing::debug;

/// Landmarks needed to fix a rotation, the pivot included.
pub const MIN_LANDMARKS: usize = 3;

/// Where one side of a landmark pair comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LandmarkPoint {
    /// A vertex of the mesh, by index.
    Vertex(usize),
    /// A free point in the mesh's coordinate frame.
    Point(Point3<f64>),
}

impl LandmarkPoint {
    fn resolve(self, mesh: &IndexedMesh) -> RegistrationResult<Point3<f64>> {
        match self {
            Self::Point(p) => Ok(p),
            Self::Vertex(index) => mesh.vertices.get(index).map(|v| v.position).ok_or(
                RegistrationError::LandmarkOutOfBounds {
                    index,
                    len: mesh.vertices.len(),
                },
            ),
        }
    }
}

/// A landmark pair: a position on the source and where it should land.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    /// Position on the source mesh.
    pub source: LandmarkPoint,
    /// Matching position on the target mesh.
    pub target: LandmarkPoint,
}

impl Landmark {
    /// Pairs source vertex `source_index` with target vertex `target_index`.
    #[must_use]
    pub const fn from_indices(source_index: usize, target_index: usize) -> Self {
        Self {
            source: LandmarkPoint::Vertex(source_index),
            target: LandmarkPoint::Vertex(target_index),
        }
    }

    /// Pairs two explicit points.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_registration::{Landmark, LandmarkPoint};
    /// use nalgebra::Point3;
    ///
    /// let stop = Landmark::from_points(
    ///     Point3::new(20.6, 38.9, -675.5),
    ///     Point3::new(20.1, 39.2, -674.8),
    /// );
    /// assert!(matches!(stop.source, LandmarkPoint::Point(_)));
    /// ```
    #[must_use]
    pub const fn from_points(source_point: Point3<f64>, target_point: Point3<f64>) -> Self {
        Self {
            source: LandmarkPoint::Point(source_point),
            target: LandmarkPoint::Point(target_point),
        }
    }
}

/// Parameters for [`align_by_landmarks`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LandmarkParams {
    /// Solve for a uniform scale in the least-squares fit (default: false).
    pub compute_scale: bool,
    /// Landmark held fixed by the pivot fit (default: `None`, least squares).
    pub pivot: Option<usize>,
}

impl LandmarkParams {
    /// Creates default parameters: rigid least squares.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables scale estimation.
    #[must_use]
    pub const fn with_scale(mut self, compute_scale: bool) -> Self {
        self.compute_scale = compute_scale;
        self
    }

    /// Switches to the pivot fit around landmark `index`.
    #[must_use]
    pub const fn with_pivot(mut self, index: usize) -> Self {
        self.pivot = Some(index);
        self
    }
}

/// Computes the transform taking the source landmarks onto the target ones.
///
/// Without a pivot this is the closed-form least-squares fit. With
/// [`LandmarkParams::pivot`], the pivot landmark is first translated onto
/// its partner, then the source is rotated about that point to best match
/// the remaining landmarks.
///
/// # Errors
///
/// Returns an error if:
/// - Fewer than [`MIN_LANDMARKS`] landmarks are given
/// - A vertex index is out of bounds, or the pivot index is
/// - A pivot is combined with scale estimation
/// - A landmark coordinate is not finite
/// - SVD computation fails
///
/// # Example
///
/// ```
/// use mesh_registration::{align_by_landmarks, Landmark, LandmarkParams};
/// use mesh_types::{IndexedMesh, Vertex};
///
/// let mut plate = IndexedMesh::new();
/// plate.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// plate.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// plate.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
///
/// let mut orbit = IndexedMesh::new();
/// orbit.vertices.push(Vertex::from_coords(5.0, 5.0, 0.0));
/// orbit.vertices.push(Vertex::from_coords(5.0, 6.0, 0.0));
/// orbit.vertices.push(Vertex::from_coords(4.0, 5.0, 0.0));
///
/// let landmarks: Vec<_> = (0..3).map(|i| Landmark::from_indices(i, i)).collect();
/// let params = LandmarkParams::new().with_pivot(1);
/// let transform = align_by_landmarks(&plate, &orbit, &landmarks, &params).unwrap();
///
/// let moved = transform.transform_point(&plate.vertices[1].position);
/// assert!((moved - orbit.vertices[1].position).norm() < 1e-9);
/// ```
pub fn align_by_landmarks(
    source: &IndexedMesh,
    target: &IndexedMesh,
    landmarks: &[Landmark],
    params: &LandmarkParams,
) -> RegistrationResult<RigidTransform> {
    if landmarks.len() < MIN_LANDMARKS {
        return Err(RegistrationError::InsufficientLandmarks {
            required: MIN_LANDMARKS,
            provided: landmarks.len(),
        });
    }

    let mut source_points = Vec::with_capacity(landmarks.len());
    let mut target_points = Vec::with_capacity(landmarks.len());
    for landmark in landmarks {
        source_points.push(landmark.source.resolve(source)?);
        target_points.push(landmark.target.resolve(target)?);
    }
    check_finite(&source_points, &target_points)?;

    let transform = match params.pivot {
        None => compute_rigid_transform(&source_points, &target_points, params.compute_scale)?,
        Some(_) if params.compute_scale => {
            return Err(RegistrationError::InvalidParameter(
                "a pivot fit cannot estimate scale".to_string(),
            ));
        }
        Some(pivot) => {
            let shift = translate_onto_landmark(&source_points, &target_points, pivot)?;
            let shifted = shift.transform_points(&source_points);
            let rotation = align_about_pivot(&shifted, &target_points, &target_points[pivot])?;
            rotation.compose(&shift)
        }
    };

    debug!(
        landmarks = landmarks.len(),
        pivot = ?params.pivot,
        residual = rms_residual(&transform, &source_points, &target_points),
        "Aligned landmarks"
    );
    Ok(transform)
}

/// Translation moving `source[landmark]` exactly onto `target[landmark]`.
///
/// # Errors
///
/// Returns [`RegistrationError::LandmarkOutOfBounds`] if either slice is too
/// short for `landmark`.
///
/// # Example
///
/// ```
/// use mesh_registration::translate_onto_landmark;
/// use nalgebra::{Point3, Vector3};
///
/// let plate = [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)];
/// let orbit = [Point3::new(9.0, 9.0, 9.0), Point3::new(3.0, 1.0, 0.0)];
///
/// let shift = translate_onto_landmark(&plate, &orbit, 1).unwrap();
/// assert_eq!(shift.translation, Vector3::new(2.0, 0.0, -1.0));
/// ```
pub fn translate_onto_landmark(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    landmark: usize,
) -> RegistrationResult<RigidTransform> {
    let from = source.get(landmark).ok_or(RegistrationError::LandmarkOutOfBounds {
        index: landmark,
        len: source.len(),
    })?;
    let to = target.get(landmark).ok_or(RegistrationError::LandmarkOutOfBounds {
        index: landmark,
        len: target.len(),
    })?;
    Ok(RigidTransform::from_translation(to - from))
}

/// Best rotation about a fixed `pivot` taking `source` onto `target`.
///
/// Both sets are expressed relative to the pivot, the rotation comes from
/// the SVD of their cross-covariance (reflection corrected), and the
/// translation `pivot - R * pivot` keeps the pivot in place. Unlike
/// [`crate::compute_rigid_transform`] no centroid is removed, so the
/// rotation is about the pivot rather than the landmark centroid.
///
/// # Errors
///
/// Returns an error if:
/// - The slices differ in length
/// - Fewer than two pairs are given (the pivot is the third point)
/// - A coordinate is not finite
/// - SVD computation fails
pub fn align_about_pivot(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    pivot: &Point3<f64>,
) -> RegistrationResult<RigidTransform> {
    if source.len() != target.len() {
        return Err(RegistrationError::InvalidParameter(format!(
            "landmark sets must have equal length: {} vs {}",
            source.len(),
            target.len()
        )));
    }
    if source.len() < MIN_LANDMARKS - 1 {
        return Err(RegistrationError::InsufficientLandmarks {
            required: MIN_LANDMARKS - 1,
            provided: source.len(),
        });
    }
    check_finite(source, target)?;
    if !pivot.iter().all(|c| c.is_finite()) {
        return Err(RegistrationError::NonFiniteCoordinates);
    }

    let mut h = Matrix3::zeros();
    for (s, t) in source.iter().zip(target) {
        h += (s - pivot) * (t - pivot).transpose();
    }
    let rotation = rotation_from_covariance(&h)?;
    Ok(RigidTransform::new(rotation, pivot.coords - rotation * pivot.coords))
}

fn check_finite(source: &[Point3<f64>], target: &[Point3<f64>]) -> RegistrationResult<()> {
    if source
        .iter()
        .chain(target)
        .all(|p| p.iter().all(|c| c.is_finite()))
    {
        Ok(())
    } else {
        Err(RegistrationError::NonFiniteCoordinates)
    }
}

fn rms_residual(transform: &RigidTransform, source: &[Point3<f64>], target: &[Point3<f64>]) -> f64 {
    let sum: f64 = source
        .iter()
        .zip(target)
        .map(|(s, t)| (transform.transform_point(s) - t).norm_squared())
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum / source.len() as f64;
    mean.sqrt()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesh_types::Vertex;
    use nalgebra::{UnitQuaternion, Vector3};

    fn mesh_of(points: &[Point3<f64>]) -> IndexedMesh {
        IndexedMesh::from_points(points.iter().copied())
    }

    /// Plate and orbit stops measured on one patient; the posterior stop
    /// (index 1) coincides.
    fn measured_stops() -> (Vec<Point3<f64>>, Vec<Point3<f64>>) {
        let plate = vec![
            Point3::new(29.930, 65.059, -692.872),
            Point3::new(20.588, 38.868, -675.454),
            Point3::new(18.266, 57.316, -682.061),
        ];
        let orbit = vec![
            Point3::new(27.474, 61.970, -689.958),
            Point3::new(20.588, 38.868, -675.454),
            Point3::new(15.340, 60.875, -681.762),
        ];
        (plate, orbit)
    }

    fn squared_error(transform: &RigidTransform, source: &[Point3<f64>], target: &[Point3<f64>]) -> f64 {
        source
            .iter()
            .zip(target)
            .map(|(s, t)| (transform.transform_point(s) - t).norm_squared())
            .sum()
    }

    #[test]
    fn test_pivot_stays_fixed_on_measured_stops() {
        let (plate, orbit) = measured_stops();
        let pivot = orbit[1];
        let transform = align_about_pivot(&plate, &orbit, &pivot).unwrap();

        assert_relative_eq!(transform.transform_point(&pivot), pivot, epsilon = 1e-9);
        assert_relative_eq!(transform.rotation_matrix().determinant(), 1.0, epsilon = 1e-9);
        assert!(
            squared_error(&transform, &plate, &orbit)
                <= squared_error(&RigidTransform::identity(), &plate, &orbit) + 1e-9
        );
    }

    #[test]
    fn test_recovers_rotation_about_pivot() {
        let pivot = Point3::new(20.0, 38.0, -675.0);
        let rotation = UnitQuaternion::from_euler_angles(0.2, -0.3, 0.4);
        let truth = RigidTransform::new(rotation, pivot.coords - rotation * pivot.coords);
        let plate = vec![
            Point3::new(30.0, 65.0, -692.0),
            Point3::new(18.0, 57.0, -682.0),
            Point3::new(25.0, 40.0, -670.0),
            Point3::new(12.0, 45.0, -690.0),
        ];
        let orbit = truth.transform_points(&plate);

        let transform = align_about_pivot(&plate, &orbit, &pivot).unwrap();
        assert!(transform.rotation_angle_to(&truth) < 1e-9);
        assert_relative_eq!(transform.translation, truth.translation, epsilon = 1e-7);
    }

    #[test]
    fn test_mirrored_stops_still_give_rotation() {
        let pivot = Point3::new(1.0, 2.0, 3.0);
        let plate = vec![
            Point3::new(4.0, 2.5, 3.0),
            Point3::new(1.5, 6.0, 2.0),
            Point3::new(0.0, 3.0, 7.0),
        ];
        let mirrored: Vec<_> = plate
            .iter()
            .map(|p| Point3::new(2.0 * pivot.x - p.x, p.y, p.z))
            .collect();

        let transform = align_about_pivot(&plate, &mirrored, &pivot).unwrap();
        assert_relative_eq!(transform.rotation_matrix().determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(transform.transform_point(&pivot), pivot, epsilon = 1e-12);
    }

    #[test]
    fn test_translate_onto_landmark() {
        let (plate, orbit) = measured_stops();
        let shift = translate_onto_landmark(&plate, &orbit, 2).unwrap();
        assert_relative_eq!(shift.transform_point(&plate[2]), orbit[2], epsilon = 1e-12);
        assert!(shift.rotation_angle_to(&RigidTransform::identity()) < 1e-12);

        assert!(matches!(
            translate_onto_landmark(&plate, &orbit, 3),
            Err(RegistrationError::LandmarkOutOfBounds { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_pivot_fit_recovers_rigid_motion() {
        let orbit = vec![
            Point3::new(27.0, 62.0, -690.0),
            Point3::new(20.5, 38.9, -675.5),
            Point3::new(15.3, 60.9, -681.8),
            Point3::new(24.0, 50.0, -700.0),
        ];
        let motion = RigidTransform::new(
            UnitQuaternion::from_euler_angles(0.1, 0.25, -0.15),
            Vector3::new(3.0, -4.0, 2.5),
        );
        let plate = motion.inverse().transform_points(&orbit);

        let landmarks: Vec<_> = (0..4).map(|i| Landmark::from_indices(i, i)).collect();
        let params = LandmarkParams::new().with_pivot(1);
        let transform =
            align_by_landmarks(&mesh_of(&plate), &mesh_of(&orbit), &landmarks, &params).unwrap();

        for (p, o) in plate.iter().zip(&orbit) {
            assert_relative_eq!(transform.transform_point(p), *o, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_least_squares_with_explicit_points() {
        let landmarks = [
            Landmark::from_points(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)),
            Landmark::from_points(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 0.0, 0.0)),
            Landmark::from_points(Point3::new(0.0, 1.0, 0.0), Point3::new(1.0, 1.0, 0.0)),
        ];
        let empty = IndexedMesh::new();
        let transform =
            align_by_landmarks(&empty, &empty, &landmarks, &LandmarkParams::new()).unwrap();
        assert_relative_eq!(transform.translation, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_least_squares_with_scale() {
        let mut source = IndexedMesh::new();
        let mut target = IndexedMesh::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)] {
            source.vertices.push(Vertex::from_coords(x, y, 0.0));
            target.vertices.push(Vertex::from_coords(2.0 * x, 2.0 * y, 0.0));
        }
        let landmarks: Vec<_> = (0..3).map(|i| Landmark::from_indices(i, i)).collect();

        let params = LandmarkParams::new().with_scale(true);
        let transform = align_by_landmarks(&source, &target, &landmarks, &params).unwrap();
        assert_relative_eq!(transform.scale, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_landmark_input() {
        let (plate, orbit) = measured_stops();
        let (plate, orbit) = (mesh_of(&plate), mesh_of(&orbit));
        let three: Vec<_> = (0..3).map(|i| Landmark::from_indices(i, i)).collect();

        assert!(matches!(
            align_by_landmarks(&plate, &orbit, &three[..2], &LandmarkParams::new()),
            Err(RegistrationError::InsufficientLandmarks { required: 3, provided: 2 })
        ));

        let mut out_of_range = three.clone();
        out_of_range[2] = Landmark::from_indices(2, 99);
        assert!(matches!(
            align_by_landmarks(&plate, &orbit, &out_of_range, &LandmarkParams::new()),
            Err(RegistrationError::LandmarkOutOfBounds { index: 99, len: 3 })
        ));

        assert!(matches!(
            align_by_landmarks(&plate, &orbit, &three, &LandmarkParams::new().with_pivot(5)),
            Err(RegistrationError::LandmarkOutOfBounds { index: 5, .. })
        ));

        let scaled_pivot = LandmarkParams::new().with_pivot(1).with_scale(true);
        assert!(matches!(
            align_by_landmarks(&plate, &orbit, &three, &scaled_pivot),
            Err(RegistrationError::InvalidParameter(_))
        ));

        let nan = [Point3::new(f64::NAN, 0.0, 0.0), Point3::origin()];
        assert!(matches!(
            align_about_pivot(&nan, &nan, &Point3::origin()),
            Err(RegistrationError::NonFiniteCoordinates)
        ));
    }
}
