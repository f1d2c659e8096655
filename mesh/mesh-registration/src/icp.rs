//! Point-to-plane Iterative Closest Point refinement.
//!
//! Each iteration pairs every working source point with its nearest target
//! point, linearizes the point-to-plane residual `n · (R s + t − d)` around
//! the identity and solves the 6×6 normal equations by pseudo-inverse. The
//! solved small angles become an `Rz·Ry·Rx` rotation, which is composed
//! into the running transform before the working points move.

use crate::{PointIndex, PointSet, RegistrationError, RegistrationResult, RigidTransform};
use nalgebra::{Matrix6, Point3, UnitQuaternion, Vector3, Vector6};
use rayon::prelude::*;
use tracing::debug;

/// Singular values below this are treated as zero when solving the step.
const SOLVE_EPSILON: f64 = 1e-12;

/// Angle used when the normal check is turned on without an explicit value.
pub const DEFAULT_NORMAL_ANGLE_DEGREES: f64 = 20.0;

/// Parameters for point-to-plane ICP.
#[derive(Debug, Clone)]
pub struct IcpParams {
    /// Maximum number of iterations (default: 30).
    pub max_iterations: usize,
    /// Stop once the mean residual changes by less than this (default: 1e-6).
    pub tolerance: f64,
    /// Pairs at or beyond this distance are rejected (default: unbounded).
    pub distance_threshold: f64,
    /// Reject pairs whose normals differ by more than this many degrees.
    /// `None` disables the check (default: `None`).
    pub normal_angle_threshold: Option<f64>,
    /// Initial transform guess (default: identity).
    pub initial_transform: RigidTransform,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            tolerance: 1e-6,
            distance_threshold: f64::INFINITY,
            normal_angle_threshold: None,
            initial_transform: RigidTransform::identity(),
        }
    }
}

impl IcpParams {
    /// Creates new ICP parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of iterations.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the convergence tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the maximum correspondence distance.
    #[must_use]
    pub const fn with_distance_threshold(mut self, distance: f64) -> Self {
        self.distance_threshold = distance;
        self
    }

    /// Enables the normal-angle check with the given threshold in degrees.
    #[must_use]
    pub const fn with_normal_angle_threshold(mut self, degrees: f64) -> Self {
        self.normal_angle_threshold = Some(degrees);
        self
    }

    /// Sets the initial transform guess.
    #[must_use]
    pub const fn with_initial_transform(mut self, transform: RigidTransform) -> Self {
        self.initial_transform = transform;
        self
    }

    fn validate(&self) -> RegistrationResult<()> {
        if self.max_iterations == 0 {
            return Err(RegistrationError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.tolerance.is_nan() || self.tolerance < 0.0 {
            return Err(RegistrationError::InvalidParameter(format!(
                "tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if self.distance_threshold.is_nan() || self.distance_threshold <= 0.0 {
            return Err(RegistrationError::InvalidParameter(format!(
                "distance_threshold must be positive, got {}",
                self.distance_threshold
            )));
        }
        if let Some(angle) = self.normal_angle_threshold {
            if !(angle > 0.0 && angle <= 180.0) {
                return Err(RegistrationError::InvalidParameter(format!(
                    "normal_angle_threshold must lie in (0, 180], got {angle}"
                )));
            }
        }
        Ok(())
    }
}

/// Result of ICP registration.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// The composed rigid transform from source to target.
    pub transform: RigidTransform,
    /// Mean retained pair distance at the last iteration.
    pub mean_error: f64,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the mean residual settled within tolerance.
    pub converged: bool,
    /// Number of retained pairs in the last iteration.
    pub correspondence_count: usize,
    /// Mean residual of every iteration, in order.
    pub error_history: Vec<f64>,
}

/// Refines the alignment of `source` onto `target` by point-to-plane ICP.
///
/// Target normals define the planes. Source normals are only read when the
/// normal-angle check is enabled.
///
/// # Arguments
///
/// * `source` - Points to be moved, with normals
/// * `target` - Reference points and normals
/// * `params` - ICP parameters
///
/// # Errors
///
/// Returns an error if:
/// - Either point set is empty
/// - An iteration retains no pairs
/// - The step solve fails
/// - The parameters are out of range
///
/// # Example
///
/// ```
/// use mesh_registration::{refine_point_to_plane, IcpParams, PointSet, RigidTransform};
/// use nalgebra::{Point3, Vector3};
///
/// // Ellipsoid with semi-axes (3, 2, 1.5) and analytic normals.
/// let axes = Vector3::new(3.0, 2.0, 1.5);
/// let n = 1000_u32;
/// let (points, normals): (Vec<_>, Vec<_>) = (0..n)
///     .map(|i| {
///         let z = 1.0 - 2.0 * (f64::from(i) + 0.5) / f64::from(n);
///         let r = (1.0 - z * z).sqrt();
///         let phi = f64::from(i) * 2.399_963;
///         let unit = Vector3::new(r * phi.cos(), r * phi.sin(), z);
///         (Point3::from(unit.component_mul(&axes)), unit.component_div(&axes).normalize())
///     })
///     .unzip();
/// let target = PointSet::new(points, normals).unwrap();
///
/// let shift = RigidTransform::from_translation(Vector3::new(0.02, -0.01, 0.0));
/// let source = target.transformed(&shift);
///
/// let result = refine_point_to_plane(&source, &target, &IcpParams::default()).unwrap();
/// assert!(result.mean_error < 1e-4);
/// ```
pub fn refine_point_to_plane(
    source: &PointSet,
    target: &PointSet,
    params: &IcpParams,
) -> RegistrationResult<IcpResult> {
    params.validate()?;
    if source.is_empty() {
        return Err(RegistrationError::EmptySourceMesh);
    }
    if target.is_empty() {
        return Err(RegistrationError::EmptyTargetMesh);
    }

    let index = PointIndex::new(target.points())?;
    let min_cos = params
        .normal_angle_threshold
        .map(|degrees| degrees.to_radians().cos());

    let mut total = params.initial_transform;
    let mut working: Vec<Point3<f64>> = total.transform_points(source.points());
    let mut working_normals: Vec<Vector3<f64>> = source
        .normals()
        .iter()
        .map(|n| total.transform_normal(n))
        .collect();

    let mut prev_error = f64::MAX;
    let mut converged = false;
    let mut iterations = 0;
    let mut mean_error = 0.0;
    let mut correspondence_count = 0;
    let mut error_history = Vec::with_capacity(params.max_iterations);

    for iter in 0..params.max_iterations {
        iterations = iter + 1;

        let pairs = find_pairs(&working, &working_normals, target, &index, params, min_cos);
        if pairs.is_empty() {
            return Err(RegistrationError::NoCorrespondences);
        }
        correspondence_count = pairs.len();

        #[allow(clippy::cast_precision_loss)]
        let mean = pairs.iter().map(|p| p.distance).sum::<f64>() / pairs.len() as f64;
        mean_error = mean;
        error_history.push(mean);

        let step = solve_step(&working, target, &pairs)?;
        total = step.compose(&total);
        for p in &mut working {
            *p = step.transform_point(p);
        }
        for n in &mut working_normals {
            *n = step.transform_normal(n);
        }

        debug!(iteration = iterations, mean_error = mean, pairs = pairs.len(), "ICP iteration");

        if (prev_error - mean).abs() < params.tolerance {
            converged = true;
            break;
        }
        prev_error = mean;
    }

    Ok(IcpResult {
        transform: total,
        mean_error,
        iterations,
        converged,
        correspondence_count,
        error_history,
    })
}

/// A retained source/target pair.
#[derive(Debug, Clone, Copy)]
struct Pair {
    source: usize,
    target: usize,
    distance: f64,
}

fn find_pairs(
    working: &[Point3<f64>],
    working_normals: &[Vector3<f64>],
    target: &PointSet,
    index: &PointIndex,
    params: &IcpParams,
    min_cos: Option<f64>,
) -> Vec<Pair> {
    working
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let nearest = index.nearest(p);
            if nearest.distance >= params.distance_threshold {
                return None;
            }
            if let Some(min_cos) = min_cos {
                if working_normals[i].dot(&target.normals()[nearest.index]) < min_cos {
                    return None;
                }
            }
            Some(Pair {
                source: i,
                target: nearest.index,
                distance: nearest.distance,
            })
        })
        .collect()
}

/// Solves the linearized point-to-plane system for one incremental motion.
fn solve_step(
    working: &[Point3<f64>],
    target: &PointSet,
    pairs: &[Pair],
) -> RegistrationResult<RigidTransform> {
    let mut ata = Matrix6::<f64>::zeros();
    let mut atb = Vector6::<f64>::zeros();
    for pair in pairs {
        let s = working[pair.source];
        let d = target.points()[pair.target];
        let n = target.normals()[pair.target];

        let c = s.coords.cross(&n);
        let row = Vector6::new(c.x, c.y, c.z, n.x, n.y, n.z);
        let b = n.dot(&(d - s));
        ata += row * row.transpose();
        atb += row * b;
    }

    let x = ata
        .svd(true, true)
        .solve(&atb, SOLVE_EPSILON)
        .map_err(|_| RegistrationError::SvdFailed)?;

    Ok(RigidTransform::new(
        UnitQuaternion::from_euler_angles(x[0], x[1], x[2]),
        Vector3::new(x[3], x[4], x[5]),
    ))
}
