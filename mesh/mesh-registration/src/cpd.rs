//! Coherent Point Drift, affine variant.
//!
//! Fits `x ≈ B·y + t` between a moving set `Y` (M points) and a fixed set
//! `X` (N points) by expectation-maximization over a Gaussian mixture
//! centered on the transformed moving points, with an optional uniform
//! outlier component of weight `w`.
//!
//! The E-step never materializes the M×N posterior matrix. Fixed points
//! are processed in chunks on the rayon pool and every chunk streams its
//! posteriors into the handful of sums the M-step needs; chunk sums are
//! merged in chunk order so a run is reproducible.

use crate::{AffineParameters, RegistrationError, RegistrationResult};
use mesh_types::IndexedMesh;
use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use std::f64::consts::PI;
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed points per E-step work item.
const E_STEP_CHUNK: usize = 256;

/// Parameters for [`fit_affine_cpd`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CpdParams {
    /// Maximum EM iterations (default: 100).
    pub max_iterations: usize,
    /// Stop once the objective changes by at most this (default: 1e-3).
    pub tolerance: f64,
    /// Weight of the uniform outlier component, in `[0, 1)` (default: 0).
    pub outlier_weight: f64,
    /// Starting variance; computed from all pairwise distances when `None`.
    pub initial_variance: Option<f64>,
}

impl Default for CpdParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-3,
            outlier_weight: 0.0,
            initial_variance: None,
        }
    }
}

impl CpdParams {
    /// Creates default parameters.
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

    /// Sets the objective tolerance.
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the outlier weight.
    #[must_use]
    pub const fn with_outlier_weight(mut self, weight: f64) -> Self {
        self.outlier_weight = weight;
        self
    }

    /// Sets the starting variance.
    #[must_use]
    pub const fn with_initial_variance(mut self, variance: f64) -> Self {
        self.initial_variance = Some(variance);
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
        if !(0.0..1.0).contains(&self.outlier_weight) {
            return Err(RegistrationError::InvalidParameter(format!(
                "outlier_weight must lie in [0, 1), got {}",
                self.outlier_weight
            )));
        }
        if let Some(variance) = self.initial_variance {
            if !(variance.is_finite() && variance > 0.0) {
                return Err(RegistrationError::InvalidParameter(format!(
                    "initial_variance must be a positive finite number, got {variance}"
                )));
            }
        }
        Ok(())
    }

    /// Lower bound applied when the variance update collapses.
    fn variance_floor(&self) -> f64 {
        (self.tolerance / 10.0).max(f64::EPSILON)
    }
}

/// Result of [`fit_affine_cpd`].
#[derive(Debug, Clone, PartialEq)]
pub struct CpdResult {
    /// Fitted map taking moving points onto fixed points.
    pub affine: AffineParameters,
    /// Final mixture variance.
    pub variance: f64,
    /// EM iterations performed.
    pub iterations: usize,
    /// Whether the objective settled within tolerance.
    pub converged: bool,
}

/// A dense mesh deformed by a fitted affine map.
#[derive(Debug, Clone)]
pub struct DeformableAlignment {
    /// The fitted parameters, reusable on meshes sharing the same basis.
    pub affine: AffineParameters,
    /// Copy of the input mesh with every vertex mapped.
    pub mesh: IndexedMesh,
    /// Final mixture variance.
    pub variance: f64,
    /// EM iterations performed.
    pub iterations: usize,
    /// Whether the fit converged.
    pub converged: bool,
}

/// Fits an affine map taking `moving` onto `fixed` with CPD.
///
/// The sets need not have the same size or any known correspondence.
///
/// # Errors
///
/// Returns an error if:
/// - Either set is empty or has non-finite coordinates
/// - The parameters are out of range
/// - The weighted moving covariance is singular (e.g. a planar moving set)
///
/// # Example
///
/// ```
/// use mesh_registration::{fit_affine_cpd, CpdParams};
/// use nalgebra::{Matrix3, Point3, Vector3};
///
/// let moving: Vec<_> = (0..125_u32)
///     .map(|i| {
///         let (a, b, c) = (f64::from(i % 5), f64::from(i / 5 % 5), f64::from(i / 25));
///         Point3::new(a + 0.1 * b, b - 0.05 * c, c + 0.07 * a)
///     })
///     .collect();
/// let fixed: Vec<_> = moving.iter().map(|p| p + Vector3::new(0.2, 0.0, -0.1)).collect();
///
/// let result = fit_affine_cpd(&moving, &fixed, &CpdParams::default()).unwrap();
/// assert!((result.affine.matrix - Matrix3::identity()).norm() < 1e-2);
/// assert!((result.affine.translation - Vector3::new(0.2, 0.0, -0.1)).norm() < 1e-2);
/// ```
pub fn fit_affine_cpd(
    moving: &[Point3<f64>],
    fixed: &[Point3<f64>],
    params: &CpdParams,
) -> RegistrationResult<CpdResult> {
    params.validate()?;
    check_points(moving)?;
    check_points(fixed)?;

    let mut affine = AffineParameters::identity();
    let mut variance = match params.initial_variance {
        Some(v) => v,
        None => initial_variance(moving, fixed),
    };
    if variance <= 0.0 {
        variance = params.variance_floor();
    }

    let mut objective = f64::INFINITY;
    let mut change = f64::INFINITY;
    let mut iterations = 0;

    while iterations < params.max_iterations && change > params.tolerance {
        iterations += 1;

        let transformed = affine.transform_points(moving);
        let sums = expectation(&transformed, moving, fixed, variance, params.outlier_weight);
        if sums.np < f64::EPSILON {
            debug!(iteration = iterations, "CPD posteriors vanished, keeping last fit");
            break;
        }

        let update = maximization(&sums, moving)?;
        affine = update.affine;

        let previous = objective;
        objective = (update.x_px - update.tr_ab) / (2.0 * variance)
            + 1.5 * sums.np * variance.ln();
        change = (objective - previous).abs();

        variance = (update.x_px - update.tr_ab) / (3.0 * sums.np);
        if variance <= 0.0 {
            variance = params.variance_floor();
        }

        debug!(iteration = iterations, variance, change, "CPD iteration");
    }

    let converged = change <= params.tolerance;
    Ok(CpdResult {
        affine,
        variance,
        iterations,
        converged,
    })
}

/// Fits CPD between the sparse sets and applies the result to every vertex
/// of `mesh`.
///
/// `moving` is normally the rigidly aligned sparse source and `mesh` the
/// dense source after the same rigid transform. The returned parameters can
/// be applied to further meshes with [`AffineParameters::apply_to_mesh`].
///
/// # Errors
///
/// Returns [`RegistrationError::EmptySourceMesh`] for a mesh without
/// vertices, and any error of [`fit_affine_cpd`].
pub fn deform_mesh(
    mesh: &IndexedMesh,
    moving: &[Point3<f64>],
    fixed: &[Point3<f64>],
    params: &CpdParams,
) -> RegistrationResult<DeformableAlignment> {
    if mesh.is_empty() {
        return Err(RegistrationError::EmptySourceMesh);
    }

    let fit = fit_affine_cpd(moving, fixed, params)?;
    info!(
        iterations = fit.iterations,
        variance = fit.variance,
        converged = fit.converged,
        "Affine CPD finished"
    );

    Ok(DeformableAlignment {
        mesh: fit.affine.apply_to_mesh(mesh),
        affine: fit.affine,
        variance: fit.variance,
        iterations: fit.iterations,
        converged: fit.converged,
    })
}

fn check_points(points: &[Point3<f64>]) -> RegistrationResult<()> {
    if points.is_empty() {
        return Err(RegistrationError::EmptyPointSet);
    }
    if points.iter().any(|p| !p.iter().all(|c| c.is_finite())) {
        return Err(RegistrationError::NonFiniteCoordinates);
    }
    Ok(())
}

/// Mean squared distance over all (moving, fixed) pairs, per dimension.
#[allow(clippy::cast_precision_loss)]
fn initial_variance(moving: &[Point3<f64>], fixed: &[Point3<f64>]) -> f64 {
    let (m, n) = (moving.len() as f64, fixed.len() as f64);
    let sum_sq = |pts: &[Point3<f64>]| pts.iter().map(|p| p.coords.norm_squared()).sum::<f64>();
    let sum = |pts: &[Point3<f64>]| pts.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords);

    let total = m * sum_sq(fixed) + n * sum_sq(moving) - 2.0 * sum(fixed).dot(&sum(moving));
    total / (3.0 * m * n)
}

/// Posterior sums over one block of fixed points.
#[derive(Debug, Clone)]
struct PosteriorSums {
    /// Per moving point: sum over fixed points of its posterior.
    p1: Vec<f64>,
    /// Total posterior mass.
    np: f64,
    /// Sum of posterior-weighted fixed points.
    px: Vector3<f64>,
    /// Sum of posterior-weighted squared fixed norms.
    xpx: f64,
    /// Sum over fixed points of `x · (Σ_m p y_m)ᵀ`.
    xy: Matrix3<f64>,
}

impl PosteriorSums {
    fn zeros(moving: usize) -> Self {
        Self {
            p1: vec![0.0; moving],
            np: 0.0,
            px: Vector3::zeros(),
            xpx: 0.0,
            xy: Matrix3::zeros(),
        }
    }

    fn merge(mut self, other: &Self) -> Self {
        for (a, b) in self.p1.iter_mut().zip(&other.p1) {
            *a += b;
        }
        self.np += other.np;
        self.px += other.px;
        self.xpx += other.xpx;
        self.xy += other.xy;
        self
    }
}

fn expectation(
    transformed: &[Point3<f64>],
    moving: &[Point3<f64>],
    fixed: &[Point3<f64>],
    variance: f64,
    outlier_weight: f64,
) -> PosteriorSums {
    #[allow(clippy::cast_precision_loss)]
    let outlier_term = (2.0 * PI * variance).powf(1.5) * outlier_weight / (1.0 - outlier_weight)
        * moving.len() as f64
        / fixed.len() as f64;

    let blocks: Vec<PosteriorSums> = fixed
        .par_chunks(E_STEP_CHUNK)
        .map(|block| {
            let mut sums = PosteriorSums::zeros(moving.len());
            let mut kernel = vec![0.0; moving.len()];
            for x in block {
                let mut denominator = outlier_term;
                for (k, y) in kernel.iter_mut().zip(transformed) {
                    *k = (-(x - y).norm_squared() / (2.0 * variance)).exp();
                    denominator += *k;
                }
                if denominator <= 0.0 {
                    denominator = f64::EPSILON;
                }

                let mut mass = 0.0;
                let mut weighted_y = Vector3::zeros();
                for ((k, p1), y) in kernel.iter().zip(&mut sums.p1).zip(moving) {
                    let p = k / denominator;
                    *p1 += p;
                    mass += p;
                    weighted_y += p * y.coords;
                }
                sums.np += mass;
                sums.px += mass * x.coords;
                sums.xpx += mass * x.coords.norm_squared();
                sums.xy += x.coords * weighted_y.transpose();
            }
            sums
        })
        .collect();

    blocks
        .iter()
        .fold(PosteriorSums::zeros(moving.len()), PosteriorSums::merge)
}

struct Maximization {
    affine: AffineParameters,
    /// Centered weighted fixed scatter.
    x_px: f64,
    /// `tr(A · YPY⁻¹ · Aᵀ)`.
    tr_ab: f64,
}

fn maximization(sums: &PosteriorSums, moving: &[Point3<f64>]) -> RegistrationResult<Maximization> {
    let np = sums.np;
    let mu_x = sums.px / np;
    let mut py = Vector3::zeros();
    let mut ypy = Matrix3::zeros();
    for (p1, y) in sums.p1.iter().zip(moving) {
        py += *p1 * y.coords;
        ypy += *p1 * y.coords * y.coords.transpose();
    }
    let mu_y = py / np;

    let a = sums.xy - np * mu_x * mu_y.transpose();
    let ypy = ypy - np * mu_y * mu_y.transpose();
    let ypy_inv = ypy
        .try_inverse()
        .ok_or(RegistrationError::SingularSystem("weighted moving covariance"))?;

    let matrix = a * ypy_inv;
    let translation = mu_x - matrix * mu_y;
    let tr_ab = (matrix * a.transpose()).trace();
    let x_px = sums.xpx - np * mu_x.norm_squared();

    Ok(Maximization {
        affine: AffineParameters::new(matrix, translation),
        x_px,
        tr_ab,
    })
}
