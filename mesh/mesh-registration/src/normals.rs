//! PCA normal estimation for sampled point sets.
//!
//! Each normal is the eigenvector of the smallest eigenvalue of the local
//! covariance. Signs are fixed per point by [`NormalOrientation`]; there is
//! no propagation between neighbors.

use crate::PointIndex;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

/// Neighbors used by the sampler when estimating normals.
pub const DEFAULT_NORMAL_NEIGHBORS: usize = 30;

/// Which points form the local neighborhood.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Neighborhood {
    /// The k nearest points, the query point included.
    Nearest(usize),
    /// All points within a radius, the query point included.
    Radius(f64),
}

/// How the sign of each normal is chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormalOrientation {
    /// Keep the eigen solver's sign.
    Unoriented,
    /// Point away from a reference point.
    AwayFrom(Point3<f64>),
    /// Flip into the +Z hemisphere.
    PositiveZ,
}

/// Parameters for normal estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEstimationParams {
    /// Neighborhood definition (default: 30 nearest).
    pub neighborhood: Neighborhood,
    /// Sign convention (default: away from the origin).
    pub orientation: NormalOrientation,
}

impl Default for NormalEstimationParams {
    fn default() -> Self {
        Self {
            neighborhood: Neighborhood::Nearest(DEFAULT_NORMAL_NEIGHBORS),
            orientation: NormalOrientation::AwayFrom(Point3::origin()),
        }
    }
}

impl NormalEstimationParams {
    /// Creates default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Radius neighborhood with normals flipped toward +Z, as used before ICP.
    #[must_use]
    pub const fn radius_upward(radius: f64) -> Self {
        Self {
            neighborhood: Neighborhood::Radius(radius),
            orientation: NormalOrientation::PositiveZ,
        }
    }

    /// Sets the neighborhood.
    #[must_use]
    pub const fn with_neighborhood(mut self, neighborhood: Neighborhood) -> Self {
        self.neighborhood = neighborhood;
        self
    }

    /// Sets the orientation rule.
    #[must_use]
    pub const fn with_orientation(mut self, orientation: NormalOrientation) -> Self {
        self.orientation = orientation;
        self
    }
}

/// Estimates a unit normal for every point held by `index`, in index order.
///
/// Points with fewer than three neighbors, or a degenerate covariance,
/// get `+Z`.
///
/// # Example
///
/// ```
/// use mesh_registration::{estimate_normals, NormalEstimationParams, PointIndex};
/// use nalgebra::Point3;
///
/// // A grid patch of the plane z = 2.
/// let points: Vec<_> = (0..100_u32)
///     .map(|i| Point3::new(f64::from(i % 10), f64::from(i / 10), 2.0))
///     .collect();
/// let index = PointIndex::new(&points).unwrap();
///
/// let normals = estimate_normals(&index, &NormalEstimationParams::default());
/// assert!(normals.iter().all(|n| n.z > 0.99));
/// ```
#[must_use]
pub fn estimate_normals(index: &PointIndex, params: &NormalEstimationParams) -> Vec<Vector3<f64>> {
    let points = index.points();
    points
        .par_iter()
        .map(|p| {
            let neighbors = match params.neighborhood {
                Neighborhood::Nearest(k) => index.k_nearest(p, k),
                Neighborhood::Radius(r) => index.within_radius(p, r, None),
            };
            let normal = if neighbors.len() < 3 {
                Vector3::z()
            } else {
                pca_normal(neighbors.iter().map(|n| &points[n.index]))
            };
            orient(normal, p, params.orientation)
        })
        .collect()
}

/// Smallest-eigenvalue eigenvector of the neighborhood covariance.
fn pca_normal<'a>(neighbors: impl Iterator<Item = &'a Point3<f64>> + Clone) -> Vector3<f64> {
    let mut count = 0_usize;
    let mut sum = Vector3::zeros();
    for p in neighbors.clone() {
        sum += p.coords;
        count += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let centroid = sum / count as f64;

    let mut cov = Matrix3::zeros();
    for p in neighbors {
        let diff = p.coords - centroid;
        cov += diff * diff.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let min_idx = eigen.eigenvalues.imin();
    eigen
        .eigenvectors
        .column(min_idx)
        .into_owned()
        .try_normalize(1e-12)
        .unwrap_or_else(Vector3::z)
}

fn orient(normal: Vector3<f64>, point: &Point3<f64>, orientation: NormalOrientation) -> Vector3<f64> {
    let flip = match orientation {
        NormalOrientation::Unoriented => false,
        NormalOrientation::AwayFrom(reference) => normal.dot(&(point - reference)) < 0.0,
        NormalOrientation::PositiveZ => normal.z < 0.0,
    };
    if flip { -normal } else { normal }
}
