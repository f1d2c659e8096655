//! Fast Point Feature Histograms.
//!
//! For every point, the Darboux-frame angles between its normal and each
//! neighbor's are binned into three 11-bin histograms (the SPFH). The FPFH
//! adds the neighbors' SPFHs weighted by inverse squared distance, each
//! 11-bin block renormalized to sum 100, to the point's own SPFH.
//!
//! Neighborhoods are radius searches capped at the closest `max_neighbors`
//! points. Every point is processed independently and neighbor order is
//! fixed, so identical inputs give bit-identical descriptors.

use crate::spatial::Neighbor;
use crate::{PointIndex, PointSet, RegistrationError, RegistrationResult};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::f64::consts::PI;
use tracing::debug;

/// Bins per angular feature.
pub const FPFH_BINS: usize = 11;

/// Length of an FPFH descriptor.
pub const FPFH_DIMENSION: usize = 3 * FPFH_BINS;

/// A single 33-bin descriptor.
pub type Descriptor = [f64; FPFH_DIMENSION];

/// Descriptors for a point set, index `i` describing point `i`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSet {
    descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    /// Wraps precomputed descriptors.
    #[must_use]
    pub const fn new(descriptors: Vec<Descriptor>) -> Self {
        Self { descriptors }
    }

    /// All descriptors in point order.
    #[must_use]
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Descriptor of point `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Descriptor> {
        self.descriptors.get(index)
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when there are no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// True when both sets hold exactly the same descriptors in the same order.
    #[must_use]
    pub fn is_identical_to(&self, other: &Self) -> bool {
        self.descriptors == other.descriptors
    }
}

/// Computes FPFH descriptors for every point of `points`.
///
/// # Arguments
///
/// * `points` - Points with unit normals
/// * `radius` - Neighborhood radius
/// * `max_neighbors` - Cap on neighbors per point, closest kept
///
/// # Errors
///
/// Returns an error if the point set is empty, `radius` is not a positive
/// finite number, or `max_neighbors` is zero.
///
/// # Example
///
/// ```
/// use mesh_registration::{compute_fpfh, FPFH_DIMENSION, PointSet};
/// use nalgebra::{Point3, Vector3};
///
/// let points: Vec<_> = (0..200_u32)
///     .map(|i| {
///         let t = f64::from(i) * 0.1;
///         Point3::new(t.cos(), t.sin(), t * 0.05)
///     })
///     .collect();
/// let normals = points.iter().map(|p| Vector3::new(p.x, p.y, 0.0)).collect();
/// let set = PointSet::new(points, normals).unwrap();
///
/// let features = compute_fpfh(&set, 0.5, 30).unwrap();
/// assert_eq!(features.len(), set.len());
/// assert_eq!(features.descriptors()[0].len(), FPFH_DIMENSION);
/// ```
pub fn compute_fpfh(
    points: &PointSet,
    radius: f64,
    max_neighbors: usize,
) -> RegistrationResult<FeatureSet> {
    if points.is_empty() {
        return Err(RegistrationError::EmptyPointSet);
    }
    if !(radius.is_finite() && radius > 0.0) {
        return Err(RegistrationError::InvalidParameter(format!(
            "FPFH radius must be a positive finite number, got {radius}"
        )));
    }
    if max_neighbors == 0 {
        return Err(RegistrationError::InvalidParameter(
            "FPFH neighbor cap must be at least 1".to_string(),
        ));
    }

    let positions = points.points();
    let normals = points.normals();
    let index = PointIndex::new(positions)?;

    // Neighbor lists exclude the query point itself.
    let neighborhoods: Vec<Vec<Neighbor>> = positions
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            index
                .within_radius(p, radius, Some(max_neighbors))
                .into_iter()
                .filter(|n| n.index != i)
                .collect()
        })
        .collect();

    let spfh: Vec<Descriptor> = neighborhoods
        .par_iter()
        .enumerate()
        .map(|(i, neighbors)| simplified_histogram(i, neighbors, positions, normals))
        .collect();

    let descriptors: Vec<Descriptor> = neighborhoods
        .par_iter()
        .enumerate()
        .map(|(i, neighbors)| fast_histogram(i, neighbors, &spfh))
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let mean_neighbors =
        neighborhoods.iter().map(Vec::len).sum::<usize>() as f64 / neighborhoods.len() as f64;
    debug!(
        points = positions.len(),
        radius,
        max_neighbors,
        mean_neighbors,
        "Computed FPFH descriptors"
    );

    Ok(FeatureSet::new(descriptors))
}

/// Darboux-frame pair features `[alpha, phi, theta, distance]`.
///
/// The source of the frame is whichever point's normal is closer to the
/// connecting line. Coincident points or a normal parallel to the line
/// give all zeros.
#[must_use]
pub fn pair_features(
    p1: &Point3<f64>,
    n1: &Vector3<f64>,
    p2: &Point3<f64>,
    n2: &Vector3<f64>,
) -> [f64; 4] {
    let mut dp = p2 - p1;
    let distance = dp.norm();
    if distance == 0.0 {
        return [0.0; 4];
    }

    let angle1 = n1.dot(&dp) / distance;
    let angle2 = n2.dot(&dp) / distance;

    let (u, target_normal, theta) = if angle1.abs().acos() > angle2.abs().acos() {
        dp = -dp;
        (n2, n1, -angle2)
    } else {
        (n1, n2, angle1)
    };

    let Some(v) = dp.cross(u).try_normalize(0.0) else {
        return [0.0; 4];
    };
    let w = u.cross(&v);

    let phi = v.dot(target_normal);
    let alpha = w.dot(target_normal).atan2(u.dot(target_normal));
    [alpha, phi, theta, distance]
}

fn simplified_histogram(
    i: usize,
    neighbors: &[Neighbor],
    positions: &[Point3<f64>],
    normals: &[Vector3<f64>],
) -> Descriptor {
    let mut histogram = [0.0; FPFH_DIMENSION];
    if neighbors.is_empty() {
        return histogram;
    }

    #[allow(clippy::cast_precision_loss)]
    let increment = 100.0 / neighbors.len() as f64;
    for n in neighbors {
        let [alpha, phi, theta, _] =
            pair_features(&positions[i], &normals[i], &positions[n.index], &normals[n.index]);
        histogram[bin(alpha, -PI, PI)] += increment;
        histogram[FPFH_BINS + bin(phi, -1.0, 1.0)] += increment;
        histogram[2 * FPFH_BINS + bin(theta, -1.0, 1.0)] += increment;
    }
    histogram
}

fn fast_histogram(i: usize, neighbors: &[Neighbor], spfh: &[Descriptor]) -> Descriptor {
    let mut histogram = [0.0; FPFH_DIMENSION];
    let mut block_sums = [0.0; 3];

    for n in neighbors {
        let distance_sq = n.distance * n.distance;
        if distance_sq == 0.0 {
            continue;
        }
        for (j, value) in spfh[n.index].iter().enumerate() {
            let weighted = value / distance_sq;
            histogram[j] += weighted;
            block_sums[j / FPFH_BINS] += weighted;
        }
    }

    for (j, value) in histogram.iter_mut().enumerate() {
        let sum = block_sums[j / FPFH_BINS];
        if sum != 0.0 {
            *value *= 100.0 / sum;
        }
        *value += spfh[i][j];
    }
    histogram
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn bin(value: f64, low: f64, high: f64) -> usize {
    let scaled = (FPFH_BINS as f64 * (value - low) / (high - low)).floor();
    if scaled.is_nan() || scaled < 0.0 {
        0
    } else {
        (scaled as usize).min(FPFH_BINS - 1)
    }
}
