//! Alignment configuration.
//!
//! Distances other than `point_density` are multipliers of the voxel size,
//! which is derived from the target's bounding-box diagonal. A single
//! parameter set therefore works for models of any physical scale.

use crate::{RegistrationError, RegistrationResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Divisor turning a bounding-box diagonal into a voxel size.
pub const VOXELS_PER_DIAGONAL: f64 = 55.0;

/// How dense meshes are reduced to sparse point sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SamplingStrategy {
    /// One centroid per occupied cubic cell.
    #[default]
    VoxelGrid,
    /// Greedy minimum-spacing selection of mesh vertices.
    PoissonDisk,
}

/// Parameters of the rigid registration pipeline.
///
/// # Example
///
/// ```
/// use mesh_registration::AlignmentParameters;
///
/// let params = AlignmentParameters::skull()
///     .with_point_density(1.5)
///     .with_max_ransac_iterations(50_000)
///     .with_seed(7);
///
/// assert!(params.validate().is_ok());
/// assert!((params.voxel_size(110.0) - 110.0 / (55.0 * 1.5)).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlignmentParameters {
    /// Sampling resolution: higher values give smaller voxels (default: 1.0).
    pub point_density: f64,
    /// Radius for ICP normal estimation, in voxels (default: 2.0).
    pub normal_search_radius: f64,
    /// Maximum neighbors per FPFH neighborhood (default: 100).
    pub fpfh_neighbors: usize,
    /// FPFH neighborhood radius, in voxels (default: 5.0).
    pub fpfh_search_radius: f64,
    /// RANSAC inlier distance, in voxels (default: 3.0).
    pub distance_threshold: f64,
    /// Total RANSAC iteration budget per attempt (default: 1,000,000).
    pub max_ransac_iterations: usize,
    /// ICP correspondence rejection distance, in voxels (default: 1.5).
    pub icp_distance_threshold: f64,
    /// Down-sampling strategy (default: voxel grid).
    pub sampling: SamplingStrategy,
    /// RNG seed for reproducible RANSAC; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for AlignmentParameters {
    fn default() -> Self {
        Self::skull()
    }
}

impl AlignmentParameters {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset tuned for whole-skull registration.
    #[must_use]
    pub const fn skull() -> Self {
        Self {
            point_density: 1.0,
            normal_search_radius: 2.0,
            fpfh_neighbors: 100,
            fpfh_search_radius: 5.0,
            distance_threshold: 3.0,
            max_ransac_iterations: 1_000_000,
            icp_distance_threshold: 1.5,
            sampling: SamplingStrategy::VoxelGrid,
            seed: None,
        }
    }

    /// Sets the point density.
    #[must_use]
    pub const fn with_point_density(mut self, density: f64) -> Self {
        self.point_density = density;
        self
    }

    /// Sets the normal search radius (voxel units).
    #[must_use]
    pub const fn with_normal_search_radius(mut self, radius: f64) -> Self {
        self.normal_search_radius = radius;
        self
    }

    /// Sets the FPFH neighbor cap.
    #[must_use]
    pub const fn with_fpfh_neighbors(mut self, neighbors: usize) -> Self {
        self.fpfh_neighbors = neighbors;
        self
    }

    /// Sets the FPFH search radius (voxel units).
    #[must_use]
    pub const fn with_fpfh_search_radius(mut self, radius: f64) -> Self {
        self.fpfh_search_radius = radius;
        self
    }

    /// Sets the RANSAC inlier distance (voxel units).
    #[must_use]
    pub const fn with_distance_threshold(mut self, threshold: f64) -> Self {
        self.distance_threshold = threshold;
        self
    }

    /// Sets the RANSAC iteration budget.
    #[must_use]
    pub const fn with_max_ransac_iterations(mut self, iterations: usize) -> Self {
        self.max_ransac_iterations = iterations;
        self
    }

    /// Sets the ICP rejection distance (voxel units).
    #[must_use]
    pub const fn with_icp_distance_threshold(mut self, threshold: f64) -> Self {
        self.icp_distance_threshold = threshold;
        self
    }

    /// Sets the sampling strategy.
    #[must_use]
    pub const fn with_sampling(mut self, sampling: SamplingStrategy) -> Self {
        self.sampling = sampling;
        self
    }

    /// Fixes the RANSAC seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Voxel edge length for a model whose bounding-box diagonal is `diagonal`.
    #[must_use]
    pub fn voxel_size(&self, diagonal: f64) -> f64 {
        diagonal / (VOXELS_PER_DIAGONAL * self.point_density)
    }

    /// Checks that every field lies in its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidParameter`] naming the first
    /// offending field.
    pub fn validate(&self) -> RegistrationResult<()> {
        let positive = [
            ("point_density", self.point_density),
            ("normal_search_radius", self.normal_search_radius),
            ("fpfh_search_radius", self.fpfh_search_radius),
            ("distance_threshold", self.distance_threshold),
            ("icp_distance_threshold", self.icp_distance_threshold),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RegistrationError::InvalidParameter(format!(
                    "{name} must be a positive finite number, got {value}"
                )));
            }
        }
        if self.fpfh_neighbors == 0 {
            return Err(RegistrationError::InvalidParameter(
                "fpfh_neighbors must be at least 1".to_string(),
            ));
        }
        if self.max_ransac_iterations == 0 {
            return Err(RegistrationError::InvalidParameter(
                "max_ransac_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
