//! Down-sampling of dense meshes to sparse point sets.
//!
//! Two strategies are available:
//! - **Voxel grid** - one centroid per occupied cubic cell, cells anchored
//!   at the bounding-box minimum
//! - **Poisson disk** - vertices visited in order, each kept only if no
//!   kept vertex lies closer than the radius
//!
//! Normals are estimated on the sampled points with
//! [`crate::estimate_normals`].

use crate::{
    NormalEstimationParams, PointIndex, PointSet, RegistrationError, RegistrationResult,
    SamplingStrategy, estimate_normals,
};
use hashbrown::HashMap;
use mesh_types::IndexedMesh;
use nalgebra::{Point3, Vector3};
use tracing::debug;

type Cell = (i64, i64, i64);

/// Parameters for [`sample_mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplingParams {
    /// Down-sampling strategy (default: voxel grid).
    pub strategy: SamplingStrategy,
    /// Normal estimation on the sampled points (default: 30 nearest,
    /// oriented away from the origin).
    pub normals: NormalEstimationParams,
}

impl SamplingParams {
    /// Creates default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: SamplingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the normal estimation parameters.
    #[must_use]
    pub const fn with_normals(mut self, normals: NormalEstimationParams) -> Self {
        self.normals = normals;
        self
    }
}

/// Samples `mesh` at resolution `voxel_radius` and estimates normals.
///
/// # Errors
///
/// Returns an error if:
/// - The mesh has no vertices
/// - The mesh contains non-finite coordinates
/// - `voxel_radius` is not a positive finite number
///
/// # Example
///
/// ```
/// use mesh_registration::{sample_mesh, SamplingParams};
/// use mesh_types::IndexedMesh;
/// use nalgebra::Point3;
///
/// let mesh = IndexedMesh::from_points(
///     (0..1000_u32).map(|i| {
///         let t = f64::from(i) * 0.01;
///         Point3::new(t.cos() * 5.0, t.sin() * 5.0, t * 0.37)
///     }),
/// );
///
/// let sampled = sample_mesh(&mesh, 1.0, &SamplingParams::default()).unwrap();
/// assert!(sampled.len() < mesh.vertex_count());
/// assert_eq!(sampled.points().len(), sampled.normals().len());
/// ```
pub fn sample_mesh(
    mesh: &IndexedMesh,
    voxel_radius: f64,
    params: &SamplingParams,
) -> RegistrationResult<PointSet> {
    if mesh.is_empty() {
        return Err(RegistrationError::EmptyPointSet);
    }
    if !mesh.is_finite() {
        return Err(RegistrationError::NonFiniteCoordinates);
    }

    let positions: Vec<Point3<f64>> = mesh.positions().collect();
    let points = match params.strategy {
        SamplingStrategy::VoxelGrid => voxel_downsample(&positions, voxel_radius)?,
        SamplingStrategy::PoissonDisk => poisson_disk_sample(&positions, voxel_radius)?,
    };

    let index = PointIndex::new(&points)?;
    let normals = estimate_normals(&index, &params.normals);

    debug!(
        input = positions.len(),
        sampled = points.len(),
        voxel_radius,
        strategy = ?params.strategy,
        "Sampled mesh"
    );

    PointSet::new(points, normals)
}

/// Replaces points by the centroid of each occupied voxel.
///
/// Output order follows the first point seen in each voxel.
///
/// # Errors
///
/// Returns [`RegistrationError::InvalidParameter`] when `voxel_size` is not
/// a positive finite number.
pub fn voxel_downsample(
    points: &[Point3<f64>],
    voxel_size: f64,
) -> RegistrationResult<Vec<Point3<f64>>> {
    check_radius("voxel_size", voxel_size)?;
    let Some(origin) = grid_origin(points) else {
        return Ok(Vec::new());
    };

    let mut slots: HashMap<Cell, usize> = HashMap::new();
    let mut sums: Vec<(Vector3<f64>, usize)> = Vec::new();

    for p in points {
        let cell = cell_of(p, &origin, voxel_size);
        let slot = *slots.entry(cell).or_insert_with(|| {
            sums.push((Vector3::zeros(), 0));
            sums.len() - 1
        });
        sums[slot].0 += p.coords;
        sums[slot].1 += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let centroids = sums
        .into_iter()
        .map(|(sum, count)| Point3::from(sum / count as f64))
        .collect();
    Ok(centroids)
}

/// Greedy minimum-spacing selection: no two returned points are closer
/// than `radius`.
///
/// # Errors
///
/// Returns [`RegistrationError::InvalidParameter`] when `radius` is not a
/// positive finite number.
pub fn poisson_disk_sample(
    points: &[Point3<f64>],
    radius: f64,
) -> RegistrationResult<Vec<Point3<f64>>> {
    check_radius("radius", radius)?;
    let Some(origin) = grid_origin(points) else {
        return Ok(Vec::new());
    };

    // Cell edge == radius, so every conflict lives in the 27 surrounding cells.
    let mut grid: HashMap<Cell, Vec<usize>> = HashMap::new();
    let mut kept: Vec<Point3<f64>> = Vec::new();
    let radius_sq = radius * radius;

    for p in points {
        let (cx, cy, cz) = cell_of(p, &origin, radius);
        let blocked = (-1..=1).any(|dx| {
            (-1..=1).any(|dy| {
                (-1..=1).any(|dz| {
                    grid.get(&(cx + dx, cy + dy, cz + dz)).is_some_and(|members| {
                        members
                            .iter()
                            .any(|&i| (kept[i] - p).norm_squared() < radius_sq)
                    })
                })
            })
        });
        if !blocked {
            grid.entry((cx, cy, cz)).or_default().push(kept.len());
            kept.push(*p);
        }
    }

    Ok(kept)
}

/// Scales a copy of `source` about the origin so its bounding-box diagonal
/// matches `target`'s. Returns the copy and the factor applied.
///
/// The factor is 1 when either diagonal is zero.
#[must_use]
pub fn match_extent(source: &IndexedMesh, target: &IndexedMesh) -> (IndexedMesh, f64) {
    let source_diagonal = source.bounds().diagonal();
    let target_diagonal = target.bounds().diagonal();
    let factor = if source_diagonal > 0.0 && target_diagonal > 0.0 {
        target_diagonal / source_diagonal
    } else {
        1.0
    };

    let mut scaled = source.clone();
    scaled.scale(factor);
    (scaled, factor)
}

fn check_radius(name: &str, value: f64) -> RegistrationResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RegistrationError::InvalidParameter(format!(
            "{name} must be a positive finite number, got {value}"
        )))
    }
}

fn grid_origin(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    let first = points.first()?;
    Some(points.iter().fold(*first, |acc, p| acc.inf(p)))
}

#[allow(clippy::cast_possible_truncation)]
fn cell_of(p: &Point3<f64>, origin: &Point3<f64>, size: f64) -> Cell {
    let rel = (p - origin) / size;
    (
        rel.x.floor() as i64,
        rel.y.floor() as i64,
        rel.z.floor() as i64,
    )
}
