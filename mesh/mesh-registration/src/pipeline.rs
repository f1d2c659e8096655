//! End-to-end rigid registration of one mesh onto another.
//!
//! Stages, in order:
//! 1. Voxel size from the target's bounding-box diagonal
//! 2. Optional prescale of the source to the target's extent
//! 3. Sampling and PCA normals on both meshes
//! 4. FPFH descriptors and mutual descriptor matching
//! 5. RANSAC on the correspondences
//! 6. Radius normals on the coarse result, then point-to-plane ICP
//!
//! Every distance parameter is a multiple of the voxel size.

use crate::{
    AlignmentParameters, FitnessScore, IcpParams, IcpResult, NormalEstimationParams, PointIndex,
    PointSet, RansacEstimate, RansacOptions, RegistrationError, RegistrationResult,
    RigidTransform, SamplingParams, TransformKind, compute_fpfh, estimate_normals,
    estimate_transform, match_extent, match_features, refine_point_to_plane, sample_mesh,
    transform_mesh,
};
use mesh_types::IndexedMesh;
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::{info, warn};

/// Output of [`align_meshes`].
#[derive(Debug, Clone)]
pub struct RigidAlignment {
    /// Sampled source points moved onto the target, with rotated normals.
    pub aligned_source: PointSet,
    /// Sampled target points, untouched.
    pub target: PointSet,
    /// Composed `icp ∘ ransac` transform, acting on the prescaled source.
    pub transform: RigidTransform,
    /// Whether RANSAC settled on a similarity transform.
    pub kind: TransformKind,
    /// Uniform factor applied to the source before sampling (1 without scaling).
    pub prescale: f64,
    /// Voxel edge length used for sampling.
    pub voxel_size: f64,
    /// Coarse RANSAC estimate.
    pub ransac: RansacEstimate,
    /// ICP refinement.
    pub icp: IcpResult,
    /// Cloud overlap after RANSAC.
    pub before_refinement: FitnessScore,
    /// Cloud overlap after ICP.
    pub after_refinement: FitnessScore,
    /// The dense source mesh moved by [`RigidAlignment::source_to_target`].
    pub aligned_mesh: IndexedMesh,
}

impl RigidAlignment {
    /// Transform taking the original, unscaled source mesh onto the target.
    #[must_use]
    pub fn source_to_target(&self) -> RigidTransform {
        self.transform
            .compose(&RigidTransform::from_scale(self.prescale))
    }
}

/// Registers `source` onto `target`.
///
/// With `allow_scaling`, the source is first scaled to the target's
/// bounding-box diagonal and RANSAC may also fit a uniform scale.
///
/// # Errors
///
/// Returns an error if:
/// - Either mesh is empty or has non-finite coordinates
/// - The parameters are out of range
/// - Matching yields fewer than three correspondences
/// - ICP retains no pairs or a solve fails
///
/// # Example
///
/// ```no_run
/// use mesh_registration::{align_meshes, AlignmentParameters};
/// use mesh_types::IndexedMesh;
///
/// # let scan = IndexedMesh::new();
/// # let mirrored = IndexedMesh::new();
/// let params = AlignmentParameters::skull().with_seed(7);
/// let result = align_meshes(&mirrored, &scan, &params, false).unwrap();
/// println!("fitness after ICP: {}", result.after_refinement.fitness);
/// ```
pub fn align_meshes(
    source: &IndexedMesh,
    target: &IndexedMesh,
    params: &AlignmentParameters,
    allow_scaling: bool,
) -> RegistrationResult<RigidAlignment> {
    params.validate()?;
    if source.is_empty() {
        return Err(RegistrationError::EmptySourceMesh);
    }
    if target.is_empty() {
        return Err(RegistrationError::EmptyTargetMesh);
    }
    if !source.is_finite() || !target.is_finite() {
        return Err(RegistrationError::NonFiniteCoordinates);
    }

    let diagonal = target.bounds().diagonal();
    if diagonal <= 0.0 {
        return Err(RegistrationError::InvalidParameter(
            "target mesh has a zero-size bounding box".to_string(),
        ));
    }
    let voxel_size = params.voxel_size(diagonal);

    let (working_source, prescale) = if allow_scaling {
        match_extent(source, target)
    } else {
        (source.clone(), 1.0)
    };

    let sampling = SamplingParams::new().with_strategy(params.sampling);
    let source_points = sample_mesh(&working_source, voxel_size, &sampling)?;
    let target_points = sample_mesh(target, voxel_size, &sampling)?;
    info!(
        voxel_size,
        prescale,
        source_points = source_points.len(),
        target_points = target_points.len(),
        "Sampled meshes"
    );

    let fpfh_radius = params.fpfh_search_radius * voxel_size;
    let source_features = compute_fpfh(&source_points, fpfh_radius, params.fpfh_neighbors)?;
    let target_features = compute_fpfh(&target_points, fpfh_radius, params.fpfh_neighbors)?;

    let inlier_distance = params.distance_threshold * voxel_size;
    let ransac = if source_features.is_identical_to(&target_features) {
        info!("Feature sets are identical, skipping RANSAC");
        RansacEstimate::identity(source_features.len())
    } else {
        let correspondences = match_features(&source_features, &target_features, true);
        info!(correspondences = correspondences.len(), "Matched features");

        let mut options = RansacOptions::new()
            .with_max_iterations(params.max_ransac_iterations)
            .with_inlier_distance(inlier_distance)
            .with_scaling(allow_scaling);
        if let Some(seed) = params.seed {
            options = options.with_seed(seed);
        }
        estimate_transform(
            source_points.points(),
            target_points.points(),
            &correspondences,
            &options,
        )?
    };
    if !ransac.converged() {
        warn!(
            fitness = ransac.fitness,
            rmse = ransac.rmse,
            "RANSAC fitness stayed below 0.99, the alignment may be poor"
        );
    }

    // Both overlap scores use the ICP pairing distance.
    let icp_distance = params.icp_distance_threshold * voxel_size;
    let target_index = PointIndex::new(target_points.points())?;
    let coarse_points = ransac.transform.transform_points(source_points.points());
    let before_refinement = evaluate_overlap(&coarse_points, &target_index, icp_distance);

    let normal_params =
        NormalEstimationParams::radius_upward(params.normal_search_radius * voxel_size);
    let coarse_index = PointIndex::new(&coarse_points)?;
    let coarse_normals = estimate_normals(&coarse_index, &normal_params);
    let target_normals = estimate_normals(&target_index, &normal_params);
    let coarse = PointSet::new(coarse_points, coarse_normals)?;
    let icp_target = target_points.clone().with_normals(target_normals)?;

    let icp_params = IcpParams::new().with_distance_threshold(icp_distance);
    let icp = refine_point_to_plane(&coarse, &icp_target, &icp_params)?;

    let transform = icp.transform.compose(&ransac.transform);
    let aligned_source = coarse.transformed(&icp.transform);
    let after_refinement = evaluate_overlap(aligned_source.points(), &target_index, icp_distance);
    info!(
        before = before_refinement.fitness,
        after = after_refinement.fitness,
        rmse = after_refinement.rmse,
        icp_iterations = icp.iterations,
        icp_converged = icp.converged,
        "Refined alignment"
    );

    let mut alignment = RigidAlignment {
        aligned_source,
        target: target_points,
        transform,
        kind: ransac.kind,
        prescale,
        voxel_size,
        ransac,
        icp,
        before_refinement,
        after_refinement,
        aligned_mesh: IndexedMesh::new(),
    };
    alignment.aligned_mesh = transform_mesh(source, &alignment.source_to_target());
    Ok(alignment)
}

/// Overlap of `points` with an indexed cloud.
///
/// A point is an inlier when its nearest indexed neighbor is closer than
/// `threshold`. Fitness is the inlier fraction of `points`, rmse the mean
/// inlier distance (0 without inliers).
///
/// # Example
///
/// ```
/// use mesh_registration::{evaluate_overlap, PointIndex};
/// use nalgebra::Point3;
///
/// let target = [Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 0.0, 0.0)];
/// let index = PointIndex::new(&target).unwrap();
///
/// let moved = [Point3::new(0.0, 0.0, 0.2), Point3::new(5.0, 5.0, 5.0)];
/// let score = evaluate_overlap(&moved, &index, 1.0);
/// assert_eq!(score.inliers, 1);
/// assert_eq!(score.fitness, 0.5);
/// ```
#[must_use]
pub fn evaluate_overlap(points: &[Point3<f64>], index: &PointIndex, threshold: f64) -> FitnessScore {
    if points.is_empty() {
        return FitnessScore::EMPTY;
    }
    let (inliers, residual_sum) = points
        .par_iter()
        .map(|p| {
            let nearest = index.nearest(p);
            if nearest.distance < threshold {
                (1_usize, nearest.distance)
            } else {
                (0, 0.0)
            }
        })
        .reduce(|| (0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
    if inliers == 0 {
        return FitnessScore::EMPTY;
    }

    #[allow(clippy::cast_precision_loss)]
    let score = FitnessScore {
        fitness: inliers as f64 / points.len() as f64,
        rmse: residual_sum / inliers as f64,
        inliers,
    };
    score
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use mesh_types::Vertex;
    use rand::prelude::*;

    /// Latitude/longitude mesh of a lumpy ellipsoid with jittered vertices.
    fn lumpy_ellipsoid(rings: u32, segments: u32, seed: u64) -> IndexedMesh {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut mesh = IndexedMesh::new();
        for i in 0..=rings {
            let theta = std::f64::consts::PI * f64::from(i) / f64::from(rings);
            for j in 0..segments {
                let phi = std::f64::consts::TAU * f64::from(j) / f64::from(segments);
                let r = 1.0 + 0.15 * (3.0 * theta).sin() * (2.0 * phi).cos() + 0.08 * (5.0 * phi).sin();
                let jitter = rng.gen_range(-1e-3..1e-3);
                mesh.vertices.push(Vertex::from_coords(
                    3.0 * (r + jitter) * theta.sin() * phi.cos(),
                    2.0 * (r + jitter) * theta.sin() * phi.sin(),
                    1.5 * (r + jitter) * theta.cos(),
                ));
            }
        }
        for i in 0..rings {
            for j in 0..segments {
                let a = i * segments + j;
                let b = i * segments + (j + 1) % segments;
                let c = a + segments;
                let d = b + segments;
                mesh.faces.push([a, c, b]);
                mesh.faces.push([b, c, d]);
            }
        }
        mesh
    }

    fn fast_params() -> AlignmentParameters {
        AlignmentParameters::skull()
            .with_max_ransac_iterations(20_000)
            .with_seed(5)
    }

    #[test]
    fn test_self_registration_is_identity() {
        let mesh = lumpy_ellipsoid(40, 80, 1);
        let result = align_meshes(&mesh, &mesh, &fast_params(), false).unwrap();

        assert!(result.transform.rotation_angle_to(&RigidTransform::identity()) < 1e-9);
        assert!(result.transform.translation.norm() < 1e-9);
        assert_eq!(result.transform.scale, 1.0);
        assert_eq!(result.kind, TransformKind::Rigid);
        assert_eq!(result.ransac.fitness, 1.0);
        assert_eq!(result.after_refinement.fitness, 1.0);
        assert_eq!(result.aligned_mesh.vertex_count(), mesh.vertex_count());
    }

    #[test]
    fn test_aligned_mesh_follows_baked_transform() {
        let mesh = lumpy_ellipsoid(30, 60, 2);
        let result = align_meshes(&mesh, &mesh, &fast_params(), true).unwrap();

        let baked = result.source_to_target();
        for (original, moved) in mesh.vertices.iter().zip(&result.aligned_mesh.vertices) {
            let expected = baked.transform_point(&original.position);
            assert!((moved.position - expected).norm() < 1e-9);
        }
        assert!((result.prescale - 1.0).abs() < 1e-12);
    }

    /// Axis-aligned 40 x 40 plate at z = 0 with a tent ridge along x = 20.
    fn ridged_plate() -> IndexedMesh {
        let side = 40_u32;
        let mut mesh = IndexedMesh::new();
        for j in 0..side {
            for i in 0..side {
                let z = (3.0 - (f64::from(i) - 20.0).abs()).max(0.0);
                mesh.vertices.push(Vertex::from_coords(f64::from(i), f64::from(j), z));
            }
        }
        for j in 0..side - 1 {
            for i in 0..side - 1 {
                let a = j * side + i;
                mesh.faces.push([a, a + 1, a + side]);
                mesh.faces.push([a + 1, a + side + 1, a + side]);
            }
        }
        mesh
    }

    #[test]
    fn test_flat_axis_aligned_plate() {
        let plate = ridged_plate();
        let result = align_meshes(&plate, &plate, &fast_params(), false).unwrap();

        assert!(result.transform.rotation_angle_to(&RigidTransform::identity()) < 1e-9);
        assert!(result.transform.translation.norm() < 1e-9);
        assert_eq!(result.after_refinement.fitness, 1.0);
        let flat = result.target.points().iter().filter(|p| p.z == 0.0).count();
        assert!(flat > 1000);
    }

    #[test]
    fn test_overlap_scored_at_icp_distance() {
        let mesh = lumpy_ellipsoid(40, 80, 6);
        let params = fast_params();
        let voxel = params.voxel_size(mesh.bounds().diagonal());

        // Loose points three voxels off the surface, inside the bounding box.
        let mut source = mesh.clone();
        for ring in [10_usize, 30] {
            for segment in [10_usize, 30, 50, 70] {
                let p = mesh.vertices[ring * 80 + segment].position;
                source
                    .vertices
                    .push(Vertex::new(p * (1.0 + 3.0 * voxel / p.coords.norm())));
            }
        }

        let result = align_meshes(&source, &mesh, &params, false).unwrap();
        let index = PointIndex::new(result.target.points()).unwrap();
        let icp_distance = params.icp_distance_threshold * result.voxel_size;
        let expected = evaluate_overlap(result.aligned_source.points(), &index, icp_distance);

        assert_eq!(result.after_refinement.inliers, expected.inliers);
        assert_eq!(result.after_refinement.fitness, expected.fitness);
        assert!(result.after_refinement.fitness < 1.0);
    }

    #[test]
    fn test_rejects_empty_meshes() {
        let mesh = lumpy_ellipsoid(10, 20, 3);
        let empty = IndexedMesh::new();
        assert!(matches!(
            align_meshes(&empty, &mesh, &fast_params(), false),
            Err(RegistrationError::EmptySourceMesh)
        ));
        assert!(matches!(
            align_meshes(&mesh, &empty, &fast_params(), false),
            Err(RegistrationError::EmptyTargetMesh)
        ));
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let mesh = lumpy_ellipsoid(10, 20, 4);
        let params = AlignmentParameters::skull().with_point_density(0.0);
        assert!(matches!(
            align_meshes(&mesh, &mesh, &params, false),
            Err(RegistrationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_overlap_without_inliers() {
        let index = PointIndex::new(&[Point3::origin()]).unwrap();
        let score = evaluate_overlap(&[Point3::new(9.0, 9.0, 9.0)], &index, 1.0);
        assert_eq!(score, FitnessScore::EMPTY);
        assert_eq!(evaluate_overlap(&[], &index, 1.0), FitnessScore::EMPTY);
    }
}
