//! Feature-based registration of 3D surface meshes.
//!
//! This crate aligns a source mesh onto a target mesh without known
//! correspondences:
//! - **Sampling** - Voxel-grid or Poisson-disk reduction with PCA normals
//! - **FPFH** - 33-bin local shape descriptors per sampled point
//! - **Matching** - Mutual nearest neighbors in descriptor space
//! - **RANSAC** - Parallel robust rigid or similarity estimation
//! - **ICP** - Point-to-plane refinement of the coarse estimate
//! - **CPD** - Affine Coherent Point Drift for residual deformation
//!
//! Hand-placed landmark pairs are served separately by [`align_by_landmarks`],
//! including a fit that rotates about one fixed landmark.
//!
//! The crate has no rendering or IO dependencies. Meshes come in and go
//! out as [`mesh_types::IndexedMesh`] values.
//!
//! # Quick Start
//!
//! ## Rigid Registration
//!
//! ```no_run
//! use mesh_registration::{align_meshes, AlignmentParameters};
//! use mesh_types::IndexedMesh;
//!
//! # let scan = IndexedMesh::new();
//! # let mirrored = IndexedMesh::new();
//! let params = AlignmentParameters::skull().with_seed(42);
//! let rigid = align_meshes(&mirrored, &scan, &params, false).unwrap();
//!
//! println!("Kind: {:?}", rigid.kind);
//! println!("Fitness: {:.3}", rigid.after_refinement.fitness);
//! println!("ICP iterations: {}", rigid.icp.iterations);
//! ```
//!
//! ## Affine Refinement
//!
//! The rigid result feeds CPD, which bends the dense mesh onto the target:
//!
//! ```no_run
//! use mesh_registration::{align_meshes, deform_mesh, AlignmentParameters, CpdParams};
//! use mesh_types::IndexedMesh;
//!
//! # let scan = IndexedMesh::new();
//! # let mirrored = IndexedMesh::new();
//! # let mirrored_half = IndexedMesh::new();
//! let rigid = align_meshes(&mirrored, &scan, &AlignmentParameters::skull(), false).unwrap();
//! let deformed = deform_mesh(
//!     &rigid.aligned_mesh,
//!     rigid.aligned_source.points(),
//!     rigid.target.points(),
//!     &CpdParams::default(),
//! )
//! .unwrap();
//!
//! // Reuse the fit on another mesh in the same frame.
//! let half = mesh_registration::transform_mesh(&mirrored_half, &rigid.source_to_target());
//! let half = deformed.affine.apply_to_mesh(&half);
//! ```
//!
//! ## Direct Point-to-Point Alignment
//!
//! For paired points, the closed-form fit is available on its own:
//!
//! ```
//! use mesh_registration::compute_rigid_transform;
//! use nalgebra::Point3;
//!
//! let source = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//! ];
//!
//! let target = vec![
//!     Point3::new(5.0, 5.0, 0.0),
//!     Point3::new(6.0, 5.0, 0.0),
//!     Point3::new(5.0, 6.0, 0.0),
//! ];
//!
//! let transform = compute_rigid_transform(&source, &target, false).unwrap();
//! ```
//!
//! # Algorithm Selection
//!
//! | Scenario | Recommended Entry Point |
//! |----------|-------------------------|
//! | Known correspondences | `compute_rigid_transform` |
//! | Landmarks with a fixed stop | `align_by_landmarks` with a pivot |
//! | Noisy putative correspondences | `estimate_transform` |
//! | Close initial pose | `refine_point_to_plane` |
//! | Arbitrary initial pose | `align_meshes` |
//! | Different scales | `align_meshes` with `allow_scaling` |
//! | Non-rigid residual | `deform_mesh` |
//!
//! # Performance Tips
//!
//! - `point_density` drives every later stage; lower it for quick previews
//! - RANSAC stops early once its confidence target is met
//! - A fixed `seed` reproduces RANSAC results for a given worker count

// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod correspondence;
mod cpd;
mod error;
mod fpfh;
mod icp;
mod kabsch;
mod landmark;
mod normals;
mod params;
mod pipeline;
mod point_set;
mod ransac;
mod sampling;
mod spatial;
mod transform;

pub use correspondence::{Correspondence, match_features};
pub use cpd::{CpdParams, CpdResult, DeformableAlignment, deform_mesh, fit_affine_cpd};
pub use error::{RegistrationError, RegistrationResult};
pub use fpfh::{Descriptor, FPFH_BINS, FPFH_DIMENSION, FeatureSet, compute_fpfh, pair_features};
pub use icp::{DEFAULT_NORMAL_ANGLE_DEGREES, IcpParams, IcpResult, refine_point_to_plane};
pub use kabsch::compute_rigid_transform;
pub use landmark::{
    Landmark, LandmarkParams, LandmarkPoint, MIN_LANDMARKS, align_about_pivot, align_by_landmarks,
    translate_onto_landmark,
};
pub use normals::{
    DEFAULT_NORMAL_NEIGHBORS, Neighborhood, NormalEstimationParams, NormalOrientation,
    estimate_normals,
};
pub use params::{AlignmentParameters, SamplingStrategy, VOXELS_PER_DIAGONAL};
pub use pipeline::{RigidAlignment, align_meshes, evaluate_overlap};
pub use point_set::PointSet;
pub use ransac::{
    FitnessScore, HIGH_FITNESS, MAX_SCALING_ATTEMPTS, MIN_SAMPLE_SIZE, RansacEstimate,
    RansacOptions, estimate_transform, score_transform,
};
pub use sampling::{SamplingParams, match_extent, poisson_disk_sample, sample_mesh, voxel_downsample};
pub use spatial::{DescriptorIndex, DescriptorMatch, Neighbor, PointIndex};
pub use transform::{AffineParameters, RigidTransform, TransformKind};

/// Applies a rigid or similarity transform to a mesh, returning a new mesh.
///
/// Normals are rotated; scale does not change their direction.
///
/// # Example
///
/// ```
/// use mesh_registration::{transform_mesh, RigidTransform};
/// use mesh_types::{IndexedMesh, Vertex};
/// use nalgebra::Vector3;
///
/// let mut mesh = IndexedMesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
///
/// let transform = RigidTransform::from_translation(Vector3::new(5.0, 0.0, 0.0));
/// let transformed = transform_mesh(&mesh, &transform);
///
/// assert!((transformed.vertices[0].position.x - 5.0).abs() < 1e-10);
/// ```
#[must_use]
pub fn transform_mesh(
    mesh: &mesh_types::IndexedMesh,
    transform: &RigidTransform,
) -> mesh_types::IndexedMesh {
    let mut result = mesh.clone();
    for v in &mut result.vertices {
        v.position = transform.transform_point(&v.position);
        v.normal = v.normal.map(|n| transform.transform_normal(&n));
    }
    result
}
