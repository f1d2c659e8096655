//! Error types for mesh registration operations.

use thiserror::Error;

/// Errors that can occur during mesh registration.
///
/// Convergence shortfalls are not errors: RANSAC and ICP always return
/// their best candidate together with diagnostics.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Source mesh has no vertices.
    #[error("source mesh has no vertices")]
    EmptySourceMesh,

    /// Target mesh has no vertices.
    #[error("target mesh has no vertices")]
    EmptyTargetMesh,

    /// A point set handed to a registration stage is empty.
    #[error("point set is empty")]
    EmptyPointSet,

    /// Points and normals of a point set disagree in length.
    #[error("point set has {points} points but {normals} normals")]
    NormalCountMismatch {
        /// Number of points.
        points: usize,
        /// Number of normals.
        normals: usize,
    },

    /// Input geometry contains NaN or infinite coordinates.
    #[error("input geometry contains non-finite coordinates")]
    NonFiniteCoordinates,

    /// No valid correspondences found between the point sets.
    #[error("no valid correspondences found between point sets")]
    NoCorrespondences,

    /// Not enough correspondences to fit a transform.
    #[error("at least {required} correspondences required, got {provided}")]
    InsufficientCorrespondences {
        /// Number of correspondences required.
        required: usize,
        /// Number of correspondences provided.
        provided: usize,
    },

    /// A correspondence references a point that does not exist.
    #[error("correspondence index {index} out of bounds for point set of {len} points")]
    CorrespondenceOutOfBounds {
        /// The invalid index.
        index: usize,
        /// Length of the indexed point set.
        len: usize,
    },

    /// Not enough landmarks to determine a transform.
    #[error("at least {required} landmarks required, got {provided}")]
    InsufficientLandmarks {
        /// Number of landmarks required.
        required: usize,
        /// Number of landmarks provided.
        provided: usize,
    },

    /// A landmark references a vertex or point that does not exist.
    #[error("landmark index {index} out of bounds for {len} points")]
    LandmarkOutOfBounds {
        /// The invalid index.
        index: usize,
        /// Number of points it indexes into.
        len: usize,
    },

    /// SVD computation failed during transform estimation.
    #[error("SVD computation failed during transform estimation")]
    SvdFailed,

    /// A linear system could not be solved (e.g. planar moving set in CPD).
    #[error("singular system: {0}")]
    SingularSystem(&'static str),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;
