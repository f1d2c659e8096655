//! RANSAC estimation of rigid and similarity transforms from noisy
//! correspondences.
//!
//! Each iteration draws three distinct correspondences, fits a transform
//! in closed form and scores it against every correspondence. The
//! iteration budget is split across rayon workers, each with its own
//! seeded RNG; their local winners are reduced in worker order so a fixed
//! seed gives a fixed result.

use crate::kabsch::fit_pairs;
use crate::{Correspondence, RegistrationError, RegistrationResult, RigidTransform, TransformKind};
use nalgebra::Point3;
use rand::prelude::*;
use rand::seq::index;
use rayon::prelude::*;
use tracing::{debug, info};

/// Correspondences drawn per hypothesis.
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Fitness above which a result counts as converged and rmse breaks ties.
pub const HIGH_FITNESS: f64 = 0.99;

/// Maximum similarity attempts made after the rigid attempt.
pub const MAX_SCALING_ATTEMPTS: usize = 10;

/// Configuration for [`estimate_transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct RansacOptions {
    /// Iterations per attempt, split across workers (default: 100,000).
    pub max_iterations: usize,
    /// A correspondence is an inlier when its residual is below this (default: 1.0).
    pub inlier_distance: f64,
    /// Run similarity attempts after the rigid one (default: false).
    pub allow_scaling: bool,
    /// Reject rigid samples whose source and target edge lengths differ by
    /// more than this ratio (default: 0.9, `None` disables).
    pub edge_length_ratio: Option<f64>,
    /// Stop a worker once this confidence of having drawn an all-inlier
    /// sample is reached (default: 0.99, `None` runs the full budget).
    pub confidence: Option<f64>,
    /// Refit the winner on all of its inliers (default: true).
    pub refine_inliers: bool,
    /// Worker count (default: rayon's thread count).
    pub workers: Option<usize>,
    /// Seed for reproducible results.
    pub seed: Option<u64>,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100_000,
            inlier_distance: 1.0,
            allow_scaling: false,
            edge_length_ratio: Some(0.9),
            confidence: Some(0.99),
            refine_inliers: true,
            workers: None,
            seed: None,
        }
    }
}

impl RansacOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the iteration budget.
    #[must_use]
    pub const fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Sets the inlier distance.
    #[must_use]
    pub const fn with_inlier_distance(mut self, distance: f64) -> Self {
        self.inlier_distance = distance;
        self
    }

    /// Enables or disables the similarity attempts.
    #[must_use]
    pub const fn with_scaling(mut self, allow: bool) -> Self {
        self.allow_scaling = allow;
        self
    }

    /// Sets or disables the edge-length pre-check.
    #[must_use]
    pub const fn with_edge_length_ratio(mut self, ratio: Option<f64>) -> Self {
        self.edge_length_ratio = ratio;
        self
    }

    /// Sets or disables adaptive termination.
    #[must_use]
    pub const fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }

    /// Enables or disables the final inlier refit.
    #[must_use]
    pub const fn with_refine_inliers(mut self, refine: bool) -> Self {
        self.refine_inliers = refine;
        self
    }

    /// Fixes the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set a random seed for reproducibility.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn validate(&self) -> RegistrationResult<()> {
        if self.max_iterations == 0 {
            return Err(RegistrationError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !(self.inlier_distance.is_finite() && self.inlier_distance > 0.0) {
            return Err(RegistrationError::InvalidParameter(format!(
                "inlier_distance must be a positive finite number, got {}",
                self.inlier_distance
            )));
        }
        if let Some(ratio) = self.edge_length_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(RegistrationError::InvalidParameter(format!(
                    "edge_length_ratio must lie in (0, 1], got {ratio}"
                )));
            }
        }
        if let Some(confidence) = self.confidence {
            if !(confidence > 0.0 && confidence < 1.0) {
                return Err(RegistrationError::InvalidParameter(format!(
                    "confidence must lie in (0, 1), got {confidence}"
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(RegistrationError::InvalidParameter(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Consensus score of a transform over a correspondence set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitnessScore {
    /// Fraction of correspondences within the inlier distance, in `[0, 1]`.
    pub fitness: f64,
    /// Mean inlier residual; 0 when there are no inliers.
    pub rmse: f64,
    /// Number of inliers. Zero marks an rmse with no support.
    pub inliers: usize,
}

impl FitnessScore {
    /// The score of a transform nobody agrees with.
    pub const EMPTY: Self = Self {
        fitness: 0.0,
        rmse: 0.0,
        inliers: 0,
    };

    /// Whether `self` should replace `incumbent` as the best candidate.
    ///
    /// Higher fitness always wins. Equal fitness above [`HIGH_FITNESS`] is
    /// decided by lower rmse; below it the incumbent stays.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_registration::FitnessScore;
    ///
    /// let tight = FitnessScore { fitness: 1.0, rmse: 0.1, inliers: 10 };
    /// let loose = FitnessScore { fitness: 1.0, rmse: 0.3, inliers: 10 };
    /// assert!(tight.beats(&loose));
    ///
    /// let low_a = FitnessScore { fitness: 0.5, rmse: 0.1, inliers: 5 };
    /// let low_b = FitnessScore { fitness: 0.5, rmse: 0.3, inliers: 5 };
    /// assert!(!low_a.beats(&low_b));
    /// ```
    #[must_use]
    #[allow(clippy::float_cmp)] // fitness is a ratio of counts over the same total
    pub fn beats(&self, incumbent: &Self) -> bool {
        if self.fitness != incumbent.fitness {
            return self.fitness > incumbent.fitness;
        }
        self.fitness > HIGH_FITNESS && self.rmse < incumbent.rmse
    }
}

/// Result of [`estimate_transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct RansacEstimate {
    /// Best transform found, source to target.
    pub transform: RigidTransform,
    /// Whether a similarity attempt produced the transform.
    pub kind: TransformKind,
    /// Fraction of correspondences that are inliers.
    pub fitness: f64,
    /// Mean inlier residual (0 with no inliers).
    pub rmse: f64,
    /// Number of inlier correspondences.
    pub inlier_count: usize,
    /// Attempts run (rigid plus similarity).
    pub attempts: usize,
    /// Hypotheses drawn over all attempts and workers.
    pub iterations: usize,
}

impl RansacEstimate {
    pub(crate) fn identity(correspondences: usize) -> Self {
        Self {
            transform: RigidTransform::identity(),
            kind: TransformKind::Rigid,
            fitness: 1.0,
            rmse: 0.0,
            inlier_count: correspondences,
            attempts: 0,
            iterations: 0,
        }
    }

    /// Whether the fitness reached [`HIGH_FITNESS`].
    #[must_use]
    pub fn converged(&self) -> bool {
        self.fitness >= HIGH_FITNESS
    }

    fn score(&self) -> FitnessScore {
        FitnessScore {
            fitness: self.fitness,
            rmse: self.rmse,
            inliers: self.inlier_count,
        }
    }
}

/// Estimates the transform taking `source` onto `target` from putative
/// correspondences.
///
/// One rigid attempt runs first. With [`RansacOptions::allow_scaling`], up
/// to [`MAX_SCALING_ATTEMPTS`] similarity attempts follow while the latest
/// attempt's fitness stays below [`HIGH_FITNESS`]; the best result
/// wins and is flagged [`TransformKind::Similarity`] if it came from one of
/// them. Correspondences whose points already coincide short-circuit to
/// the identity.
///
/// # Errors
///
/// Returns an error if:
/// - `correspondences` is empty or has fewer than three entries
/// - A correspondence indexes outside its point set
/// - The options are out of range
///
/// # Example
///
/// ```
/// use mesh_registration::{estimate_transform, Correspondence, RansacOptions, RigidTransform};
/// use nalgebra::{Point3, UnitQuaternion, Vector3};
///
/// let source = vec![
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 2.0, 0.0),
///     Point3::new(0.0, 0.0, 3.0),
/// ];
/// let truth = RigidTransform::new(
///     UnitQuaternion::from_axis_angle(&Vector3::x_axis(), 0.5),
///     Vector3::new(1.0, 1.0, 1.0),
/// );
/// let target = truth.transform_points(&source);
/// let pairs: Vec<_> = (0..4).map(|i| Correspondence::new(i, i)).collect();
///
/// let options = RansacOptions::new().with_inlier_distance(0.01).with_seed(1);
/// let estimate = estimate_transform(&source, &target, &pairs, &options).unwrap();
/// assert_eq!(estimate.fitness, 1.0);
/// ```
pub fn estimate_transform(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    correspondences: &[Correspondence],
    options: &RansacOptions,
) -> RegistrationResult<RansacEstimate> {
    options.validate()?;
    validate_correspondences(source, target, correspondences)?;

    if already_aligned(source, target, correspondences) {
        debug!(
            correspondences = correspondences.len(),
            "Correspondences coincide, returning identity"
        );
        return Ok(RansacEstimate::identity(correspondences.len()));
    }

    let problem = Problem {
        source,
        target,
        correspondences,
        inlier_distance: options.inlier_distance,
    };
    let rigid = run_attempt(&problem, options, false, 0);
    let mut iterations = rigid.drawn;
    let mut best = rigid.into_estimate(&problem, TransformKind::Rigid);
    let mut attempts = 1;
    info!(
        fitness = best.fitness,
        rmse = best.rmse,
        inliers = best.inlier_count,
        "Rigid RANSAC attempt finished"
    );

    if options.allow_scaling {
        let mut latest_fitness = best.fitness;
        let mut scaling_attempts = 0;
        while latest_fitness < HIGH_FITNESS && scaling_attempts < MAX_SCALING_ATTEMPTS {
            let outcome = run_attempt(&problem, options, true, scaling_attempts + 1);
            iterations += outcome.drawn;
            scaling_attempts += 1;
            attempts += 1;

            let candidate = outcome.into_estimate(&problem, TransformKind::Similarity);
            latest_fitness = candidate.fitness;
            info!(
                attempt = scaling_attempts,
                fitness = candidate.fitness,
                rmse = candidate.rmse,
                scale = candidate.transform.scale,
                "Similarity RANSAC attempt finished"
            );
            if candidate.score().beats(&best.score()) {
                best = candidate;
            }
        }
    }

    best.attempts = attempts;
    best.iterations = iterations;
    Ok(best)
}

/// Scores `transform` against every correspondence.
///
/// # Example
///
/// ```
/// use mesh_registration::{score_transform, Correspondence, RigidTransform};
/// use nalgebra::Point3;
///
/// let source = [Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
/// let target = [Point3::new(0.0, 0.0, 0.5), Point3::new(1.0, 0.0, 5.0)];
/// let pairs = [Correspondence::new(0, 0), Correspondence::new(1, 1)];
///
/// let score = score_transform(&RigidTransform::identity(), &source, &target, &pairs, 1.0);
/// assert_eq!(score.inliers, 1);
/// assert_eq!(score.fitness, 0.5);
/// assert_eq!(score.rmse, 0.5);
/// ```
#[must_use]
pub fn score_transform(
    transform: &RigidTransform,
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    correspondences: &[Correspondence],
    inlier_distance: f64,
) -> FitnessScore {
    let mut inliers = 0_usize;
    let mut residual_sum = 0.0;
    for c in correspondences {
        let residual = (transform.transform_point(&source[c.source]) - target[c.target]).norm();
        if residual < inlier_distance {
            inliers += 1;
            residual_sum += residual;
        }
    }
    if inliers == 0 {
        return FitnessScore::EMPTY;
    }

    #[allow(clippy::cast_precision_loss)]
    let score = FitnessScore {
        fitness: inliers as f64 / correspondences.len() as f64,
        rmse: residual_sum / inliers as f64,
        inliers,
    };
    score
}

struct Problem<'a> {
    source: &'a [Point3<f64>],
    target: &'a [Point3<f64>],
    correspondences: &'a [Correspondence],
    inlier_distance: f64,
}

impl Problem<'_> {
    fn pair(&self, k: usize) -> (&Point3<f64>, &Point3<f64>) {
        let c = self.correspondences[k];
        (&self.source[c.source], &self.target[c.target])
    }

    fn score(&self, transform: &RigidTransform) -> FitnessScore {
        score_transform(
            transform,
            self.source,
            self.target,
            self.correspondences,
            self.inlier_distance,
        )
    }

    fn inlier_indices(&self, transform: &RigidTransform) -> Vec<usize> {
        (0..self.correspondences.len())
            .filter(|&k| {
                let (s, t) = self.pair(k);
                (transform.transform_point(s) - t).norm() < self.inlier_distance
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    transform: RigidTransform,
    score: FitnessScore,
}

struct AttemptOutcome {
    best: Option<Candidate>,
    drawn: usize,
}

impl AttemptOutcome {
    /// Falls back to scoring the identity when every hypothesis was rejected.
    fn into_estimate(self, problem: &Problem<'_>, kind: TransformKind) -> RansacEstimate {
        let candidate = self.best.unwrap_or_else(|| {
            let transform = RigidTransform::identity();
            Candidate {
                transform,
                score: problem.score(&transform),
            }
        });
        RansacEstimate {
            transform: candidate.transform,
            kind,
            fitness: candidate.score.fitness,
            rmse: candidate.score.rmse,
            inlier_count: candidate.score.inliers,
            attempts: 1,
            iterations: self.drawn,
        }
    }
}

fn run_attempt(
    problem: &Problem<'_>,
    options: &RansacOptions,
    with_scale: bool,
    attempt: usize,
) -> AttemptOutcome {
    let workers = options
        .workers
        .unwrap_or_else(rayon::current_num_threads)
        .clamp(1, options.max_iterations);
    let base = options.max_iterations / workers;
    let extra = options.max_iterations % workers;
    // Every (attempt, worker) pair gets its own stream.
    let jobs: Vec<(usize, Option<u64>)> = (0..workers)
        .map(|k| {
            let stream = (attempt * workers + k) as u64;
            (
                base + usize::from(k < extra),
                options.seed.map(|seed| seed.wrapping_add(stream)),
            )
        })
        .collect();

    // Scale changes edge lengths, so the rigid edge check does not apply.
    let edge_ratio = if with_scale {
        None
    } else {
        options.edge_length_ratio
    };

    let outcomes: Vec<AttemptOutcome> = jobs
        .par_iter()
        .map(|&(budget, seed)| {
            run_worker(
                problem,
                budget,
                with_scale,
                edge_ratio,
                options.confidence,
                seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64),
            )
        })
        .collect();

    let mut drawn = 0;
    let mut best: Option<Candidate> = None;
    for outcome in outcomes {
        drawn += outcome.drawn;
        if let Some(candidate) = outcome.best {
            if best.is_none_or(|b| candidate.score.beats(&b.score)) {
                best = Some(candidate);
            }
        }
    }

    if options.refine_inliers {
        best = best.map(|b| refine_on_inliers(problem, b, with_scale));
    }

    debug!(
        workers,
        drawn,
        with_scale,
        fitness = best.map_or(0.0, |b| b.score.fitness),
        "RANSAC attempt reduced"
    );
    AttemptOutcome { best, drawn }
}

fn run_worker(
    problem: &Problem<'_>,
    budget: usize,
    with_scale: bool,
    edge_ratio: Option<f64>,
    confidence: Option<f64>,
    mut rng: StdRng,
) -> AttemptOutcome {
    let n = problem.correspondences.len();
    let mut best: Option<Candidate> = None;
    let mut required = budget;
    let mut drawn = 0;

    while drawn < required.min(budget) {
        drawn += 1;
        let picks = index::sample(&mut rng, n, MIN_SAMPLE_SIZE);
        let sample = [picks.index(0), picks.index(1), picks.index(2)];

        if let Some(ratio) = edge_ratio {
            if !edges_agree(problem, &sample, ratio) {
                continue;
            }
        }

        let Ok(transform) = fit_pairs(sample.iter().map(|&k| problem.pair(k)), with_scale) else {
            continue;
        };
        let score = problem.score(&transform);

        if best.is_none_or(|b| score.beats(&b.score)) {
            best = Some(Candidate { transform, score });
            if let Some(confidence) = confidence {
                required = required_iterations(score.fitness, confidence).min(budget);
            }
        }
    }

    AttemptOutcome { best, drawn }
}

/// Every sampled edge must have similar length in source and target.
fn edges_agree(problem: &Problem<'_>, sample: &[usize; MIN_SAMPLE_SIZE], ratio: f64) -> bool {
    for a in 0..MIN_SAMPLE_SIZE {
        for b in a + 1..MIN_SAMPLE_SIZE {
            let (sa, ta) = problem.pair(sample[a]);
            let (sb, tb) = problem.pair(sample[b]);
            let source_len = (sa - sb).norm();
            let target_len = (ta - tb).norm();
            if source_len < ratio * target_len || target_len < ratio * source_len {
                return false;
            }
        }
    }
    true
}

/// Draws needed to see an all-inlier sample with the given confidence.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
fn required_iterations(inlier_ratio: f64, confidence: f64) -> usize {
    let all_inliers = inlier_ratio.powi(MIN_SAMPLE_SIZE as i32);
    if all_inliers >= 1.0 {
        return 0;
    }
    if all_inliers <= 0.0 {
        return usize::MAX;
    }
    let draws = ((1.0 - confidence).ln() / (1.0 - all_inliers).ln()).ceil();
    if draws.is_finite() && draws < usize::MAX as f64 {
        draws as usize
    } else {
        usize::MAX
    }
}

fn refine_on_inliers(problem: &Problem<'_>, candidate: Candidate, with_scale: bool) -> Candidate {
    let inliers = problem.inlier_indices(&candidate.transform);
    if inliers.len() < MIN_SAMPLE_SIZE {
        return candidate;
    }
    let Ok(transform) = fit_pairs(inliers.iter().map(|&k| problem.pair(k)), with_scale) else {
        return candidate;
    };
    let score = problem.score(&transform);

    #[allow(clippy::float_cmp)]
    let keeps_support = score.fitness > candidate.score.fitness
        || (score.fitness == candidate.score.fitness && score.rmse <= candidate.score.rmse);
    if keeps_support {
        Candidate { transform, score }
    } else {
        candidate
    }
}

fn validate_correspondences(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    correspondences: &[Correspondence],
) -> RegistrationResult<()> {
    if correspondences.is_empty() {
        return Err(RegistrationError::NoCorrespondences);
    }
    if correspondences.len() < MIN_SAMPLE_SIZE {
        return Err(RegistrationError::InsufficientCorrespondences {
            required: MIN_SAMPLE_SIZE,
            provided: correspondences.len(),
        });
    }
    for c in correspondences {
        if c.source >= source.len() {
            return Err(RegistrationError::CorrespondenceOutOfBounds {
                index: c.source,
                len: source.len(),
            });
        }
        if c.target >= target.len() {
            return Err(RegistrationError::CorrespondenceOutOfBounds {
                index: c.target,
                len: target.len(),
            });
        }
    }
    Ok(())
}

/// Element-wise closeness with absolute 1e-8 and relative 1e-5 tolerances.
fn already_aligned(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    correspondences: &[Correspondence],
) -> bool {
    correspondences.iter().all(|c| {
        let (s, t) = (&source[c.source], &target[c.target]);
        (0..3).all(|axis| (s[axis] - t[axis]).abs() <= 1e-8 + 1e-5 * t[axis].abs())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};
    use std::f64::consts::FRAC_PI_6;

    fn unit_cube() -> Vec<Point3<f64>> {
        (0..8_u8)
            .map(|i| {
                Point3::new(
                    f64::from(i & 1),
                    f64::from((i >> 1) & 1),
                    f64::from((i >> 2) & 1),
                )
            })
            .collect()
    }

    fn identity_pairs(n: usize) -> Vec<Correspondence> {
        (0..n).map(|i| Correspondence::new(i, i)).collect()
    }

    fn random_cloud(count: usize, seed: u64) -> Vec<Point3<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                )
            })
            .collect()
    }

    #[test]
    fn test_cube_rotated_and_translated() {
        let source = unit_cube();
        let truth = RigidTransform::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_6),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let target = truth.transform_points(&source);

        let options = RansacOptions::new()
            .with_inlier_distance(0.01)
            .with_max_iterations(1000)
            .with_seed(42);
        let estimate = estimate_transform(&source, &target, &identity_pairs(8), &options).unwrap();

        assert_eq!(estimate.fitness, 1.0);
        assert_eq!(estimate.inlier_count, 8);
        assert_eq!(estimate.kind, TransformKind::Rigid);
        assert!(estimate.rmse < 1e-9);
        assert!(estimate.transform.rotation_angle_to(&truth) < 1e-9);
        assert_relative_eq!(estimate.transform.translation, truth.translation, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_correspondences_short_circuit() {
        let cloud = random_cloud(20, 1);
        let estimate =
            estimate_transform(&cloud, &cloud, &identity_pairs(20), &RansacOptions::new()).unwrap();
        assert_eq!(estimate.transform, RigidTransform::identity());
        assert_eq!(estimate.fitness, 1.0);
        assert_eq!(estimate.rmse, 0.0);
        assert_eq!(estimate.iterations, 0);
    }

    #[test]
    fn test_recovers_motion_with_outliers() {
        let source = random_cloud(200, 2);
        let truth = RigidTransform::new(
            UnitQuaternion::from_euler_angles(0.3, -0.5, 1.2),
            Vector3::new(4.0, -3.0, 8.0),
        );
        let mut target = truth.transform_points(&source);
        // Corrupt 40% of the pairs.
        let junk = random_cloud(80, 3);
        for (i, p) in junk.into_iter().enumerate() {
            target[i * 2 + 1] = p;
        }

        let options = RansacOptions::new()
            .with_inlier_distance(0.05)
            .with_max_iterations(5000)
            .with_seed(7);
        let estimate =
            estimate_transform(&source, &target, &identity_pairs(200), &options).unwrap();

        assert_relative_eq!(estimate.fitness, 0.6, epsilon = 1e-12);
        assert!(estimate.transform.rotation_angle_to(&truth) < 1e-6);
        assert_relative_eq!(estimate.transform.translation, truth.translation, epsilon = 1e-6);
    }

    #[test]
    fn test_seed_makes_result_reproducible() {
        let source = random_cloud(60, 4);
        let truth = RigidTransform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let mut target = truth.transform_points(&source);
        for p in target.iter_mut().step_by(3) {
            p.z += 5.0;
        }
        let options = RansacOptions::new()
            .with_inlier_distance(0.1)
            .with_max_iterations(500)
            .with_workers(4)
            .with_seed(99);

        let a = estimate_transform(&source, &target, &identity_pairs(60), &options).unwrap();
        let b = estimate_transform(&source, &target, &identity_pairs(60), &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_scaling_attempts_flag_similarity() {
        let source = random_cloud(50, 5);
        let truth = RigidTransform::with_scale(
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            Vector3::new(0.0, 1.0, 2.0),
            1.3,
        );
        let target = truth.transform_points(&source);
        let options = RansacOptions::new()
            .with_inlier_distance(0.01)
            .with_max_iterations(2000)
            .with_scaling(true)
            .with_seed(3);

        let estimate = estimate_transform(&source, &target, &identity_pairs(50), &options).unwrap();

        assert_eq!(estimate.kind, TransformKind::Similarity);
        assert_eq!(estimate.fitness, 1.0);
        assert_eq!(estimate.attempts, 2);
        assert_relative_eq!(estimate.transform.scale, 1.3, epsilon = 1e-9);
    }

    #[test]
    fn test_scaling_stops_at_high_fitness() {
        let source = random_cloud(100, 8);
        let truth = RigidTransform::new(
            UnitQuaternion::from_euler_angles(-0.4, 0.1, 0.9),
            Vector3::new(2.0, -1.0, 0.5),
        );
        let mut target = truth.transform_points(&source);
        target[17] += Vector3::new(0.0, 0.0, 50.0);
        let options = RansacOptions::new()
            .with_inlier_distance(0.01)
            .with_max_iterations(2000)
            .with_scaling(true)
            .with_seed(11);

        let estimate =
            estimate_transform(&source, &target, &identity_pairs(100), &options).unwrap();

        assert_eq!(estimate.fitness, HIGH_FITNESS);
        assert!(estimate.converged());
        assert_eq!(estimate.attempts, 1);
        assert_eq!(estimate.kind, TransformKind::Rigid);
    }

    #[test]
    fn test_rigid_only_when_scaling_not_requested() {
        let source = random_cloud(50, 6);
        let target = RigidTransform::from_scale(1.3).transform_points(&source);
        let options = RansacOptions::new()
            .with_inlier_distance(0.01)
            .with_max_iterations(200)
            .with_seed(3);

        let estimate = estimate_transform(&source, &target, &identity_pairs(50), &options).unwrap();
        assert_eq!(estimate.kind, TransformKind::Rigid);
        assert_eq!(estimate.transform.scale, 1.0);
        assert_eq!(estimate.attempts, 1);
        assert!(estimate.fitness < HIGH_FITNESS);
    }

    #[test]
    fn test_zero_inliers_reports_sentinel() {
        let source = unit_cube();
        let target: Vec<_> = source.iter().map(|p| p + Vector3::new(100.0, 0.0, 0.0)).collect();
        let score = score_transform(
            &RigidTransform::identity(),
            &source,
            &target,
            &identity_pairs(8),
            0.5,
        );
        assert_eq!(score, FitnessScore::EMPTY);
        assert!(!score.rmse.is_nan());
    }

    #[test]
    fn test_correspondence_errors() {
        let cloud = random_cloud(5, 7);
        let options = RansacOptions::new();
        assert!(matches!(
            estimate_transform(&cloud, &cloud, &[], &options),
            Err(RegistrationError::NoCorrespondences)
        ));
        assert!(matches!(
            estimate_transform(&cloud, &cloud, &identity_pairs(2), &options),
            Err(RegistrationError::InsufficientCorrespondences {
                required: 3,
                provided: 2
            })
        ));
        let bad = [
            Correspondence::new(0, 0),
            Correspondence::new(1, 1),
            Correspondence::new(9, 2),
        ];
        assert!(matches!(
            estimate_transform(&cloud, &cloud, &bad, &options),
            Err(RegistrationError::CorrespondenceOutOfBounds { index: 9, len: 5 })
        ));
    }

    #[test]
    fn test_invalid_options() {
        let cloud = random_cloud(5, 8);
        let pairs = identity_pairs(5);
        for options in [
            RansacOptions::new().with_max_iterations(0),
            RansacOptions::new().with_inlier_distance(-1.0),
            RansacOptions::new().with_edge_length_ratio(Some(1.5)),
            RansacOptions::new().with_confidence(Some(1.0)),
            RansacOptions::new().with_workers(0),
        ] {
            assert!(matches!(
                estimate_transform(&cloud, &cloud, &pairs, &options),
                Err(RegistrationError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_required_iterations() {
        assert_eq!(required_iterations(1.0, 0.99), 0);
        assert_eq!(required_iterations(0.0, 0.99), usize::MAX);
        // w = 0.5: 1 - 0.125 per draw, ln(0.01) / ln(0.875) = 34.5
        assert_eq!(required_iterations(0.5, 0.99), 35);
    }

    #[test]
    fn test_beats_rules() {
        let high = |rmse| FitnessScore {
            fitness: 1.0,
            rmse,
            inliers: 10,
        };
        let low = |fitness, rmse| FitnessScore {
            fitness,
            rmse,
            inliers: 5,
        };
        assert!(high(0.1).beats(&high(0.2)));
        assert!(!high(0.2).beats(&high(0.2)));
        assert!(low(0.6, 9.0).beats(&low(0.5, 0.1)));
        assert!(!low(0.5, 0.1).beats(&low(0.5, 0.2)));
        assert!(low(0.1, 1.0).beats(&FitnessScore::EMPTY));
    }
}
