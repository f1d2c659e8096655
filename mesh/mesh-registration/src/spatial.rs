//! Nearest-neighbor search over 3D points and descriptor vectors.
//!
//! [`PointIndex`] wraps a kiddo k-d tree for positions. Descriptor space
//! uses [`DescriptorIndex`], an exhaustive scan: FPFH histograms have many
//! exactly-zero bins, and a k-d tree bucket cannot split a run of equal
//! values along an axis.
//!
//! The same bucket limit applies to positions. Plates, plane cuts and CAD
//! faces put hundreds of points on one coordinate, so [`PointIndex`] stores
//! them in a fixed frame rotated off the world axes and collapses exact
//! duplicates into a single tree entry. Reported distances are always
//! measured on the original points.

use crate::{RegistrationError, RegistrationResult};
use hashbrown::HashMap;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point3, UnitQuaternion};

/// Relative gap under which two descriptor distances count as tied.
const TIE_TOLERANCE: f64 = 1e-12;

/// Relative slack on radius queries in the rotated frame. Hits are
/// re-filtered against the exact radius afterwards.
const RADIUS_SLACK: f64 = 1e-9;

/// A neighbor returned by [`PointIndex`] queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the indexed point slice.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f64,
}

/// A k-d tree over a fixed set of 3D points.
///
/// Any finite input can be indexed, including exactly planar, axis-aligned
/// grids and repeated positions.
///
/// # Example
///
/// ```
/// use mesh_registration::PointIndex;
/// use nalgebra::Point3;
///
/// let points = [
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.1, 0.2),
///     Point3::new(5.0, 5.2, 4.9),
/// ];
/// let index = PointIndex::new(&points).unwrap();
///
/// let nearest = index.nearest(&Point3::new(4.0, 4.0, 4.0));
/// assert_eq!(nearest.index, 2);
/// assert_eq!(index.within_radius(&Point3::origin(), 1.5, None).len(), 2);
/// ```
pub struct PointIndex {
    tree: KdTree<f64, 3>,
    points: Vec<Point3<f64>>,
    frame: UnitQuaternion<f64>,
    /// Point indices grouped by distinct position, ascending within a group.
    members: Vec<usize>,
    /// `members[offsets[g]..offsets[g + 1]]` holds group `g`.
    offsets: Vec<usize>,
}

impl std::fmt::Debug for PointIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointIndex")
            .field("len", &self.points.len())
            .field("distinct", &self.group_count())
            .finish()
    }
}

impl PointIndex {
    /// Builds an index over `points`. Neighbor indices refer to this slice.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::EmptyPointSet`] for an empty slice and
    /// [`RegistrationError::NonFiniteCoordinates`] if any coordinate is NaN
    /// or infinite.
    pub fn new(points: &[Point3<f64>]) -> RegistrationResult<Self> {
        if points.is_empty() {
            return Err(RegistrationError::EmptyPointSet);
        }
        if points.iter().any(|p| !p.iter().all(|c| c.is_finite())) {
            return Err(RegistrationError::NonFiniteCoordinates);
        }

        let (group_of, group_count) = group_positions(points);

        let mut offsets = vec![0_usize; group_count + 1];
        for &g in &group_of {
            offsets[g + 1] += 1;
        }
        for g in 0..group_count {
            offsets[g + 1] += offsets[g];
        }
        let mut cursor = offsets.clone();
        let mut members = vec![0_usize; points.len()];
        for (i, &g) in group_of.iter().enumerate() {
            members[cursor[g]] = i;
            cursor[g] += 1;
        }

        let frame = index_frame();
        let mut tree: KdTree<f64, 3> = KdTree::with_capacity(group_count);
        for g in 0..group_count {
            let p = frame * points[members[offsets[g]]];
            tree.add(&[p.x, p.y, p.z], g as u64);
        }

        Ok(Self {
            tree,
            points: points.to_vec(),
            frame,
            members,
            offsets,
        })
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false: construction rejects empty input.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The indexed points, in input order.
    #[must_use]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// The closest indexed point (lowest index among duplicates).
    #[must_use]
    pub fn nearest(&self, query: &Point3<f64>) -> Neighbor {
        let hit = self.tree.nearest_one::<SquaredEuclidean>(&self.key(query));
        let index = self.group(hit.item)[0];
        Neighbor {
            index,
            distance: (self.points[index] - query).norm(),
        }
    }

    /// The `k` closest points, nearest first (fewer if the index is smaller).
    #[must_use]
    pub fn k_nearest(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        // Every group holds at least one point, so k groups cover k points.
        let hits = self
            .tree
            .nearest_n::<SquaredEuclidean>(&self.key(query), k.min(self.group_count()));
        let mut neighbors = self.expand(query, hits.into_iter().map(|h| h.item));
        neighbors.truncate(k);
        neighbors
    }

    /// All points within `radius` (inclusive), nearest first, optionally
    /// truncated to the `max_count` closest.
    #[must_use]
    pub fn within_radius(
        &self,
        query: &Point3<f64>,
        radius: f64,
        max_count: Option<usize>,
    ) -> Vec<Neighbor> {
        let padded = radius * (1.0 + RADIUS_SLACK) + f64::EPSILON;
        let hits = self
            .tree
            .within_unsorted::<SquaredEuclidean>(&self.key(query), padded * padded);
        let mut neighbors = self.expand(query, hits.into_iter().map(|h| h.item));
        neighbors.retain(|n| n.distance <= radius);
        if let Some(max) = max_count {
            neighbors.truncate(max);
        }
        neighbors
    }

    fn key(&self, p: &Point3<f64>) -> [f64; 3] {
        let r = self.frame * p;
        [r.x, r.y, r.z]
    }

    fn group_count(&self) -> usize {
        self.offsets.len() - 1
    }

    #[allow(clippy::cast_possible_truncation)]
    fn group(&self, item: u64) -> &[usize] {
        let g = item as usize;
        &self.members[self.offsets[g]..self.offsets[g + 1]]
    }

    fn expand(&self, query: &Point3<f64>, groups: impl Iterator<Item = u64>) -> Vec<Neighbor> {
        sorted(groups.flat_map(|g| {
            self.group(g).iter().map(|&index| Neighbor {
                index,
                distance: (self.points[index] - query).norm(),
            })
        }))
    }
}

/// Rotation applied to every indexed point. The angles are arbitrary; they
/// only need to keep world-axis planes off the tree's split axes.
fn index_frame() -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(0.613, -0.371, 1.127)
}

/// Assigns each point a group id shared with every exact duplicate.
fn group_positions(points: &[Point3<f64>]) -> (Vec<usize>, usize) {
    let mut groups: HashMap<[u64; 3], usize> = HashMap::with_capacity(points.len());
    let group_of = points
        .iter()
        .map(|p| {
            // Adding zero folds -0.0 onto 0.0 so both hash alike.
            let bits = [(p.x + 0.0).to_bits(), (p.y + 0.0).to_bits(), (p.z + 0.0).to_bits()];
            let next = groups.len();
            *groups.entry(bits).or_insert(next)
        })
        .collect();
    (group_of, groups.len())
}

/// Orders by distance, then index, so equal distances resolve the same way every run.
fn sorted(neighbors: impl Iterator<Item = Neighbor>) -> Vec<Neighbor> {
    let mut neighbors: Vec<Neighbor> = neighbors.collect();
    neighbors.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.index.cmp(&b.index))
    });
    neighbors
}

/// Result of a descriptor-space nearest-neighbor query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    /// Index of the closest descriptor (lowest index among ties).
    pub index: usize,
    /// Squared Euclidean distance to it.
    pub distance_sq: f64,
    /// Another descriptor lies at the same distance.
    pub ambiguous: bool,
}

/// Exhaustive nearest-neighbor search over fixed-length descriptors.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorIndex<'a, const D: usize> {
    descriptors: &'a [[f64; D]],
}

impl<'a, const D: usize> DescriptorIndex<'a, D> {
    /// Wraps a descriptor slice.
    #[must_use]
    pub const fn new(descriptors: &'a [[f64; D]]) -> Self {
        Self { descriptors }
    }

    /// Number of indexed descriptors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True when there is nothing to search.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Closest descriptor to `query`, or `None` for an empty index.
    #[must_use]
    pub fn nearest(&self, query: &[f64; D]) -> Option<DescriptorMatch> {
        let mut best: Option<(usize, f64)> = None;
        let mut runner_up = f64::INFINITY;

        for (i, candidate) in self.descriptors.iter().enumerate() {
            let d = squared_distance(query, candidate);
            match best {
                Some((_, best_d)) if d >= best_d => runner_up = runner_up.min(d),
                Some((_, best_d)) => {
                    runner_up = best_d;
                    best = Some((i, d));
                }
                None => best = Some((i, d)),
            }
        }

        best.map(|(index, distance_sq)| DescriptorMatch {
            index,
            distance_sq,
            ambiguous: runner_up - distance_sq <= TIE_TOLERANCE * distance_sq.max(1.0),
        })
    }
}

fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
