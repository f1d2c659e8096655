//! Descriptor-space correspondence search.

use crate::spatial::{DescriptorIndex, DescriptorMatch};
use crate::FeatureSet;
use rayon::prelude::*;
use tracing::debug;

/// A pair of indices asserting that `source` and `target` denote the same
/// physical location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Correspondence {
    /// Index into the source point set.
    pub source: usize,
    /// Index into the target point set.
    pub target: usize,
}

impl Correspondence {
    /// Creates a correspondence.
    #[must_use]
    pub const fn new(source: usize, target: usize) -> Self {
        Self { source, target }
    }
}

/// Pairs each source descriptor with its nearest target descriptor.
///
/// With `mutual`, a pair `(i, j)` survives only if `i` is also the nearest
/// source descriptor of `j`, and neither lookup was tied between two
/// equally close candidates. Without it every source descriptor yields a
/// pair, ties resolved toward the lower index.
///
/// Output is ordered by source index.
///
/// # Example
///
/// ```
/// use mesh_registration::{match_features, Correspondence, FeatureSet, FPFH_DIMENSION};
///
/// let mut a = [0.0; FPFH_DIMENSION];
/// let mut b = [0.0; FPFH_DIMENSION];
/// a[0] = 100.0;
/// b[1] = 100.0;
///
/// let source = FeatureSet::new(vec![a, b]);
/// let target = FeatureSet::new(vec![b, a]);
///
/// let pairs = match_features(&source, &target, true);
/// assert_eq!(pairs, vec![Correspondence::new(0, 1), Correspondence::new(1, 0)]);
/// ```
#[must_use]
pub fn match_features(source: &FeatureSet, target: &FeatureSet, mutual: bool) -> Vec<Correspondence> {
    let target_index = DescriptorIndex::new(target.descriptors());
    let forward: Vec<Option<DescriptorMatch>> = source
        .descriptors()
        .par_iter()
        .map(|d| target_index.nearest(d))
        .collect();

    let correspondences: Vec<Correspondence> = if mutual {
        let source_index = DescriptorIndex::new(source.descriptors());
        let backward: Vec<Option<DescriptorMatch>> = target
            .descriptors()
            .par_iter()
            .map(|d| source_index.nearest(d))
            .collect();

        forward
            .iter()
            .enumerate()
            .filter_map(|(i, hit)| {
                let hit = (*hit)?;
                let back = backward[hit.index]?;
                (!hit.ambiguous && !back.ambiguous && back.index == i)
                    .then_some(Correspondence::new(i, hit.index))
            })
            .collect()
    } else {
        forward
            .iter()
            .enumerate()
            .filter_map(|(i, hit)| hit.map(|h| Correspondence::new(i, h.index)))
            .collect()
    };

    debug!(
        source = source.len(),
        target = target.len(),
        mutual,
        matched = correspondences.len(),
        "Matched descriptors"
    );
    correspondences
}
