//! Descriptor matching
//!
//! Correspondences are searched in descriptor space by Euclidean distance.
//! The search is exhaustive over the reference rows and parallel over the
//! query rows; equal distances resolve to the lowest reference index.

use crate::features::Descriptors;
use rayon::prelude::*;
use scanreg_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Matching algorithm, chosen once when a pipeline is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchingStrategy {
    /// Nearest reference descriptor for every query, no rejection
    Simple,
    /// Mutual nearest neighbors passing a distance-ratio test
    Double,
    /// Robust transform search over nearest-neighbor candidates
    Ransac,
}

/// A claimed pairing between a source keypoint and a reference keypoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub source: usize,
    pub target: usize,
    /// Descriptor-space distance of the pair
    pub distance: f64,
}

/// Nearest and second-nearest reference rows for one query row
#[derive(Debug, Clone, Copy)]
struct NearestPair {
    index: usize,
    distance_squared: f64,
    second_distance_squared: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn check_compatible(descriptors: &Descriptors, reference: &Descriptors) -> Result<()> {
    if descriptors.dimension() != reference.dimension() {
        return Err(Error::invalid(format!(
            "descriptor dimensions differ: {} vs {}",
            descriptors.dimension(),
            reference.dimension()
        )));
    }
    if reference.is_empty() {
        return Err(Error::invalid("reference descriptor set is empty"));
    }
    Ok(())
}

fn nearest_pairs(descriptors: &Descriptors, reference: &Descriptors) -> Vec<NearestPair> {
    let queries: Vec<&[f64]> = descriptors.rows().collect();
    queries
        .par_iter()
        .map(|query| {
            let mut best = NearestPair {
                index: 0,
                distance_squared: f64::INFINITY,
                second_distance_squared: f64::INFINITY,
            };
            for (j, candidate) in reference.rows().enumerate() {
                let d = squared_distance(query, candidate);
                if d < best.distance_squared {
                    best.second_distance_squared = best.distance_squared;
                    best.distance_squared = d;
                    best.index = j;
                } else if d < best.second_distance_squared {
                    best.second_distance_squared = d;
                }
            }
            best
        })
        .collect()
}

/// For every descriptor, the index of its nearest reference descriptor
///
/// The returned vector has one entry per row of `descriptors`.
pub fn basic_matching(descriptors: &Descriptors, reference: &Descriptors) -> Result<Vec<usize>> {
    check_compatible(descriptors, reference)?;
    Ok(nearest_pairs(descriptors, reference)
        .into_iter()
        .map(|pair| pair.index)
        .collect())
}

/// Nearest-neighbor correspondences with their descriptor distances
pub fn basic_correspondences(
    descriptors: &Descriptors,
    reference: &Descriptors,
) -> Result<Vec<Correspondence>> {
    check_compatible(descriptors, reference)?;
    Ok(nearest_pairs(descriptors, reference)
        .into_iter()
        .enumerate()
        .map(|(source, pair)| Correspondence {
            source,
            target: pair.index,
            distance: pair.distance_squared.sqrt(),
        })
        .collect())
}

/// Mutually nearest correspondences passing the ratio test
///
/// A pair `(i, j)` is kept when `j` is the nearest reference descriptor of
/// `i`, `i` is the nearest descriptor of `j`, and
/// `nearest / second_nearest < reject_threshold` on the forward distances.
pub fn double_correspondences(
    descriptors: &Descriptors,
    reference: &Descriptors,
    reject_threshold: f64,
) -> Result<Vec<Correspondence>> {
    if !(reject_threshold.is_finite() && reject_threshold > 0.0) {
        return Err(Error::invalid(format!(
            "reject threshold must be positive, got {}",
            reject_threshold
        )));
    }
    check_compatible(descriptors, reference)?;
    check_compatible(reference, descriptors)?;

    let forward = nearest_pairs(descriptors, reference);
    let backward = nearest_pairs(reference, descriptors);

    let matches: Vec<Correspondence> = forward
        .iter()
        .enumerate()
        .filter(|(i, pair)| backward[pair.index].index == *i)
        .filter(|(_, pair)| {
            if pair.second_distance_squared.is_infinite() {
                // A single reference descriptor has no competitor
                return true;
            }
            if pair.second_distance_squared == 0.0 {
                return false;
            }
            let ratio = (pair.distance_squared / pair.second_distance_squared).sqrt();
            ratio < reject_threshold
        })
        .map(|(i, pair)| Correspondence {
            source: i,
            target: pair.index,
            distance: pair.distance_squared.sqrt(),
        })
        .collect();

    log::debug!(
        "double matching kept {} of {} candidates (threshold {})",
        matches.len(),
        forward.len(),
        reject_threshold
    );
    Ok(matches)
}

/// Mutually nearest matches as two aligned index arrays
///
/// `source[i]` is matched with `target[i]`; both arrays have the same
/// length, never larger than the smaller descriptor set.
pub fn double_matching_with_rejects(
    descriptors: &Descriptors,
    reference: &Descriptors,
    reject_threshold: f64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let matches = double_correspondences(descriptors, reference, reject_threshold)?;
    Ok(matches.iter().map(|c| (c.source, c.target)).unzip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DescriptorKind;
    use rand::prelude::*;

    fn random_descriptors(n: usize, dim: usize, seed: u64) -> Descriptors {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = (0..n)
            .map(|_| (0..dim).map(|_| rng.gen::<f64>()).collect())
            .collect();
        Descriptors::from_rows(DescriptorKind::Fpfh, rows).unwrap()
    }

    #[test]
    fn test_basic_matching_self_is_identity() {
        let d = random_descriptors(60, 16, 1);
        let matches = basic_matching(&d, &d).unwrap();
        assert_eq!(matches, (0..60).collect::<Vec<_>>());
    }

    #[test]
    fn test_basic_matching_every_query_matched() {
        let d = random_descriptors(30, 8, 2);
        let r = random_descriptors(10, 8, 3);
        let matches = basic_matching(&d, &r).unwrap();
        assert_eq!(matches.len(), 30);
        assert!(matches.iter().all(|&j| j < 10));
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let d = Descriptors::from_rows(DescriptorKind::Shot, vec![vec![0.0, 0.0]]).unwrap();
        let r = Descriptors::from_rows(
            DescriptorKind::Shot,
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]],
        )
        .unwrap();
        assert_eq!(basic_matching(&d, &r).unwrap(), vec![0]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let d = random_descriptors(5, 8, 4);
        let r = random_descriptors(5, 9, 5);
        assert!(matches!(basic_matching(&d, &r), Err(Error::InvalidParameter(_))));
        assert!(double_matching_with_rejects(&d, &r, 0.8).is_err());
    }

    #[test]
    fn test_double_matching_properties() {
        let d = random_descriptors(80, 6, 6);
        let r = random_descriptors(50, 6, 7);
        let (src, tgt) = double_matching_with_rejects(&d, &r, 0.95).unwrap();
        assert_eq!(src.len(), tgt.len());
        assert!(src.len() <= 50);

        let forward = basic_matching(&d, &r).unwrap();
        let backward = basic_matching(&r, &d).unwrap();
        for (&i, &j) in src.iter().zip(tgt.iter()) {
            assert_eq!(forward[i], j);
            assert_eq!(backward[j], i);
        }
    }

    #[test]
    fn test_double_matching_on_self_keeps_all() {
        let d = random_descriptors(40, 10, 8);
        let (src, tgt) = double_matching_with_rejects(&d, &d, 0.8).unwrap();
        assert_eq!(src, (0..40).collect::<Vec<_>>());
        assert_eq!(src, tgt);
    }

    #[test]
    fn test_ratio_test_rejects_ambiguous() {
        let d = Descriptors::from_rows(DescriptorKind::Fpfh, vec![vec![0.0]]).unwrap();
        let r = Descriptors::from_rows(DescriptorKind::Fpfh, vec![vec![1.0], vec![1.1]]).unwrap();
        let (src, _) = double_matching_with_rejects(&d, &r, 0.8).unwrap();
        assert!(src.is_empty());
        let (src, _) = double_matching_with_rejects(&d, &r, 0.95).unwrap();
        assert_eq!(src, vec![0]);
    }
}
