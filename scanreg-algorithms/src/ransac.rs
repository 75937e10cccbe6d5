//! RANSAC registration over descriptor correspondences
//!
//! Candidate pairs come from nearest-neighbor descriptor matching. Each trial
//! fits a rigid transform to a small random sample of candidates and is
//! scored by the number of source keypoints landing near the reference cloud.

use crate::features::Descriptors;
use crate::matching::basic_matching;
use crate::nearest_neighbor::KdTree;
use crate::registration::{point_to_point_error_with_index, solver_point_to_point};
use rand::prelude::*;
use rand::seq::index::sample;
use rayon::prelude::*;
use scanreg_core::{Error, NearestNeighborSearch, Point3d, Result, RigidTransform};
use serde::{Deserialize, Serialize};

/// Parameters of the RANSAC search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacParams {
    /// Maximum number of trials
    pub n_trials: usize,
    /// Correspondences drawn per trial
    pub sample_size: usize,
    /// Distance to the reference cloud under which a keypoint is an inlier
    pub inlier_threshold: f64,
    /// Fewer inliers than this marks the registration as failed
    pub min_inliers: usize,
    /// Stop early once this fraction of keypoints are inliers
    pub inlier_fraction: f64,
    /// Trials run concurrently between two early-stop checks
    pub batch_size: usize,
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            n_trials: 1000,
            sample_size: 3,
            inlier_threshold: 1e-2,
            min_inliers: 10,
            inlier_fraction: 0.8,
            batch_size: 64,
            seed: 0,
        }
    }
}

impl RansacParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_trials == 0 {
            return Err(Error::invalid("RANSAC needs at least one trial"));
        }
        if self.sample_size < 3 {
            return Err(Error::invalid(format!(
                "RANSAC sample size must be at least 3, got {}",
                self.sample_size
            )));
        }
        if !(self.inlier_threshold.is_finite() && self.inlier_threshold > 0.0) {
            return Err(Error::invalid("RANSAC inlier threshold must be positive"));
        }
        if !(self.inlier_fraction > 0.0 && self.inlier_fraction <= 1.0) {
            return Err(Error::invalid("RANSAC inlier fraction must be in (0, 1]"));
        }
        if self.batch_size == 0 {
            return Err(Error::invalid("RANSAC batch size must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RansacStatus {
    Success,
    /// No trial reached `min_inliers`; the result holds the best effort
    Failed,
}

/// Best transform found by [`ransac_matching`]
#[derive(Debug, Clone)]
pub struct RansacResult {
    /// RMS of the whole source cloud against the reference under `transform`
    pub rms: f64,
    pub transform: RigidTransform,
    /// Number of inlier keypoints of `transform`
    pub inliers: usize,
    /// Number of trials actually run
    pub trials: usize,
    pub status: RansacStatus,
}

impl RansacResult {
    pub fn succeeded(&self) -> bool {
        self.status == RansacStatus::Success
    }
}

struct Trial {
    transform: RigidTransform,
    /// (source keypoint, nearest reference point) of every inlier
    inliers: Vec<(usize, usize)>,
}

fn score(
    transform: &RigidTransform,
    keypoints: &[Point3d],
    index: &KdTree,
    threshold: f64,
) -> Vec<(usize, usize)> {
    keypoints
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let (j, d) = index.find_nearest(&transform.transform_point(p))?;
            (d <= threshold).then_some((i, j))
        })
        .collect()
}

fn run_trial(
    trial: usize,
    pairs: &[(Point3d, Point3d)],
    keypoints: &[Point3d],
    index: &KdTree,
    params: &RansacParams,
) -> Option<Trial> {
    let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(trial as u64));
    let (scan, reference): (Vec<Point3d>, Vec<Point3d>) =
        sample(&mut rng, pairs.len(), params.sample_size)
            .into_iter()
            .map(|i| pairs[i])
            .unzip();

    // Degenerate samples are skipped
    let transform = solver_point_to_point(&scan, &reference).ok()?;
    let inliers = score(&transform, keypoints, index, params.inlier_threshold);
    Some(Trial { transform, inliers })
}

/// Robust rigid registration of `points` onto `reference_points`
///
/// `descriptors[i]` describes `keypoints[i]` and `reference_descriptors[j]`
/// describes `reference_keypoints[j]`. Trials run in parallel batches; after
/// each batch the search stops if the best trial already explains
/// `inlier_fraction` of the keypoints. Equal scores keep the earliest trial.
/// The winner is refit on all its inliers unless that loses inliers.
///
/// Failing to reach `min_inliers` is reported through
/// [`RansacStatus::Failed`], not as an error.
pub fn ransac_matching(
    descriptors: &Descriptors,
    points: &[Point3d],
    keypoints: &[Point3d],
    reference_descriptors: &Descriptors,
    reference_points: &[Point3d],
    reference_keypoints: &[Point3d],
    params: &RansacParams,
) -> Result<RansacResult> {
    params.validate()?;
    if descriptors.len() != keypoints.len()
        || reference_descriptors.len() != reference_keypoints.len()
    {
        return Err(Error::invalid(format!(
            "descriptor/keypoint count mismatch: {}/{} source, {}/{} reference",
            descriptors.len(),
            keypoints.len(),
            reference_descriptors.len(),
            reference_keypoints.len()
        )));
    }
    if reference_points.is_empty() {
        return Err(Error::invalid("reference point set is empty"));
    }
    let index = KdTree::new(reference_points);

    if keypoints.len() < params.sample_size || reference_keypoints.is_empty() {
        log::warn!(
            "RANSAC failed: {} keypoints cannot fill a sample of {}",
            keypoints.len(),
            params.sample_size
        );
        let transform = RigidTransform::identity();
        let (rms, _) = point_to_point_error_with_index(points, &index, &transform);
        return Ok(RansacResult {
            rms,
            transform,
            inliers: 0,
            trials: 0,
            status: RansacStatus::Failed,
        });
    }

    let candidates = basic_matching(descriptors, reference_descriptors)?;
    let pairs: Vec<(Point3d, Point3d)> = keypoints
        .iter()
        .zip(candidates.iter())
        .map(|(p, &j)| (*p, reference_keypoints[j]))
        .collect();
    let target = params.inlier_fraction * keypoints.len() as f64;

    let mut best: Option<Trial> = None;
    let mut trials = 0;
    while trials < params.n_trials {
        let end = (trials + params.batch_size).min(params.n_trials);
        let batch: Vec<Option<Trial>> = (trials..end)
            .into_par_iter()
            .map(|t| run_trial(t, &pairs, keypoints, &index, params))
            .collect();
        trials = end;

        for trial in batch.into_iter().flatten() {
            let better = best
                .as_ref()
                .map_or(true, |b| trial.inliers.len() > b.inliers.len());
            if better {
                best = Some(trial);
            }
        }

        let best_count = best.as_ref().map_or(0, |b| b.inliers.len());
        log::debug!("RANSAC: {} trials, best {} inliers", trials, best_count);
        if best_count as f64 >= target {
            break;
        }
    }

    let (transform, inliers) = match best {
        Some(trial) => refine(trial, keypoints, reference_points, &index, params),
        None => {
            log::warn!("RANSAC: every sample was degenerate");
            (RigidTransform::identity(), 0)
        }
    };

    let (rms, _) = point_to_point_error_with_index(points, &index, &transform);
    let status = if inliers >= params.min_inliers && inliers > 0 {
        RansacStatus::Success
    } else {
        log::warn!(
            "RANSAC failed: best transform has {} inliers, {} required",
            inliers,
            params.min_inliers
        );
        RansacStatus::Failed
    };

    log::info!(
        "RANSAC: {} inliers of {} keypoints after {} trials, rms {:.6e}",
        inliers,
        keypoints.len(),
        trials,
        rms
    );

    Ok(RansacResult {
        rms,
        transform,
        inliers,
        trials,
        status,
    })
}

/// Refit the best trial on its inlier pairs
fn refine(
    trial: Trial,
    keypoints: &[Point3d],
    reference_points: &[Point3d],
    index: &KdTree,
    params: &RansacParams,
) -> (RigidTransform, usize) {
    let count = trial.inliers.len();
    let (scan, reference): (Vec<Point3d>, Vec<Point3d>) = trial
        .inliers
        .iter()
        .map(|&(i, j)| (keypoints[i], reference_points[j]))
        .unzip();

    match solver_point_to_point(&scan, &reference) {
        Ok(refit) => {
            let refit_count = score(&refit, keypoints, index, params.inlier_threshold).len();
            if refit_count >= count {
                (refit, refit_count)
            } else {
                (trial.transform, count)
            }
        }
        Err(_) => (trial.transform, count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DescriptorKind;
    use crate::test_utils::{random_points, sample_transform};
    use scanreg_core::Vector3d;

    /// Source keypoints, their moved copies plus outliers, and descriptors
    /// that identify the true pairs except for a corrupted share
    fn scenario(seed: u64) -> (Vec<Point3d>, Vec<Point3d>, Descriptors, Descriptors) {
        let mut rng = StdRng::seed_from_u64(seed);
        let source = random_points(200, seed);
        let mut reference = sample_transform().transform_points(&source);
        let offset = Vector3d::new(0.4, -1.2, 2.5);
        reference.extend(random_points(30, seed + 1000).iter().map(|p| p + offset));

        let mut rows: Vec<Vec<f64>> = (0..reference.len())
            .map(|_| (0..12).map(|_| rng.gen::<f64>()).collect())
            .collect();
        let reference_descriptors = Descriptors::from_rows(DescriptorKind::Fpfh, rows.clone()).unwrap();
        rows.truncate(source.len());
        for row in rows.iter_mut().take(40) {
            row.iter_mut().for_each(|v| *v = rng.gen());
        }
        let descriptors = Descriptors::from_rows(DescriptorKind::Fpfh, rows).unwrap();
        (source, reference, descriptors, reference_descriptors)
    }

    #[test]
    fn test_recovers_transform_with_outliers() {
        let (source, reference, d, d_ref) = scenario(1);
        let result = ransac_matching(
            &d,
            &source,
            &source,
            &d_ref,
            &reference,
            &reference,
            &RansacParams::default(),
        )
        .unwrap();

        assert!(result.succeeded());
        let truth = sample_transform();
        assert!(result.transform.rotation_error_degrees(&truth) < 1.0);
        assert!(result.transform.translation_error(&truth) < 1e-2);
        assert_eq!(result.inliers, 200);
        // every keypoint is an inlier, so the first batch suffices
        assert_eq!(result.trials, 64);
        assert!(result.rms < 1e-9);
    }

    #[test]
    fn test_same_seed_same_result() {
        let (source, reference, d, d_ref) = scenario(2);
        let params = RansacParams {
            seed: 42,
            ..RansacParams::default()
        };
        let a = ransac_matching(&d, &source, &source, &d_ref, &reference, &reference, &params).unwrap();
        let b = ransac_matching(&d, &source, &source, &d_ref, &reference, &reference, &params).unwrap();
        assert_eq!(a.transform, b.transform);
        assert_eq!(a.inliers, b.inliers);
    }

    #[test]
    fn test_unrelated_clouds_fail() {
        let source = random_points(50, 3);
        let reference: Vec<Point3d> = random_points(50, 4)
            .iter()
            .map(|p| p * 100.0)
            .collect();
        let mut rng = StdRng::seed_from_u64(5);
        let mut rows = |n: usize| -> Vec<Vec<f64>> {
            (0..n).map(|_| (0..4).map(|_| rng.gen::<f64>()).collect()).collect()
        };
        let d = Descriptors::from_rows(DescriptorKind::Shot, rows(50)).unwrap();
        let d_ref = Descriptors::from_rows(DescriptorKind::Shot, rows(50)).unwrap();

        let params = RansacParams {
            n_trials: 100,
            min_inliers: 40,
            inlier_threshold: 1e-3,
            ..RansacParams::default()
        };
        let result = ransac_matching(&d, &source, &source, &d_ref, &reference, &reference, &params).unwrap();
        assert_eq!(result.status, RansacStatus::Failed);
        assert_eq!(result.trials, 100);
        assert!(result.rms.is_finite());
    }

    #[test]
    fn test_too_few_keypoints_fail_without_error() {
        let (source, reference, d, d_ref) = scenario(7);
        let rows = d.rows().take(2).map(|r| r.to_vec()).collect();
        let few = Descriptors::from_rows(DescriptorKind::Fpfh, rows).unwrap();
        let result = ransac_matching(
            &few,
            &source,
            &source[..2],
            &d_ref,
            &reference,
            &reference,
            &RansacParams::default(),
        )
        .unwrap();
        assert_eq!(result.status, RansacStatus::Failed);
        assert_eq!(result.transform, RigidTransform::identity());
        assert_eq!(result.inliers, 0);
        assert_eq!(result.trials, 0);
        assert!(result.rms.is_finite());
    }

    #[test]
    fn test_invalid_input() {
        let (source, reference, d, d_ref) = scenario(6);
        let bad = RansacParams {
            sample_size: 2,
            ..RansacParams::default()
        };
        assert!(ransac_matching(&d, &source, &source, &d_ref, &reference, &reference, &bad).is_err());
        let default = RansacParams::default();
        assert!(
            ransac_matching(&d, &source, &source[..10], &d_ref, &reference, &reference, &default)
                .is_err()
        );
        let bad = RansacParams {
            inlier_fraction: 1.5,
            ..RansacParams::default()
        };
        assert!(bad.validate().is_err());
    }
}
