//! Keypoint selection
//!
//! Every strategy returns a sorted set of distinct cloud indices at which
//! descriptors are computed.

use crate::nearest_neighbor::KdTree;
use rand::prelude::*;
use rand::seq::index::sample;
use scanreg_core::{Error, NearestNeighborSearch, Point3d, PointCloud, Result, Vector3d};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keypoint selection strategy, chosen once when a pipeline is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeypointStrategy {
    /// Uniform random draw of a fixed fraction of the points
    Random,
    /// Greedy cover: no two keypoints closer than the radius
    Iterative,
    /// One point per voxel of edge `radius`
    Subsampling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointParams {
    pub strategy: KeypointStrategy,
    /// Share of the points drawn by [`KeypointStrategy::Random`]
    pub fraction: f64,
    /// Exclusion radius of the iterative cover, voxel edge of subsampling
    pub radius: f64,
    pub seed: u64,
}

impl Default for KeypointParams {
    fn default() -> Self {
        Self {
            strategy: KeypointStrategy::Random,
            fraction: 0.1,
            radius: 2e-3,
            seed: 0,
        }
    }
}

impl KeypointParams {
    pub fn validate(&self) -> Result<()> {
        match self.strategy {
            KeypointStrategy::Random => {
                if !(self.fraction > 0.0 && self.fraction <= 1.0) {
                    return Err(Error::invalid(format!(
                        "keypoint fraction must be in (0, 1], got {}",
                        self.fraction
                    )));
                }
            }
            KeypointStrategy::Iterative | KeypointStrategy::Subsampling => {
                if !(self.radius.is_finite() && self.radius > 0.0) {
                    return Err(Error::invalid(format!(
                        "keypoint radius must be positive, got {}",
                        self.radius
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Select keypoints of `cloud` with the configured strategy
pub fn select_keypoints(cloud: &PointCloud, params: &KeypointParams) -> Result<Vec<usize>> {
    params.validate()?;
    let selected = match params.strategy {
        KeypointStrategy::Random => select_randomly(cloud.len(), params.fraction, params.seed),
        KeypointStrategy::Iterative => {
            select_iteratively(cloud.points(), params.radius, params.seed)
        }
        KeypointStrategy::Subsampling => select_by_subsampling(cloud.points(), params.radius),
    };
    log::info!(
        "selected {} keypoints out of {} points ({:?})",
        selected.len(),
        cloud.len(),
        params.strategy
    );
    Ok(selected)
}

/// `floor(n * fraction)` distinct indices drawn uniformly
pub fn select_randomly(n: usize, fraction: f64, seed: u64) -> Vec<usize> {
    let count = ((n as f64 * fraction).floor() as usize).min(n);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut indices = sample(&mut rng, n, count).into_vec();
    indices.sort_unstable();
    indices
}

/// Greedy cover of the cloud, visiting points in a seeded random order
///
/// A point is selected when no previously selected point lies within
/// `radius`; its radius neighbors are then marked covered.
pub fn select_iteratively(points: &[Point3d], radius: f64, seed: u64) -> Vec<usize> {
    let tree = KdTree::new(points);
    let mut order: Vec<usize> = (0..points.len()).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));

    let mut covered = vec![false; points.len()];
    let mut selected = Vec::new();
    for i in order {
        if covered[i] {
            continue;
        }
        selected.push(i);
        for (j, _) in tree.find_radius_neighbors(&points[i], radius) {
            covered[j] = true;
        }
    }
    selected.sort_unstable();
    selected
}

/// Voxel grid subsampling keeping, per occupied voxel, the point closest to
/// the centroid of the voxel's points
pub fn select_by_subsampling(points: &[Point3d], voxel_size: f64) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }

    let min = points.iter().fold(points[0], |acc, p| acc.inf(p));
    let voxel_of = |p: &Point3d| -> (i64, i64, i64) {
        let offset = (p - min) / voxel_size;
        (
            offset.x.floor() as i64,
            offset.y.floor() as i64,
            offset.z.floor() as i64,
        )
    };

    let mut voxels: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
    for (idx, point) in points.iter().enumerate() {
        voxels.entry(voxel_of(point)).or_default().push(idx);
    }

    let mut selected: Vec<usize> = voxels
        .values()
        .map(|members| {
            let sum = members
                .iter()
                .fold(Vector3d::zeros(), |acc, &i| acc + points[i].coords);
            let center = Point3d::from(sum / members.len() as f64);
            // Members are in ascending order, so ties keep the lowest index
            let mut best = members[0];
            let mut best_distance = f64::INFINITY;
            for &i in members {
                let d = (points[i] - center).norm_squared();
                if d < best_distance {
                    best = i;
                    best_distance = d;
                }
            }
            best
        })
        .collect();
    selected.sort_unstable();
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{random_cloud, random_points};

    fn is_sorted_unique(indices: &[usize]) -> bool {
        indices.windows(2).all(|w| w[0] < w[1])
    }

    #[test]
    fn test_random_selection() {
        let indices = select_randomly(1000, 0.1, 3);
        assert_eq!(indices.len(), 100);
        assert!(is_sorted_unique(&indices));
        assert!(indices.iter().all(|&i| i < 1000));
        assert_eq!(indices, select_randomly(1000, 0.1, 3));
        assert_eq!(select_randomly(9, 0.1, 3).len(), 0);
    }

    #[test]
    fn test_iterative_keeps_keypoints_apart() {
        let points = random_points(800, 4);
        let radius = 0.1;
        let indices = select_iteratively(&points, radius, 5);
        assert!(is_sorted_unique(&indices));
        for (a, &i) in indices.iter().enumerate() {
            for &j in &indices[a + 1..] {
                assert!((points[i] - points[j]).norm() > radius);
            }
        }
        // every point is covered by some keypoint
        for p in &points {
            assert!(indices.iter().any(|&i| (points[i] - p).norm() <= radius));
        }
    }

    #[test]
    fn test_subsampling_one_point_per_voxel() {
        let points = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(0.4, 0.4, 0.4),
            Point3d::new(0.8, 0.8, 0.8),
            Point3d::new(5.0, 0.0, 0.0),
            Point3d::new(5.1, 0.1, 0.0),
            Point3d::new(5.2, 0.2, 0.0),
        ];
        let indices = select_by_subsampling(&points, 1.0);
        assert_eq!(indices, vec![1, 4]);
    }

    #[test]
    fn test_subsampling_reduces_cloud() {
        let points = random_points(2000, 6);
        let indices = select_by_subsampling(&points, 0.25);
        assert!(is_sorted_unique(&indices));
        assert!(indices.len() <= 64);
        assert!(indices.len() > 32);
    }

    #[test]
    fn test_select_keypoints_validates() {
        let cloud = random_cloud(50, 7);
        let bad = KeypointParams {
            strategy: KeypointStrategy::Subsampling,
            radius: 0.0,
            ..KeypointParams::default()
        };
        assert!(select_keypoints(&cloud, &bad).is_err());
        let bad = KeypointParams {
            fraction: 0.0,
            ..KeypointParams::default()
        };
        assert!(select_keypoints(&cloud, &bad).is_err());
        let ok = KeypointParams {
            fraction: 0.5,
            ..KeypointParams::default()
        };
        assert_eq!(select_keypoints(&cloud, &ok).unwrap().len(), 25);
    }
}
