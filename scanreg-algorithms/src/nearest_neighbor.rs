//! Nearest neighbor search implementations

use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use scanreg_core::{sort_neighbors, to_array, NearestNeighborSearch, Point3d};
use std::num::NonZero;

type Tree = ImmutableKdTree<f64, u32, 3, 32>;

/// KD-Tree implementation for nearest neighbor search
///
/// Built once from a static point set with kiddo's balanced immutable
/// layout, which accepts any number of points sharing an axis value
/// (flat scans put every point on the same z).
#[derive(Debug, Clone)]
pub struct KdTree {
    tree: Tree,
    num_points: usize,
}

impl KdTree {
    pub fn new(points: &[Point3d]) -> Self {
        let coords: Vec<[f64; 3]> = points.iter().map(to_array).collect();
        Self {
            tree: ImmutableKdTree::new_from_slice(&coords),
            num_points: points.len(),
        }
    }
}

fn is_finite(query: &Point3d) -> bool {
    query.iter().all(|v| v.is_finite())
}

impl NearestNeighborSearch for KdTree {
    fn len(&self) -> usize {
        self.num_points
    }

    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        if k == 0 || self.num_points == 0 || !is_finite(query) {
            return Vec::new();
        }

        let Some(k) = NonZero::new(k.min(self.num_points)) else {
            return Vec::new();
        };
        let mut neighbors: Vec<(usize, f64)> = self
            .tree
            .nearest_n::<SquaredEuclidean>(&to_array(query), k)
            .into_iter()
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect();

        sort_neighbors(&mut neighbors);
        neighbors
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        if self.num_points == 0 || !radius.is_finite() || radius <= 0.0 || !is_finite(query) {
            return Vec::new();
        }

        let radius_squared = radius * radius;
        // The tree compares with a strict `<`; widen slightly and filter so
        // points exactly on the sphere are kept.
        let widened = radius_squared + f64::EPSILON * radius_squared.max(1.0);

        let mut neighbors: Vec<(usize, f64)> = self
            .tree
            .within_unsorted::<SquaredEuclidean>(&to_array(query), widened)
            .into_iter()
            .filter(|nn| nn.distance <= radius_squared)
            .map(|nn| (nn.item as usize, nn.distance.sqrt()))
            .collect();

        sort_neighbors(&mut neighbors);
        neighbors
    }
}

/// Simple brute force nearest neighbor search for small datasets
pub struct BruteForceSearch {
    points: Vec<Point3d>,
}

impl BruteForceSearch {
    pub fn new(points: &[Point3d]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }

    fn distances(&self, query: &Point3d) -> impl Iterator<Item = (usize, f64)> + '_ {
        let query = *query;
        self.points
            .iter()
            .enumerate()
            .map(move |(idx, point)| (idx, (point - query).norm()))
    }
}

impl NearestNeighborSearch for BruteForceSearch {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)> {
        if k == 0 || !is_finite(query) {
            return Vec::new();
        }

        let mut distances: Vec<(usize, f64)> = self.distances(query).collect();
        sort_neighbors(&mut distances);
        distances.truncate(k);
        distances
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)> {
        if radius.is_nan() || radius <= 0.0 || !is_finite(query) {
            return Vec::new();
        }

        let mut neighbors: Vec<(usize, f64)> = self
            .distances(query)
            .filter(|&(_, distance)| distance <= radius)
            .collect();
        sort_neighbors(&mut neighbors);
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{flat_points, random_points};

    fn line_points() -> Vec<Point3d> {
        vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(3.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(7.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_knn_sorted_ascending() {
        let tree = KdTree::new(&line_points());
        let neighbors = tree.find_k_nearest(&Point3d::new(0.4, 0.0, 0.0), 3);
        let indices: Vec<usize> = neighbors.iter().map(|n| n.0).collect();
        assert_eq!(indices, vec![0, 2, 4]);
        for w in neighbors.windows(2) {
            assert!(w[0].1 <= w[1].1);
        }
    }

    #[test]
    fn test_knn_ties_resolved_by_index() {
        let points = vec![
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(-1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
        ];
        let tree = KdTree::new(&points);
        let indices: Vec<usize> = tree
            .find_k_nearest(&Point3d::origin(), 3)
            .iter()
            .map(|n| n.0)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_radius_includes_boundary() {
        let tree = KdTree::new(&line_points());
        let indices: Vec<usize> = tree
            .find_radius_neighbors(&Point3d::origin(), 1.0)
            .iter()
            .map(|n| n.0)
            .collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_radius_may_be_empty() {
        let tree = KdTree::new(&line_points());
        assert!(tree
            .find_radius_neighbors(&Point3d::new(100.0, 0.0, 0.0), 0.5)
            .is_empty());
        assert!(tree.find_radius_neighbors(&Point3d::origin(), -1.0).is_empty());
    }

    #[test]
    fn test_flat_cloud_matches_brute_force() {
        // every point shares z = 0
        let points = flat_points(2000, 11);
        let tree = KdTree::new(&points);
        let brute = BruteForceSearch::new(&points);
        assert_eq!(tree.len(), 2000);

        for query in flat_points(20, 12) {
            let a = tree.find_k_nearest(&query, 5);
            let b = brute.find_k_nearest(&query, 5);
            assert_eq!(
                a.iter().map(|n| n.0).collect::<Vec<_>>(),
                b.iter().map(|n| n.0).collect::<Vec<_>>()
            );
            let a = tree.find_radius_neighbors(&query, 0.05);
            let b = brute.find_radius_neighbors(&query, 0.05);
            assert_eq!(a.len(), b.len());
        }
    }

    #[test]
    fn test_empty_index() {
        let tree = KdTree::new(&[]);
        assert!(tree.is_empty());
        assert!(tree.find_nearest(&Point3d::origin()).is_none());
        assert!(tree.find_radius_neighbors(&Point3d::origin(), 1.0).is_empty());
    }

    #[test]
    fn test_bounded_radius_keeps_closest() {
        let tree = KdTree::new(&line_points());
        let neighbors = tree.find_radius_neighbors_bounded(&Point3d::origin(), 10.0, Some(2));
        let indices: Vec<usize> = neighbors.iter().map(|n| n.0).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_kdtree_matches_brute_force() {
        let points = random_points(500, 11);
        let queries = random_points(40, 12);
        let tree = KdTree::new(&points);
        let brute = BruteForceSearch::new(&points);

        for query in &queries {
            let a = tree.find_k_nearest(query, 8);
            let b = brute.find_k_nearest(query, 8);
            assert_eq!(
                a.iter().map(|n| n.0).collect::<Vec<_>>(),
                b.iter().map(|n| n.0).collect::<Vec<_>>()
            );

            let a = tree.find_radius_neighbors(query, 0.3);
            let b = brute.find_radius_neighbors(query, 0.3);
            assert_eq!(
                a.iter().map(|n| n.0).collect::<Vec<_>>(),
                b.iter().map(|n| n.0).collect::<Vec<_>>()
            );
        }
    }
}
