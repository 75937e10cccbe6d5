//! Core traits for scanreg

use crate::error::{Error, Result};
use crate::point::Point3d;

/// Spatial index over a static point set
///
/// Implementations return `(index, euclidean_distance)` pairs sorted by
/// ascending distance, ties broken by ascending index. An empty radius
/// result is a normal answer, not a failure of the index.
pub trait NearestNeighborSearch {
    /// Number of indexed points
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Find the k nearest neighbors to a query point
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<(usize, f64)>;

    /// Find all neighbors within a given radius (boundary included)
    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<(usize, f64)>;

    /// Closest indexed point, if any
    fn find_nearest(&self, query: &Point3d) -> Option<(usize, f64)> {
        self.find_k_nearest(query, 1).into_iter().next()
    }

    /// Radius query keeping at most `max_neighbors` of the closest hits
    fn find_radius_neighbors_bounded(
        &self,
        query: &Point3d,
        radius: f64,
        max_neighbors: Option<usize>,
    ) -> Vec<(usize, f64)> {
        let mut neighbors = self.find_radius_neighbors(query, radius);
        if let Some(max) = max_neighbors {
            neighbors.truncate(max);
        }
        neighbors
    }
}

/// Order `(index, distance)` pairs by distance, then index
pub fn sort_neighbors(neighbors: &mut [(usize, f64)]) {
    neighbors.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
}

/// Turn a too-small neighborhood into `Error::InsufficientNeighborhood`
///
/// Callers computing descriptors absorb this error and emit a zero
/// descriptor for the query instead of aborting.
pub fn require_neighbors(query: usize, found: usize, required: usize) -> Result<()> {
    if found < required {
        return Err(Error::InsufficientNeighborhood {
            query,
            found,
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_neighbors_breaks_ties_by_index() {
        let mut neighbors = vec![(4, 1.0), (2, 0.5), (1, 1.0), (3, 0.5)];
        sort_neighbors(&mut neighbors);
        assert_eq!(neighbors, vec![(2, 0.5), (3, 0.5), (1, 1.0), (4, 1.0)]);
    }

    #[test]
    fn test_require_neighbors() {
        assert!(require_neighbors(0, 3, 3).is_ok());
        match require_neighbors(7, 0, 1) {
            Err(Error::InsufficientNeighborhood { query, found, required }) => {
                assert_eq!((query, found, required), (7, 0, 1));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
